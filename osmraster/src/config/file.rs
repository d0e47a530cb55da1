//! INI configuration file.
//!
//! ```ini
//! [pipeline]
//! project = hii
//! bucket = hii-osm
//! folder = osm
//! source_url = https://planet.openstreetmap.org/pbf/planet-latest.osm.pbf
//! metadata = gs://hii-osm/2021-12-31/metadata.json
//! import_roads = true
//! output_image = osm
//! poll_max_increments = 10
//! poll_timeout_secs = 86400
//!
//! [tools]
//! ogr2ogr = /usr/bin/ogr2ogr
//! osm_config = /app/osm.ini
//!
//! [auth]
//! key_file = /secrets/service-account.json
//! ```
//!
//! Every key is optional; absent keys leave the current value alone.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;
use tracing::debug;

use super::{ConfigError, PipelineConfig};

const PIPELINE: &str = "pipeline";
const TOOLS: &str = "tools";
const AUTH: &str = "auth";

/// `~/.osmraster/config.ini`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".osmraster").join("config.ini"))
}

/// A parsed config file.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    ini: Ini,
}

impl ConfigFile {
    /// Reads and parses `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Load {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        debug!(path = %path.display(), "Loaded config file");
        Ok(Self { ini })
    }

    /// Loads the default config file, if there is one.
    pub fn load_default() -> Result<Option<Self>, ConfigError> {
        match default_config_path() {
            Some(path) if path.is_file() => Self::load(&path).map(Some),
            _ => Ok(None),
        }
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Load {
            path: PathBuf::from("<string>"),
            reason: e.to_string(),
        })?;
        Ok(Self { ini })
    }

    fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.ini
            .get_from(Some(section), key)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, section: &str, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(section, key)
            .map(|value| {
                value.parse::<T>().map_err(|e| ConfigError::Invalid {
                    key: format!("{}.{}", section, key),
                    value: value.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    fn flag(&self, section: &str, key: &str) -> Result<Option<bool>, ConfigError> {
        let Some(value) = self.get(section, key) else {
            return Ok(None);
        };
        match value.to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(Some(true)),
            "false" | "no" | "off" | "0" => Ok(Some(false)),
            _ => Err(ConfigError::Invalid {
                key: format!("{}.{}", section, key),
                value: value.to_string(),
                reason: "expected true or false".to_string(),
            }),
        }
    }

    /// Overlays the file's values onto `config`.
    pub fn apply(&self, mut config: PipelineConfig) -> Result<PipelineConfig, ConfigError> {
        let text = |section, key| self.get(section, key).map(str::to_string);

        if let Some(v) = text(PIPELINE, "project") {
            config.project = v;
        }
        if let Some(v) = text(PIPELINE, "bucket") {
            config.bucket = v;
        }
        if let Some(v) = text(PIPELINE, "folder") {
            config.asset_folder = v;
        }
        if let Some(v) = self.parsed::<chrono::NaiveDate>(PIPELINE, "date")? {
            config.date = v;
        }
        if let Some(v) = text(PIPELINE, "source_url") {
            config.source_url = Some(v);
        }
        if let Some(v) = text(PIPELINE, "metadata") {
            config.metadata = Some(v);
        }
        if let Some(v) = text(PIPELINE, "output_image") {
            config.output_name = v;
        }
        if let Some(v) = self.flag(PIPELINE, "overwrite")? {
            config.overwrite = v;
        }
        if let Some(v) = self.flag(PIPELINE, "skip_cleanup")? {
            config.skip_cleanup = v;
        }
        if let Some(v) = self.flag(PIPELINE, "import_roads")? {
            config.import_roads = v;
        }
        if let Some(v) = text(PIPELINE, "crs") {
            config.crs = v;
        }
        if let Some(v) = self.parsed::<f64>(PIPELINE, "scale")? {
            config.scale_meters = v;
        }
        if let Some(v) = self.parsed::<f64>(PIPELINE, "poll_unit_secs")? {
            config.poll_unit = Duration::try_from_secs_f64(v).map_err(|e| ConfigError::Invalid {
                key: format!("{}.poll_unit_secs", PIPELINE),
                value: v.to_string(),
                reason: e.to_string(),
            })?;
        }
        if let Some(v) = self.parsed::<u32>(PIPELINE, "poll_max_increments")? {
            config.poll_max_increments = v;
        }
        if let Some(v) = self.parsed::<u64>(PIPELINE, "poll_timeout_secs")? {
            config.poll_timeout = Some(Duration::from_secs(v));
        }
        if let Some(v) = text(PIPELINE, "work_dir") {
            config.work_dir = PathBuf::from(v);
        }

        if let Some(v) = text(TOOLS, "ogr2ogr") {
            config.ogr2ogr = PathBuf::from(v);
        }
        if let Some(v) = text(TOOLS, "osm_config") {
            config.osm_config_file = Some(PathBuf::from(v));
        }
        if let Some(v) = text(TOOLS, "gcloud") {
            config.gcloud = PathBuf::from(v);
        }

        if let Some(v) = text(AUTH, "key_file") {
            config.key_file = Some(PathBuf::from(v));
        }
        if let Some(v) = text(AUTH, "token") {
            config.access_token = Some(v);
        }

        Ok(config)
    }
}
