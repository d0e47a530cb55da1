//! Pipeline configuration.
//!
//! A [`PipelineConfig`] is built once at startup and passed by reference to
//! every component. Values are layered, later layers winning:
//!
//! ```text
//! defaults ──► config file ──► environment ──► command line
//! ```
//!
//! The file layer is [`ConfigFile`]; the environment layer is
//! [`PipelineConfig::apply_env`]. Nothing else in the crate reads the
//! environment.

mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use thiserror::Error;

use crate::asset::{asset_root, AssetIds};
use crate::category::CategorySet;
use crate::poller::{DEFAULT_MAX_INCREMENTS, DEFAULT_POLL_UNIT};
use crate::rasterize::{DEFAULT_CRS, DEFAULT_SCALE_METERS};

pub use file::{default_config_path, ConfigFile};

/// Asset folder under the project when none is configured.
pub const DEFAULT_ASSET_FOLDER: &str = "osm";

/// Composite name when none is configured.
pub const DEFAULT_OUTPUT_NAME: &str = "osm";

/// Environment variable holding the source download URL.
pub const ENV_SOURCE_URL: &str = "OSM_DATA_SOURCE";

/// Environment variable holding the staging bucket.
pub const ENV_BUCKET: &str = "OSMRASTER_BUCKET";

/// Environment variable holding the cloud project.
pub const ENV_PROJECT: &str = "OSMRASTER_PROJECT";

/// Environment variable holding the service account key file.
pub const ENV_KEY_FILE: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read or parsed.
    #[error("failed to load {}: {reason}", path.display())]
    Load { path: PathBuf, reason: String },

    /// A value could not be parsed.
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    /// A required value is missing.
    #[error("{0} is not configured")]
    Missing(&'static str),
}

/// Where the features come from.
///
/// Later stages can be entered directly by configuring their input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind<'a> {
    /// Rasterize straight from an existing table.
    Table(&'a str),
    /// Split and import a prepared `WKT,attribute,tag,burn` CSV.
    Csv(&'a Path),
    /// Convert a local geometry file.
    File(&'a Path),
    /// Download, then convert.
    Url(&'a str),
}

/// Everything a pipeline run needs to know.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub project: String,
    pub asset_folder: String,
    pub bucket: String,
    pub date: NaiveDate,

    pub source_url: Option<String>,
    pub source_file: Option<PathBuf>,
    pub csv_file: Option<PathBuf>,
    pub table_id: Option<String>,
    /// `gs://` URI or local path of the band metadata document.
    pub metadata: Option<String>,

    pub overwrite: bool,
    pub skip_cleanup: bool,
    pub import_roads: bool,
    pub output_name: String,

    pub categories: CategorySet,
    pub road_categories: CategorySet,

    pub crs: String,
    pub scale_meters: f64,

    pub poll_unit: Duration,
    pub poll_max_increments: u32,
    pub poll_timeout: Option<Duration>,

    pub work_dir: PathBuf,
    pub ogr2ogr: PathBuf,
    pub osm_config_file: Option<PathBuf>,
    pub gcloud: PathBuf,
    pub key_file: Option<PathBuf>,
    pub access_token: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            project: String::new(),
            asset_folder: DEFAULT_ASSET_FOLDER.to_string(),
            bucket: String::new(),
            date: chrono::Utc::now().date_naive(),
            source_url: None,
            source_file: None,
            csv_file: None,
            table_id: None,
            metadata: None,
            overwrite: false,
            skip_cleanup: false,
            import_roads: false,
            output_name: DEFAULT_OUTPUT_NAME.to_string(),
            categories: CategorySet::defaults(),
            road_categories: CategorySet::default_roads(),
            crs: DEFAULT_CRS.to_string(),
            scale_meters: DEFAULT_SCALE_METERS,
            poll_unit: DEFAULT_POLL_UNIT,
            poll_max_increments: DEFAULT_MAX_INCREMENTS,
            poll_timeout: None,
            work_dir: PathBuf::from("."),
            ogr2ogr: PathBuf::from("ogr2ogr"),
            osm_config_file: None,
            gcloud: PathBuf::from("gcloud"),
            key_file: None,
            access_token: None,
        }
    }
}

impl PipelineConfig {
    pub fn new(project: impl Into<String>, bucket: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            project: project.into(),
            bucket: bucket.into(),
            date,
            ..Default::default()
        }
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = date;
        self
    }

    pub fn with_asset_folder(mut self, folder: impl Into<String>) -> Self {
        self.asset_folder = folder.into();
        self
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    pub fn with_source_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_file = Some(path.into());
        self
    }

    pub fn with_csv_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.csv_file = Some(path.into());
        self
    }

    pub fn with_table_id(mut self, table: impl Into<String>) -> Self {
        self.table_id = Some(table.into());
        self
    }

    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_skip_cleanup(mut self, skip: bool) -> Self {
        self.skip_cleanup = skip;
        self
    }

    pub fn with_import_roads(mut self, import_roads: bool) -> Self {
        self.import_roads = import_roads;
        self
    }

    pub fn with_output_name(mut self, name: impl Into<String>) -> Self {
        self.output_name = name.into();
        self
    }

    pub fn with_categories(mut self, categories: CategorySet) -> Self {
        self.categories = categories;
        self
    }

    pub fn with_road_categories(mut self, roads: CategorySet) -> Self {
        self.road_categories = roads;
        self
    }

    pub fn with_grid(mut self, crs: impl Into<String>, scale_meters: f64) -> Self {
        self.crs = crs.into();
        self.scale_meters = scale_meters;
        self
    }

    pub fn with_poll_backoff(mut self, unit: Duration, max_increments: u32) -> Self {
        self.poll_unit = unit;
        self.poll_max_increments = max_increments;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    pub fn with_key_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_file = Some(path.into());
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// `projects/{project}/assets/{folder}`.
    pub fn asset_root(&self) -> String {
        asset_root(&self.project, &self.asset_folder)
    }

    /// Resolver for this run's root and date.
    pub fn asset_ids(&self) -> AssetIds {
        AssetIds::new(self.asset_root(), self.date)
    }

    /// The most advanced configured entry point.
    pub fn source(&self) -> Result<SourceKind<'_>, ConfigError> {
        if let Some(ref table) = self.table_id {
            Ok(SourceKind::Table(table))
        } else if let Some(ref csv) = self.csv_file {
            Ok(SourceKind::Csv(csv))
        } else if let Some(ref file) = self.source_file {
            Ok(SourceKind::File(file))
        } else if let Some(ref url) = self.source_url {
            Ok(SourceKind::Url(url))
        } else {
            Err(ConfigError::Missing("source (url, file, csv or table)"))
        }
    }

    /// Fills unset values from environment variables.
    ///
    /// `lookup` is normally `std::env::var(..).ok()`; tests pass a map.
    pub fn apply_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty(ENV_SOURCE_URL) {
            self.source_url = Some(url);
        }
        if let Some(bucket) = non_empty(ENV_BUCKET) {
            self.bucket = bucket;
        }
        if let Some(project) = non_empty(ENV_PROJECT) {
            self.project = project;
        }
        if let Some(key_file) = non_empty(ENV_KEY_FILE) {
            self.key_file = Some(PathBuf::from(key_file));
        }
        self
    }

    /// Checks everything a run needs is present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project.trim().is_empty() {
            return Err(ConfigError::Missing("project"));
        }
        if self.bucket.trim().is_empty() && self.table_id.is_none() {
            return Err(ConfigError::Missing("bucket"));
        }
        if self.categories.is_empty() {
            return Err(ConfigError::Missing("categories"));
        }
        if self.output_name.trim().is_empty() {
            return Err(ConfigError::Missing("output name"));
        }
        if self.scale_meters.is_nan() || self.scale_meters <= 0.0 {
            return Err(ConfigError::Invalid {
                key: "scale".to_string(),
                value: self.scale_meters.to_string(),
                reason: "must be positive".to_string(),
            });
        }
        self.source()?;
        Ok(())
    }
}
