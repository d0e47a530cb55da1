//! Shared setup for commands that run the pipeline.
//!
//! Configuration is layered: built-in defaults, then the config file, then
//! environment variables. Command-line flags are applied last by each
//! command.

use std::path::{Path, PathBuf};

use osmraster::config::{ConfigFile, PipelineConfig};
use osmraster::logging::{init_logging, LogOptions, WorkerGuard};
use tracing::info;

use crate::error::CliError;

/// Loads the base configuration: defaults, config file, environment.
pub fn load_config(config_path: Option<&Path>) -> Result<PipelineConfig, CliError> {
    let file = match config_path {
        Some(path) => Some(ConfigFile::load(path)?),
        None => ConfigFile::load_default()?,
    };

    let config = match file {
        Some(file) => file.apply(PipelineConfig::default())?,
        None => PipelineConfig::default(),
    };
    Ok(config.apply_env(|key| std::env::var(key).ok()))
}

/// Logging plus a runtime for one command invocation.
pub struct CliRunner {
    _log_guard: Option<WorkerGuard>,
}

impl CliRunner {
    /// Installs logging.
    pub fn new(log_file: Option<PathBuf>, log_level: Option<String>) -> Result<Self, CliError> {
        let options = LogOptions {
            filter: log_level,
            file: log_file,
        };
        let guard = init_logging(&options)?;
        Ok(Self { _log_guard: guard })
    }

    pub fn log_startup(&self, command: &str) {
        info!(
            version = osmraster::VERSION,
            command, "osmraster starting"
        );
    }

    /// Single-threaded runtime; the pipeline spends its time waiting on the
    /// remote service.
    pub fn runtime(&self) -> Result<tokio::runtime::Runtime, CliError> {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| CliError::Runtime(e.to_string()))
    }
}
