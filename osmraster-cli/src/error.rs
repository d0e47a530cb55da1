//! CLI error type.

use std::fmt;

use osmraster::config::ConfigError;
use osmraster::error::PipelineError;
use osmraster::logging::LoggingError;

/// Exit code for runs that finished with failed units of work.
pub const EXIT_FAILED: i32 = 1;
/// Exit code for runs that never started remote work.
pub const EXIT_PRECONDITION: i32 = 2;

/// Errors surfaced to the user.
#[derive(Debug)]
pub enum CliError {
    /// Bad or missing configuration.
    Config(String),
    /// The log subscriber could not be installed.
    Logging(String),
    /// The async runtime could not be built.
    Runtime(String),
    /// The pipeline aborted.
    Pipeline(PipelineError),
    /// The pipeline finished, but some units of work failed.
    Failed { failed: usize },
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) => EXIT_PRECONDITION,
            CliError::Pipeline(e) if e.is_precondition() => EXIT_PRECONDITION,
            _ => EXIT_FAILED,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Logging(msg) => write!(f, "Failed to set up logging: {}", msg),
            CliError::Runtime(msg) => write!(f, "Failed to start runtime: {}", msg),
            CliError::Pipeline(e) => write!(f, "Pipeline failed: {}", e),
            CliError::Failed { failed } => write!(f, "{} unit(s) of work failed", failed),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Pipeline(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<LoggingError> for CliError {
    fn from(e: LoggingError) -> Self {
        CliError::Logging(e.to_string())
    }
}

impl From<PipelineError> for CliError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Config(e) => CliError::Config(e.to_string()),
            other => CliError::Pipeline(other),
        }
    }
}
