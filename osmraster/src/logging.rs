//! Log output setup and stage timing.
//!
//! Logs go to stderr and, optionally, to a file. The level filter comes
//! from `RUST_LOG` when set, otherwise from the caller's default.
//!
//! ```text
//! RUST_LOG=osmraster=debug osmraster run ...
//! ```

use std::path::{Path, PathBuf};
use std::time::Instant;

use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::UtcOffset;
use tracing::info;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub use tracing_appender::non_blocking::WorkerGuard;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// Errors installing the subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter {filter:?}: {reason}")]
    Filter { filter: String, reason: String },

    #[error("log file {} has no file name", .0.display())]
    FileName(PathBuf),

    #[error("failed to install log subscriber: {0}")]
    Init(String),
}

/// Where and how much to log.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Filter directive used when `RUST_LOG` is unset; [`DEFAULT_FILTER`]
    /// when `None`.
    pub filter: Option<String>,
    /// Also write logs to this file.
    pub file: Option<PathBuf>,
}

/// Installs the global subscriber.
///
/// The returned guard flushes the log file when dropped; keep it alive for
/// the life of the process.
pub fn init_logging(options: &LogOptions) -> Result<Option<WorkerGuard>, LoggingError> {
    let directive = options.filter.as_deref().unwrap_or(DEFAULT_FILTER);
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(directive).map_err(|e| LoggingError::Filter {
            filter: directive.to_string(),
            reason: e.to_string(),
        })?,
    };

    // Must be read before any threads are spawned.
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let timer = OffsetTime::new(offset, Rfc3339);

    let (file_layer, guard) = match options.file {
        Some(ref path) => {
            let (writer, guard) = file_writer(path)?;
            let layer = fmt::layer()
                .with_timer(timer.clone())
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_timer(timer)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))?;

    Ok(guard)
}

fn file_writer(
    path: &Path,
) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard), LoggingError> {
    let file_name = path
        .file_name()
        .ok_or_else(|| LoggingError::FileName(path.to_path_buf()))?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let appender = tracing_appender::rolling::never(dir, file_name);
    Ok(tracing_appender::non_blocking(appender))
}

/// Logs how long a pipeline stage took when it goes out of scope.
#[derive(Debug)]
pub struct StageTimer {
    stage: &'static str,
    started: Instant,
}

impl StageTimer {
    pub fn start(stage: &'static str) -> Self {
        info!(stage, "Stage started");
        Self {
            stage,
            started: Instant::now(),
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        info!(
            stage = self.stage,
            elapsed_secs = elapsed.as_secs_f64(),
            "Stage finished"
        );
    }
}
