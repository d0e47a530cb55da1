//! Pipeline-level errors.
//!
//! These abort a run. Failures of a single unit of work are not errors at
//! this level; they are [`crate::job::JobError`]s collected in the
//! [`crate::pipeline::PipelineReport`].

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::convert::ConvertError;
use crate::merge::{MergeError, MetadataError};
use crate::remote::RemoteError;
use crate::source::DownloadError;
use crate::storage::StorageError;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors that end a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A configured input file does not exist.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// A configured input table does not exist.
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// A merge was asked to combine nothing, or nothing configured.
    #[error("merge failed: {0}")]
    Merge(#[from] MergeError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("remote service error: {0}")]
    Remote(#[from] RemoteError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("conversion failed: {0}")]
    Convert(#[from] ConvertError),

    #[error("download failed: {0}")]
    Download(#[from] DownloadError),

    #[error("band metadata error: {0}")]
    Metadata(#[from] MetadataError),

    /// Reading a local input failed.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A blocking worker panicked or was cancelled.
    #[error("{0} worker did not finish: {1}")]
    Worker(&'static str, String),
}

impl PipelineError {
    /// True for errors raised before any remote work was submitted.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            PipelineError::FileNotFound(_)
                | PipelineError::TableNotFound(_)
                | PipelineError::Config(_)
        )
    }
}
