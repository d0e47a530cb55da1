//! Blob storage for staging files.
//!
//! CSVs are staged in a bucket before Earth Engine imports them, and the
//! band metadata document for merges is read from one. Blobs are addressed
//! by `gs://bucket/object` URIs.
//!
//! # Implementations
//!
//! - [`GcsBlobStore`] - Google Cloud Storage JSON API over `reqwest`
//! - `memory::MemoryBlobStore` - in-memory store (tests only)

mod gcs;
mod uri;

#[cfg(test)]
pub(crate) mod memory;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::auth::AuthError;
use crate::BoxFuture;

pub use gcs::{GcsBlobStore, DEFAULT_STORAGE_BASE, DEFAULT_UPLOAD_BASE};
pub use uri::BlobUri;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during blob operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The URI isn't a `gs://bucket/object` URI.
    #[error("invalid blob uri: {0}")]
    InvalidUri(String),

    /// Reading the local file to upload failed.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No access token could be obtained.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// The request never produced a response.
    #[error("request to {url} failed: {reason}")]
    Http { url: String, reason: String },

    /// The service answered with a non-success status.
    #[error("{url} returned HTTP {status}: {message}")]
    Status {
        url: String,
        status: u16,
        message: String,
    },

    /// The blob does not exist.
    #[error("blob not found: {0}")]
    NotFound(String),
}

/// Blob storage operations used by the pipeline.
pub trait BlobStore: Send + Sync {
    /// Uploads a local file, returning its `gs://` URI.
    fn upload<'a>(&'a self, local_path: &'a Path) -> BoxFuture<'a, StorageResult<String>>;

    /// Deletes a blob. Deleting an absent blob succeeds.
    fn delete<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, StorageResult<()>>;

    /// Returns true if the blob exists.
    fn exists<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, StorageResult<bool>>;

    /// Reads a blob's contents.
    fn read_text<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, StorageResult<Vec<u8>>>;
}
