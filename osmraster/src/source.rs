//! Source data acquisition.
//!
//! The planet extract is large, so it is streamed straight to disk rather
//! than buffered. Every file the pipeline creates locally gets a random
//! name so concurrent runs in the same working directory never collide.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

/// Errors downloading the source file.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The request failed or the body stream broke off.
    #[error("download of {url} failed: {reason}")]
    Http { url: String, reason: String },

    /// The server answered with a non-success status.
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    /// Writing the local file failed.
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Returns a random file name with the given extension, e.g. `3f2c...9a.pbf`.
pub fn unique_file_name(ext: &str) -> String {
    format!("{}.{}", Uuid::new_v4(), ext)
}

/// Streams remote source files to disk.
#[derive(Debug, Clone)]
pub struct Downloader {
    http: reqwest::Client,
}

impl Downloader {
    pub fn new() -> Result<Self, DownloadError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DownloadError::Http {
                url: String::new(),
                reason: format!("Failed to create HTTP client: {}", e),
            })?;
        Ok(Self { http })
    }

    /// Downloads `url` into `dir`, returning the path of the new file.
    ///
    /// A partially written file is removed when the download fails.
    pub async fn download(&self, url: &str, dir: &Path) -> Result<PathBuf, DownloadError> {
        let path = dir.join(unique_file_name("pbf"));
        info!(url, path = %path.display(), "Downloading source");

        match self.fetch(url, &path).await {
            Ok(bytes) => {
                info!(url, bytes, "Download complete");
                Ok(path)
            }
            Err(e) => {
                if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                    if remove_err.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %path.display(), error = %remove_err, "Failed to remove partial download");
                    }
                }
                Err(e)
            }
        }
    }

    async fn fetch(&self, url: &str, path: &Path) -> Result<u64, DownloadError> {
        let http_err = |e: reqwest::Error| DownloadError::Http {
            url: url.to_string(),
            reason: e.to_string(),
        };
        let io_err = |source| DownloadError::Io {
            path: path.to_path_buf(),
            source,
        };

        let response = self.http.get(url).send().await.map_err(http_err)?;
        if !response.status().is_success() {
            return Err(DownloadError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let mut file = tokio::fs::File::create(path).await.map_err(io_err)?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(http_err)?;
            file.write_all(&chunk).await.map_err(io_err)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(io_err)?;
        Ok(written)
    }
}
