//! Cleanup of transient assets.
//!
//! Everything a run creates only to feed a later step (staged blobs,
//! per-category tables, imported merge shards, local downloads and CSVs)
//! is registered with the [`CleanupCoordinator`] as soon as it exists. The
//! pipeline calls [`CleanupCoordinator::cleanup`] on every exit path.
//!
//! Deletion is best-effort: an asset that is already gone counts as
//! deleted, and a failure on one asset never stops the others.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::remote::RemoteService;
use crate::storage::BlobStore;

/// Something the run created that must not outlive it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransientAsset {
    /// Staged blob, by `gs://` URI.
    Blob(String),
    /// Remote table, by asset id.
    Table(String),
    /// Remote image, by asset id.
    Image(String),
    /// Local file or directory.
    LocalFile(PathBuf),
}

impl fmt::Display for TransientAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransientAsset::Blob(uri) => write!(f, "blob {}", uri),
            TransientAsset::Table(id) => write!(f, "table {}", id),
            TransientAsset::Image(id) => write!(f, "image {}", id),
            TransientAsset::LocalFile(path) => write!(f, "file {}", path.display()),
        }
    }
}

/// Outcome of a cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Cleanup was disabled by configuration.
    pub skipped: bool,
    pub deleted: usize,
    /// Assets that could not be deleted, with the reason.
    pub failed: Vec<(TransientAsset, String)>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Tracks transient assets and deletes them at the end of a run.
pub struct CleanupCoordinator {
    service: Arc<dyn RemoteService>,
    blobs: Arc<dyn BlobStore>,
    skip: bool,
    assets: Vec<TransientAsset>,
}

impl CleanupCoordinator {
    pub fn new(service: Arc<dyn RemoteService>, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            service,
            blobs,
            skip: false,
            assets: Vec::new(),
        }
    }

    /// Leaves every registered asset in place.
    pub fn with_skip(mut self, skip: bool) -> Self {
        self.skip = skip;
        self
    }

    /// Registers an asset for deletion. Duplicates are ignored.
    pub fn register(&mut self, asset: TransientAsset) {
        if !self.assets.contains(&asset) {
            debug!(asset = %asset, "Registered transient asset");
            self.assets.push(asset);
        }
    }

    /// Assets registered and not yet cleaned up.
    pub fn pending(&self) -> &[TransientAsset] {
        &self.assets
    }

    /// Deletes every registered asset.
    ///
    /// The registered list is consumed, so a second call does nothing.
    /// Never fails; problems are logged and returned in the report.
    pub async fn cleanup(&mut self) -> CleanupReport {
        let assets = std::mem::take(&mut self.assets);

        if self.skip {
            info!(assets = assets.len(), "Cleanup skipped");
            return CleanupReport {
                skipped: true,
                ..Default::default()
            };
        }

        let mut report = CleanupReport::default();
        for asset in assets {
            match self.delete(&asset).await {
                Ok(()) => {
                    debug!(asset = %asset, "Deleted transient asset");
                    report.deleted += 1;
                }
                Err(reason) => {
                    warn!(asset = %asset, error = %reason, "Failed to delete transient asset");
                    report.failed.push((asset, reason));
                }
            }
        }

        info!(
            deleted = report.deleted,
            failed = report.failed.len(),
            "Cleanup complete"
        );
        report
    }

    async fn delete(&self, asset: &TransientAsset) -> Result<(), String> {
        match asset {
            TransientAsset::Blob(uri) => self.blobs.delete(uri).await.map_err(|e| e.to_string()),
            TransientAsset::Table(id) | TransientAsset::Image(id) => {
                self.service.delete_asset(id).await.map_err(|e| e.to_string())
            }
            TransientAsset::LocalFile(path) => {
                let result = if path.is_dir() {
                    tokio::fs::remove_dir_all(path).await
                } else {
                    tokio::fs::remove_file(path).await
                };
                match result {
                    Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.to_string()),
                    _ => Ok(()),
                }
            }
        }
    }
}
