//! Job submission.
//!
//! The [`Dispatcher`] turns a submission into a pending [`JobRecord`]. A
//! rejected submission becomes a [`JobError::Submission`] for that one unit
//! of work; it is the caller's job to collect it and carry on with the rest
//! of the fan-out.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::types::{ExportRequest, ImageImport, RemoteService, TableImport};
use crate::job::{JobError, JobKind, JobRecord};

/// Geometry column written by the CSV converter.
pub const WKT_COLUMN: &str = "WKT";

/// What kind of blob is being imported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    Table,
    Image,
}

/// State of a job's target asset before submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The asset exists and is kept; nothing should be submitted.
    Existing,
    /// The asset is absent (or was just deleted); submit away.
    Vacant,
}

/// Submits jobs to the remote service.
#[derive(Clone)]
pub struct Dispatcher {
    service: Arc<dyn RemoteService>,
}

impl Dispatcher {
    pub fn new(service: Arc<dyn RemoteService>) -> Self {
        Self { service }
    }

    /// Submits an import of `source_uri` into `target_asset_id`.
    ///
    /// Returns once the service has acknowledged the job, not once it has
    /// finished.
    pub async fn submit(
        &self,
        kind: ImportKind,
        source_uri: &str,
        target_asset_id: &str,
    ) -> Result<JobRecord, JobError> {
        validate_target(target_asset_id)?;
        if source_uri.is_empty() {
            return Err(JobError::Submission("empty source uri".to_string()));
        }

        let result = match kind {
            ImportKind::Table => {
                let request = TableImport {
                    source_uri: source_uri.to_string(),
                    target: target_asset_id.to_string(),
                    geometry_column: WKT_COLUMN.to_string(),
                };
                self.service.submit_table_import(&request).await
            }
            ImportKind::Image => {
                let request = ImageImport {
                    source_uri: source_uri.to_string(),
                    target: target_asset_id.to_string(),
                };
                self.service.submit_image_import(&request).await
            }
        };

        let job_kind = match kind {
            ImportKind::Table => JobKind::TableImport,
            ImportKind::Image => JobKind::ImageImport,
        };

        match result {
            Ok(id) => {
                debug!(job_id = %id, kind = %job_kind, asset = target_asset_id, "Submitted import");
                Ok(JobRecord::new(id, job_kind, target_asset_id))
            }
            Err(e) => {
                warn!(kind = %job_kind, asset = target_asset_id, error = %e, "Import rejected");
                Err(JobError::Submission(e.to_string()))
            }
        }
    }

    /// Decides whether a job writing `target` should run.
    ///
    /// An existing target is kept unless `overwrite` is set, in which case
    /// it is deleted. Either failure is charged to the unit of work.
    pub async fn vacate(&self, target: &str, overwrite: bool) -> Result<Target, JobError> {
        let exists = self
            .service
            .get_asset(target)
            .await
            .map_err(|e| JobError::Submission(format!("existence check failed: {}", e)))?;

        if !exists {
            return Ok(Target::Vacant);
        }
        if !overwrite {
            debug!(asset = target, "Asset exists, skipping");
            return Ok(Target::Existing);
        }

        self.service
            .delete_asset(target)
            .await
            .map_err(|e| JobError::Submission(format!("delete before overwrite failed: {}", e)))?;
        info!(asset = target, "Deleted asset for overwrite");
        Ok(Target::Vacant)
    }

    /// Submits a computed export.
    pub async fn submit_export(&self, request: &ExportRequest) -> Result<JobRecord, JobError> {
        validate_target(request.target())?;

        let kind = match request {
            ExportRequest::Rasterize(_) => JobKind::Rasterize,
            ExportRequest::TableMerge(_) => JobKind::TableMerge,
            ExportRequest::Composite(_) => JobKind::Composite,
        };

        match self.service.submit_export(request).await {
            Ok(id) => {
                debug!(job_id = %id, kind = %kind, asset = request.target(), "Submitted export");
                Ok(JobRecord::new(id, kind, request.target()))
            }
            Err(e) => {
                warn!(kind = %kind, asset = request.target(), error = %e, "Export rejected");
                Err(JobError::Submission(e.to_string()))
            }
        }
    }
}

/// Asset ids must look like `projects/{project}/assets/{path}`.
fn validate_target(target: &str) -> Result<(), JobError> {
    let mut parts = target.split('/');
    let well_formed = parts.next() == Some("projects")
        && parts.next().is_some_and(|p| !p.is_empty())
        && parts.next() == Some("assets")
        && {
            let rest: Vec<&str> = parts.collect();
            !rest.is_empty() && rest.iter().all(|segment| !segment.is_empty())
        };

    if well_formed {
        Ok(())
    } else {
        Err(JobError::Submission(format!(
            "malformed asset id: {}",
            target
        )))
    }
}
