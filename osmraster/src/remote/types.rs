//! Remote service trait, request types and errors.

use thiserror::Error;

use super::job_id::JobIdParseError;
use crate::auth::AuthError;
use crate::category::Category;
use crate::job::JobId;
use crate::BoxFuture;

/// Result type for remote service calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors talking to the remote service.
#[derive(Debug, Error)]
pub enum RemoteError {
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

    /// The addressed asset does not exist.
    #[error("asset not found: {0}")]
    NotFound(String),

    /// The response body could not be understood.
    #[error("unexpected response from {url}: {reason}")]
    Response { url: String, reason: String },

    /// The request was rejected before it was sent.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A submission response carried no recognisable job id.
    #[error(transparent)]
    JobId(#[from] JobIdParseError),
}

/// Failure detail attached to a terminal operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFailure {
    pub code: Option<i32>,
    pub message: String,
}

/// One entry of the bulk operation listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationStatus {
    /// Job id, as returned at submission.
    pub id: JobId,
    /// True once the operation is terminal.
    pub done: bool,
    /// Operation type tag (e.g. `INGEST_TABLE`, `EXPORT_IMAGE`).
    pub kind: String,
    /// State string (`PENDING`, `RUNNING`, `SUCCEEDED`, `FAILED`, `CANCELLED`).
    pub state: String,
    /// Set when the operation failed.
    pub error: Option<RemoteFailure>,
}

/// Import a CSV blob as a vector table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableImport {
    pub source_uri: String,
    pub target: String,
    /// Column holding WKT geometry.
    pub geometry_column: String,
}

/// Import a GeoTIFF blob as an image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageImport {
    pub source_uri: String,
    pub target: String,
}

/// Order-independent pixel reduction.
///
/// Overlapping contributors must produce the same result regardless of
/// the order the service visits them in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reducer {
    #[default]
    Max,
}

/// Reduce one category's features to a raster.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterizeRequest {
    /// Table to read features from.
    pub table: String,
    /// Only features with this attribute/tag are burned.
    pub category: Category,
    /// Numeric property written into matching cells.
    pub burn_property: String,
    pub reducer: Reducer,
    /// Output CRS code, e.g. `EPSG:4326`.
    pub crs: String,
    /// Output resolution in meters.
    pub scale_meters: f64,
    pub target: String,
}

/// Merge several tables into one, keeping only the listed categories.
#[derive(Debug, Clone, PartialEq)]
pub struct TableMergeRequest {
    pub sources: Vec<String>,
    pub categories: Vec<Category>,
    pub target: String,
}

/// A source band of a merge input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandSource {
    pub image: String,
    /// Zero-based band index within `image`.
    pub band: u32,
}

/// One output band of a composite.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeBand {
    /// Output band name, `{attribute}_{tag}`.
    pub name: String,
    pub category: Category,
    /// Every input band reduced into this output band.
    pub sources: Vec<BandSource>,
}

/// Stack bands from several images into one multi-band image.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeRequest {
    /// Output bands, in output order.
    pub bands: Vec<CompositeBand>,
    /// Image whose projection the output is reprojected to.
    pub projection_from: String,
    pub reducer: Reducer,
    pub target: String,
}

/// A computed export written to a new asset.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportRequest {
    Rasterize(RasterizeRequest),
    TableMerge(TableMergeRequest),
    Composite(CompositeRequest),
}

impl ExportRequest {
    /// Asset the export writes.
    pub fn target(&self) -> &str {
        match self {
            ExportRequest::Rasterize(r) => &r.target,
            ExportRequest::TableMerge(r) => &r.target,
            ExportRequest::Composite(r) => &r.target,
        }
    }

    /// Short description used for the remote task name.
    pub fn description(&self) -> String {
        match self {
            ExportRequest::Rasterize(r) => {
                format!("osm_{}_{}", r.category.attribute, r.category.tag)
            }
            ExportRequest::TableMerge(_) => "osm_roads".to_string(),
            ExportRequest::Composite(r) => format!("osm_composite_{}bands", r.bands.len()),
        }
    }
}

/// Remote compute/asset service.
///
/// Submission calls return as soon as the service acknowledges the job;
/// progress is observed through [`RemoteService::list_operations`].
///
/// # Dyn Compatibility
///
/// Methods return [`BoxFuture`] so the service can be shared as
/// `Arc<dyn RemoteService>`.
pub trait RemoteService: Send + Sync {
    /// Starts importing a CSV blob as a table.
    fn submit_table_import<'a>(&'a self, request: &'a TableImport)
        -> BoxFuture<'a, RemoteResult<JobId>>;

    /// Starts importing a GeoTIFF blob as an image.
    fn submit_image_import<'a>(&'a self, request: &'a ImageImport)
        -> BoxFuture<'a, RemoteResult<JobId>>;

    /// Starts a computed export.
    fn submit_export<'a>(&'a self, request: &'a ExportRequest)
        -> BoxFuture<'a, RemoteResult<JobId>>;

    /// Returns true if the asset exists.
    fn get_asset<'a>(&'a self, asset_id: &'a str) -> BoxFuture<'a, RemoteResult<bool>>;

    /// Deletes an asset. Deleting an absent asset succeeds.
    fn delete_asset<'a>(&'a self, asset_id: &'a str) -> BoxFuture<'a, RemoteResult<()>>;

    /// Status of every operation in the current project, in one call.
    fn list_operations(&self) -> BoxFuture<'_, RemoteResult<Vec<OperationStatus>>>;
}
