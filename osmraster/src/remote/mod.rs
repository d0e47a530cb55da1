//! Remote compute and asset service boundary.
//!
//! Everything the pipeline asks of Earth Engine goes through the
//! [`RemoteService`] trait: submitting imports and exports, checking and
//! deleting assets, and the bulk operation listing the poller relies on.
//!
//! # Implementations
//!
//! - [`EarthEngineClient`] - Earth Engine REST API over `reqwest`
//! - `mock::MockRemoteService` - scripted in-memory service (tests only)
//!
//! # Job ids
//!
//! The service's own text formats are confined to [`parse_job_id`]; the rest
//! of the crate only ever sees [`crate::job::JobId`].

mod dispatch;
mod earth_engine;
mod expression;
mod job_id;
mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use dispatch::{Dispatcher, ImportKind, Target, WKT_COLUMN};
pub use earth_engine::{EarthEngineClient, DEFAULT_API_BASE};
pub use job_id::{parse_job_id, JobIdParseError};
pub use types::{
    BandSource, CompositeBand, CompositeRequest, ExportRequest, ImageImport, OperationStatus,
    RasterizeRequest, Reducer, RemoteError, RemoteFailure, RemoteResult, RemoteService,
    TableImport, TableMergeRequest,
};
