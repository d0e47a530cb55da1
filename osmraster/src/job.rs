//! Job records for in-flight remote operations.
//!
//! A [`JobRecord`] is created when a job is submitted, mutated only through
//! [`JobRecord::update`] as status reports arrive, and dropped from the
//! registry the moment it is observed terminal.
//!
//! ```text
//!            ┌──────────► Succeeded
//!  Pending ──┤
//!            └──────────► Failed
//! ```

use std::fmt;

use thiserror::Error;

use crate::category::Category;
use crate::remote::OperationStatus;

/// State string the remote service reports for a successful operation.
pub const STATE_SUCCEEDED: &str = "SUCCEEDED";

/// Opaque job handle returned by the remote service at submission time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// What a job produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// CSV blob imported as a vector table.
    TableImport,
    /// GeoTIFF blob imported as an image.
    ImageImport,
    /// Vector table reduced to a per-category raster.
    Rasterize,
    /// Several tables merged into one.
    TableMerge,
    /// Several images stacked into one multi-band image.
    Composite,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobKind::TableImport => "table-import",
            JobKind::ImageImport => "image-import",
            JobKind::Rasterize => "rasterize",
            JobKind::TableMerge => "table-merge",
            JobKind::Composite => "composite",
        };
        f.write_str(name)
    }
}

/// Remote classification of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobState {
    #[default]
    Pending,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobState::Pending)
    }
}

/// Failure of a single unit of work.
///
/// These are collected per job and reported at the end of the run; none of
/// them aborts sibling jobs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobError {
    /// The remote service rejected the request.
    #[error("submission failed: {0}")]
    Submission(String),

    /// The remote service accepted the job but it terminated unsuccessfully.
    #[error("remote job failed ({state}): {message}")]
    Conversion {
        state: String,
        code: Option<i32>,
        message: String,
    },

    /// The job was still pending when the poll deadline passed.
    #[error("job still pending after {elapsed_secs}s")]
    Timeout { elapsed_secs: u64 },
}

/// One in-flight remote operation.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    id: JobId,
    kind: JobKind,
    category: Option<Category>,
    target: String,
    completed: bool,
    state: JobState,
    result_asset_path: Option<String>,
    error: Option<JobError>,
}

impl JobRecord {
    /// Creates a pending record for a freshly submitted job.
    ///
    /// `target` is the asset the job writes; it becomes the result path on
    /// success.
    pub fn new(id: JobId, kind: JobKind, target: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            category: None,
            target: target.into(),
            completed: false,
            state: JobState::Pending,
            result_asset_path: None,
            error: None,
        }
    }

    /// Ties the job to the category it works on.
    pub fn for_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn category(&self) -> Option<&Category> {
        self.category.as_ref()
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn result_asset_path(&self) -> Option<&str> {
        self.result_asset_path.as_deref()
    }

    pub fn error(&self) -> Option<&JobError> {
        self.error.as_ref()
    }

    /// Applies a status report from the remote service.
    ///
    /// Reports for other ids are ignored and return false. Once terminal the
    /// record no longer changes.
    pub fn update(&mut self, status: &OperationStatus) -> bool {
        if status.id != self.id || self.completed {
            return false;
        }

        if !status.done {
            self.state = JobState::Pending;
            return true;
        }

        self.completed = true;
        if status.state == STATE_SUCCEEDED && status.error.is_none() {
            self.state = JobState::Succeeded;
            self.result_asset_path = Some(self.target.clone());
        } else {
            self.state = JobState::Failed;
            let (code, message) = match status.error {
                Some(ref failure) => (failure.code, failure.message.clone()),
                None => (None, format!("operation ended in state {}", status.state)),
            };
            self.error = Some(JobError::Conversion {
                state: status.state.clone(),
                code,
                message,
            });
        }
        true
    }

    /// Marks the job failed without a remote report (e.g. poll deadline).
    pub fn fail(&mut self, error: JobError) {
        self.completed = true;
        self.state = JobState::Failed;
        self.result_asset_path = None;
        self.error = Some(error);
    }
}
