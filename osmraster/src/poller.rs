//! Job registry and polling loop.
//!
//! The poller owns no jobs of its own; it drains a [`JobRegistry`] filled by
//! the dispatcher. Each pass makes exactly one bulk `list_operations` call,
//! however many jobs are tracked.
//!
//! ```text
//!            ┌─────────────────────────────────────────────┐
//!            │                                             │
//!            ▼                                             │
//!   list_operations ──► registry.apply ──► completed ──► handler
//!            │                                             │
//!            │ registry non-empty                          │
//!            ▼                                             │
//!   sleep(unit × increment²) ──────────────────────────────┘
//! ```
//!
//! A record leaves the registry in the same pass that observes it terminal,
//! so a job that the service keeps reporting as done triggers its handler
//! exactly once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::job::{JobError, JobId, JobRecord, JobState};
use crate::remote::{OperationStatus, RemoteService};
use crate::BoxFuture;

/// Default cap on the backoff increment.
pub const DEFAULT_MAX_INCREMENTS: u32 = 10;

/// Default backoff unit.
pub const DEFAULT_POLL_UNIT: Duration = Duration::from_secs(1);

// =============================================================================
// Backoff
// =============================================================================

/// Quadratic backoff with a capped increment.
///
/// The n-th delay is `unit × n²` until `n` reaches `max_increments`, after
/// which every delay is `unit × max_increments²`.
#[derive(Debug, Clone)]
pub struct Backoff {
    unit: Duration,
    max_increments: u32,
    increment: u32,
}

impl Backoff {
    pub fn new(unit: Duration, max_increments: u32) -> Self {
        Self {
            unit,
            max_increments: max_increments.max(1),
            increment: 0,
        }
    }

    /// Advances one pass and returns how long to sleep.
    pub fn next_delay(&mut self) -> Duration {
        if self.increment < self.max_increments {
            self.increment += 1;
        }
        self.unit * (self.increment * self.increment)
    }

    pub fn increment(&self) -> u32 {
        self.increment
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_UNIT, DEFAULT_MAX_INCREMENTS)
    }
}

// =============================================================================
// Registry
// =============================================================================

/// In-flight jobs of one wave, keyed by job id.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: HashMap<JobId, JobRecord>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks a pending job. A record with the same id is replaced.
    pub fn insert(&mut self, record: JobRecord) -> Option<JobRecord> {
        self.jobs.insert(record.id().clone(), record)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.jobs.contains_key(id)
    }

    pub fn get(&self, id: &JobId) -> Option<&JobRecord> {
        self.jobs.get(id)
    }

    /// Applies one listing and removes every record it shows terminal.
    ///
    /// Completed records are returned in listing order. Statuses for ids
    /// that are not tracked (other runs, or jobs already drained) are
    /// ignored.
    pub fn apply(&mut self, statuses: &[OperationStatus]) -> Vec<JobRecord> {
        let mut completed = Vec::new();
        for status in statuses {
            let Some(record) = self.jobs.get_mut(&status.id) else {
                continue;
            };
            record.update(status);
            if record.is_completed() {
                if let Some(record) = self.jobs.remove(&status.id) {
                    completed.push(record);
                }
            }
        }
        completed
    }

    /// Fails and removes every remaining record.
    pub fn expire(&mut self, error: JobError) -> Vec<JobRecord> {
        let mut expired: Vec<JobRecord> = self
            .jobs
            .drain()
            .map(|(_, mut record)| {
                record.fail(error.clone());
                record
            })
            .collect();
        expired.sort_by(|a, b| a.id().cmp(b.id()));
        expired
    }
}

// =============================================================================
// Completion handling
// =============================================================================

/// Reacts to jobs leaving the registry.
///
/// Each drained record is handed over exactly once.
pub trait CompletionHandler: Send {
    /// Called for a job that reached `Succeeded`.
    fn on_success(&mut self, record: JobRecord) -> BoxFuture<'_, ()>;

    /// Called for a job that failed remotely or timed out.
    fn on_failure(&mut self, record: JobRecord) -> BoxFuture<'_, ()>;
}

/// Handler that only keeps the drained records.
#[derive(Debug, Default)]
pub struct Collector {
    pub succeeded: Vec<JobRecord>,
    pub failed: Vec<JobRecord>,
}

impl CompletionHandler for Collector {
    fn on_success(&mut self, record: JobRecord) -> BoxFuture<'_, ()> {
        self.succeeded.push(record);
        Box::pin(async {})
    }

    fn on_failure(&mut self, record: JobRecord) -> BoxFuture<'_, ()> {
        self.failed.push(record);
        Box::pin(async {})
    }
}

/// What a call to [`Poller::drive`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// Listing calls made.
    pub passes: u32,
    pub succeeded: usize,
    pub failed: usize,
    /// Jobs failed by the poll deadline.
    pub timed_out: usize,
    /// Listing calls that returned an error.
    pub listing_errors: u32,
}

// =============================================================================
// Poller
// =============================================================================

/// Drives a registry to empty.
pub struct Poller {
    service: Arc<dyn RemoteService>,
    unit: Duration,
    max_increments: u32,
    timeout: Option<Duration>,
}

impl Poller {
    pub fn new(service: Arc<dyn RemoteService>) -> Self {
        Self {
            service,
            unit: DEFAULT_POLL_UNIT,
            max_increments: DEFAULT_MAX_INCREMENTS,
            timeout: None,
        }
    }

    pub fn with_backoff(mut self, unit: Duration, max_increments: u32) -> Self {
        self.unit = unit;
        self.max_increments = max_increments;
        self
    }

    /// Gives up on jobs still pending after `timeout`. `None` waits forever.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Polls until every job in `registry` is terminal.
    ///
    /// A failed listing is logged and retried after the usual backoff. With
    /// a timeout configured, jobs still pending at the deadline are handed
    /// to the handler as failed with [`JobError::Timeout`].
    pub async fn drive<H>(&self, registry: &mut JobRegistry, handler: &mut H) -> PollSummary
    where
        H: CompletionHandler + ?Sized,
    {
        let started = Instant::now();
        let mut backoff = Backoff::new(self.unit, self.max_increments);
        let mut summary = PollSummary::default();

        while !registry.is_empty() {
            summary.passes += 1;

            match self.service.list_operations().await {
                Ok(statuses) => {
                    for record in registry.apply(&statuses) {
                        match record.state() {
                            JobState::Succeeded => {
                                summary.succeeded += 1;
                                info!(
                                    job_id = %record.id(),
                                    kind = %record.kind(),
                                    asset = record.target(),
                                    "Job succeeded"
                                );
                                handler.on_success(record).await;
                            }
                            _ => {
                                summary.failed += 1;
                                warn!(
                                    job_id = %record.id(),
                                    kind = %record.kind(),
                                    asset = record.target(),
                                    error = ?record.error(),
                                    "Job failed"
                                );
                                handler.on_failure(record).await;
                            }
                        }
                    }
                }
                Err(e) => {
                    summary.listing_errors += 1;
                    warn!(pass = summary.passes, error = %e, "Failed to list operations");
                }
            }

            if registry.is_empty() {
                break;
            }

            let mut delay = backoff.next_delay();
            if let Some(timeout) = self.timeout {
                let elapsed = started.elapsed();
                if elapsed >= timeout {
                    let error = JobError::Timeout {
                        elapsed_secs: elapsed.as_secs(),
                    };
                    for record in registry.expire(error) {
                        summary.timed_out += 1;
                        warn!(
                            job_id = %record.id(),
                            asset = record.target(),
                            "Job still pending at poll deadline"
                        );
                        handler.on_failure(record).await;
                    }
                    break;
                }
                delay = delay.min(timeout - elapsed);
            }

            debug!(
                pass = summary.passes,
                pending = registry.len(),
                delay_secs = delay.as_secs_f64(),
                "Waiting for jobs"
            );
            tokio::time::sleep(delay).await;
        }

        summary
    }
}
