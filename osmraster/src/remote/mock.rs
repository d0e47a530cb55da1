//! Scripted in-memory remote service for tests.
//!
//! Submitted jobs finish after a configurable number of `list_operations`
//! calls. A successful job creates its target asset; finished jobs keep
//! appearing in later listings, the way the real service reports them.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::types::{
    ExportRequest, ImageImport, OperationStatus, RemoteError, RemoteFailure, RemoteResult,
    RemoteService, TableImport,
};
use crate::job::JobId;
use crate::BoxFuture;

/// A recorded call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    TableImport(String),
    ImageImport(String),
    Export(ExportRequest),
    GetAsset(String),
    DeleteAsset(String),
    ListOperations,
}

#[derive(Debug)]
enum Outcome {
    Succeed,
    Fail(String),
    Stall,
}

#[derive(Debug)]
struct MockOp {
    id: JobId,
    target: String,
    kind: &'static str,
    polls_remaining: u32,
    outcome: Outcome,
    done: bool,
}

#[derive(Debug, Default)]
struct State {
    assets: HashSet<String>,
    ops: Vec<MockOp>,
    calls: Vec<Call>,
    next_id: u32,
    polls_to_finish: u32,
    rejected: HashSet<String>,
    failing: HashMap<String, String>,
    stalled: HashSet<String>,
    failing_deletes: HashSet<String>,
    listing_errors: u32,
}

pub struct MockRemoteService {
    state: Mutex<State>,
}

impl MockRemoteService {
    /// Jobs finish on the first listing after submission.
    pub fn new() -> Self {
        Self::with_polls_to_finish(1)
    }

    /// Jobs finish on the `polls`-th listing after submission.
    pub fn with_polls_to_finish(polls: u32) -> Self {
        Self {
            state: Mutex::new(State {
                polls_to_finish: polls,
                ..Default::default()
            }),
        }
    }

    pub fn add_asset(&self, asset: &str) {
        self.state.lock().unwrap().assets.insert(asset.to_string());
    }

    pub fn has_asset(&self, asset: &str) -> bool {
        self.state.lock().unwrap().assets.contains(asset)
    }

    /// Submissions writing `target` are rejected outright.
    pub fn reject_submission(&self, target: &str) {
        self.state.lock().unwrap().rejected.insert(target.to_string());
    }

    /// Jobs writing `target` terminate FAILED.
    pub fn fail_job(&self, target: &str, message: &str) {
        self.state
            .lock()
            .unwrap()
            .failing
            .insert(target.to_string(), message.to_string());
    }

    /// Jobs writing `target` never finish.
    pub fn stall_job(&self, target: &str) {
        self.state.lock().unwrap().stalled.insert(target.to_string());
    }

    /// Deleting `asset` fails with an HTTP error.
    pub fn fail_delete(&self, asset: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_deletes
            .insert(asset.to_string());
    }

    /// The next `count` listings fail.
    pub fn fail_listings(&self, count: u32) {
        self.state.lock().unwrap().listing_errors = count;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Calls other than existence checks and listings.
    pub fn mutations(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, Call::GetAsset(_) | Call::ListOperations))
            .collect()
    }

    pub fn exports(&self) -> Vec<ExportRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Export(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn submission_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    Call::TableImport(_) | Call::ImageImport(_) | Call::Export(_)
                )
            })
            .count()
    }

    pub fn listing_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::ListOperations))
            .count()
    }

    fn submit(&self, call: Call, target: &str, kind: &'static str) -> RemoteResult<JobId> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);

        if state.rejected.contains(target) {
            return Err(RemoteError::Status {
                url: "mock://submit".to_string(),
                status: 400,
                message: format!("rejected {}", target),
            });
        }

        state.next_id += 1;
        let id = JobId::new(format!("JOB{:04}", state.next_id));
        let outcome = if state.stalled.contains(target) {
            Outcome::Stall
        } else if let Some(message) = state.failing.get(target) {
            Outcome::Fail(message.clone())
        } else {
            Outcome::Succeed
        };
        let polls_remaining = state.polls_to_finish;
        state.ops.push(MockOp {
            id: id.clone(),
            target: target.to_string(),
            kind,
            polls_remaining,
            outcome,
            done: false,
        });
        Ok(id)
    }
}

impl RemoteService for MockRemoteService {
    fn submit_table_import<'a>(
        &'a self,
        request: &'a TableImport,
    ) -> BoxFuture<'a, RemoteResult<JobId>> {
        let result = self.submit(
            Call::TableImport(request.target.clone()),
            &request.target,
            "INGEST_TABLE",
        );
        Box::pin(async move { result })
    }

    fn submit_image_import<'a>(
        &'a self,
        request: &'a ImageImport,
    ) -> BoxFuture<'a, RemoteResult<JobId>> {
        let result = self.submit(
            Call::ImageImport(request.target.clone()),
            &request.target,
            "INGEST_IMAGE",
        );
        Box::pin(async move { result })
    }

    fn submit_export<'a>(
        &'a self,
        request: &'a ExportRequest,
    ) -> BoxFuture<'a, RemoteResult<JobId>> {
        let result = self.submit(Call::Export(request.clone()), request.target(), "EXPORT");
        Box::pin(async move { result })
    }

    fn get_asset<'a>(&'a self, asset_id: &'a str) -> BoxFuture<'a, RemoteResult<bool>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::GetAsset(asset_id.to_string()));
        let exists = state.assets.contains(asset_id);
        Box::pin(async move { Ok(exists) })
    }

    fn delete_asset<'a>(&'a self, asset_id: &'a str) -> BoxFuture<'a, RemoteResult<()>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::DeleteAsset(asset_id.to_string()));
        let result = if state.failing_deletes.contains(asset_id) {
            Err(RemoteError::Http {
                url: format!("mock://{}", asset_id),
                reason: "connection reset".to_string(),
            })
        } else {
            state.assets.remove(asset_id);
            Ok(())
        };
        Box::pin(async move { result })
    }

    fn list_operations(&self) -> BoxFuture<'_, RemoteResult<Vec<OperationStatus>>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::ListOperations);

        if state.listing_errors > 0 {
            state.listing_errors -= 1;
            let err = RemoteError::Http {
                url: "mock://operations".to_string(),
                reason: "timed out".to_string(),
            };
            return Box::pin(async move { Err(err) });
        }

        let mut created = Vec::new();
        let mut statuses = Vec::with_capacity(state.ops.len());
        for op in state.ops.iter_mut() {
            if !op.done && !matches!(op.outcome, Outcome::Stall) {
                op.polls_remaining = op.polls_remaining.saturating_sub(1);
                if op.polls_remaining == 0 {
                    op.done = true;
                    if matches!(op.outcome, Outcome::Succeed) {
                        created.push(op.target.clone());
                    }
                }
            }

            let (state_str, error) = match (&op.outcome, op.done) {
                (_, false) => ("RUNNING", None),
                (Outcome::Fail(message), true) => (
                    "FAILED",
                    Some(RemoteFailure {
                        code: Some(3),
                        message: message.clone(),
                    }),
                ),
                _ => ("SUCCEEDED", None),
            };
            statuses.push(OperationStatus {
                id: op.id.clone(),
                done: op.done,
                kind: op.kind.to_string(),
                state: state_str.to_string(),
                error,
            });
        }
        state.assets.extend(created);

        Box::pin(async move { Ok(statuses) })
    }
}
