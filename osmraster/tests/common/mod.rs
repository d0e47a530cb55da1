//! In-memory stand-ins for the remote service, blob store and converter.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use osmraster::category::CategorySet;
use osmraster::convert::{ConvertResult, VectorConverter};
use osmraster::job::JobId;
use osmraster::remote::{
    ExportRequest, ImageImport, OperationStatus, RemoteError, RemoteFailure, RemoteResult,
    RemoteService, TableImport,
};
use osmraster::storage::{BlobStore, StorageError, StorageResult};
use osmraster::BoxFuture;

// ============================================================================
// Remote service
// ============================================================================

struct Operation {
    id: JobId,
    target: String,
    done: bool,
    failure: Option<String>,
}

#[derive(Default)]
struct ServiceState {
    assets: HashSet<String>,
    operations: Vec<Operation>,
    failing: HashMap<String, String>,
    exports: Vec<ExportRequest>,
    imports: Vec<String>,
    deletes: Vec<String>,
    next_id: u32,
}

/// Jobs finish on the first listing after they are submitted.
#[derive(Default)]
pub struct FakeEarthEngine {
    state: Mutex<ServiceState>,
}

impl FakeEarthEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_asset(&self, id: &str) {
        self.state.lock().unwrap().assets.insert(id.to_string());
    }

    pub fn has_asset(&self, id: &str) -> bool {
        self.state.lock().unwrap().assets.contains(id)
    }

    /// Assets under `prefix`, sorted.
    pub fn assets_under(&self, prefix: &str) -> Vec<String> {
        let mut assets: Vec<String> = self
            .state
            .lock()
            .unwrap()
            .assets
            .iter()
            .filter(|a| a.starts_with(prefix))
            .cloned()
            .collect();
        assets.sort();
        assets
    }

    /// Jobs writing `target` end FAILED with `message`.
    pub fn fail_job(&self, target: &str, message: &str) {
        self.state
            .lock()
            .unwrap()
            .failing
            .insert(target.to_string(), message.to_string());
    }

    pub fn exports(&self) -> Vec<ExportRequest> {
        self.state.lock().unwrap().exports.clone()
    }

    pub fn imports(&self) -> Vec<String> {
        self.state.lock().unwrap().imports.clone()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.state.lock().unwrap().deletes.clone()
    }

    fn submit(&self, target: &str) -> RemoteResult<JobId> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = JobId::new(format!("projects/p/operations/OP{:04}", state.next_id));
        let failure = state.failing.get(target).cloned();
        state.operations.push(Operation {
            id: id.clone(),
            target: target.to_string(),
            done: false,
            failure,
        });
        Ok(id)
    }
}

impl RemoteService for FakeEarthEngine {
    fn submit_table_import<'a>(
        &'a self,
        request: &'a TableImport,
    ) -> BoxFuture<'a, RemoteResult<JobId>> {
        self.state
            .lock()
            .unwrap()
            .imports
            .push(request.target.clone());
        let result = self.submit(&request.target);
        Box::pin(async move { result })
    }

    fn submit_image_import<'a>(
        &'a self,
        request: &'a ImageImport,
    ) -> BoxFuture<'a, RemoteResult<JobId>> {
        self.state
            .lock()
            .unwrap()
            .imports
            .push(request.target.clone());
        let result = self.submit(&request.target);
        Box::pin(async move { result })
    }

    fn submit_export<'a>(
        &'a self,
        request: &'a ExportRequest,
    ) -> BoxFuture<'a, RemoteResult<JobId>> {
        self.state.lock().unwrap().exports.push(request.clone());
        let result = self.submit(request.target());
        Box::pin(async move { result })
    }

    fn get_asset<'a>(&'a self, asset_id: &'a str) -> BoxFuture<'a, RemoteResult<bool>> {
        let exists = self.has_asset(asset_id);
        Box::pin(async move { Ok(exists) })
    }

    fn delete_asset<'a>(&'a self, asset_id: &'a str) -> BoxFuture<'a, RemoteResult<()>> {
        let mut state = self.state.lock().unwrap();
        state.deletes.push(asset_id.to_string());
        state.assets.remove(asset_id);
        Box::pin(async move { Ok(()) })
    }

    fn list_operations(&self) -> BoxFuture<'_, RemoteResult<Vec<OperationStatus>>> {
        let mut state = self.state.lock().unwrap();
        let mut created = Vec::new();
        let statuses: Vec<OperationStatus> = state
            .operations
            .iter_mut()
            .map(|op| {
                if !op.done {
                    op.done = true;
                    if op.failure.is_none() {
                        created.push(op.target.clone());
                    }
                }
                OperationStatus {
                    id: op.id.clone(),
                    done: true,
                    kind: "EXPORT_IMAGE".to_string(),
                    state: if op.failure.is_some() {
                        "FAILED".to_string()
                    } else {
                        "SUCCEEDED".to_string()
                    },
                    error: op.failure.clone().map(|message| RemoteFailure {
                        code: Some(13),
                        message,
                    }),
                }
            })
            .collect();
        state.assets.extend(created);
        Box::pin(async move { Ok::<_, RemoteError>(statuses) })
    }
}

// ============================================================================
// Blob store
// ============================================================================

#[derive(Default)]
struct BlobState {
    blobs: HashMap<String, Vec<u8>>,
    uploads: Vec<String>,
    deletes: Vec<String>,
}

/// Blobs kept in memory under `gs://staging/<file name>`.
#[derive(Default)]
pub struct FakeBucket {
    state: Mutex<BlobState>,
}

impl FakeBucket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, uri: &str, contents: &str) {
        self.state
            .lock()
            .unwrap()
            .blobs
            .insert(uri.to_string(), contents.as_bytes().to_vec());
    }

    pub fn uploads(&self) -> Vec<String> {
        self.state.lock().unwrap().uploads.clone()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.state.lock().unwrap().deletes.clone()
    }

    pub fn contents(&self, uri: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .blobs
            .get(uri)
            .map(|b| String::from_utf8_lossy(b).to_string())
    }
}

impl BlobStore for FakeBucket {
    fn upload<'a>(&'a self, local_path: &'a Path) -> BoxFuture<'a, StorageResult<String>> {
        Box::pin(async move {
            let bytes = std::fs::read(local_path).map_err(|source| StorageError::Io {
                path: local_path.to_path_buf(),
                source,
            })?;
            let name = local_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let uri = format!("gs://staging/{}", name);
            let mut state = self.state.lock().unwrap();
            state.blobs.insert(uri.clone(), bytes);
            state.uploads.push(uri.clone());
            Ok(uri)
        })
    }

    fn delete<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, StorageResult<()>> {
        let mut state = self.state.lock().unwrap();
        state.deletes.push(uri.to_string());
        state.blobs.remove(uri);
        Box::pin(async move { Ok(()) })
    }

    fn exists<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, StorageResult<bool>> {
        let exists = self.state.lock().unwrap().blobs.contains_key(uri);
        Box::pin(async move { Ok(exists) })
    }

    fn read_text<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, StorageResult<Vec<u8>>> {
        let result = self
            .state
            .lock()
            .unwrap()
            .blobs
            .get(uri)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(uri.to_string()));
        Box::pin(async move { result })
    }
}

// ============================================================================
// Converter
// ============================================================================

/// Writes fixed layer CSVs, the way `ogr2ogr` lays them out.
pub struct FixedLayers {
    pub layers: Vec<(&'static str, String)>,
}

impl VectorConverter for FixedLayers {
    fn convert<'a>(
        &'a self,
        _source: &'a Path,
        _categories: &'a CategorySet,
        work_dir: &'a Path,
    ) -> BoxFuture<'a, ConvertResult<PathBuf>> {
        Box::pin(async move {
            let dir = work_dir.join("layers");
            std::fs::create_dir_all(&dir).unwrap();
            for (name, contents) in &self.layers {
                std::fs::write(dir.join(format!("{}.csv", name)), contents).unwrap();
            }
            Ok(dir)
        })
    }
}
