//! In-memory blob store for tests.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use super::{BlobStore, BlobUri, StorageError, StorageResult};
use crate::BoxFuture;

pub const TEST_BUCKET: &str = "test-bucket";

#[derive(Debug, Default)]
struct State {
    blobs: HashMap<String, Vec<u8>>,
    uploads: Vec<String>,
    deletes: Vec<String>,
    failing_deletes: HashSet<String>,
}

/// Blobs keyed by `gs://` URI. Uploads copy the local file's bytes.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    state: Mutex<State>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `contents` under `uri` without recording an upload.
    pub fn put(&self, uri: &str, contents: impl Into<Vec<u8>>) {
        self.state
            .lock()
            .unwrap()
            .blobs
            .insert(uri.to_string(), contents.into());
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.state.lock().unwrap().blobs.contains_key(uri)
    }

    /// Deleting `uri` fails with an HTTP error.
    pub fn fail_delete(&self, uri: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_deletes
            .insert(uri.to_string());
    }

    pub fn uploads(&self) -> Vec<String> {
        self.state.lock().unwrap().uploads.clone()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.state.lock().unwrap().deletes.clone()
    }
}

impl BlobStore for MemoryBlobStore {
    fn upload<'a>(&'a self, local_path: &'a Path) -> BoxFuture<'a, StorageResult<String>> {
        Box::pin(async move {
            let contents = tokio::fs::read(local_path)
                .await
                .map_err(|source| StorageError::Io {
                    path: local_path.to_path_buf(),
                    source,
                })?;
            let name = local_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "upload".to_string());
            let uri = BlobUri::new(TEST_BUCKET, name).to_string();

            let mut state = self.state.lock().unwrap();
            state.blobs.insert(uri.clone(), contents);
            state.uploads.push(uri.clone());
            Ok(uri)
        })
    }

    fn delete<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, StorageResult<()>> {
        let mut state = self.state.lock().unwrap();
        state.deletes.push(uri.to_string());
        let result = if state.failing_deletes.contains(uri) {
            Err(StorageError::Http {
                url: uri.to_string(),
                reason: "connection reset".to_string(),
            })
        } else {
            state.blobs.remove(uri);
            Ok(())
        };
        Box::pin(async move { result })
    }

    fn exists<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, StorageResult<bool>> {
        let exists = self.contains(uri);
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
