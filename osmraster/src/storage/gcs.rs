//! Google Cloud Storage JSON API client.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Body, Method, StatusCode, Url};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use super::uri::BlobUri;
use super::{BlobStore, StorageError, StorageResult};
use crate::auth::TokenSource;
use crate::BoxFuture;

/// Object metadata and download endpoint.
pub const DEFAULT_STORAGE_BASE: &str = "https://storage.googleapis.com/storage/v1";

/// Media upload endpoint.
pub const DEFAULT_UPLOAD_BASE: &str = "https://storage.googleapis.com/upload/storage/v1";

/// Blob store backed by one Cloud Storage bucket.
///
/// Uploaded files land under an optional object prefix (the pipeline uses
/// the run date) and keep their local file name.
pub struct GcsBlobStore {
    http: reqwest::Client,
    bucket: String,
    prefix: Option<String>,
    tokens: Arc<dyn TokenSource>,
    storage_base: String,
    upload_base: String,
}

impl GcsBlobStore {
    pub fn new(bucket: impl Into<String>, tokens: Arc<dyn TokenSource>) -> StorageResult<Self> {
        let http = reqwest::Client::builder()
            // Uploads of a full-planet CSV take a while.
            .timeout(Duration::from_secs(60 * 60))
            .build()
            .map_err(|e| StorageError::Http {
                url: DEFAULT_STORAGE_BASE.to_string(),
                reason: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            http,
            bucket: bucket.into(),
            prefix: None,
            tokens,
            storage_base: DEFAULT_STORAGE_BASE.to_string(),
            upload_base: DEFAULT_UPLOAD_BASE.to_string(),
        })
    }

    /// Stores uploads under `prefix/`.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let trimmed = prefix.trim_matches('/');
        self.prefix = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }

    /// Overrides both API endpoints.
    pub fn with_endpoints(
        mut self,
        storage_base: impl Into<String>,
        upload_base: impl Into<String>,
    ) -> Self {
        self.storage_base = storage_base.into().trim_end_matches('/').to_string();
        self.upload_base = upload_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Object name an upload of `local_path` will use.
    pub fn object_name(&self, local_path: &Path) -> String {
        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload".to_string());
        match self.prefix {
            Some(ref prefix) => format!("{}/{}", prefix, file_name),
            None => file_name,
        }
    }

    fn object_url(&self, uri: &BlobUri) -> StorageResult<Url> {
        let mut url = Url::parse(&format!("{}/b", self.storage_base))
            .map_err(|e| StorageError::InvalidUri(format!("{}: {}", self.storage_base, e)))?;
        url.path_segments_mut()
            .map_err(|_| StorageError::InvalidUri(self.storage_base.clone()))?
            .push(&uri.bucket)
            .push("o")
            .push(&uri.object);
        Ok(url)
    }

    async fn request(
        &self,
        method: Method,
        url: Url,
        body: Option<Body>,
    ) -> StorageResult<reqwest::Response> {
        let token = self.tokens.token().await?;
        let url_str = url.to_string();

        let mut request = self.http.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request.send().await.map_err(|e| StorageError::Http {
            url: url_str.clone(),
            reason: e.to_string(),
        })?;

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(StorageError::NotFound(url_str)),
            status => {
                let message = response.text().await.unwrap_or_default();
                Err(StorageError::Status {
                    url: url_str,
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }
}

impl BlobStore for GcsBlobStore {
    fn upload<'a>(&'a self, local_path: &'a Path) -> BoxFuture<'a, StorageResult<String>> {
        Box::pin(async move {
            let file = tokio::fs::File::open(local_path)
                .await
                .map_err(|source| StorageError::Io {
                    path: local_path.to_path_buf(),
                    source,
                })?;
            let object = self.object_name(local_path);

            let mut url = Url::parse(&format!("{}/b", self.upload_base))
                .map_err(|e| StorageError::InvalidUri(format!("{}: {}", self.upload_base, e)))?;
            url.path_segments_mut()
                .map_err(|_| StorageError::InvalidUri(self.upload_base.clone()))?
                .push(&self.bucket)
                .push("o");
            url.query_pairs_mut()
                .append_pair("uploadType", "media")
                .append_pair("name", &object);

            let body = Body::wrap_stream(ReaderStream::new(file));
            self.request(Method::POST, url, Some(body)).await?;

            let uri = BlobUri::new(&self.bucket, object).to_string();
            info!(path = %local_path.display(), uri = %uri, "Uploaded blob");
            Ok(uri)
        })
    }

    fn delete<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            let blob: BlobUri = uri.parse()?;
            let url = self.object_url(&blob)?;
            match self.request(Method::DELETE, url, None).await {
                Ok(_) => {
                    debug!(uri, "Deleted blob");
                    Ok(())
                }
                Err(StorageError::NotFound(_)) => Ok(()),
                Err(e) => Err(e),
            }
        })
    }

    fn exists<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, StorageResult<bool>> {
        Box::pin(async move {
            let blob: BlobUri = uri.parse()?;
            let url = self.object_url(&blob)?;
            match self.request(Method::GET, url, None).await {
                Ok(_) => Ok(true),
                Err(StorageError::NotFound(_)) => Ok(false),
                Err(e) => Err(e),
            }
        })
    }

    fn read_text<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, StorageResult<Vec<u8>>> {
        Box::pin(async move {
            let blob: BlobUri = uri.parse()?;
            let mut url = self.object_url(&blob)?;
            url.query_pairs_mut().append_pair("alt", "media");
            let response = self.request(Method::GET, url, None).await?;
            let bytes = response.bytes().await.map_err(|e| StorageError::Http {
                url: uri.to_string(),
                reason: format!("Failed to read response: {}", e),
            })?;
            Ok(bytes.to_vec())
        })
    }
}
