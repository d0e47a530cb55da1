//! Earth Engine REST API client.
//!
//! Implements [`RemoteService`] against the `v1` REST API:
//!
//! | Call                  | Endpoint                                   |
//! |-----------------------|--------------------------------------------|
//! | `submit_table_import` | `POST projects/{p}/table:import`           |
//! | `submit_image_import` | `POST projects/{p}/image:import`           |
//! | `submit_export`       | `POST projects/{p}/{image,table}:export`   |
//! | `get_asset`           | `GET {asset}`                              |
//! | `delete_asset`        | `DELETE {asset}`                           |
//! | `list_operations`     | `GET projects/{p}/operations` (paged)      |
//!
//! Assets can only be created inside existing folders, so every submission
//! first makes sure the target's parent folders exist.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::expression;
use super::job_id::parse_job_id;
use super::types::{
    ExportRequest, ImageImport, OperationStatus, RemoteError, RemoteFailure, RemoteResult,
    RemoteService, TableImport,
};
use crate::auth::TokenSource;
use crate::job::JobId;
use crate::BoxFuture;

/// Public Earth Engine REST endpoint.
pub const DEFAULT_API_BASE: &str = "https://earthengine.googleapis.com/v1";

/// Operations requested per listing page.
const OPERATIONS_PAGE_SIZE: u32 = 500;

/// Upper bound on pixels per export.
const MAX_PIXELS: &str = "10000000000000";

/// Long-running operation as returned by submission and listing calls.
#[derive(Debug, Deserialize)]
struct Operation {
    name: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    metadata: OperationMetadata,
    #[serde(default)]
    error: Option<OperationError>,
}

#[derive(Debug, Default, Deserialize)]
struct OperationMetadata {
    #[serde(default)]
    state: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    #[serde(default)]
    code: Option<i32>,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationPage {
    #[serde(default)]
    operations: Vec<Operation>,
    #[serde(default)]
    next_page_token: Option<String>,
}

impl OperationPage {
    /// Statuses of the page's operations.
    ///
    /// The listing covers the whole project history; an operation whose name
    /// does not parse can't be one we submitted, so it is dropped.
    fn into_statuses(self) -> Vec<OperationStatus> {
        self.operations
            .into_iter()
            .filter_map(|operation| {
                let name = operation.name.clone();
                match operation.into_status() {
                    Ok(status) => Some(status),
                    Err(e) => {
                        debug!(operation = %name, error = %e, "Skipping unrecognized operation");
                        None
                    }
                }
            })
            .collect()
    }
}

impl Operation {
    fn into_status(self) -> RemoteResult<OperationStatus> {
        let id = parse_job_id(&self.name)?;
        let state = match (self.metadata.state, self.done, &self.error) {
            (Some(state), _, _) => state,
            (None, true, Some(_)) => "FAILED".to_string(),
            (None, true, None) => "SUCCEEDED".to_string(),
            (None, false, _) => "PENDING".to_string(),
        };
        Ok(OperationStatus {
            id,
            done: self.done,
            kind: self.metadata.kind.unwrap_or_default(),
            state,
            error: self.error.map(|e| RemoteFailure {
                code: e.code,
                message: e.message,
            }),
        })
    }
}

/// Earth Engine REST client for one cloud project.
pub struct EarthEngineClient {
    http: reqwest::Client,
    base: String,
    project: String,
    tokens: Arc<dyn TokenSource>,
    known_folders: Mutex<HashSet<String>>,
}

impl EarthEngineClient {
    /// Creates a client for `project` using the public endpoint.
    pub fn new(project: impl Into<String>, tokens: Arc<dyn TokenSource>) -> RemoteResult<Self> {
        Self::with_base(DEFAULT_API_BASE, project, tokens, Duration::from_secs(60))
    }

    /// Creates a client with a custom endpoint and request timeout.
    pub fn with_base(
        base: impl Into<String>,
        project: impl Into<String>,
        tokens: Arc<dyn TokenSource>,
        timeout: Duration,
    ) -> RemoteResult<Self> {
        let base = base.into();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Http {
                url: base.clone(),
                reason: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            project: project.into(),
            tokens,
            known_folders: Mutex::new(HashSet::new()),
        })
    }

    fn url(&self, path: &str) -> RemoteResult<Url> {
        let raw = format!("{}/{}", self.base, path);
        Url::parse(&raw).map_err(|e| RemoteError::InvalidRequest(format!("{}: {}", raw, e)))
    }

    async fn send(&self, method: Method, url: Url, body: Option<&Value>) -> RemoteResult<Value> {
        let token = self.tokens.token().await?;
        let url_str = url.to_string();
        trace!(%method, url = %url_str, "Earth Engine request");

        let mut request = self.http.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| RemoteError::Http {
            url: url_str.clone(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| RemoteError::Http {
            url: url_str.clone(),
            reason: format!("Failed to read response: {}", e),
        })?;

        if status == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound(url_str));
        }
        if !status.is_success() {
            return Err(RemoteError::Status {
                url: url_str,
                status: status.as_u16(),
                message: text,
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| RemoteError::Response {
            url: url_str,
            reason: e.to_string(),
        })
    }

    async fn submit(&self, path: &str, body: Value, target: &str) -> RemoteResult<JobId> {
        self.ensure_parent_folders(target).await?;
        let url = self.url(&format!("projects/{}/{}", self.project, path))?;
        let response = self.send(Method::POST, url, Some(&body)).await?;
        let name = response["name"].as_str().unwrap_or_default();
        Ok(parse_job_id(name)?)
    }

    /// Creates every missing folder above `asset`.
    ///
    /// `projects/p/assets/osm/2021-12-31/highway/residential` needs
    /// `osm`, `osm/2021-12-31` and `osm/2021-12-31/highway`.
    async fn ensure_parent_folders(&self, asset: &str) -> RemoteResult<()> {
        let Some((prefix, relative)) = split_asset(asset) else {
            return Err(RemoteError::InvalidRequest(format!(
                "malformed asset id: {}",
                asset
            )));
        };

        let segments: Vec<&str> = relative.split('/').collect();
        let mut known = self.known_folders.lock().await;
        for depth in 1..segments.len() {
            let folder = segments[..depth].join("/");
            let full = format!("{}/{}", prefix, folder);
            if known.contains(&full) {
                continue;
            }

            let mut url = self.url(&prefix)?;
            url.query_pairs_mut().append_pair("assetId", &folder);
            match self
                .send(Method::POST, url, Some(&json!({ "type": "FOLDER" })))
                .await
            {
                Ok(_) => debug!(folder = %full, "Created asset folder"),
                Err(RemoteError::Status { status: 409, .. }) => {}
                Err(e) => return Err(e),
            }
            known.insert(full);
        }
        Ok(())
    }
}

/// Splits `projects/p/assets/a/b` into `("projects/p/assets", "a/b")`.
fn split_asset(asset: &str) -> Option<(String, &str)> {
    let mut parts = asset.splitn(4, '/');
    let (projects, project, assets, relative) =
        (parts.next()?, parts.next()?, parts.next()?, parts.next()?);
    if projects != "projects" || assets != "assets" || project.is_empty() || relative.is_empty() {
        return None;
    }
    Some((format!("projects/{}/assets", project), relative))
}

fn export_body(request: &ExportRequest) -> Value {
    let mut body = json!({
        "expression": expression::expression(request),
        "description": request.description(),
        "assetExportOptions": {
            "earthEngineDestination": { "name": request.target() }
        },
    });
    if !matches!(request, ExportRequest::TableMerge(_)) {
        body["maxPixels"] = json!(MAX_PIXELS);
    }
    body
}

impl RemoteService for EarthEngineClient {
    fn submit_table_import<'a>(
        &'a self,
        request: &'a TableImport,
    ) -> BoxFuture<'a, RemoteResult<JobId>> {
        Box::pin(async move {
            let body = json!({
                "tableManifest": {
                    "name": request.target,
                    "sources": [{
                        "uris": [request.source_uri],
                        "primaryGeometryColumn": request.geometry_column,
                        "csvDelimiter": ",",
                    }],
                },
                "requestId": uuid::Uuid::new_v4().to_string(),
            });
            self.submit("table:import", body, &request.target).await
        })
    }

    fn submit_image_import<'a>(
        &'a self,
        request: &'a ImageImport,
    ) -> BoxFuture<'a, RemoteResult<JobId>> {
        Box::pin(async move {
            let body = json!({
                "imageManifest": {
                    "name": request.target,
                    "tilesets": [{ "sources": [{ "uris": [request.source_uri] }] }],
                },
                "requestId": uuid::Uuid::new_v4().to_string(),
            });
            self.submit("image:import", body, &request.target).await
        })
    }

    fn submit_export<'a>(
        &'a self,
        request: &'a ExportRequest,
    ) -> BoxFuture<'a, RemoteResult<JobId>> {
        Box::pin(async move {
            let path = match request {
                ExportRequest::TableMerge(_) => "table:export",
                _ => "image:export",
            };
            self.submit(path, export_body(request), request.target())
                .await
        })
    }

    fn get_asset<'a>(&'a self, asset_id: &'a str) -> BoxFuture<'a, RemoteResult<bool>> {
        Box::pin(async move {
            let url = self.url(asset_id)?;
            match self.send(Method::GET, url, None).await {
                Ok(_) => Ok(true),
                Err(RemoteError::NotFound(_)) => Ok(false),
                Err(e) => Err(e),
            }
        })
    }

    fn delete_asset<'a>(&'a self, asset_id: &'a str) -> BoxFuture<'a, RemoteResult<()>> {
        Box::pin(async move {
            let url = self.url(asset_id)?;
            match self.send(Method::DELETE, url, None).await {
                Ok(_) | Err(RemoteError::NotFound(_)) => Ok(()),
                Err(e) => Err(e),
            }
        })
    }

    fn list_operations(&self) -> BoxFuture<'_, RemoteResult<Vec<OperationStatus>>> {
        Box::pin(async move {
            let mut statuses = Vec::new();
            let mut page_token: Option<String> = None;

            loop {
                let mut url = self.url(&format!("projects/{}/operations", self.project))?;
                {
                    let mut query = url.query_pairs_mut();
                    query.append_pair("pageSize", &OPERATIONS_PAGE_SIZE.to_string());
                    if let Some(ref token) = page_token {
                        query.append_pair("pageToken", token);
                    }
                }

                let value = self.send(Method::GET, url.clone(), None).await?;
                let page: OperationPage =
                    serde_json::from_value(value).map_err(|e| RemoteError::Response {
                        url: url.to_string(),
                        reason: e.to_string(),
                    })?;

                let next = page.next_page_token.clone();
                statuses.extend(page.into_statuses());

                match next {
                    Some(token) if !token.is_empty() => page_token = Some(token),
                    _ => break,
                }
            }

            Ok(statuses)
        })
    }
}
