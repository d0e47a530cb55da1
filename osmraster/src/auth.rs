//! OAuth access tokens for the Google Cloud APIs.
//!
//! Both the Earth Engine client and the Cloud Storage client authenticate
//! with a bearer token. Tokens come either from configuration (useful in CI)
//! or from the `gcloud` CLI, which is re-invoked once a cached token is older
//! than [`DEFAULT_TOKEN_LIFETIME`].

use std::path::PathBuf;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

use crate::BoxFuture;

/// Access tokens are valid for an hour; refresh well before that.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(45 * 60);

/// Errors obtaining an access token.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The token command could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The token command exited unsuccessfully.
    #[error("{program} exited with {status}: {stderr}")]
    Command {
        program: String,
        status: String,
        stderr: String,
    },

    /// The token command printed nothing.
    #[error("{program} returned an empty token")]
    EmptyToken { program: String },
}

/// Source of bearer tokens.
pub trait TokenSource: Send + Sync {
    /// Returns a currently valid access token.
    fn token(&self) -> BoxFuture<'_, Result<String, AuthError>>;
}

/// A fixed token supplied by configuration.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(..)")
    }
}

impl TokenSource for StaticToken {
    fn token(&self) -> BoxFuture<'_, Result<String, AuthError>> {
        let token = self.0.clone();
        Box::pin(async move { Ok(token) })
    }
}

/// Tokens minted by `gcloud auth application-default print-access-token`.
///
/// When a service-account key file is configured it is passed to the child
/// process through `GOOGLE_APPLICATION_CREDENTIALS`; this process's own
/// environment is never modified.
pub struct GcloudTokenSource {
    program: PathBuf,
    key_file: Option<PathBuf>,
    lifetime: Duration,
    cached: Mutex<Option<(String, Instant)>>,
}

impl GcloudTokenSource {
    pub fn new(program: impl Into<PathBuf>, key_file: Option<PathBuf>) -> Self {
        Self {
            program: program.into(),
            key_file,
            lifetime: DEFAULT_TOKEN_LIFETIME,
            cached: Mutex::new(None),
        }
    }

    /// Overrides how long a minted token is reused.
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    async fn mint(&self) -> Result<String, AuthError> {
        let program = self.program.display().to_string();
        let mut command = Command::new(&self.program);
        command.args(["auth", "application-default", "print-access-token"]);
        if let Some(ref key_file) = self.key_file {
            command.env("GOOGLE_APPLICATION_CREDENTIALS", key_file);
        }

        let output = command.output().await.map_err(|source| AuthError::Spawn {
            program: program.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(AuthError::Command {
                program,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(AuthError::EmptyToken { program });
        }
        Ok(token)
    }
}

impl TokenSource for GcloudTokenSource {
    fn token(&self) -> BoxFuture<'_, Result<String, AuthError>> {
        Box::pin(async move {
            let mut cached = self.cached.lock().await;
            if let Some((ref token, minted)) = *cached {
                if minted.elapsed() < self.lifetime {
                    return Ok(token.clone());
                }
            }

            debug!(program = %self.program.display(), "Minting access token");
            let token = self.mint().await?;
            *cached = Some((token.clone(), Instant::now()));
            Ok(token)
        })
    }
}
