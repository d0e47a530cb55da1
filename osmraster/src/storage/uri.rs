//! `gs://bucket/object` URIs.

use std::fmt;
use std::str::FromStr;

use super::StorageError;

/// A parsed Cloud Storage URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobUri {
    pub bucket: String,
    pub object: String,
}

impl BlobUri {
    pub fn new(bucket: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            object: object.into(),
        }
    }

    /// True if `s` looks like a blob URI rather than a local path.
    pub fn is_blob_uri(s: &str) -> bool {
        s.starts_with("gs://")
    }
}

impl FromStr for BlobUri {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("gs://")
            .ok_or_else(|| StorageError::InvalidUri(s.to_string()))?;
        match rest.split_once('/') {
            Some((bucket, object)) if !bucket.is_empty() && !object.is_empty() => {
                Ok(Self::new(bucket, object))
            }
            _ => Err(StorageError::InvalidUri(s.to_string())),
        }
    }
}

impl fmt::Display for BlobUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gs://{}/{}", self.bucket, self.object)
    }
}
