//! Canonical Earth Engine asset identifiers.
//!
//! Every asset the pipeline reads or writes is addressed by a path derived
//! from `(root, date, attribute, tag)`. The functions here are pure: the same
//! inputs always produce the same identifier, which is what makes
//! existence checks a valid idempotency test across runs.
//!
//! Layout under a root such as `projects/hii-osm/assets/osm`:
//!
//! ```text
//! {root}/{date}/{attribute}/{tag}          per-category image
//! {root}/tables/{date}/{attribute}/{tag}   per-category vector table
//! {root}/roads/{date}                      merged roads table
//! {root}/shards/{date}/{name}-{digest}     imported merge input
//! {root}/composites/{date}/{name}          multi-band composite
//! ```
//!
//! Attributes and tags are OSM keys/values and never contain `/`, so the
//! mapping is injective over well-formed inputs.

use chrono::NaiveDate;
use sha2::{Digest, Sha256};

use crate::category::Category;

/// Builds the asset root for a cloud project and folder.
///
/// `asset_root("hii-osm", "osm")` is `projects/hii-osm/assets/osm`.
pub fn asset_root(project: &str, folder: &str) -> String {
    format!(
        "projects/{}/assets/{}",
        project,
        folder.trim_matches('/')
    )
}

/// Identifier of the vector table holding one category's features.
pub fn resolve_table_id(root: &str, attribute: &str, tag: &str, date: NaiveDate) -> String {
    format!("{}/tables/{}/{}/{}", root, date, attribute, tag)
}

/// Identifier of the raster produced for one category.
pub fn resolve_image_id(root: &str, attribute: &str, tag: &str, date: NaiveDate) -> String {
    format!("{}/{}/{}/{}", root, date, attribute, tag)
}

/// Identifier of the merged roads table.
pub fn resolve_roads_id(root: &str, date: NaiveDate) -> String {
    format!("{}/roads/{}", root, date)
}

/// Identifier of a multi-band composite.
pub fn resolve_composite_id(root: &str, date: NaiveDate, name: &str) -> String {
    format!("{}/composites/{}/{}", root, date, sanitize(name))
}

/// Identifier of a merge input imported from blob storage.
///
/// The name is the file name without its extension, followed by the first
/// 12 hex digits of the SHA-256 of the whole URI, so
/// `gs://bucket/2021-12-31/osm-0001.tif` becomes
/// `.../shards/{date}/osm-0001-<digest>`. Inputs sharing a file name in
/// different folders get different shards.
pub fn resolve_shard_id(root: &str, date: NaiveDate, source_uri: &str) -> String {
    let file = source_uri.rsplit('/').next().unwrap_or(source_uri);
    let stem = file.rsplit_once('.').map_or(file, |(stem, _)| stem);
    let digest = format!("{:x}", Sha256::digest(source_uri.as_bytes()));
    format!(
        "{}/shards/{}/{}-{}",
        root,
        date,
        sanitize(stem),
        &digest[..SHARD_DIGEST_LEN]
    )
}

/// Hex digits of the URI digest kept in a shard name.
const SHARD_DIGEST_LEN: usize = 12;

/// Earth Engine asset names accept letters, digits, `_` and `-`.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Resolver bound to one root and run date.
///
/// Convenience wrapper so components holding a config don't have to thread
/// both values through every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetIds {
    root: String,
    date: NaiveDate,
}

impl AssetIds {
    pub fn new(root: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            root: root.into(),
            date,
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn table(&self, category: &Category) -> String {
        resolve_table_id(&self.root, &category.attribute, &category.tag, self.date)
    }

    pub fn image(&self, category: &Category) -> String {
        resolve_image_id(&self.root, &category.attribute, &category.tag, self.date)
    }

    pub fn roads(&self) -> String {
        resolve_roads_id(&self.root, self.date)
    }

    pub fn composite(&self, name: &str) -> String {
        resolve_composite_id(&self.root, self.date, name)
    }

    pub fn shard(&self, source_uri: &str) -> String {
        resolve_shard_id(&self.root, self.date, source_uri)
    }
}
