//! Band grouping and composite merge.
//!
//! A composite stacks bands from several input images into one multi-band
//! image. Which bands go where comes from an external metadata document:
//!
//! ```json
//! {
//!   "images": ["gs://bucket/2021-12-31/osm-0000.tif", "..."],
//!   "bands": {
//!     "b1": {"attribute": "highway", "tag": "residential", "bands": [0]},
//!     "b2": {"attribute": "landuse", "tag": "quarry", "bands": [1, 2]}
//!   }
//! }
//! ```
//!
//! Output bands follow the document's `bands` order exactly, since
//! consumers address bands by position. Each output band is the maximum of
//! its source bands across every input image, reprojected to the first
//! image's projection, and named `{attribute}_{tag}`. Entries for categories
//! that are not configured are skipped.

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::category::{Category, CategorySet};
use crate::remote::{BandSource, CompositeBand, CompositeRequest, Reducer};

/// Errors reading a band metadata document.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("invalid band metadata: {0}")]
    Json(#[from] serde_json::Error),

    #[error("band {band} lists no source bands")]
    NoSourceBands { band: String },
}

/// Errors planning a composite.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MergeError {
    /// There is nothing to merge.
    #[error("merge needs at least one input image")]
    EmptyInput,

    /// Every band in the metadata was for an unconfigured category.
    #[error("none of the {total} metadata bands is a configured category")]
    NoConfiguredBands { total: usize },
}

/// One output band as described by the metadata.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BandSpec {
    pub attribute: String,
    pub tag: String,
    /// Zero-based source band indices, read from every input image.
    pub bands: Vec<u32>,
}

impl BandSpec {
    pub fn category(&self) -> Category {
        Category::new(self.attribute.as_str(), self.tag.as_str())
    }
}

#[derive(Deserialize)]
struct RawMetadata {
    #[serde(default)]
    images: Vec<String>,
    bands: Map<String, Value>,
}

/// Parsed band metadata document.
#[derive(Debug, Clone, PartialEq)]
pub struct BandMetadata {
    images: Vec<String>,
    bands: Vec<(String, BandSpec)>,
}

impl BandMetadata {
    pub fn new(images: Vec<String>, bands: Vec<(String, BandSpec)>) -> Self {
        Self { images, bands }
    }

    /// Parses a metadata document, keeping the order of `bands`.
    pub fn from_json(bytes: &[u8]) -> Result<Self, MetadataError> {
        let raw: RawMetadata = serde_json::from_slice(bytes)?;

        let mut bands = Vec::with_capacity(raw.bands.len());
        for (name, value) in raw.bands {
            let spec: BandSpec = serde_json::from_value(value)?;
            if spec.bands.is_empty() {
                return Err(MetadataError::NoSourceBands { band: name });
            }
            bands.push((name, spec));
        }

        Ok(Self {
            images: raw.images,
            bands,
        })
    }

    /// Input image URIs, as listed.
    pub fn images(&self) -> &[String] {
        &self.images
    }

    /// Output bands, in output order.
    pub fn bands(&self) -> &[(String, BandSpec)] {
        &self.bands
    }
}

/// Builds the composite request for `images`.
///
/// `images` are asset ids; the first one supplies the output projection.
pub fn plan_composite(
    images: &[String],
    metadata: &BandMetadata,
    configured: &CategorySet,
    target: &str,
) -> Result<CompositeRequest, MergeError> {
    let Some(first) = images.first() else {
        return Err(MergeError::EmptyInput);
    };

    let mut bands = Vec::with_capacity(metadata.bands().len());
    for (name, spec) in metadata.bands() {
        if !configured.contains(&spec.attribute, &spec.tag) {
            debug!(band = %name, attribute = %spec.attribute, tag = %spec.tag, "Skipping unconfigured band");
            continue;
        }

        let category = spec.category();
        let sources = images
            .iter()
            .flat_map(|image| {
                spec.bands.iter().map(move |&band| BandSource {
                    image: image.clone(),
                    band,
                })
            })
            .collect();

        bands.push(CompositeBand {
            name: category.band_name(),
            category,
            sources,
        });
    }

    if bands.is_empty() {
        return Err(MergeError::NoConfiguredBands {
            total: metadata.bands().len(),
        });
    }

    info!(
        images = images.len(),
        bands = bands.len(),
        skipped = metadata.bands().len() - bands.len(),
        asset = target,
        "Planned composite"
    );

    Ok(CompositeRequest {
        bands,
        projection_from: first.clone(),
        reducer: Reducer::Max,
        target: target.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"{
        "images": ["gs://b/osm-1.tif", "gs://b/osm-0.tif"],
        "bands": {
            "b1": {"attribute": "landuse", "tag": "quarry", "bands": [0]},
            "b2": {"attribute": "highway", "tag": "residential", "bands": [1]},
            "b3": {"attribute": "amenity", "tag": "zzz_unconfigured", "bands": [2]},
            "b4": {"attribute": "building", "tag": "yes", "bands": [3, 4]}
        }
    }"#;

    fn configured() -> CategorySet {
        CategorySet::from_pairs([
            ("highway", "residential"),
            ("landuse", "quarry"),
            ("building", "yes"),
        ])
    }

    fn images() -> Vec<String> {
        vec![
            "projects/p/assets/osm/shards/2021-12-31/osm-1".to_string(),
            "projects/p/assets/osm/shards/2021-12-31/osm-0".to_string(),
        ]
    }

    #[test]
    fn test_from_json_preserves_band_order() {
        let metadata = BandMetadata::from_json(DOCUMENT.as_bytes()).unwrap();
        let names: Vec<&str> = metadata.bands().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["b1", "b2", "b3", "b4"]);
        assert_eq!(metadata.images().len(), 2);
    }

    #[test]
    fn test_from_json_rejects_empty_source_bands() {
        let doc = r#"{"bands": {"b1": {"attribute": "a", "tag": "t", "bands": []}}}"#;
        let err = BandMetadata::from_json(doc.as_bytes()).unwrap_err();
        assert!(matches!(err, MetadataError::NoSourceBands { ref band } if band == "b1"));
    }

    #[test]
    fn test_from_json_rejects_malformed() {
        assert!(matches!(
            BandMetadata::from_json(b"{\"bands\": [1, 2]}"),
            Err(MetadataError::Json(_))
        ));
    }

    #[test]
    fn test_plan_skips_unconfigured_band() {
        let metadata = BandMetadata::from_json(DOCUMENT.as_bytes()).unwrap();
        let request = plan_composite(&images(), &metadata, &configured(), "projects/p/assets/c")
            .unwrap();

        assert_eq!(request.bands.len(), metadata.bands().len() - 1);
        let names: Vec<&str> = request.bands.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["landuse_quarry", "highway_residential", "building_yes"]);
    }

    #[test]
    fn test_plan_band_order_follows_metadata() {
        let spec = |tag: &str| BandSpec {
            attribute: "landuse".to_string(),
            tag: tag.to_string(),
            bands: vec![0],
        };
        let metadata = BandMetadata::new(
            images(),
            vec![
                ("b1".to_string(), spec("b1")),
                ("b2".to_string(), spec("b2")),
                ("b3".to_string(), spec("b3")),
            ],
        );
        let configured =
            CategorySet::from_pairs([("landuse", "b3"), ("landuse", "b1"), ("landuse", "b2")]);

        // Input order does not matter either.
        let mut reversed = images();
        reversed.reverse();
        let request = plan_composite(&reversed, &metadata, &configured, "projects/p/assets/c")
            .unwrap();

        let tags: Vec<&str> = request.bands.iter().map(|b| b.category.tag.as_str()).collect();
        assert_eq!(tags, vec!["b1", "b2", "b3"]);
    }

    #[test]
    fn test_plan_sources_span_all_images() {
        let metadata = BandMetadata::from_json(DOCUMENT.as_bytes()).unwrap();
        let request = plan_composite(&images(), &metadata, &configured(), "projects/p/assets/c")
            .unwrap();

        let building = &request.bands[2];
        assert_eq!(building.sources.len(), 4);
        assert_eq!(building.sources[0].image, images()[0]);
        assert_eq!(building.sources[0].band, 3);
        assert_eq!(building.sources[3].image, images()[1]);
        assert_eq!(building.sources[3].band, 4);
        assert_eq!(request.projection_from, images()[0]);
    }

    #[test]
    fn test_plan_empty_input() {
        let metadata = BandMetadata::from_json(DOCUMENT.as_bytes()).unwrap();
        assert_eq!(
            plan_composite(&[], &metadata, &configured(), "projects/p/assets/c"),
            Err(MergeError::EmptyInput)
        );
    }

    #[test]
    fn test_plan_nothing_configured() {
        let metadata = BandMetadata::from_json(DOCUMENT.as_bytes()).unwrap();
        assert_eq!(
            plan_composite(&images(), &metadata, &CategorySet::default(), "projects/p/assets/c"),
            Err(MergeError::NoConfiguredBands { total: 4 })
        );
    }
}
