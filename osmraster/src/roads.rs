//! Merged roads table.
//!
//! Road categories are a subset of the category table. Their features are
//! gathered from the per-category tables into a single table at
//! `{root}/roads/{date}` for downstream road-distance products.

use tracing::{info, warn};

use crate::category::{Category, CategorySet};
use crate::remote::TableMergeRequest;

/// Builds the table merge for the road categories.
///
/// `tables` lists the `(category, table id)` pairs available to read from.
/// Road categories that are not configured are dropped; configured ones
/// without a table are logged and left out. Returns `None` when no road
/// category has a table.
pub fn plan_roads(
    tables: &[(Category, String)],
    roads: &CategorySet,
    configured: &CategorySet,
    target: &str,
) -> Option<TableMergeRequest> {
    let wanted = roads.restricted_to(configured);

    let mut sources: Vec<String> = Vec::new();
    let mut categories = Vec::new();
    for category in &wanted {
        let Some((_, table)) = tables.iter().find(|(c, _)| c == category) else {
            warn!(attribute = %category.attribute, tag = %category.tag, "No table for road category");
            continue;
        };
        if !sources.contains(table) {
            sources.push(table.clone());
        }
        categories.push(category.clone());
    }

    if categories.is_empty() {
        return None;
    }

    info!(
        categories = categories.len(),
        tables = sources.len(),
        asset = target,
        "Planned roads table"
    );
    Some(TableMergeRequest {
        sources,
        categories,
        target: target.to_string(),
    })
}
