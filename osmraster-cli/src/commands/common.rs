//! Common types and utilities shared across CLI commands.

use osmraster::category::{Category, CategorySet};

use crate::error::CliError;

/// Parses `attribute=tag`, for use as a clap value parser.
pub fn parse_category(s: &str) -> Result<Category, String> {
    match s.split_once('=') {
        Some((attribute, tag)) if !attribute.trim().is_empty() && !tag.trim().is_empty() => {
            Ok(Category::new(attribute.trim(), tag.trim()))
        }
        _ => Err(format!("expected attribute=tag, got '{}'", s)),
    }
}

/// Restricts `all` to the requested categories, keeping `all`'s order.
///
/// An empty request selects everything. Requesting a category that isn't
/// in `all` is an error.
pub fn select_categories(all: &CategorySet, requested: &[Category]) -> Result<CategorySet, CliError> {
    if requested.is_empty() {
        return Ok(all.clone());
    }

    if let Some(unknown) = requested
        .iter()
        .find(|c| !all.contains(&c.attribute, &c.tag))
    {
        return Err(CliError::Config(format!(
            "Unknown category '{}={}'. Use 'osmraster categories' to see available categories.",
            unknown.attribute, unknown.tag
        )));
    }

    let requested: CategorySet = requested.iter().cloned().collect();
    Ok(all.restricted_to(&requested))
}
