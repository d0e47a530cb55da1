//! Static OSM category table.
//!
//! A category is an `(attribute, tag)` pair such as `highway=residential`.
//! The configured [`CategorySet`] is the single source of truth for which
//! pairs are filtered, rasterized, merged and named.

use std::collections::HashSet;
use std::fmt;

/// A single `(attribute, tag)` classification key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Category {
    /// OSM key, e.g. `highway`.
    pub attribute: String,
    /// OSM value, e.g. `residential`.
    pub tag: String,
}

impl Category {
    /// Creates a category from an attribute and tag.
    pub fn new(attribute: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            tag: tag.into(),
        }
    }

    /// Band name used in merged composites: `{attribute}_{tag}`.
    pub fn band_name(&self) -> String {
        format!("{}_{}", self.attribute, self.tag)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.attribute, self.tag)
    }
}

/// Ordered, de-duplicated set of configured categories.
///
/// Iteration order is the order the categories were supplied in. Row
/// matching walks the set in that order, so the first matching category
/// wins when a feature carries several configured keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategorySet {
    ordered: Vec<Category>,
    index: HashSet<(String, String)>,
}

impl CategorySet {
    /// Builds a set from `(attribute, tag)` pairs, dropping duplicates.
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        pairs
            .into_iter()
            .map(|(attribute, tag)| Category::new(attribute, tag))
            .collect()
    }

    /// The full category table.
    pub fn defaults() -> Self {
        Self::from_pairs(DEFAULT_CATEGORIES.iter().copied())
    }

    /// The road subset of the category table.
    pub fn default_roads() -> Self {
        Self::from_pairs(DEFAULT_ROAD_CATEGORIES.iter().copied())
    }

    /// Adds a category, returning false if it was already present.
    pub fn insert(&mut self, category: Category) -> bool {
        let key = (category.attribute.clone(), category.tag.clone());
        if self.index.insert(key) {
            self.ordered.push(category);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, attribute: &str, tag: &str) -> bool {
        self.index
            .contains(&(attribute.to_string(), tag.to_string()))
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Category> {
        self.ordered.iter()
    }

    /// Distinct attribute names, in first-seen order.
    pub fn attributes(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.ordered
            .iter()
            .filter(|c| seen.insert(c.attribute.as_str()))
            .map(|c| c.attribute.as_str())
            .collect()
    }

    /// Members of `self` that are also configured in `configured`.
    pub fn restricted_to(&self, configured: &CategorySet) -> CategorySet {
        self.ordered
            .iter()
            .filter(|c| configured.contains(&c.attribute, &c.tag))
            .cloned()
            .collect()
    }

    /// OGR SQL filter selecting every configured category.
    ///
    /// Produces `highway='residential' or landuse='quarry' ...`.
    pub fn where_clause(&self) -> String {
        self.ordered
            .iter()
            .map(|c| format!("{}='{}'", c.attribute, c.tag.replace('\'', "''")))
            .collect::<Vec<_>>()
            .join(" or ")
    }

    /// Finds the first category whose attribute column holds its tag.
    ///
    /// `lookup` returns the value of a named column for the row being
    /// classified, or `None` when the column is absent.
    pub fn match_row<'r, F>(&self, lookup: F) -> Option<&Category>
    where
        F: Fn(&str) -> Option<&'r str>,
    {
        self.ordered
            .iter()
            .find(|c| lookup(&c.attribute) == Some(c.tag.as_str()))
    }
}

impl FromIterator<Category> for CategorySet {
    fn from_iter<T: IntoIterator<Item = Category>>(iter: T) -> Self {
        let mut set = CategorySet::default();
        for category in iter {
            set.insert(category);
        }
        set
    }
}

impl<'a> IntoIterator for &'a CategorySet {
    type Item = &'a Category;
    type IntoIter = std::slice::Iter<'a, Category>;

    fn into_iter(self) -> Self::IntoIter {
        self.ordered.iter()
    }
}

// =============================================================================
// Category table
// =============================================================================

/// Every `(attribute, tag)` pair the pipeline rasterizes by default.
pub const DEFAULT_CATEGORIES: &[(&str, &str)] = &[
    ("aeroway", "aerodrome"),
    ("aeroway", "apron"),
    ("aeroway", "hangar"),
    ("aeroway", "helipad"),
    ("aeroway", "heliport"),
    ("aeroway", "runway"),
    ("aeroway", "spaceport"),
    ("aeroway", "taxiway"),
    ("aeroway", "terminal"),
    ("amenity", "aerialway"),
    ("amenity", "alpinecampwild"),
    ("leisure", "beach_resort"),
    ("amenity", "fuel"),
    ("leisure", "golf_course"),
    ("leisure", "marina"),
    ("leisure", "pitch"),
    ("amenity", "sanitary_dump_station"),
    ("barrier", "city_wall"),
    ("barrier", "ditch"),
    ("barrier", "hedge"),
    ("barrier", "retaining_wall"),
    ("barrier", "wall"),
    ("landuse", "basin"),
    ("landuse", "cemetery"),
    ("landuse", "industrial"),
    ("landuse", "landfill"),
    ("landuse", "quarry"),
    ("landuse", "salt_pond"),
    ("landuse", "village_green"),
    ("man_made", "adit"),
    ("man_made", "beacon"),
    ("man_made", "breakwater"),
    ("man_made", "chimney"),
    ("man_made", "communications_tower"),
    ("man_made", "dyke"),
    ("man_made", "embankment"),
    ("man_made", "gasometer"),
    ("man_made", "groyne"),
    ("man_made", "lighthouse"),
    ("man_made", "mast"),
    ("man_made", "mineshaft"),
    ("man_made", "observatorytelescope"),
    ("man_made", "petroleum_well"),
    ("man_made", "pier"),
    ("man_made", "pipeline"),
    ("man_made", "pumping_station"),
    ("man_made", "reservoir_covered"),
    ("man_made", "silo"),
    ("man_made", "snow_fence"),
    ("man_made", "storage_tank"),
    ("man_made", "tower"),
    ("man_made", "wastewater_plant"),
    ("man_made", "watermill"),
    ("man_made", "water_tower"),
    ("man_made", "water_well"),
    ("man_made", "water_works"),
    ("man_made", "windmill"),
    ("man_made", "works"),
    ("military", "airfield"),
    ("military", "ammunition"),
    ("military", "barracks"),
    ("military", "bunker"),
    ("military", "checkpoint"),
    ("military", "danger_area"),
    ("military", "naval_base"),
    ("military", "nuclear_explosion_site"),
    ("military", "range"),
    ("military", "trench"),
    ("power", "cable"),
    ("power", "heliostat"),
    ("power", "line"),
    ("power", "substation"),
    ("power", "xbio"),
    ("power", "xcoal"),
    ("power", "xhydro"),
    ("power", "xnuclear"),
    ("power", "xoil"),
    ("power", "xother"),
    ("power", "xsolar"),
    ("power", "xwaste"),
    ("power", "xwind"),
    ("waterway", "canal"),
    ("waterway", "dam"),
    ("waterway", "ditch"),
    ("waterway", "drain"),
    ("waterway", "lock_gate"),
    ("waterway", "weir"),
    ("highway", "bridleway"),
    ("highway", "bus_guideway"),
    ("highway", "cycleway"),
    ("highway", "elevator"),
    ("highway", "escape"),
    ("highway", "footway"),
    ("highway", "living_street"),
    ("highway", "mini_roundabout"),
    ("highway", "motorway"),
    ("highway", "motorway_link"),
    ("highway", "path"),
    ("highway", "pedestrian"),
    ("highway", "primary"),
    ("highway", "primary_link"),
    ("highway", "raceway"),
    ("highway", "residential"),
    ("highway", "rest_area"),
    ("highway", "road"),
    ("highway", "secondary"),
    ("highway", "secondary_link"),
    ("highway", "service"),
    ("highway", "steps"),
    ("highway", "tertiary"),
    ("highway", "tertiary_link"),
    ("highway", "track"),
    ("highway", "trunk"),
    ("highway", "trunk_link"),
    ("highway", "turning_circle"),
    ("highway", "unclassified"),
    ("railway", "abandoned"),
    ("railway", "disused"),
    ("railway", "funicular"),
    ("railway", "halt"),
    ("railway", "light_rail"),
    ("railway", "miniature"),
    ("railway", "monorail"),
    ("railway", "narrow_gauge"),
    ("railway", "platform"),
    ("railway", "preserved"),
    ("railway", "rail"),
    ("railway", "station"),
    ("railway", "subway"),
    ("railway", "tram"),
];

/// Pairs merged into the roads table.
pub const DEFAULT_ROAD_CATEGORIES: &[(&str, &str)] = &[
    ("highway", "bridleway"),
    ("highway", "bus_guideway"),
    ("highway", "cycleway"),
    ("highway", "elevator"),
    ("highway", "escape"),
    ("highway", "footway"),
    ("highway", "living_street"),
    ("highway", "mini_roundabout"),
    ("highway", "motorway"),
    ("highway", "motorway_link"),
    ("highway", "path"),
    ("highway", "pedestrian"),
    ("highway", "primary"),
    ("highway", "primary_link"),
    ("highway", "raceway"),
    ("highway", "residential"),
    ("highway", "rest_area"),
    ("highway", "road"),
    ("highway", "secondary"),
    ("highway", "secondary_link"),
    ("highway", "service"),
    ("highway", "steps"),
    ("highway", "tertiary"),
    ("highway", "tertiary_link"),
    ("highway", "track"),
    ("highway", "trunk"),
    ("highway", "trunk_link"),
    ("highway", "turning_circle"),
    ("highway", "unclassified"),
];
