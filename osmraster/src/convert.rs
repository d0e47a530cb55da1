//! Vector conversion: OSM source file to category CSVs.
//!
//! Conversion happens in three steps:
//!
//! ```text
//! planet.pbf ──ogr2ogr──► layer CSVs ──combine──► combined.csv ──split──► one CSV per category
//!                         (points, lines,          WKT,attribute,     001-highway_residential.csv
//!                          multipolygons, ...)     tag,burn           002-landuse_quarry.csv ...
//! ```
//!
//! `ogr2ogr` does the geometry work and the coarse `where` filtering. The
//! combine step classifies every row against the configured categories in
//! table order (first match wins) and writes the four-column format Earth
//! Engine imports. The split step fans the combined file out so each
//! category can be imported as its own table.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use csv::{QuoteStyle, ReaderBuilder, StringRecord, Writer, WriterBuilder};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::category::{Category, CategorySet};
use crate::source::unique_file_name;
use crate::BoxFuture;

/// Layers the OSM driver writes, in the order they are combined.
pub const LAYER_NAMES: &[&str] = &[
    "points",
    "lines",
    "multilinestrings",
    "multipolygons",
    "other_relations",
];

/// Columns of a combined CSV.
pub const CSV_HEADER: [&str; 4] = ["WKT", "attribute", "tag", "burn"];

/// Value burned into raster cells covered by a feature.
pub const BURN_VALUE: &str = "1";

/// Result type for conversion operations.
pub type ConvertResult<T> = Result<T, ConvertError>;

/// Errors that can occur while converting or reshaping CSVs.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The converter process could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The converter process exited unsuccessfully.
    #[error("{program} exited with {status}: {stderr}")]
    Command {
        program: String,
        status: String,
        stderr: String,
    },

    /// A file could not be created, read or removed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A CSV file could not be parsed or written.
    #[error("CSV error in {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// A CSV lacks a column the step needs.
    #[error("{} has no {column} column", path.display())]
    MissingColumn { path: PathBuf, column: String },
}

impl ConvertError {
    fn csv(path: &Path, source: csv::Error) -> Self {
        ConvertError::Csv {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        ConvertError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

// =============================================================================
// Converter
// =============================================================================

/// Converts a geometry file into per-layer CSVs.
pub trait VectorConverter: Send + Sync {
    /// Converts `source`, keeping only features matching `categories`.
    ///
    /// Returns the path the layer CSVs were written to (a directory, or a
    /// single file when the source has one layer).
    fn convert<'a>(
        &'a self,
        source: &'a Path,
        categories: &'a CategorySet,
        work_dir: &'a Path,
    ) -> BoxFuture<'a, ConvertResult<PathBuf>>;
}

/// Runs GDAL's `ogr2ogr`.
#[derive(Debug, Clone)]
pub struct Ogr2OgrConverter {
    program: PathBuf,
    osm_config_file: Option<PathBuf>,
}

impl Ogr2OgrConverter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            osm_config_file: None,
        }
    }

    /// Uses a custom `osmconf.ini` to control which OSM keys become columns.
    pub fn with_osm_config(mut self, path: Option<PathBuf>) -> Self {
        self.osm_config_file = path;
        self
    }

    fn command(&self, source: &Path, destination: &Path, categories: &CategorySet) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-f")
            .arg("CSV")
            .arg("-lco")
            .arg("GEOMETRY=AS_WKT")
            .arg("-where")
            .arg(categories.where_clause())
            .arg(destination)
            .arg(source)
            .env("OGR_INTERLEAVED_READING", "YES");
        if let Some(ref config) = self.osm_config_file {
            cmd.env("OSM_CONFIG_FILE", config);
        }
        cmd
    }
}

impl VectorConverter for Ogr2OgrConverter {
    fn convert<'a>(
        &'a self,
        source: &'a Path,
        categories: &'a CategorySet,
        work_dir: &'a Path,
    ) -> BoxFuture<'a, ConvertResult<PathBuf>> {
        Box::pin(async move {
            let program = self.program.display().to_string();
            let destination = work_dir.join(unique_file_name("csv"));

            info!(
                source = %source.display(),
                destination = %destination.display(),
                categories = categories.len(),
                "Converting source to CSV"
            );

            let output = self
                .command(source, &destination, categories)
                .output()
                .await
                .map_err(|source| ConvertError::Spawn {
                    program: program.clone(),
                    source,
                })?;

            if !output.status.success() {
                return Err(ConvertError::Command {
                    program,
                    status: output.status.to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                });
            }

            Ok(destination)
        })
    }
}

// =============================================================================
// Combine
// =============================================================================

/// Layer files that exist for a conversion output.
///
/// `path` itself counts when it is a file; the named layers are looked up
/// inside it when it is a directory and beside it otherwise.
pub fn layer_files(path: &Path) -> Vec<PathBuf> {
    let dir = if path.is_dir() {
        path.to_path_buf()
    } else {
        path.parent().map(Path::to_path_buf).unwrap_or_default()
    };

    let mut files = Vec::new();
    if path.is_file() {
        files.push(path.to_path_buf());
    }
    files.extend(
        LAYER_NAMES
            .iter()
            .map(|name| dir.join(format!("{}.csv", name)))
            .filter(|p| p.is_file() && p != path),
    );
    files
}

/// Combines converted layers into a single four-column CSV at `output`.
///
/// Returns the number of rows written. When no row matches, `output` is
/// removed and `Ok(0)` is returned.
pub fn combine_layers(
    converted: &Path,
    categories: &CategorySet,
    output: &Path,
) -> ConvertResult<usize> {
    let mut writer = quoted_writer(output)?;
    writer
        .write_record(CSV_HEADER)
        .map_err(|e| ConvertError::csv(output, e))?;

    let mut rows = 0;
    for layer in layer_files(converted) {
        let written = combine_layer(&layer, categories, &mut writer, output)?;
        debug!(layer = %layer.display(), rows = written, "Combined layer");
        rows += written;
    }

    writer
        .flush()
        .map_err(|e| ConvertError::io(output, e))?;
    drop(writer);

    if rows == 0 {
        std::fs::remove_file(output).map_err(|e| ConvertError::io(output, e))?;
    }
    info!(output = %output.display(), rows, "Combined layers");
    Ok(rows)
}

fn combine_layer(
    layer: &Path,
    categories: &CategorySet,
    writer: &mut Writer<File>,
    output: &Path,
) -> ConvertResult<usize> {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .from_path(layer)
        .map_err(|e| ConvertError::csv(layer, e))?;
    let columns = column_index(reader.headers().map_err(|e| ConvertError::csv(layer, e))?);

    let Some(&wkt) = columns.get("WKT") else {
        return Err(ConvertError::MissingColumn {
            path: layer.to_path_buf(),
            column: "WKT".to_string(),
        });
    };

    let mut rows = 0;
    let mut record = StringRecord::new();
    while reader
        .read_record(&mut record)
        .map_err(|e| ConvertError::csv(layer, e))?
    {
        let matched = categories.match_row(|column| {
            columns.get(column).and_then(|&i| record.get(i))
        });
        let Some(category) = matched else {
            continue;
        };

        let geometry = record.get(wkt).unwrap_or_default();
        writer
            .write_record([
                geometry,
                category.attribute.as_str(),
                category.tag.as_str(),
                BURN_VALUE,
            ])
            .map_err(|e| ConvertError::csv(output, e))?;
        rows += 1;
    }
    Ok(rows)
}

// =============================================================================
// Split
// =============================================================================

/// A CSV holding the rows of one category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryCsv {
    pub category: Category,
    pub path: PathBuf,
    pub rows: usize,
}

/// Splits a combined CSV into one file per configured category.
///
/// Rows whose `(attribute, tag)` is not configured are dropped. Categories
/// without rows get no file. Output is in configured order.
pub fn split_by_category(
    combined: &Path,
    categories: &CategorySet,
    output_dir: &Path,
) -> ConvertResult<Vec<CategoryCsv>> {
    let mut reader = ReaderBuilder::new()
        .from_path(combined)
        .map_err(|e| ConvertError::csv(combined, e))?;
    let columns = column_index(
        reader
            .headers()
            .map_err(|e| ConvertError::csv(combined, e))?,
    );
    let lookup = |column: &str| {
        columns
            .get(column)
            .copied()
            .ok_or_else(|| ConvertError::MissingColumn {
                path: combined.to_path_buf(),
                column: column.to_string(),
            })
    };
    let wkt = lookup("WKT")?;
    let attribute = lookup("attribute")?;
    let tag = lookup("tag")?;
    let burn = columns.get("burn").copied();

    let positions: HashMap<&Category, usize> =
        categories.iter().enumerate().map(|(i, c)| (c, i)).collect();
    let mut outputs: HashMap<usize, (PathBuf, Writer<File>, usize)> = HashMap::new();
    let mut dropped = 0usize;

    let mut record = StringRecord::new();
    while reader
        .read_record(&mut record)
        .map_err(|e| ConvertError::csv(combined, e))?
    {
        let key = Category::new(
            record.get(attribute).unwrap_or_default(),
            record.get(tag).unwrap_or_default(),
        );
        let Some(&position) = positions.get(&key) else {
            dropped += 1;
            continue;
        };

        let (path, writer, rows) = match outputs.entry(position) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                let path = output_dir.join(category_file_name(position, &key));
                let mut writer = quoted_writer(&path)?;
                writer
                    .write_record(CSV_HEADER)
                    .map_err(|e| ConvertError::csv(&path, e))?;
                entry.insert((path, writer, 0))
            }
        };

        let burn_value = burn.and_then(|i| record.get(i)).unwrap_or(BURN_VALUE);
        writer
            .write_record([
                record.get(wkt).unwrap_or_default(),
                key.attribute.as_str(),
                key.tag.as_str(),
                burn_value,
            ])
            .map_err(|e| ConvertError::csv(&*path, e))?;
        *rows += 1;
    }

    if dropped > 0 {
        warn!(rows = dropped, "Dropped rows for unconfigured categories");
    }

    let mut files = Vec::with_capacity(outputs.len());
    for (position, category) in categories.iter().enumerate() {
        if let Some((path, mut writer, rows)) = outputs.remove(&position) {
            writer.flush().map_err(|e| ConvertError::io(&path, e))?;
            files.push(CategoryCsv {
                category: category.clone(),
                path,
                rows,
            });
        }
    }
    info!(files = files.len(), "Split CSV by category");
    Ok(files)
}

fn category_file_name(position: usize, category: &Category) -> String {
    let name: String = category
        .band_name()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    format!("{:03}-{}.csv", position + 1, name)
}

fn quoted_writer(path: &Path) -> ConvertResult<Writer<File>> {
    WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .from_path(path)
        .map_err(|e| ConvertError::csv(path, e))
}

fn column_index(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(i, name)| (name.to_string(), i))
        .collect()
}
