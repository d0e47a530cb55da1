//! Run command - execute the pipeline end to end.

use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use clap::Args;
use console::style;
use osmraster::category::{Category, CategorySet};
use osmraster::config::PipelineConfig;
use osmraster::pipeline::{Pipeline, PipelineReport};

use super::common::{parse_category, select_categories};
use crate::error::CliError;
use crate::runner::{load_config, CliRunner};

/// Arguments for the run command.
///
/// Every flag overrides the config file and environment when given.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Cloud project owning the assets
    #[arg(long)]
    pub project: Option<String>,

    /// Bucket used to stage CSVs
    #[arg(long)]
    pub bucket: Option<String>,

    /// Asset folder under the project (default: osm)
    #[arg(long)]
    pub folder: Option<String>,

    /// Snapshot date, YYYY-MM-DD (default: today)
    #[arg(long)]
    pub date: Option<NaiveDate>,

    /// Download the OSM extract from this URL
    #[arg(long)]
    pub source_url: Option<String>,

    /// Convert this local OSM file instead of downloading
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Import this WKT,attribute,tag,burn CSV instead of converting
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// Rasterize from this existing table instead of importing
    #[arg(long)]
    pub table: Option<String>,

    /// Band metadata for the composite merge (gs:// URI or local path)
    #[arg(long)]
    pub metadata: Option<String>,

    /// Name of the composite image
    #[arg(long)]
    pub output_image: Option<String>,

    /// Only process these categories (attribute=tag, repeatable)
    #[arg(long = "category", value_parser = parse_category)]
    pub categories: Vec<Category>,

    /// Replace existing tables and images
    #[arg(long)]
    pub overwrite: bool,

    /// Keep staged blobs, intermediate tables and local files
    #[arg(long)]
    pub skip_cleanup: bool,

    /// Also build the merged roads table
    #[arg(long)]
    pub import_roads: bool,

    /// Output CRS of rasterized images
    #[arg(long)]
    pub crs: Option<String>,

    /// Output resolution of rasterized images, in meters
    #[arg(long)]
    pub scale: Option<f64>,

    /// Give up on jobs still pending after this many seconds
    #[arg(long)]
    pub poll_timeout: Option<u64>,

    /// Directory for downloads and intermediate CSVs
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Path to ogr2ogr
    #[arg(long)]
    pub ogr2ogr: Option<PathBuf>,

    /// Service account key file
    #[arg(long)]
    pub key_file: Option<PathBuf>,
}

impl RunArgs {
    /// Overlays the flags onto `config`.
    pub fn apply(self, mut config: PipelineConfig) -> Result<PipelineConfig, CliError> {
        if let Some(v) = self.project {
            config.project = v;
        }
        if let Some(v) = self.bucket {
            config.bucket = v;
        }
        if let Some(v) = self.folder {
            config.asset_folder = v;
        }
        if let Some(v) = self.date {
            config.date = v;
        }
        if let Some(v) = self.source_url {
            config.source_url = Some(v);
        }
        if let Some(v) = self.file {
            config.source_file = Some(v);
        }
        if let Some(v) = self.csv {
            config.csv_file = Some(v);
        }
        if let Some(v) = self.table {
            config.table_id = Some(v);
        }
        if let Some(v) = self.metadata {
            config.metadata = Some(v);
        }
        if let Some(v) = self.output_image {
            config.output_name = v;
        }
        if !self.categories.is_empty() {
            config.categories = select_categories(&CategorySet::defaults(), &self.categories)?;
        }
        // Flags can only switch these on.
        config.overwrite |= self.overwrite;
        config.skip_cleanup |= self.skip_cleanup;
        config.import_roads |= self.import_roads;
        if let Some(v) = self.crs {
            config.crs = v;
        }
        if let Some(v) = self.scale {
            config.scale_meters = v;
        }
        if let Some(v) = self.poll_timeout {
            config.poll_timeout = Some(Duration::from_secs(v));
        }
        if let Some(v) = self.work_dir {
            config.work_dir = v;
        }
        if let Some(v) = self.ogr2ogr {
            config.ogr2ogr = v;
        }
        if let Some(v) = self.key_file {
            config.key_file = Some(v);
        }
        Ok(config)
    }
}

/// Run the run command.
pub fn run(
    config_path: Option<PathBuf>,
    log_file: Option<PathBuf>,
    log_level: Option<String>,
    args: RunArgs,
) -> Result<(), CliError> {
    let runner = CliRunner::new(log_file, log_level)?;
    runner.log_startup("run");

    let config = args.apply(load_config(config_path.as_deref())?)?;
    config.validate()?;

    print_banner(&config);

    let pipeline = Pipeline::connect(config)?;
    let report = runner.runtime()?.block_on(pipeline.execute())?;

    print_summary(&report);
    if report.is_success() {
        Ok(())
    } else {
        Err(CliError::Failed {
            failed: report.failed(),
        })
    }
}

fn print_banner(config: &PipelineConfig) {
    println!("osmraster v{}", osmraster::VERSION);
    println!("================================");
    println!();
    println!("Project:    {}", config.project);
    println!("Assets:     {}", config.asset_root());
    println!("Date:       {}", config.date);
    println!("Categories: {}", config.categories.len());
    if config.import_roads {
        println!("Roads:      {}", config.asset_ids().roads());
    }
    if config.metadata.is_some() {
        println!(
            "Composite:  {}",
            config.asset_ids().composite(&config.output_name)
        );
    }
    println!();
}

fn print_summary(report: &PipelineReport) {
    println!();
    println!("Run Summary");
    println!("───────────");

    if report.nothing_to_import {
        println!("  No features matched any configured category; nothing to do.");
    }
    println!("  Jobs submitted: {}", report.submitted);
    println!(
        "  Assets written: {}",
        style(report.succeeded()).green()
    );
    println!("  Already there:  {}", report.skipped.len());
    if let Some(ref roads) = report.roads {
        println!("  Roads table:    {}", roads);
    }
    if let Some(ref composite) = report.composite {
        println!("  Composite:      {}", composite);
    }

    if !report.failures.is_empty() {
        println!();
        println!("  {}", style(format!("Failed ({}):", report.failed())).red().bold());
        for failure in &report.failures {
            println!("    {} {}: {}", failure.kind, failure.asset, failure.error);
        }
    }

    if let Some(ref cleanup) = report.cleanup {
        println!();
        if cleanup.skipped {
            println!("  Cleanup skipped; transient assets were kept.");
        } else {
            println!("  Transient assets deleted: {}", cleanup.deleted);
            for (asset, reason) in &cleanup.failed {
                println!(
                    "    {} could not delete {}: {}",
                    style("!").yellow(),
                    asset,
                    reason
                );
            }
        }
    }
}
