//! Ids command - print the asset ids a run would touch.
//!
//! Useful for finding a run's output, or for checking which assets an
//! `--overwrite` run would replace.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::Args;
use osmraster::category::Category;

use super::common::{parse_category, select_categories};
use crate::error::CliError;
use crate::runner::load_config;

#[derive(Debug, Args)]
pub struct IdsArgs {
    /// Cloud project owning the assets
    #[arg(long)]
    pub project: Option<String>,

    /// Asset folder under the project
    #[arg(long)]
    pub folder: Option<String>,

    /// Snapshot date, YYYY-MM-DD
    #[arg(long)]
    pub date: Option<NaiveDate>,

    /// Name of the composite image
    #[arg(long)]
    pub output_image: Option<String>,

    /// Categories to resolve (attribute=tag, repeatable; default: all)
    #[arg(long = "category", value_parser = parse_category)]
    pub categories: Vec<Category>,
}

/// Run the ids command.
pub fn run(config_path: Option<PathBuf>, args: IdsArgs) -> Result<(), CliError> {
    let mut config = load_config(config_path.as_deref())?;
    if let Some(v) = args.project {
        config.project = v;
    }
    if let Some(v) = args.folder {
        config.asset_folder = v;
    }
    if let Some(v) = args.date {
        config.date = v;
    }
    if let Some(v) = args.output_image {
        config.output_name = v;
    }
    if config.project.trim().is_empty() {
        return Err(CliError::Config(
            "No project configured. Set project in config.ini or use --project.".to_string(),
        ));
    }

    let ids = config.asset_ids();
    let categories = select_categories(&config.categories, &args.categories)?;

    println!("Root:      {}", ids.root());
    println!("Roads:     {}", ids.roads());
    println!("Composite: {}", ids.composite(&config.output_name));
    println!();
    for category in &categories {
        println!("{}", category);
        println!("  table: {}", ids.table(category));
        println!("  image: {}", ids.image(category));
    }
    Ok(())
}
