//! osmraster CLI - Command-line interface
//!
//! Thin front end over the `osmraster` library: argument parsing, config
//! layering and result presentation live here, everything else in the
//! library.

mod commands;
mod error;
mod runner;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use console::style;

use commands::categories::CategoriesArgs;
use commands::ids::IdsArgs;
use commands::run::RunArgs;

/// Rasterize OpenStreetMap categories into Earth Engine assets.
#[derive(Debug, Parser)]
#[command(name = "osmraster")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.osmraster/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset (e.g. debug, osmraster=trace)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the pipeline: import, rasterize, and optionally merge
    Run(RunArgs),

    /// List the configured categories and their band names
    Categories(CategoriesArgs),

    /// Print the asset ids a run would read and write
    Ids(IdsArgs),
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run(args) => commands::run::run(cli.config, cli.log_file, cli.log_level, args),
        Commands::Categories(args) => commands::categories::run(args),
        Commands::Ids(args) => commands::ids::run(cli.config, args),
    };

    if let Err(e) = result {
        eprintln!("{} {}", style("error:").red().bold(), e);
        std::process::exit(e.exit_code());
    }
}
