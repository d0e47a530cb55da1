//! Categories command - list the category table.

use clap::Args;
use console::style;
use osmraster::category::CategorySet;

use crate::error::CliError;

#[derive(Debug, Args)]
pub struct CategoriesArgs {
    /// Only list the road categories
    #[arg(long)]
    pub roads: bool,

    /// Only list categories with this attribute (e.g. highway)
    #[arg(long)]
    pub attribute: Option<String>,
}

/// Run the categories command.
pub fn run(args: CategoriesArgs) -> Result<(), CliError> {
    let set = if args.roads {
        CategorySet::default_roads()
    } else {
        CategorySet::defaults()
    };

    let mut shown = 0;
    for category in set.iter().filter(|c| {
        args.attribute
            .as_deref()
            .map_or(true, |attribute| c.attribute == attribute)
    }) {
        println!(
            "{:<40} {}",
            category.to_string(),
            style(category.band_name()).dim()
        );
        shown += 1;
    }

    println!();
    println!("{} of {} categories", shown, set.len());
    Ok(())
}
