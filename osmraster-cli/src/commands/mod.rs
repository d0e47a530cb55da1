//! CLI subcommands.

pub mod categories;
pub mod common;
pub mod ids;
pub mod run;
