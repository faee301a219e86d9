//! Command-line interface for mms-workflow.
//!
//! Provides commands to run, validate and inspect matchup campaigns, plus
//! the sensor validation report helpers.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
