//! CLI module for statbench
//!
//! Provides command-line interface for:
//! - run: Provision, apply a strategy, run trials, print the record
//! - sanitize: Offline estimate sanitization
//! - strategies: List registered strategies
//! - snapshot: Catalog snapshot of a live database

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{run, run_command, run_experiment, sanitize, snapshot, strategies};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{write_error, write_response};
