//! CLI argument definitions using clap
//!
//! Commands:
//! - statbench run --config <path>
//! - statbench sanitize --schema <path> --estimates <path>
//! - statbench strategies
//! - statbench snapshot --url <url>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// statbench - benchmark planner statistics strategies on PostgreSQL
#[derive(Parser, Debug)]
#[command(name = "statbench")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Minimum log severity (TRACE, INFO, WARN, ERROR, FATAL)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one experiment and print its record
    Run {
        /// Path to experiment configuration file
        #[arg(long, default_value = "./statbench.json")]
        config: PathBuf,
    },

    /// Sanitize estimate rows against a schema description, without a database
    Sanitize {
        /// Schema description (JSON)
        #[arg(long)]
        schema: PathBuf,

        /// Estimate rows (JSON array or {"estimates": [...]})
        #[arg(long)]
        estimates: PathBuf,

        /// Strategy settings supplying the ambiguity policy
        #[arg(long)]
        settings: Option<PathBuf>,
    },

    /// List registered statistics strategies
    Strategies,

    /// Print the catalog snapshot of a live database
    Snapshot {
        /// Connection URL
        #[arg(long)]
        url: String,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
