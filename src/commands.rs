//! CLI command definitions
//!
//! Defines the clap commands for the gambol CLI.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run a playthrough file
    Run {
        /// Path to the playthrough YAML file
        playthrough: PathBuf,
    },

    /// Destroy instances left behind by failed runs and flush their caches
    Recover {
        /// Only recover this run (default: every run with a cache on disk)
        #[arg(long = "run")]
        run_id: Option<String>,

        /// List what would be destroyed without touching anything
        #[arg(long)]
        dry_run: bool,
    },
}
