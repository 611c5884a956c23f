//! gambol - integration test playthroughs on ephemeral instances
//!
//! Runs the acts of a playthrough in freshly provisioned or reused
//! instances, moving artifacts between host, run cache and instances.

use clap::Parser;
use gambol::common::logging;
use gambol::{cli, commands};
use commands::Commands;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gambol", about = "Run integration test playthroughs")]
#[command(version, long_about = None)]
struct Cli {
    /// Log remote calls and script output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (default: platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    logging::init_cli(cli.verbose);

    if let Err(e) = cli::dispatch(cli.command, cli.config).await {
        eprintln!("Error: {e}");
        std::process::exit(e.exit_code());
    }
}
