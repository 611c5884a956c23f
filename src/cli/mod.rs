//! CLI command handling
//!
//! Dispatches CLI commands and formats output.

use std::path::{Path, PathBuf};

use colored::Colorize;

use crate::cache::RunCache;
use crate::commands::Commands;
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::playthrough::{self, ProviderSpec};
use crate::provider;
use crate::scheduler::{self, RunReport};

/// Dispatch a CLI command
pub async fn dispatch(command: Commands, config_path: Option<PathBuf>) -> Result<()> {
    match command {
        Commands::Run { playthrough } => run(&playthrough, config_path.as_deref()).await,
        Commands::Recover { run_id, dry_run } => {
            recover(run_id, dry_run, config_path.as_deref()).await
        }
    }
}

async fn run(path: &Path, config_path: Option<&Path>) -> Result<()> {
    let playthrough = playthrough::load(path)?;
    let config = Config::load(config_path)?;

    println!(
        "\n{} {}",
        "Running Playthrough:".blue().bold(),
        playthrough.name.white().bold()
    );

    let provider = provider::connect(&playthrough.provider, &config).await?;
    let run_id = uuid::Uuid::new_v4().to_string();
    let cache = RunCache::new(&config.storage.root, &run_id)?;

    match scheduler::run(&playthrough, provider.as_ref(), cache).await {
        Ok(report) => {
            print_report(&report);
            Ok(())
        }
        Err(e) => {
            println!("\n{} {}", "✗".red(), "Playthrough failed".red().bold());
            eprintln!(
                "Run cache kept for run {}; 'gambol recover --run {}' tears down anything left behind",
                run_id.yellow(),
                run_id
            );
            Err(e)
        }
    }
}

async fn recover(run_id: Option<String>, dry_run: bool, config_path: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path)?;
    let root = &config.storage.root;

    let stored = RunCache::stored_runs(root)?;
    let runs = match run_id {
        Some(id) => match stored.iter().find(|run| run.run_id == id) {
            Some(run) => {
                if run.is_live() {
                    tracing::warn!(run_id = %id, pid = ?run.owner_pid, "Run still looks in progress");
                }
                vec![id]
            }
            None => {
                return Err(Error::Storage(format!(
                    "no cache for run '{}' under {}",
                    id,
                    root.display()
                )))
            }
        },
        // Runs still in progress are only touched when named explicitly
        None => stored
            .into_iter()
            .filter_map(|run| {
                if run.is_live() {
                    println!(
                        "{} {} {}",
                        "Skipping".yellow(),
                        run.run_id,
                        "(still in progress)".dimmed()
                    );
                    None
                } else {
                    Some(run.run_id)
                }
            })
            .collect(),
    };

    if runs.is_empty() {
        println!("No runs to recover");
        return Ok(());
    }

    if dry_run {
        for id in &runs {
            let instances = RunCache::open(root, id)?.instance_ids()?;
            print_run(id, &instances);
        }
        return Ok(());
    }

    // Caches do not record the backend, so recovery uses the default one
    let provider = provider::connect(&ProviderSpec::default(), &config).await?;
    for id in &runs {
        let cache = RunCache::open(root, id)?;
        let destroyed = scheduler::recover(provider.as_ref(), cache).await?;
        print_run(id, &destroyed);
        println!("  {} Recovered", "✓".green());
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("\n{}", "Acts:".cyan());
    for act in &report.acts {
        let origin = if act.created { "created" } else { "reused" };
        println!(
            "  {} {} {}",
            "✓".green(),
            act.name,
            format!(
                "({} {}, {} scenes, {} in, {} out)",
                origin, act.instance, act.scenes, act.inputs, act.outputs
            )
            .dimmed()
        );
    }

    if !report.destroyed.is_empty() {
        println!(
            "\n{} {}",
            "Destroyed:".cyan(),
            report.destroyed.join(", ")
        );
    }

    println!(
        "\n{} {} {}",
        "✓".green(),
        "Playthrough passed".green().bold(),
        format!("(run {})", report.run_id).dimmed()
    );
}

fn print_run(run_id: &str, instances: &[String]) {
    println!("{}", run_id.white().bold());
    if instances.is_empty() {
        println!("  {}", "no instances recorded".dimmed());
    }
    for id in instances {
        println!("  {id}");
    }
}
