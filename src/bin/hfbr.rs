//! # hfbr CLI - High frequency backup and retention
//!
//! Runs one pass over every configured target: snapshot the file if it
//! changed, then prune the backup directory according to its plan.
//!
//! ## Usage
//! ```bash
//! # Targets and plans from ./settings.json
//! hfbr
//!
//! # Another settings file, nothing deleted
//! hfbr -c /etc/hfbr.json --dry-run
//!
//! # Single target without settings (snapshot only, nothing pruned)
//! hfbr db.sqlite /var/backup/db
//! ```
//!
//! Meant to be run from cron as often as the file is worth snapshotting.

use anyhow::Context;
use clap::Parser;
use colored::*;
use hfbr::settings::{resolve_targets, DEFAULT_SETTINGS_FILE};
use hfbr::{run_targets, HfbrError, PruneMode, Settings, TracingSink};
use humantime::format_duration;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// High frequency backup and retention
#[derive(Parser)]
#[command(name = "hfbr")]
#[command(version)]
#[command(about = "Snapshot a file when it changes and keep a bounded history of snapshots")]
#[command(long_about = None)]
struct Cli {
    /// Path to the settings file (JSON)
    #[arg(short, long, default_value = DEFAULT_SETTINGS_FILE)]
    config: PathBuf,

    /// File to back up when no settings file lists targets
    target_path: Option<PathBuf>,

    /// Backup directory for TARGET_PATH (defaults to its directory)
    backup_dir: Option<PathBuf>,

    /// Report what would be pruned without deleting anything
    #[arg(long)]
    dry_run: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

/// Set up logging: `RUST_LOG` wins, then `--verbose`, then the settings file
fn init_logging(verbose: bool, settings: Option<&Settings>) {
    let fallback = if verbose {
        "debug".to_string()
    } else {
        settings
            .and_then(|s| s.log_level.clone())
            .unwrap_or_else(|| "info".to_string())
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Returns whether every target succeeded
fn run(cli: Cli) -> anyhow::Result<bool> {
    let settings = Settings::load(&cli.config)
        .with_context(|| format!("Failed to load settings from {}", cli.config.display()))?;
    init_logging(cli.verbose, settings.as_ref());

    let mut targets = match resolve_targets(settings.as_ref(), cli.target_path, cli.backup_dir) {
        Ok(targets) => targets,
        Err(HfbrError::NoUsableTargets) => {
            anyhow::bail!(
                "Nothing to do! Check the documentation and make sure to have a settings file."
            )
        }
        Err(e) => return Err(e).context("Invalid settings"),
    };

    if cli.dry_run {
        targets = targets
            .into_iter()
            .map(|t| t.mode(PruneMode::DryRun))
            .collect();
    }

    let start = Instant::now();
    info!("{}", "^".repeat(40));
    let summary = run_targets(&targets, &TracingSink);
    info!("{}", "v".repeat(40));

    let pruned: usize = summary.completed.iter().map(|r| r.prune.pruned.len()).sum();
    let captured = summary
        .completed
        .iter()
        .filter(|r| r.guard.as_ref().is_some_and(|g| g.snapshot().is_some()))
        .count();

    println!(
        "{} {} targets, {} snapshots captured, {} pruned{} in {}",
        if summary.all_succeeded() { "✓".green().bold() } else { "✗".red().bold() },
        targets.len().to_string().cyan(),
        captured.to_string().cyan(),
        pruned.to_string().yellow(),
        if cli.dry_run { " (dry run)" } else { "" },
        format_duration(Duration::from_millis(start.elapsed().as_millis() as u64))
            .to_string()
            .cyan()
    );

    for (target, error) in &summary.failed {
        eprintln!("  {} {}: {}", "✗".red(), target.display(), error);
    }

    Ok(summary.all_succeeded())
}
