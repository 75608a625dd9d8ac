//! Tiered backup and binary-log retention engine.
//!
//! Orchestrates full, incremental and continuous log/archive backups of
//! MySQL-family instances through external tools, retires source log
//! segments once they are durably archived, and reconstructs point-in-time
//! restore plans from the archived artifacts.

// logtide/src/main.rs
mod archive;
mod backup;
mod client;
mod config;
mod errors;
mod model;
mod registry;
mod restore;
mod retention;
mod schedule;
#[cfg(test)]
mod testutil;

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;

use config::{CliOverrides, EngineConfig};
use errors::Result;
use model::BackupTier;

#[derive(Parser)]
#[command(
    name = "logtide",
    version,
    about = "Tiered backup and binary-log retention engine",
    long_about = "Runs full, incremental and continuous log/archive backups of \
                  configured database instances, purges source log segments once \
                  they are safely archived, and plans or executes point-in-time \
                  restores from the archive store."
)]
struct Cli {
    /// Path to the engine configuration file
    #[arg(long, global = true, default_value = "logtide.json")]
    config: PathBuf,

    /// Restrict the run to specific instance ids (repeatable)
    #[arg(short, long, global = true)]
    instance: Vec<String>,

    /// Override the configured backup root path
    #[arg(long, global = true)]
    backup_root: Option<PathBuf>,

    /// Override per-instance data-transfer parallelism
    #[arg(long, global = true)]
    parallel: Option<u32>,

    /// Override per-instance piece size in MiB
    #[arg(long, global = true)]
    piece_size_mb: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum TierArg {
    Full,
    Incremental,
    Archive,
}

impl From<TierArg> for BackupTier {
    fn from(arg: TierArg) -> Self {
        match arg {
            TierArg::Full => BackupTier::Full,
            TierArg::Incremental => BackupTier::Incremental,
            TierArg::Archive => BackupTier::Archive,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a backup of the given tier on every selected instance
    Backup {
        #[arg(value_enum)]
        tier: TierArg,
    },

    /// Age out expired artifacts and reconcile the tool catalog
    Cleanup,

    /// Plan (default) or execute a point-in-time restore for a day
    Restore {
        /// Target day (YYYY-MM-DD)
        #[arg(short = 'd', long = "day")]
        day: NaiveDate,

        /// Execute the plan instead of printing it
        #[arg(short = 'y', long = "yes")]
        execute: bool,
    },

    /// Install the periodic backup schedule into the user crontab
    Cron,

    /// Remove the periodic backup schedule from the user crontab
    RemoveCron,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run_app(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("❌ Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Dispatches the selected command. Returns whether every instance and
/// operation succeeded; instance-level failures are reported in the batch
/// summary, not as an early error.
fn run_app(cli: Cli) -> Result<bool> {
    let overrides = CliOverrides {
        backup_root: cli.backup_root.clone(),
        parallel: cli.parallel,
        piece_size_mb: cli.piece_size_mb,
    };
    let engine_config = EngineConfig::load(&cli.config, &overrides)?;

    match cli.command {
        Commands::Backup { tier } => {
            let tier: BackupTier = tier.into();
            println!("🚀 Starting {} backup run...", tier);
            let contexts = registry::resolve(&engine_config, &cli.instance)?;
            let report = registry::run_batch(&contexts, |ctx| backup::run_backup_flow(ctx, tier));
            report.print_summary();
            Ok(report.all_succeeded())
        }
        Commands::Cleanup => {
            println!("🧹 Starting retention sweep...");
            let contexts = registry::resolve(&engine_config, &cli.instance)?;
            let report = registry::run_batch(&contexts, |ctx| {
                retention::run_cleanup_flow(ctx, &backup::XtraBackupTool)
            });
            report.print_summary();
            Ok(report.all_succeeded())
        }
        Commands::Restore { day, execute } => {
            println!("🔄 Starting restore for {}...", day);
            let contexts = registry::resolve(&engine_config, &cli.instance)?;
            let report =
                registry::run_batch(&contexts, |ctx| restore::run_restore_flow(ctx, day, execute));
            report.print_summary();
            Ok(report.all_succeeded())
        }
        Commands::Cron => {
            schedule::install_cron(&cli.config, &engine_config.backup_root)?;
            Ok(true)
        }
        Commands::RemoveCron => {
            schedule::remove_cron()?;
            Ok(true)
        }
    }
}
