//! xtrabackup-manager - Main entry point
//!
//! Full/incremental backup chain manager for innobackupex.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use xtrabackup_manager::{
    chain::resolve_chain, config::DEFAULT_CONFIG_PATH, lock, shutdown::ShutdownCoordinator, utils,
    BackupManager, Catalog, Config,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Take the next backup (full or incremental), then prune old chains
    Run {
        /// Start a new chain with a full backup regardless of policy
        #[arg(long)]
        full: bool,
    },

    /// Prepare a backup chain and copy it back into the data directory
    Restore {
        /// Backup subdirectory to restore (default: latest)
        subdir: Option<String>,
    },

    /// Remove chains beyond the retention count
    Prune {
        /// Only show what would be removed
        #[arg(long)]
        dry_run: bool,
    },

    /// List backups with their chains
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Remove a leftover run lock
    Unlock,

    /// Print a default configuration file
    DefaultConfig,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    if matches!(args.command, Command::DefaultConfig) {
        print!("{}", Config::default().to_toml()?);
        return Ok(());
    }

    // Load configuration
    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!("Starting xtrabackup-manager v{}", env!("CARGO_PKG_VERSION"));

    if matches!(args.command, Command::Unlock) {
        if lock::break_lock(&config.backup.backup_data_dir)? {
            println!("Run lock removed");
        } else {
            println!("No run lock present");
        }
        return Ok(());
    }

    let shutdown = ShutdownCoordinator::new();
    let manager = BackupManager::new(config, shutdown.token())?;
    let signal_task = tokio::spawn(async move {
        shutdown.wait_for_signal().await;
    });

    let result = execute(&manager, args.command).await;
    signal_task.abort();
    result
}

async fn execute(manager: &BackupManager, command: Command) -> Result<()> {
    match command {
        Command::Run { full } => {
            let report = manager.run(full).await?;
            println!("Completed {}", report.backup);
            if !report.prune.is_clean() {
                bail!("{} backups could not be removed", report.prune.failed.len());
            }
        }
        Command::Restore { subdir } => {
            let report = manager.restore(subdir.as_deref()).await?;
            println!("Restored chain: {}", report.chain.join(" -> "));
        }
        Command::Prune { dry_run } => {
            let report = manager.prune(dry_run).await?;
            let verb = if dry_run { "Would remove" } else { "Removed" };
            let listed = if dry_run { &report.selected } else { &report.removed };
            for subdirectory in listed {
                println!("{} {}", verb, subdirectory);
            }
            for (subdirectory, error) in &report.failed {
                eprintln!("Failed to remove {}: {}", subdirectory, error);
            }
            for subdirectory in &report.skipped {
                eprintln!("Kept {}: a dependent backup could not be removed", subdirectory);
            }
            if !report.is_clean() {
                bail!("{} backups could not be removed", report.failed.len());
            }
        }
        Command::List { json } => {
            let catalog = manager.scan()?;
            print_catalog(&catalog, json)?;
        }
        Command::Unlock | Command::DefaultConfig => {}
    }

    Ok(())
}

fn print_catalog(catalog: &Catalog, json: bool) -> Result<()> {
    if json {
        let entries: Vec<serde_json::Value> = catalog
            .iter()
            .map(|record| {
                let chain = resolve_chain(catalog, record).ok();
                serde_json::json!({
                    "backup": record,
                    "chain_root": chain.as_ref().map(|c| c[0].subdirectory.clone()),
                    "chain_length": chain.as_ref().map(|c| c.len()),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    println!(
        "{:<24} {:<12} {:<20} {:<20} {:<24} {}",
        "BACKUP", "LEVEL", "START", "END", "BASE", "CHAIN"
    );
    for record in catalog.iter() {
        let end = record
            .end_time
            .map(|t| t.to_string())
            .unwrap_or_else(|| "-".to_string());
        let base = record.incremental_base.as_deref().unwrap_or("-");
        let chain = match resolve_chain(catalog, record) {
            Ok(chain) => format!("{} (#{})", chain[0].subdirectory, chain.len()),
            Err(_) => "orphaned".to_string(),
        };
        println!(
            "{:<24} {:<12} {:<20} {:<20} {:<24} {}",
            record.subdirectory,
            record.level.to_string(),
            record.start_time.to_string(),
            end,
            base,
            chain
        );
    }

    Ok(())
}
