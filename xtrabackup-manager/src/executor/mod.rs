//! Backup run orchestration.
//!
//! This module ties together the chain model and the engine adapter:
//! - Catalog scan and policy decision
//! - Engine invocation (backup, prepare, copy-back)
//! - Retention pruning
//! - Run locking

pub mod engine;

use crate::catalog::metadata::BackupRecord;
use crate::catalog::Catalog;
use crate::chain::resolve_chain;
use crate::config::Config;
use crate::lock::RunLock;
use crate::policy::{decide_next_backup, NextBackup};
use crate::retention::{remove_backups, select_for_removal, PruneReport};
use crate::utils::errors::{ManagerError, Result};
use engine::Engine;
use serde::Serialize;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Outcome of a backup run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub backup: NextBackup,
    pub prune: PruneReport,
}

/// Outcome of a restore.
#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    /// Restored chain, full backup first
    pub chain: Vec<String>,
}

/// Main backup manager
pub struct BackupManager {
    config: Config,
    engine: Engine,
}

impl BackupManager {
    /// Create a manager from a validated configuration
    pub fn new(config: Config, cancel_token: CancellationToken) -> Result<Self> {
        config.validate()?;
        let engine = Engine::from_config(&config, cancel_token);
        Ok(Self { config, engine })
    }

    pub fn root(&self) -> &Path {
        &self.config.backup.backup_data_dir
    }

    /// Take a fresh catalog snapshot.
    pub fn scan(&self) -> Result<Catalog> {
        Catalog::scan(self.root())
    }

    /// Take the next backup of the chain, then apply retention.
    ///
    /// With `force_full` the policy is bypassed and a new chain is started.
    pub async fn run(&self, force_full: bool) -> Result<RunReport> {
        let _lock = RunLock::acquire(self.root())?;

        info!("Deciding backup level to be performed...");
        let catalog = self.scan()?;
        let backup = if force_full {
            info!("Full backup requested explicitly");
            NextBackup::Full
        } else {
            decide_next_backup(&catalog, self.config.backup.incremental_per_full)?
        };
        info!("Performing {}", backup);

        let command = match &backup {
            NextBackup::Full => self.engine.full_backup_command(self.root()),
            NextBackup::Incremental { base } => {
                self.engine.incremental_backup_command(self.root(), base)
            }
        };
        self.engine.run(&command).await?;

        let prune = self.prune_locked(false).await?;

        Ok(RunReport { backup, prune })
    }

    /// Prepare the chain ending at `target` (default: latest backup) and copy it back.
    pub async fn restore(&self, target: Option<&str>) -> Result<RestoreReport> {
        let _lock = RunLock::acquire(self.root())?;

        let catalog = self.scan()?;
        let record = match target {
            Some(subdirectory) => catalog
                .get(subdirectory)
                .ok_or_else(|| ManagerError::BackupNotFound(subdirectory.to_string()))?,
            None => catalog
                .latest()
                .ok_or_else(|| ManagerError::BackupNotFound("no backups available".to_string()))?,
        };

        let chain = resolve_chain(&catalog, record)?;
        info!(
            "Restoring {} from a chain of {} backups",
            record.subdirectory,
            chain.len()
        );

        for command in self.engine.prepare_commands(self.root(), &chain) {
            self.engine.run(&command).await?;
        }

        let full_dir = catalog.path_of(chain[0]);
        self.engine.run(&self.engine.copy_back_command(&full_dir)).await?;

        info!("Restore of {} complete", record.subdirectory);
        Ok(RestoreReport {
            chain: chain.iter().map(|r| r.subdirectory.clone()).collect(),
        })
    }

    /// Remove every chain beyond the retention count.
    pub async fn prune(&self, dry_run: bool) -> Result<PruneReport> {
        let _lock = RunLock::acquire(self.root())?;
        self.prune_locked(dry_run).await
    }

    async fn prune_locked(&self, dry_run: bool) -> Result<PruneReport> {
        info!("Pruning backup directory {}", self.root().display());

        let catalog = self.scan()?;
        let keep_full = self.config.backup.keep_full_backup as usize;
        let selected: Vec<BackupRecord> = select_for_removal(&catalog, keep_full)
            .into_iter()
            .cloned()
            .collect();

        if selected.is_empty() {
            info!("Nothing to prune (keeping {} full backups)", keep_full);
            return Ok(PruneReport::default());
        }

        let names: Vec<String> = selected.iter().map(|r| r.subdirectory.clone()).collect();
        if dry_run {
            info!("Would remove {} backups: {}", names.len(), names.join(", "));
            return Ok(PruneReport {
                selected: names,
                ..PruneReport::default()
            });
        }

        let root = self.root().to_path_buf();
        let report = tokio::task::spawn_blocking(move || remove_backups(&root, &selected))
            .await
            .map_err(|e| std::io::Error::other(format!("removal task failed: {}", e)))?;

        if report.is_clean() {
            info!("Removed {} backups", report.removed.len());
        } else {
            warn!(
                "Removed {} backups, {} removals failed, {} backups kept for their dependents",
                report.removed.len(),
                report.failed.len(),
                report.skipped.len()
            );
        }

        Ok(report)
    }
}
