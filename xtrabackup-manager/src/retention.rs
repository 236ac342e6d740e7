//! Retention - selecting and removing obsolete backup chains.

use crate::catalog::metadata::BackupRecord;
use crate::catalog::Catalog;
use crate::chain::chain_root;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Outcome of a prune pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    /// Subdirectories selected for removal, in removal order
    pub selected: Vec<String>,
    pub removed: Vec<String>,
    /// Subdirectory and error message of every failed removal
    pub failed: Vec<(String, String)>,
    /// Left in place because a dependent in the same chain could not be removed
    pub skipped: Vec<String>,
}

impl PruneReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

/// Select every backup that falls outside the retention window.
///
/// Full backups are walked newest-first; the first `keep_full` are kept. Each
/// older full backup is selected together with every incremental whose chain
/// resolves through it. Within a chain dependents come before the backup they
/// depend on, so whatever remains on disk is always restorable. Orphaned
/// incrementals belong to no chain and are never selected.
pub fn select_for_removal(catalog: &Catalog, keep_full: usize) -> Vec<&BackupRecord> {
    let mut dependents: HashMap<&str, Vec<&BackupRecord>> = HashMap::new();
    for record in catalog.iter().filter(|r| r.is_incremental()) {
        match chain_root(catalog, record) {
            Ok(root) => dependents
                .entry(root.subdirectory.as_str())
                .or_default()
                .push(record),
            Err(e) => debug!("Leaving {} out of retention: {}", record.subdirectory, e),
        }
    }

    let mut selected = Vec::new();
    for full in catalog.full_backups().into_iter().rev().skip(keep_full) {
        if let Some(incrementals) = dependents.get(full.subdirectory.as_str()) {
            // Catalog order is oldest first; newer backups depend on older ones.
            selected.extend(incrementals.iter().rev().copied());
        }
        selected.push(full);
    }

    selected
}

/// Recursively delete the given backup directories under `root`.
///
/// `records` is a removal order as produced by [`select_for_removal`]: each
/// chain's incrementals followed by its full backup. Once a removal fails the
/// rest of that chain is left on disk, so no surviving incremental loses its
/// base. Other chains are still attempted.
pub fn remove_backups(root: &Path, records: &[BackupRecord]) -> PruneReport {
    let mut report = PruneReport {
        selected: records.iter().map(|r| r.subdirectory.clone()).collect(),
        ..PruneReport::default()
    };

    let mut chain_failed = false;
    for record in records {
        if chain_failed {
            info!(
                "Keeping backup {}: a dependent backup could not be removed",
                record.subdirectory
            );
            report.skipped.push(record.subdirectory.clone());
        } else {
            let path = root.join(&record.subdirectory);
            match std::fs::remove_dir_all(&path) {
                Ok(()) => {
                    info!("Removed backup {}", path.display());
                    report.removed.push(record.subdirectory.clone());
                }
                Err(e) => {
                    warn!("Failed to remove backup {}: {}", path.display(), e);
                    report.failed.push((record.subdirectory.clone(), e.to_string()));
                    chain_failed = true;
                }
            }
        }

        // A full backup closes its chain.
        if record.is_full() {
            chain_failed = false;
        }
    }

    report
}
