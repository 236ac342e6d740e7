//! Backup catalog - an immutable snapshot of the backup root.
//!
//! A scan enumerates the immediate children of the backup root, parses the
//! marker files of each one and sorts the resulting records by start time.
//! Incremental base links are resolved against the snapshot by subdirectory
//! name, so records never hold references to each other.

pub mod metadata;

use crate::utils::errors::Result;
use metadata::{parse_backup_dir, BackupRecord};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    root: PathBuf,
    records: Vec<BackupRecord>,
    index: HashMap<String, usize>,
}

impl Catalog {
    /// Scan `root` and build a snapshot of every complete backup in it.
    ///
    /// Directories whose metadata is missing or incomplete are skipped with a
    /// warning. An unreadable marker file aborts the whole scan.
    pub fn scan(root: &Path) -> Result<Self> {
        let walker = WalkDir::new(root)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .sort_by_file_name();

        let mut records = Vec::new();

        for entry in walker {
            let entry = entry.map_err(std::io::Error::from)?;

            let name = entry.file_name().to_string_lossy();
            if name.starts_with('.') {
                continue;
            }

            let is_dir = if entry.path_is_symlink() {
                std::fs::metadata(entry.path())
                    .map(|m| m.is_dir())
                    .unwrap_or(false)
            } else {
                entry.file_type().is_dir()
            };
            if !is_dir {
                debug!("Ignoring non-directory entry: {}", entry.path().display());
                continue;
            }

            match parse_backup_dir(entry.path()) {
                Ok(record) => records.push(record),
                Err(e) if e.is_skippable() => {
                    warn!("Skipping {}: {}", entry.path().display(), e);
                }
                Err(e) => return Err(e),
            }
        }

        let catalog = Self::from_records(root.to_path_buf(), records);
        info!(
            "Scanned {}: {} backups ({} full)",
            root.display(),
            catalog.len(),
            catalog.full_backups().len()
        );
        Ok(catalog)
    }

    /// Build a snapshot from already parsed records.
    ///
    /// Records are sorted by start time (stable) and incremental base links are
    /// resolved. A link is only set when the base is present in the snapshot and
    /// started strictly before its dependent, which keeps every chain acyclic.
    pub fn from_records(root: PathBuf, mut records: Vec<BackupRecord>) -> Self {
        records.sort_by_key(|r| r.start_time);

        let index = build_index(&records);

        for i in 0..records.len() {
            if !records[i].is_incremental() {
                records[i].incremental_base = None;
                continue;
            }

            let resolved = match records[i].incremental_basedir.as_deref() {
                None => {
                    warn!(
                        "Incremental backup {} does not record its base directory",
                        records[i].subdirectory
                    );
                    None
                }
                Some(base) => match index.get(base) {
                    Some(&j) if records[j].start_time < records[i].start_time => {
                        Some(base.to_string())
                    }
                    Some(_) => {
                        warn!(
                            "Incremental backup {} names base {} which did not start earlier",
                            records[i].subdirectory, base
                        );
                        None
                    }
                    None => {
                        warn!(
                            "Incremental backup {} names base {} which is not in the catalog",
                            records[i].subdirectory, base
                        );
                        None
                    }
                },
            };

            records[i].incremental_base = resolved;
        }

        Self {
            root,
            records,
            index,
        }
    }

    /// Build a snapshot keeping base links exactly as given.
    #[cfg(test)]
    pub(crate) fn with_links(root: PathBuf, mut records: Vec<BackupRecord>) -> Self {
        records.sort_by_key(|r| r.start_time);
        let index = build_index(&records);
        Self {
            root,
            records,
            index,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All records, oldest first.
    pub fn records(&self) -> &[BackupRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &BackupRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, subdirectory: &str) -> Option<&BackupRecord> {
        self.index.get(subdirectory).map(|&i| &self.records[i])
    }

    /// Chronologically last backup, if any.
    pub fn latest(&self) -> Option<&BackupRecord> {
        self.records.last()
    }

    /// Full backups, oldest first.
    pub fn full_backups(&self) -> Vec<&BackupRecord> {
        self.records.iter().filter(|r| r.is_full()).collect()
    }

    /// On-disk location of a backup.
    pub fn path_of(&self, record: &BackupRecord) -> PathBuf {
        self.root.join(&record.subdirectory)
    }
}

fn build_index(records: &[BackupRecord]) -> HashMap<String, usize> {
    records
        .iter()
        .enumerate()
        .map(|(i, r)| (r.subdirectory.clone(), i))
        .collect()
}
