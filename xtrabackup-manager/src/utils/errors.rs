//! Custom error types for the backup manager.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ManagerError {
    /// A candidate directory lacks a marker file. Recovered by skipping it.
    #[error("Backup metadata missing: {}", path.display())]
    BackupMetadataMissing { path: PathBuf },

    /// Marker files exist but do not describe a usable backup. Recovered by skipping it.
    #[error("Backup metadata invalid in {}: {reason}", dir.display())]
    BackupMetadataInvalid { dir: PathBuf, reason: String },

    #[error("Backup metadata unreadable: {}: {source}", path.display())]
    BackupMetadataUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Broken backup chain at {subdirectory}: {reason}")]
    BrokenBackupChain { subdirectory: String, reason: String },

    #[error("External tool failed ({command}): {reason}")]
    ExternalToolFailed { command: String, reason: String },

    #[error("Configuration error: {0}")]
    ConfigurationInvalid(String),

    #[error("Backup not found: {0}")]
    BackupNotFound(String),

    #[error("Backup directory is locked by {holder} ({})", path.display())]
    LockHeld { path: PathBuf, holder: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ManagerError {
    /// Whether a scan should skip the directory instead of aborting.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            ManagerError::BackupMetadataMissing { .. } | ManagerError::BackupMetadataInvalid { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ManagerError>;
