//! xtrabackup-manager library
//!
//! Catalogs the backup directories produced by innobackupex, decides between
//! full and incremental backups, resolves incremental chains and prunes old
//! chains.

pub mod catalog;
pub mod chain;
pub mod config;
pub mod executor;
pub mod lock;
pub mod policy;
pub mod retention;
pub mod shutdown;
pub mod utils;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export commonly used types
pub use catalog::metadata::{BackupLevel, BackupRecord};
pub use catalog::Catalog;
pub use crate::config::Config;
pub use executor::BackupManager;
pub use utils::errors::{ManagerError, Result};
