//! Backup level policy.
//!
//! Chains start with a full backup and grow by stacking incrementals on the
//! most recent backup until they hold more than `incrementals_per_full`
//! backups, at which point a new full backup starts the next chain.

use crate::catalog::Catalog;
use crate::chain::resolve_chain;
use crate::utils::errors::Result;
use serde::Serialize;
use tracing::debug;

/// What the next run should produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "level", rename_all = "lowercase")]
pub enum NextBackup {
    Full,
    Incremental { base: String },
}

impl std::fmt::Display for NextBackup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NextBackup::Full => f.write_str("full backup"),
            NextBackup::Incremental { base } => write!(f, "incremental backup on top of {}", base),
        }
    }
}

/// Decide the level of the next backup from a catalog snapshot.
///
/// Fails with `BrokenBackupChain` when the latest backup cannot be traced back
/// to a full backup.
pub fn decide_next_backup(catalog: &Catalog, incrementals_per_full: u32) -> Result<NextBackup> {
    let Some(latest) = catalog.latest() else {
        debug!("No backups yet, starting a new chain");
        return Ok(NextBackup::Full);
    };

    let chain = resolve_chain(catalog, latest)?;
    debug!(
        "Latest chain {} -> {} holds {} backups (threshold {})",
        chain[0].subdirectory,
        latest.subdirectory,
        chain.len(),
        incrementals_per_full
    );

    if chain.len() > incrementals_per_full as usize {
        return Ok(NextBackup::Full);
    }

    Ok(NextBackup::Incremental {
        base: latest.subdirectory.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{at_hour, write_full, write_incremental};
    use crate::utils::errors::ManagerError;
    use tempfile::TempDir;

    #[test]
    fn test_bootstrap_with_empty_catalog() -> Result<()> {
        let root = TempDir::new()?;
        let catalog = Catalog::scan(root.path())?;
        assert_eq!(decide_next_backup(&catalog, 2)?, NextBackup::Full);
        Ok(())
    }

    #[test]
    fn test_incremental_below_threshold() -> Result<()> {
        let root = TempDir::new()?;
        write_full(root.path(), "F", &at_hour(1));
        write_incremental(root.path(), "I1", &at_hour(2), "F");

        let catalog = Catalog::scan(root.path())?;

        assert_eq!(
            decide_next_backup(&catalog, 2)?,
            NextBackup::Incremental {
                base: "I1".to_string()
            }
        );
        Ok(())
    }

    #[test]
    fn test_full_once_threshold_exceeded() -> Result<()> {
        let root = TempDir::new()?;
        write_full(root.path(), "F", &at_hour(1));
        write_incremental(root.path(), "I1", &at_hour(2), "F");
        write_incremental(root.path(), "I2", &at_hour(3), "I1");

        let catalog = Catalog::scan(root.path())?;

        assert_eq!(decide_next_backup(&catalog, 2)?, NextBackup::Full);
        assert_eq!(
            decide_next_backup(&catalog, 3)?,
            NextBackup::Incremental {
                base: "I2".to_string()
            }
        );
        Ok(())
    }

    #[test]
    fn test_only_latest_chain_counts() -> Result<()> {
        let root = TempDir::new()?;
        write_full(root.path(), "F1", &at_hour(1));
        write_incremental(root.path(), "F1-I1", &at_hour(2), "F1");
        write_incremental(root.path(), "F1-I2", &at_hour(3), "F1-I1");
        write_full(root.path(), "F2", &at_hour(4));

        let catalog = Catalog::scan(root.path())?;

        assert_eq!(
            decide_next_backup(&catalog, 2)?,
            NextBackup::Incremental {
                base: "F2".to_string()
            }
        );
        Ok(())
    }

    #[test]
    fn test_broken_latest_chain_is_an_error() -> Result<()> {
        let root = TempDir::new()?;
        write_full(root.path(), "F", &at_hour(1));
        write_incremental(root.path(), "I1", &at_hour(2), "missing");

        let catalog = Catalog::scan(root.path())?;

        let err = decide_next_backup(&catalog, 5).unwrap_err();
        assert!(matches!(err, ManagerError::BrokenBackupChain { .. }));
        Ok(())
    }
}
