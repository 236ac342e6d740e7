//! Chain resolution - walking incremental backups back to their full ancestor.

use crate::catalog::metadata::BackupRecord;
use crate::catalog::Catalog;
use crate::utils::errors::{ManagerError, Result};

fn broken(record: &BackupRecord, reason: impl Into<String>) -> ManagerError {
    ManagerError::BrokenBackupChain {
        subdirectory: record.subdirectory.clone(),
        reason: reason.into(),
    }
}

/// Resolve the ancestry of `record`, oldest first.
///
/// The first element is the full backup the chain starts from and the last one
/// is `record` itself. The walk is bounded by the catalog size, so a cycle or a
/// dangling link fails with `BrokenBackupChain` instead of looping.
pub fn resolve_chain<'a>(
    catalog: &'a Catalog,
    record: &'a BackupRecord,
) -> Result<Vec<&'a BackupRecord>> {
    let mut chain = vec![record];
    let mut current = record;

    while current.is_incremental() {
        if chain.len() > catalog.len() {
            return Err(broken(
                record,
                format!("no full backup reached after {} steps", chain.len()),
            ));
        }

        let base = match current.incremental_base.as_deref() {
            Some(base) => base,
            None => {
                let recorded = current.incremental_basedir.as_deref().unwrap_or("<none>");
                return Err(broken(
                    record,
                    format!(
                        "{} has no resolvable base (recorded base: {})",
                        current.subdirectory, recorded
                    ),
                ));
            }
        };

        current = catalog.get(base).ok_or_else(|| {
            broken(
                record,
                format!("{} refers to {} which is not in the catalog", current.subdirectory, base),
            )
        })?;
        chain.push(current);
    }

    chain.reverse();
    Ok(chain)
}

/// The full backup `record` ultimately depends on.
pub fn chain_root<'a>(catalog: &'a Catalog, record: &'a BackupRecord) -> Result<&'a BackupRecord> {
    let chain = resolve_chain(catalog, record)?;
    Ok(chain[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{at_hour, write_full, write_incremental};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn subdirs(chain: &[&BackupRecord]) -> Vec<String> {
        chain.iter().map(|r| r.subdirectory.clone()).collect()
    }

    #[test]
    fn test_resolve_linear_chain() -> Result<()> {
        let root = TempDir::new()?;
        write_full(root.path(), "F", &at_hour(1));
        write_incremental(root.path(), "I1", &at_hour(2), "F");
        write_incremental(root.path(), "I2", &at_hour(3), "I1");
        write_incremental(root.path(), "I3", &at_hour(4), "I2");

        let catalog = Catalog::scan(root.path())?;
        let i3 = catalog.get("I3").expect("I3 scanned");
        let chain = resolve_chain(&catalog, i3)?;

        assert_eq!(subdirs(&chain), vec!["F", "I1", "I2", "I3"]);
        assert_eq!(chain_root(&catalog, i3)?.subdirectory, "F");
        Ok(())
    }

    #[test]
    fn test_full_backup_is_its_own_chain() -> Result<()> {
        let root = TempDir::new()?;
        write_full(root.path(), "F", &at_hour(1));

        let catalog = Catalog::scan(root.path())?;
        let full = catalog.get("F").expect("F scanned");

        assert_eq!(subdirs(&resolve_chain(&catalog, full)?), vec!["F"]);
        Ok(())
    }

    #[test]
    fn test_orphan_fails_when_chain_requested() -> Result<()> {
        let root = TempDir::new()?;
        write_full(root.path(), "F", &at_hour(1));
        write_incremental(root.path(), "I1", &at_hour(2), "gone");
        write_incremental(root.path(), "I2", &at_hour(3), "I1");

        let catalog = Catalog::scan(root.path())?;
        let i2 = catalog.get("I2").expect("I2 scanned");

        let err = resolve_chain(&catalog, i2).unwrap_err();
        match err {
            ManagerError::BrokenBackupChain { subdirectory, reason } => {
                assert_eq!(subdirectory, "I2");
                assert!(reason.contains("gone"), "reason: {}", reason);
            }
            other => panic!("unexpected error: {other}"),
        }
        Ok(())
    }

    #[test]
    fn test_cycle_is_detected() -> Result<()> {
        let root = TempDir::new()?;
        let a = write_incremental(root.path(), "A", &at_hour(1), "B");
        let b = write_incremental(root.path(), "B", &at_hour(2), "A");

        let mut first = crate::catalog::metadata::parse_backup_dir(&a)?;
        let mut second = crate::catalog::metadata::parse_backup_dir(&b)?;
        first.incremental_base = Some("B".to_string());
        second.incremental_base = Some("A".to_string());

        let catalog = Catalog::with_links(PathBuf::from(root.path()), vec![first, second]);
        let start = catalog.get("B").expect("B present");

        let err = resolve_chain(&catalog, start).unwrap_err();
        assert!(matches!(err, ManagerError::BrokenBackupChain { .. }));
        Ok(())
    }
}
