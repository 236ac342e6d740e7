//! Backup metadata extraction.
//!
//! Every directory produced by the backup engine carries two `key = value`
//! marker files. This module reads them and maps the merged fields onto a
//! [`BackupRecord`].

use crate::utils::errors::{ManagerError, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// General backup information written by the engine.
pub const INFO_FILE: &str = "xtrabackup_info";

/// LSN/checkpoint information written by the engine.
pub const CHECKPOINTS_FILE: &str = "xtrabackup_checkpoints";

/// Timestamp format used by `start_time` and `end_time`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const BASEDIR_FLAG: &str = "--incremental-basedir=";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupLevel {
    Full,
    Incremental,
}

impl std::fmt::Display for BackupLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupLevel::Full => f.write_str("full"),
            BackupLevel::Incremental => f.write_str("incremental"),
        }
    }
}

/// Marker file fields carried through verbatim.
///
/// Field names match the keys written by the engine. None of these are
/// interpreted beyond `incremental`, `tool_command` and the timestamps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    /// Backup name given with `--history`, usually empty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ibbackup_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binlog_pos: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub innodb_from_lsn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub innodb_to_lsn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incremental: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compressed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_lsn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_lsn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_lsn: Option<String>,
}

/// One backup directory in the backup root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    /// Directory name, the only stable identity of a backup
    pub subdirectory: String,

    pub level: BackupLevel,

    pub start_time: NaiveDateTime,

    pub end_time: Option<NaiveDateTime>,

    /// Base subdirectory as recorded in `tool_command`
    pub incremental_basedir: Option<String>,

    /// Base subdirectory once found in the catalog snapshot (incrementals only)
    pub incremental_base: Option<String>,

    pub details: BackupDetails,
}

impl BackupRecord {
    /// Build a record from merged marker fields.
    ///
    /// Returns a description of the problem when the fields do not describe a
    /// usable backup.
    pub fn from_fields(
        subdirectory: impl Into<String>,
        fields: BTreeMap<String, String>,
    ) -> std::result::Result<Self, String> {
        let map: serde_json::Map<String, serde_json::Value> = fields
            .into_iter()
            .map(|(k, v)| (k, serde_json::Value::String(v)))
            .collect();
        let details: BackupDetails = serde_json::from_value(serde_json::Value::Object(map))
            .map_err(|e| format!("unexpected marker fields: {}", e))?;

        let start_time = match details.start_time.as_deref() {
            Some(raw) => parse_timestamp(raw)
                .ok_or_else(|| format!("unparseable start_time '{}'", raw))?,
            None => return Err("start_time not recorded".to_string()),
        };
        let end_time = details.end_time.as_deref().and_then(parse_timestamp);

        let level = if details.incremental.as_deref() == Some("Y") {
            BackupLevel::Incremental
        } else {
            BackupLevel::Full
        };

        let incremental_basedir = match level {
            BackupLevel::Incremental => details
                .tool_command
                .as_deref()
                .and_then(extract_incremental_basedir),
            BackupLevel::Full => None,
        };

        Ok(Self {
            subdirectory: subdirectory.into(),
            level,
            start_time,
            end_time,
            incremental_basedir,
            incremental_base: None,
            details,
        })
    }

    pub fn is_full(&self) -> bool {
        self.level == BackupLevel::Full
    }

    pub fn is_incremental(&self) -> bool {
        self.level == BackupLevel::Incremental
    }
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT).ok()
}

/// Parse a single `key = value` line.
///
/// The key is the first run of non-whitespace characters and must be followed
/// by `=`. Both sides are trimmed. Anything else yields `None`.
pub fn parse_marker_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    let split = line.find(char::is_whitespace)?;
    let (key, rest) = line.split_at(split);
    let value = rest.trim_start().strip_prefix('=')?;
    Some((key, value.trim()))
}

/// Extract the base subdirectory from an engine command line.
///
/// Only the last path segment of `--incremental-basedir=<path>` is kept.
pub fn extract_incremental_basedir(tool_command: &str) -> Option<String> {
    let start = tool_command.find(BASEDIR_FLAG)? + BASEDIR_FLAG.len();
    let value = tool_command[start..].split(char::is_whitespace).next()?;
    let value = value.trim_matches(|c: char| c == '"' || c == '\'');
    let segment = value.trim_end_matches(['/', '\\']).rsplit(['/', '\\']).next()?;

    if segment.is_empty() {
        None
    } else {
        Some(segment.to_string())
    }
}

/// Read every `key = value` pair of a marker file, in file order.
fn read_marker_file(path: &Path) -> Result<Vec<(String, String)>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ManagerError::BackupMetadataMissing {
                path: path.to_path_buf(),
            });
        }
        Err(source) => {
            return Err(ManagerError::BackupMetadataUnreadable {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    Ok(String::from_utf8_lossy(&bytes)
        .lines()
        .filter_map(parse_marker_line)
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect())
}

/// Parse the marker files of one backup directory.
///
/// Fails with `BackupMetadataMissing` when either marker file is absent,
/// `BackupMetadataUnreadable` when one exists but cannot be read and
/// `BackupMetadataInvalid` when the merged fields are unusable.
pub fn parse_backup_dir(dir: &Path) -> Result<BackupRecord> {
    let subdirectory = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| ManagerError::BackupMetadataInvalid {
            dir: dir.to_path_buf(),
            reason: "path has no directory name".to_string(),
        })?;

    let marker_paths: Vec<PathBuf> = [INFO_FILE, CHECKPOINTS_FILE]
        .iter()
        .map(|name| dir.join(name))
        .collect();

    for path in &marker_paths {
        match path.try_exists() {
            Ok(true) => {}
            Ok(false) => {
                return Err(ManagerError::BackupMetadataMissing { path: path.clone() });
            }
            Err(source) => {
                return Err(ManagerError::BackupMetadataUnreadable {
                    path: path.clone(),
                    source,
                });
            }
        }
    }

    // Checkpoint keys are inserted last and win on collision.
    let mut fields = BTreeMap::new();
    for path in &marker_paths {
        fields.extend(read_marker_file(path)?);
    }

    BackupRecord::from_fields(subdirectory, fields).map_err(|reason| {
        ManagerError::BackupMetadataInvalid {
            dir: dir.to_path_buf(),
            reason,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use tempfile::TempDir;

    #[test]
    fn test_parse_marker_line() {
        assert_eq!(parse_marker_line("uuid = abc-123"), Some(("uuid", "abc-123")));
        assert_eq!(parse_marker_line("  to_lsn   =   42  "), Some(("to_lsn", "42")));
        assert_eq!(parse_marker_line("partial = "), Some(("partial", "")));
        assert_eq!(
            parse_marker_line("tool_command = --incremental /b --incremental-basedir=/b/x"),
            Some(("tool_command", "--incremental /b --incremental-basedir=/b/x"))
        );
        assert_eq!(parse_marker_line("no separator here"), None);
        assert_eq!(parse_marker_line("key=value"), None);
        assert_eq!(parse_marker_line(""), None);
    }

    #[test]
    fn test_extract_incremental_basedir() {
        assert_eq!(
            extract_incremental_basedir(
                "--user=backup --incremental /backups --incremental-basedir=/backups/2024-01-01_00-00-00"
            ),
            Some("2024-01-01_00-00-00".to_string())
        );
        assert_eq!(
            extract_incremental_basedir("--incremental-basedir=/backups/base/ --user=backup"),
            Some("base".to_string())
        );
        assert_eq!(
            extract_incremental_basedir("--incremental-basedir=relative"),
            Some("relative".to_string())
        );
        assert_eq!(extract_incremental_basedir("--incremental /backups"), None);
        assert_eq!(extract_incremental_basedir("--incremental-basedir= /backups"), None);
    }

    #[test]
    fn test_parse_full_backup_dir() -> Result<()> {
        let root = TempDir::new()?;
        let dir = testutil::write_full(root.path(), "full-1", "2024-01-01 00:00:00");

        let record = parse_backup_dir(&dir)?;

        assert_eq!(record.subdirectory, "full-1");
        assert_eq!(record.level, BackupLevel::Full);
        assert_eq!(record.start_time.to_string(), "2024-01-01 00:00:00");
        assert!(record.end_time.is_some());
        assert_eq!(record.incremental_basedir, None);
        assert_eq!(record.details.tool_name.as_deref(), Some("innobackupex"));
        assert_eq!(record.details.name.as_deref(), Some(""));
        assert_eq!(record.details.backup_type.as_deref(), Some("full-backuped"));
        assert_eq!(record.details.to_lsn.as_deref(), Some("100"));
        Ok(())
    }

    #[test]
    fn test_parse_incremental_backup_dir() -> Result<()> {
        let root = TempDir::new()?;
        let dir = testutil::write_incremental(root.path(), "inc-1", "2024-01-01 01:00:00", "full-1");

        let record = parse_backup_dir(&dir)?;

        assert!(record.is_incremental());
        assert_eq!(record.incremental_basedir.as_deref(), Some("full-1"));
        // Links are only resolved by the catalog.
        assert_eq!(record.incremental_base, None);
        Ok(())
    }

    #[test]
    fn test_checkpoint_keys_override_info_keys() -> Result<()> {
        let root = TempDir::new()?;
        let dir = root.path().join("b");
        fs::create_dir(&dir)?;
        fs::write(
            dir.join(INFO_FILE),
            "start_time = 2024-01-01 00:00:00\nto_lsn = 1\nthis line is ignored\n",
        )?;
        fs::write(dir.join(CHECKPOINTS_FILE), "to_lsn = 2\n")?;

        let record = parse_backup_dir(&dir)?;

        assert_eq!(record.details.to_lsn.as_deref(), Some("2"));
        assert_eq!(record.level, BackupLevel::Full);
        Ok(())
    }

    #[test]
    fn test_missing_marker_file() -> std::io::Result<()> {
        let root = TempDir::new()?;
        let dir = root.path().join("partial");
        fs::create_dir(&dir)?;
        fs::write(dir.join(INFO_FILE), "start_time = 2024-01-01 00:00:00\n")?;

        let err = parse_backup_dir(&dir).unwrap_err();
        assert!(matches!(err, ManagerError::BackupMetadataMissing { .. }));
        assert!(err.is_skippable());
        Ok(())
    }

    #[test]
    fn test_missing_start_time_is_invalid() -> std::io::Result<()> {
        let root = TempDir::new()?;
        let dir = root.path().join("foreign");
        fs::create_dir(&dir)?;
        fs::write(dir.join(INFO_FILE), "uuid = x\n")?;
        fs::write(dir.join(CHECKPOINTS_FILE), "to_lsn = 2\n")?;

        let err = parse_backup_dir(&dir).unwrap_err();
        assert!(matches!(err, ManagerError::BackupMetadataInvalid { .. }));
        assert!(err.is_skippable());
        Ok(())
    }

    #[test]
    fn test_unreadable_marker_file() -> std::io::Result<()> {
        let root = TempDir::new()?;
        let dir = root.path().join("broken");
        fs::create_dir(&dir)?;
        fs::write(dir.join(CHECKPOINTS_FILE), "to_lsn = 2\n")?;
        // A directory in place of the marker exists but cannot be read as a file.
        fs::create_dir(dir.join(INFO_FILE))?;

        let err = parse_backup_dir(&dir).unwrap_err();
        assert!(matches!(err, ManagerError::BackupMetadataUnreadable { .. }));
        assert!(!err.is_skippable());
        Ok(())
    }

    #[test]
    fn test_tool_name_is_not_the_backup_name() -> Result<()> {
        let root = TempDir::new()?;
        let dir = root.path().join("b");
        fs::create_dir(&dir)?;
        fs::write(
            dir.join(INFO_FILE),
            "uuid = 1\nname = \ntool_name = innobackupex\nstart_time = 2024-01-01 00:00:00\n",
        )?;
        fs::write(dir.join(CHECKPOINTS_FILE), "backup_type = full-backuped\n")?;

        let record = parse_backup_dir(&dir)?;

        assert_eq!(record.details.name.as_deref(), Some(""));
        assert_eq!(record.details.tool_name.as_deref(), Some("innobackupex"));
        Ok(())
    }

    #[test]
    fn test_marker_stat_error_is_unreadable() -> std::io::Result<()> {
        let root = TempDir::new()?;
        let dir = root.path().join("looping");
        fs::create_dir(&dir)?;
        fs::write(dir.join(CHECKPOINTS_FILE), "to_lsn = 2\n")?;
        // A self-referencing symlink exists but cannot be stat'ed.
        std::os::unix::fs::symlink(dir.join(INFO_FILE), dir.join(INFO_FILE))?;

        let err = parse_backup_dir(&dir).unwrap_err();
        assert!(matches!(err, ManagerError::BackupMetadataUnreadable { .. }), "{err}");
        assert!(!err.is_skippable());
        Ok(())
    }
}
