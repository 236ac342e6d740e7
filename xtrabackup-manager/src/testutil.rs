//! Helpers for building synthetic backup roots in tests.

use crate::catalog::metadata::{CHECKPOINTS_FILE, INFO_FILE};
use std::fs;
use std::path::{Path, PathBuf};

fn write_backup(root: &Path, subdir: &str, start_time: &str, base: Option<&str>) -> PathBuf {
    let dir = root.join(subdir);
    fs::create_dir_all(&dir).expect("create backup dir");

    let (tool_command, incremental, backup_type) = match base {
        Some(base) => (
            format!(
                "--user=backup --incremental {} --incremental-basedir={}/{}",
                root.display(),
                root.display(),
                base
            ),
            "Y",
            "incremental",
        ),
        None => (
            format!("--user=backup {}", root.display()),
            "N",
            "full-backuped",
        ),
    };

    let info = format!(
        "uuid = {subdir}-uuid\n\
         name = \n\
         tool_name = innobackupex\n\
         tool_command = {tool_command}\n\
         tool_version = 2.4.20\n\
         ibbackup_version = 2.4.20\n\
         server_version = 5.7.30-log\n\
         start_time = {start_time}\n\
         end_time = {start_time}\n\
         lock_time = 0\n\
         binlog_pos = \n\
         innodb_from_lsn = 0\n\
         innodb_to_lsn = 100\n\
         partial = N\n\
         incremental = {incremental}\n\
         format = file\n\
         compact = N\n\
         compressed = N\n\
         encrypted = N\n"
    );
    let checkpoints = format!(
        "backup_type = {backup_type}\n\
         from_lsn = 0\n\
         to_lsn = 100\n\
         last_lsn = 100\n\
         compact = 0\n"
    );

    fs::write(dir.join(INFO_FILE), info).expect("write info file");
    fs::write(dir.join(CHECKPOINTS_FILE), checkpoints).expect("write checkpoints file");
    dir
}

/// Write a full backup directory.
pub fn write_full(root: &Path, subdir: &str, start_time: &str) -> PathBuf {
    write_backup(root, subdir, start_time, None)
}

/// Write an incremental backup directory based on `base`.
pub fn write_incremental(root: &Path, subdir: &str, start_time: &str, base: &str) -> PathBuf {
    write_backup(root, subdir, start_time, Some(base))
}

/// `2024-01-01 HH:00:00`, for compact chronological fixtures.
pub fn at_hour(hour: u32) -> String {
    format!("2024-01-01 {:02}:00:00", hour)
}
