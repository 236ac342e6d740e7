//! Advisory run lock stored in the backup root.
//!
//! `run`, `restore` and `prune` hold the lock for their whole duration so that
//! overlapping invocations (e.g. two cron runs) never race on creating or
//! deleting backup directories. The file name starts with a dot, which keeps it
//! out of catalog scans.

use crate::utils::errors::{ManagerError, Result};
use chrono::Utc;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const LOCK_FILE_NAME: &str = ".xtrabackup-manager.lock";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockEntry {
    hostname: String,
    pid: u32,
    time: String,
}

impl LockEntry {
    fn current() -> Self {
        Self {
            hostname: current_hostname(),
            pid: std::process::id(),
            time: Utc::now().to_rfc3339(),
        }
    }

    /// A lock left behind by a process on this host that no longer runs.
    fn is_stale(&self) -> bool {
        self.hostname == current_hostname() && !process_alive(self.pid)
    }

    fn describe(&self) -> String {
        format!("pid {} on {} since {}", self.pid, self.hostname, self.time)
    }
}

fn current_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

fn process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), None::<Signal>) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        // EPERM: the process exists but belongs to someone else.
        Err(_) => true,
    }
}

fn read_entry(path: &Path) -> Option<LockEntry> {
    let data = fs::read(path).ok()?;
    serde_json::from_slice(&data).ok()
}

/// Handle to an acquired lock. The lock file is removed on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Acquire the lock in `root`, replacing it if its holder is dead.
    pub fn acquire(root: &Path) -> Result<Self> {
        let path = root.join(LOCK_FILE_NAME);
        let data = serde_json::to_vec_pretty(&LockEntry::current())?;

        for attempt in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    if let Err(e) = file.write_all(&data) {
                        let _ = fs::remove_file(&path);
                        return Err(e.into());
                    }
                    debug!("Acquired run lock {}", path.display());
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let holder = read_entry(&path);
                    match holder {
                        Some(entry) if attempt == 0 && entry.is_stale() => {
                            warn!("Removing stale run lock held by {}", entry.describe());
                            match fs::remove_file(&path) {
                                Ok(()) => continue,
                                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                                Err(e) => return Err(e.into()),
                            }
                        }
                        Some(entry) => {
                            return Err(ManagerError::LockHeld {
                                path,
                                holder: entry.describe(),
                            });
                        }
                        None => {
                            return Err(ManagerError::LockHeld {
                                path,
                                holder: "an unknown process".to_string(),
                            });
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ManagerError::LockHeld {
            path,
            holder: "a concurrent process".to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Released run lock {}", self.path.display()),
            Err(e) => warn!("Failed to release run lock {}: {}", self.path.display(), e),
        }
    }
}

/// Forcibly remove the lock file in `root`. Returns whether one existed.
pub fn break_lock(root: &Path) -> Result<bool> {
    let path = root.join(LOCK_FILE_NAME);
    match fs::remove_file(&path) {
        Ok(()) => {
            warn!("Removed run lock {}", path.display());
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
