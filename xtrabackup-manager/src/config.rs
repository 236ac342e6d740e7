//! Configuration management for the backup manager.
//!
//! Loads configuration from a TOML file with environment variable overrides
//! (`XTRABACKUP_MANAGER__<SECTION>__<KEY>`, e.g.
//! `XTRABACKUP_MANAGER__BACKUP__KEEP_FULL_BACKUP=3`).

use crate::utils::errors::{ManagerError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/xtrabackup-manager/config.toml";

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "XTRABACKUP_MANAGER";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub backup: BackupConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub mysql: MysqlConfig,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Root directory holding one subdirectory per backup
    pub backup_data_dir: PathBuf,

    /// A chain holding more backups than this gets a new full backup
    #[serde(default = "default_incremental_per_full")]
    pub incremental_per_full: u32,

    /// Number of most recent full-backup chains to keep
    #[serde(default = "default_keep_full_backup")]
    pub keep_full_backup: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path to the backup engine executable (innobackupex)
    #[serde(default = "default_engine_command")]
    pub command: PathBuf,

    /// Arguments always passed first to the engine
    #[serde(default)]
    pub args: Vec<String>,

    /// Limit for a single engine invocation in seconds (0 = no limit)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Database connection settings forwarded verbatim to the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MysqlConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults_file: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_incremental_per_full() -> u32 {
    6
}

fn default_keep_full_backup() -> u32 {
    2
}

fn default_engine_command() -> PathBuf {
    PathBuf::from("/usr/bin/innobackupex")
}

fn default_timeout_secs() -> u64 {
    24 * 60 * 60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: default_engine_command(),
            args: Vec::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            backup: BackupConfig {
                backup_data_dir: PathBuf::from("/var/backups/mysql"),
                incremental_per_full: default_incremental_per_full(),
                keep_full_backup: default_keep_full_backup(),
            },
            engine: EngineConfig::default(),
            mysql: MysqlConfig {
                user: Some("backup".to_string()),
                ..MysqlConfig::default()
            },
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then apply environment overrides.
    ///
    /// Override values stay strings until deserialization, so numeric fields
    /// parse while a password such as `0123` is kept verbatim.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path).format(::config::FileFormat::Toml))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        Ok(config)
    }

    /// Load configuration from a TOML file without environment overrides.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check everything the manager relies on before touching any backup.
    pub fn validate(&self) -> Result<()> {
        let root = &self.backup.backup_data_dir;
        if root.as_os_str().is_empty() {
            return Err(ManagerError::ConfigurationInvalid(
                "backup.backup_data_dir is not set".to_string(),
            ));
        }
        if !root.is_dir() {
            return Err(ManagerError::ConfigurationInvalid(format!(
                "backup directory {} does not exist",
                root.display()
            )));
        }
        if self.backup.incremental_per_full == 0 {
            return Err(ManagerError::ConfigurationInvalid(
                "backup.incremental_per_full must be at least 1".to_string(),
            ));
        }
        if self.backup.keep_full_backup == 0 {
            return Err(ManagerError::ConfigurationInvalid(
                "backup.keep_full_backup must be at least 1".to_string(),
            ));
        }
        if !self.engine.command.is_file() {
            return Err(ManagerError::ConfigurationInvalid(format!(
                "engine.command {} is not specified or does not exist",
                self.engine.command.display()
            )));
        }
        Ok(())
    }

    /// Engine invocation limit, `None` when disabled.
    pub fn engine_timeout(&self) -> Option<Duration> {
        match self.engine.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}
