//! External backup engine adapter.
//!
//! Builds the fixed innobackupex command lines and runs them one at a time.
//! Every invocation is checked for its exit status and bounded by the
//! configured timeout; a failure of any kind becomes `ExternalToolFailed`.

use crate::catalog::metadata::BackupRecord;
use crate::config::Config;
use crate::utils::errors::{ManagerError, Result};
use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Number of stderr lines kept in failure reports.
const STDERR_TAIL_LINES: usize = 20;

const PASSWORD_FLAG: &str = "--password=";

/// A fully rendered engine invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl fmt::Display for EngineCommand {
    /// Renders the command line with the password masked.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.starts_with(PASSWORD_FLAG) {
                write!(f, " {}****", PASSWORD_FLAG)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Renders and runs engine invocations.
#[derive(Debug, Clone)]
pub struct Engine {
    program: PathBuf,
    leading_args: Vec<String>,
    timeout: Option<Duration>,
    cancel_token: CancellationToken,
}

impl Engine {
    /// Create an engine from configuration. Credentials are forwarded on every call.
    pub fn from_config(config: &Config, cancel_token: CancellationToken) -> Self {
        let mut leading_args = config.engine.args.clone();
        leading_args.extend(credential_args(config));

        Self {
            program: config.engine.command.clone(),
            leading_args,
            timeout: config.engine_timeout(),
            cancel_token,
        }
    }

    /// Override the invocation timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn command<I, S>(&self, args: I) -> EngineCommand
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut all = self.leading_args.clone();
        all.extend(args.into_iter().map(Into::into));
        EngineCommand {
            program: self.program.clone(),
            args: all,
        }
    }

    /// Full backup into a new timestamped subdirectory of `root`.
    pub fn full_backup_command(&self, root: &Path) -> EngineCommand {
        self.command([path_arg(root)])
    }

    /// Incremental backup of the data directory on top of `root/base`.
    pub fn incremental_backup_command(&self, root: &Path, base: &str) -> EngineCommand {
        self.command([
            "--incremental".to_string(),
            path_arg(root),
            format!("--incremental-basedir={}", root.join(base).display()),
        ])
    }

    /// Log-apply invocations for a chain, oldest first.
    ///
    /// Every step but the last keeps `--redo-only` so later incrementals can
    /// still be applied on top.
    pub fn prepare_commands(&self, root: &Path, chain: &[&BackupRecord]) -> Vec<EngineCommand> {
        let Some((full, incrementals)) = chain.split_first() else {
            return Vec::new();
        };
        let full_dir = path_arg(&root.join(&full.subdirectory));

        let mut commands = Vec::with_capacity(chain.len());

        let mut args = vec!["--apply-log".to_string()];
        if !incrementals.is_empty() {
            args.push("--redo-only".to_string());
        }
        args.push(full_dir.clone());
        commands.push(self.command(args));

        for (i, incremental) in incrementals.iter().enumerate() {
            let mut args = vec!["--apply-log".to_string()];
            if i + 1 < incrementals.len() {
                args.push("--redo-only".to_string());
            }
            args.push(full_dir.clone());
            args.push(format!(
                "--incremental-dir={}",
                root.join(&incremental.subdirectory).display()
            ));
            commands.push(self.command(args));
        }

        commands
    }

    /// Copy a prepared full backup back into the server data directory.
    pub fn copy_back_command(&self, full_dir: &Path) -> EngineCommand {
        self.command(["--copy-back".to_string(), path_arg(full_dir)])
    }

    /// Run one invocation to completion.
    ///
    /// Non-zero exit, spawn failure, timeout and cancellation all fail with
    /// `ExternalToolFailed`. The child is killed when it is abandoned.
    pub async fn run(&self, command: &EngineCommand) -> Result<()> {
        info!("Running {}", command);
        let started = std::time::Instant::now();

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| failed(command, format!("failed to start: {}", e)))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let deadline = async {
            match self.timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        let completion = async {
            let (status, _, tail) = tokio::join!(
                child.wait(),
                forward_lines(stdout, "stdout", 0),
                forward_lines(stderr, "stderr", STDERR_TAIL_LINES),
            );
            (status, tail)
        };

        let (status, tail) = tokio::select! {
            (status, tail) = completion => {
                let status = status.map_err(|e| failed(command, format!("failed to wait: {}", e)))?;
                (status, tail)
            }
            _ = deadline => {
                let limit = self.timeout.unwrap_or_default();
                return Err(failed(command, format!("timed out after {:?}", limit)));
            }
            _ = self.cancel_token.cancelled() => {
                return Err(failed(command, "interrupted".to_string()));
            }
        };

        if !status.success() {
            let tail: Vec<String> = tail.into_iter().collect();
            return Err(failed(command, format!("{}: {}", status, tail.join("\n"))));
        }

        info!("Engine finished in {}s", started.elapsed().as_secs());
        Ok(())
    }
}

/// Log every line of an engine output stream as it arrives.
///
/// Returns the last `keep` lines. Non-UTF-8 output is converted lossily.
async fn forward_lines<R>(reader: Option<R>, stream: &'static str, keep: usize) -> VecDeque<String>
where
    R: AsyncRead + Unpin,
{
    let mut tail = VecDeque::with_capacity(keep);
    let Some(reader) = reader else {
        return tail;
    };

    let mut segments = BufReader::new(reader).split(b'\n');
    loop {
        match segments.next_segment().await {
            Ok(Some(segment)) => {
                let line = String::from_utf8_lossy(&segment).trim_end().to_string();
                debug!(stream = stream, "{}", line);
                if keep > 0 {
                    if tail.len() == keep {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read engine {}: {}", stream, e);
                break;
            }
        }
    }

    tail
}

fn failed(command: &EngineCommand, reason: String) -> ManagerError {
    ManagerError::ExternalToolFailed {
        command: command.to_string(),
        reason,
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

/// Connection flags in the order innobackupex expects (`--defaults-file` first).
fn credential_args(config: &Config) -> Vec<String> {
    let mysql = &config.mysql;
    let mut args = Vec::new();

    if let Some(defaults_file) = &mysql.defaults_file {
        args.push(format!("--defaults-file={}", defaults_file.display()));
    }
    if let Some(host) = &mysql.host {
        args.push(format!("--host={}", host));
    }
    if let Some(port) = mysql.port {
        args.push(format!("--port={}", port));
    }
    if let Some(socket) = &mysql.socket {
        args.push(format!("--socket={}", socket.display()));
    }
    if let Some(user) = &mysql.user {
        args.push(format!("--user={}", user));
    }
    if let Some(password) = &mysql.password {
        args.push(format!("{}{}", PASSWORD_FLAG, password));
    }

    args
}
