//! Channel-protocol bridge process.
//!
//! The bridge is an external program (a soft IOC by default) that serves
//! the declared records on the network. The runtime writes its record
//! configuration into the working directory, spawns it there with stdout
//! and stderr redirected to a log file, and watches for an unexpected
//! exit. At cleanup the process is sent SIGTERM and given
//! `stop_timeout_ms` to exit before it is killed.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::table::ChannelTable;

/// Errors from the bridge process and its files.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Writing the record configuration failed.
    #[error("failed to write record database {}: {source}", path.display())]
    Database {
        /// Database file path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Opening the log file failed.
    #[error("failed to open bridge log {}: {source}", path.display())]
    Log {
        /// Log file path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The process could not be started.
    #[error("failed to spawn bridge `{command}`: {source}")]
    Spawn {
        /// Executable name.
        command: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Waiting on or killing the process failed.
    #[error("bridge process control failed: {source}")]
    Control {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}

/// Write the table's records to `path`.
///
/// # Errors
///
/// Returns [`BridgeError::Database`] on any I/O failure.
pub fn write_database(table: &ChannelTable, path: &Path) -> Result<(), BridgeError> {
    let wrap = |source| BridgeError::Database {
        path: path.to_path_buf(),
        source,
    };
    let mut out = std::io::BufWriter::new(std::fs::File::create(path).map_err(wrap)?);
    table.write_database(&mut out).map_err(wrap)?;
    std::io::Write::flush(&mut out).map_err(wrap)?;
    info!(path = %path.display(), records = table.records().len(), "Wrote record database");
    Ok(())
}

/// A running bridge process.
#[derive(Debug)]
pub struct BridgeProcess {
    child: Child,
    pid: Option<u32>,
    command: String,
    stop_timeout: Duration,
}

impl BridgeProcess {
    /// Spawn the bridge in `work_dir`, logging to `<work_dir>/<log_file>`.
    ///
    /// Must be called from within a Tokio runtime. The child is killed if
    /// the handle is dropped without [`terminate`](Self::terminate).
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Log`] if the log file cannot be created, or
    /// [`BridgeError::Spawn`] if the process cannot be started.
    pub fn spawn(config: &BridgeConfig, work_dir: &Path) -> Result<Self, BridgeError> {
        let log_path = work_dir.join(&config.log_file);
        let log_err = |source| BridgeError::Log {
            path: log_path.clone(),
            source,
        };
        let stdout = std::fs::File::create(&log_path).map_err(log_err)?;
        let stderr = stdout.try_clone().map_err(log_err)?;

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| BridgeError::Spawn {
            command: config.command.clone(),
            source,
        })?;
        let pid = child.id();

        info!(
            command = %config.command,
            args = ?config.args,
            pid = ?pid,
            log = %log_path.display(),
            "Bridge process started"
        );

        Ok(Self {
            child,
            pid,
            command: config.command.clone(),
            stop_timeout: config.stop_timeout(),
        })
    }

    /// OS process id, while the process is running.
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Resolve when the process exits.
    ///
    /// Cancel safe: dropping the future leaves the process running.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Control`] if waiting fails.
    pub async fn exited(&mut self) -> Result<ExitStatus, BridgeError> {
        Ok(self.child.wait().await?)
    }

    /// Ask the process to exit with SIGTERM and reap it, killing it if it
    /// is still running after the stop timeout.
    ///
    /// Returns the exit status if the process had already exited on its
    /// own, `None` if it had to be stopped.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Control`] if killing or reaping fails.
    pub async fn terminate(mut self) -> Result<Option<ExitStatus>, BridgeError> {
        if let Some(status) = self.child.try_wait()? {
            debug!(command = %self.command, %status, "Bridge process already exited");
            return Ok(Some(status));
        }

        if let Some(pid) = self.pid {
            match request_exit(pid).await {
                Ok(()) => {
                    let exit = tokio::time::timeout(self.stop_timeout, self.child.wait()).await;
                    if let Ok(status) = exit {
                        let status = status?;
                        info!(command = %self.command, pid, %status, "Bridge process terminated");
                        return Ok(None);
                    }
                    warn!(
                        command = %self.command,
                        pid,
                        timeout_ms = self.stop_timeout.as_millis(),
                        "Bridge process ignored SIGTERM, killing"
                    );
                }
                Err(e) => warn!(
                    command = %self.command,
                    pid,
                    error = %e,
                    "Failed to signal bridge process, killing"
                ),
            }
        }

        if let Err(e) = self.child.kill().await {
            warn!(command = %self.command, error = %e, "Failed to kill bridge process");
            return Err(e.into());
        }
        info!(command = %self.command, pid = ?self.pid, "Bridge process killed");
        Ok(None)
    }
}

/// Send SIGTERM to `pid` through the system `kill` utility.
#[cfg(unix)]
async fn request_exit(pid: u32) -> std::io::Result<()> {
    let status = Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;
    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::other(format!("kill exited with {status}")))
    }
}

#[cfg(not(unix))]
#[allow(clippy::unused_async)]
async fn request_exit(_pid: u32) -> std::io::Result<()> {
    Err(std::io::ErrorKind::Unsupported.into())
}
