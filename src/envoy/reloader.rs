//! Hot restart driver.
//!
//! Envoy's hot restart protocol: a new process started with
//! `--restart-epoch N` takes over the listening sockets from epoch N-1,
//! which drains and exits within the parent shutdown window. The driver's
//! only jobs are handing out strictly increasing epochs and spawning the
//! next process; the handover itself is Envoy's.

use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use thiserror::Error;
use tracing::info;

/// Seconds the outgoing parent process is given to drain.
const PARENT_SHUTDOWN_TIME_SECS: u32 = 10;

/// Upper bound for pids read from the pid file (Linux default pid_max).
const MAX_PID: i64 = 4_194_304;

#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("failed to start new Envoy process: {0}")]
    Spawn(std::io::Error),

    #[error("failed to read PID file {path}: {source}")]
    PidRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid PID in file: {0:?}")]
    PidParse(String),

    #[error("PID out of valid range: {0} (must be between 1 and {MAX_PID})")]
    PidRange(i64),

    #[error("failed to send SIGHUP to Envoy (pid {pid}): {source}")]
    Signal {
        pid: i64,
        source: std::io::Error,
    },
}

/// Serializes epoch-numbered proxy rollovers.
///
/// The epoch is read lock-free but only ever mutated under the reload lock,
/// so no two spawns can observe the same value.
#[derive(Debug)]
pub struct Reloader {
    envoy_binary: PathBuf,
    bootstrap_path: PathBuf,
    pid_file: PathBuf,
    current_epoch: AtomicI64,
    reload_lock: Mutex<()>,
}

impl Reloader {
    pub fn new(
        envoy_binary: impl Into<PathBuf>,
        bootstrap_path: impl Into<PathBuf>,
        pid_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            envoy_binary: envoy_binary.into(),
            bootstrap_path: bootstrap_path.into(),
            pid_file: pid_file.into(),
            current_epoch: AtomicI64::new(0),
            reload_lock: Mutex::new(()),
        }
    }

    /// Perform a hot restart: bump the epoch and spawn the next Envoy
    /// process detached, leaving the handover to the hot restart protocol.
    /// The epoch is rolled back if the spawn fails, so a later retry reuses
    /// the same number.
    pub fn reload(&self) -> Result<(), ReloadError> {
        let _guard = self.reload_lock.lock().unwrap_or_else(|e| e.into_inner());

        let new_epoch = self.current_epoch.fetch_add(1, Ordering::SeqCst) + 1;

        let spawned = Command::new(&self.envoy_binary)
            .arg("-c")
            .arg(&self.bootstrap_path)
            .arg("--restart-epoch")
            .arg(new_epoch.to_string())
            .arg("--parent-shutdown-time-s")
            .arg(PARENT_SHUTDOWN_TIME_SECS.to_string())
            .spawn();

        match spawned {
            Ok(child) => {
                info!(epoch = new_epoch, pid = child.id(), "spawned Envoy for hot restart");
                // Dropping the handle detaches the child; it must outlive
                // the agent because it is the new data plane.
                drop(child);
                Ok(())
            }
            Err(source) => {
                self.current_epoch.fetch_sub(1, Ordering::SeqCst);
                Err(ReloadError::Spawn(source))
            }
        }
    }

    /// Ask the running Envoy to reload gracefully via SIGHUP. The pid file
    /// content is treated as untrusted: trimmed, parsed, and bound-checked
    /// before any signal is sent.
    pub fn reload_graceful(&self) -> Result<(), ReloadError> {
        let raw = fs::read_to_string(&self.pid_file).map_err(|source| ReloadError::PidRead {
            path: self.pid_file.clone(),
            source,
        })?;

        let trimmed = raw.trim();
        let pid: i64 = trimmed
            .parse()
            .map_err(|_| ReloadError::PidParse(trimmed.to_string()))?;
        if pid <= 0 || pid > MAX_PID {
            return Err(ReloadError::PidRange(pid));
        }

        send_sighup(pid)?;
        info!(pid, "sent SIGHUP to Envoy for graceful reload");
        Ok(())
    }

    /// Snapshot of the current restart epoch.
    pub fn current_epoch(&self) -> i64 {
        self.current_epoch.load(Ordering::SeqCst)
    }
}

#[cfg(unix)]
fn send_sighup(pid: i64) -> Result<(), ReloadError> {
    // SAFETY: pid is bound-checked above; kill(2) with SIGHUP has no
    // memory-safety concerns.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGHUP) };
    if rc != 0 {
        return Err(ReloadError::Signal {
            pid,
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(())
}

#[cfg(not(unix))]
fn send_sighup(pid: i64) -> Result<(), ReloadError> {
    Err(ReloadError::Signal {
        pid,
        source: std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "SIGHUP not supported on this platform",
        ),
    })
}
