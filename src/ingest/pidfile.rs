//! Scoped PID-file guard for the watcher process.
//!
//! `watcher.pid` is present iff a watcher is running. Acquisition writes
//! the PID atomically; the guard removes the file on drop so every exit
//! path releases it. A stale file left by a dead process is reclaimed.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{Error, Result};

/// File name under `$AGENR_HOME`.
pub const PID_FILE: &str = "watcher.pid";

/// Returns the PID recorded in the file when that process is still
/// alive, `None` for no file or a stale one.
#[must_use]
pub fn live_watcher(path: &Path) -> Option<u32> {
    let raw = std::fs::read_to_string(path).ok()?;
    let pid: u32 = raw.trim().parse().ok()?;
    if pid_alive(pid) { Some(pid) } else { None }
}

#[cfg(target_os = "linux")]
fn pid_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn pid_alive(_pid: u32) -> bool {
    // Without a portable liveness probe, treat any recorded PID as live;
    // the operator can remove a stale file by hand.
    true
}

/// Scoped ownership of the watcher PID file.
#[derive(Debug)]
pub struct PidFileGuard {
    path: PathBuf,
}

impl PidFileGuard {
    /// Acquires the PID file, reclaiming stale files from dead processes.
    ///
    /// # Errors
    ///
    /// Returns an error when another live process holds the file or the
    /// write fails.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(pid) = live_watcher(path) {
            return Err(Error::InvalidState {
                message: format!("another watcher is running (pid {pid})"),
            });
        }
        if path.exists() {
            warn!(path = %path.display(), "reclaiming stale watcher pid file");
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("pid.tmp");
        std::fs::write(&tmp, std::process::id().to_string())?;
        std::fs::rename(&tmp, path)?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// The guarded path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove pid file");
        }
    }
}
