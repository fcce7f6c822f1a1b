//! Process lock files
//!
//! Keeps two instances of the same role (for example two upload clients)
//! from working on one directory, which would relay and then delete the
//! same files twice.

use anyhow::{bail, Context, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// A lock file holding our PID, removed on drop.
#[derive(Debug)]
pub struct ProcessLock {
    lock_path: PathBuf,
    owned: bool,
}

impl ProcessLock {
    /// Lock `dir` for `role` (`.aerosurvey-<role>.lock`).
    ///
    /// A lock left behind by a process that is no longer running is removed
    /// and taken over.
    pub fn acquire<P: AsRef<Path>>(dir: P, role: &str) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;

        let lock_path = dir.join(format!(".aerosurvey-{role}.lock"));

        if lock_path.exists() {
            match read_lock_pid(&lock_path) {
                Some(pid) if is_process_running(pid) => {
                    bail!(
                        "Another aerosurvey {} is already using {} (PID: {})\n\
                         If no such process is running, remove the stale lock file:\n\
                         rm {}",
                        role,
                        dir.display(),
                        pid,
                        lock_path.display()
                    );
                }
                _ => {
                    tracing::info!(path = %lock_path.display(), "Removing stale lock file");
                    fs::remove_file(&lock_path).context("Failed to remove stale lock file")?;
                }
            }
        }

        let pid = std::process::id();
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
            .with_context(|| format!("Failed to create lock file {}", lock_path.display()))?;
        writeln!(file, "{pid}").context("Failed to write PID to lock file")?;

        tracing::debug!(pid = pid, path = %lock_path.display(), "Acquired process lock");
        Ok(Self {
            lock_path,
            owned: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }

    /// Remove the lock file. Called automatically on drop.
    pub fn release(&mut self) {
        if !self.owned {
            return;
        }
        self.owned = false;
        match fs::remove_file(&self.lock_path) {
            Ok(()) => tracing::debug!(path = %self.lock_path.display(), "Released process lock"),
            Err(e) => tracing::warn!(error = %e, "Failed to remove lock file"),
        }
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        self.release();
    }
}

fn read_lock_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Whether `pid` is a live aerosurvey process.
#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    fs::read_to_string(format!("/proc/{pid}/cmdline"))
        .map(|cmdline| cmdline.contains("aerosurvey"))
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    true
}
