//! Polling watcher for the capture directory.
//!
//! Scans the directory (non-recursively) at a fixed interval and enqueues
//! files it has not seen before. Files that disappear are forgotten, so a
//! name that is created again later is picked up again.

use super::queue::UploadQueue;
use crate::config::UplinkConfig;
use crate::types::{classify, UploadTask};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct CaptureWatcher {
    dir: PathBuf,
    image_extensions: Vec<String>,
    marker_extension: String,
    scan_interval: Duration,
    rescan_existing: bool,
    known: HashSet<PathBuf>,
}

impl CaptureWatcher {
    pub fn new(config: &UplinkConfig, marker_extension: &str) -> Self {
        Self {
            dir: config.watch_dir.clone(),
            image_extensions: config.image_extensions.clone(),
            marker_extension: marker_extension.to_string(),
            scan_interval: config.scan_interval(),
            rescan_existing: config.rescan_existing,
            known: HashSet::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Relayable files currently in the directory, oldest first
    /// (mtime, then name).
    fn list_candidates(&self) -> std::io::Result<Vec<UploadTask>> {
        let mut found: Vec<(SystemTime, PathBuf, UploadTask)> = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let path = entry.path();
            let Some(kind) = classify(&path, &self.image_extensions, &self.marker_extension) else {
                continue;
            };
            let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((mtime, path.clone(), UploadTask { path, kind }));
        }
        found.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        Ok(found.into_iter().map(|(_, _, task)| task).collect())
    }

    /// One scan: returns newly appeared files and forgets vanished ones.
    pub fn scan(&mut self) -> std::io::Result<Vec<UploadTask>> {
        let candidates = self.list_candidates()?;
        let present: HashSet<PathBuf> = candidates.iter().map(|t| t.path.clone()).collect();
        self.known.retain(|p| present.contains(p));

        let mut fresh = Vec::new();
        for task in candidates {
            if self.known.insert(task.path.clone()) {
                fresh.push(task);
            }
        }
        Ok(fresh)
    }

    /// Mark everything currently present as seen without enqueuing it.
    pub fn prime(&mut self) -> std::io::Result<usize> {
        let candidates = self.list_candidates()?;
        let n = candidates.len();
        self.known.extend(candidates.into_iter().map(|t| t.path));
        Ok(n)
    }

    /// Scan until cancelled, enqueuing every new file.
    pub async fn run(mut self, queue: UploadQueue, cancel: CancellationToken) {
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            warn!(dir = %self.dir.display(), error = %e, "[Watcher] Cannot create capture directory");
        }

        if self.rescan_existing {
            info!(dir = %self.dir.display(), "[Watcher] Queuing files left from a previous run");
        } else {
            match self.prime() {
                Ok(n) => info!(skipped = n, "[Watcher] Ignoring files already present"),
                Err(e) => warn!(error = %e, "[Watcher] Initial scan failed"),
            }
        }

        info!(dir = %self.dir.display(), interval = ?self.scan_interval, "[Watcher] Watching for new captures");
        loop {
            match self.scan() {
                Ok(tasks) => {
                    for task in tasks {
                        info!(path = %task.path.display(), kind = %task.kind, "[Watcher] New file detected, queued");
                        if queue.enqueue(task).is_err() {
                            warn!("[Watcher] Upload queue closed, stopping");
                            return;
                        }
                    }
                }
                Err(e) => debug!(error = %e, "[Watcher] Scan failed"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.scan_interval) => {}
            }
        }
        info!("[Watcher] Stopped");
    }
}
