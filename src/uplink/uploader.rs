//! Upload consumer: relays queued files and deletes delivered batches.

use super::protocol::{self, MessageType, ProtocolError};
use super::queue::QueueConsumer;
use crate::config::UplinkConfig;
use crate::retry::RetryPolicy;
use crate::types::{TaskKind, UploadTask};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum UplinkError {
    /// The queued file no longer exists.
    #[error("Local file missing: {}", .0.display())]
    LocalFileMissing(PathBuf),

    /// The file's extension cannot be expressed in the upload header.
    #[error("Cannot upload {}: {reason}", .path.display())]
    Unsendable { path: PathBuf, reason: ProtocolError },

    #[error("Cannot connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    #[error("Timed out: {0}")]
    Timeout(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl UplinkError {
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::LocalFileMissing(_) | Self::Unsendable { .. })
    }
}

/// Counters printed when the client exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UploadStats {
    pub images_sent: u64,
    pub markers_sent: u64,
    pub bytes_sent: u64,
    pub failed_attempts: u64,
    pub abandoned: u64,
    pub files_deleted: u64,
}

/// Images delivered since the last delivered marker.
#[derive(Debug, Default)]
pub struct MissionBatch {
    delivered: Vec<PathBuf>,
}

impl MissionBatch {
    pub fn record(&mut self, path: PathBuf) {
        self.delivered.push(path);
    }

    pub fn len(&self) -> usize {
        self.delivered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delivered.is_empty()
    }

    /// Delete every delivered image plus the marker, then start a new batch.
    /// Returns the number of files removed.
    pub fn close(&mut self, marker: &Path) -> u64 {
        let mut deleted = 0;
        for path in self.delivered.drain(..).chain(std::iter::once(marker.to_path_buf())) {
            match std::fs::remove_file(&path) {
                Ok(()) => deleted += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "[Uploader] Failed to delete delivered file"),
            }
        }
        deleted
    }
}

/// Sends files to the ingestion server, one connection per file.
#[derive(Debug, Clone)]
pub struct Uploader {
    server_addr: String,
    socket_timeout: Duration,
    retry: RetryPolicy,
    settle_delay: Duration,
    start_delay: Duration,
}

impl Uploader {
    pub fn from_config(config: &UplinkConfig) -> Self {
        Self {
            server_addr: config.server_addr.clone(),
            socket_timeout: config.socket_timeout(),
            retry: RetryPolicy::unbounded(config.retry_delay()),
            settle_delay: config.settle_delay(),
            start_delay: config.start_delay(),
        }
    }

    pub fn new(server_addr: impl Into<String>, socket_timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            server_addr: server_addr.into(),
            socket_timeout,
            retry,
            settle_delay: Duration::ZERO,
            start_delay: Duration::ZERO,
        }
    }

    pub fn server_addr(&self) -> &str {
        &self.server_addr
    }

    /// One delivery attempt. Succeeds only after the server acked the file
    /// as stored.
    pub async fn send_file(&self, path: &Path) -> Result<u64, UplinkError> {
        let mut file = match tokio::fs::File::open(path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(UplinkError::LocalFileMissing(path.to_path_buf()));
            }
            Err(e) => return Err(UplinkError::Io(e)),
        };
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        protocol::validate_extension(&extension).map_err(|reason| UplinkError::Unsendable {
            path: path.to_path_buf(),
            reason,
        })?;

        let mut stream = connect(&self.server_addr, self.socket_timeout).await?;

        let header = async {
            protocol::write_message_type(&mut stream, MessageType::FileUpload).await?;
            protocol::write_frame(&mut stream, extension.as_bytes()).await
        };
        tokio::time::timeout(self.socket_timeout, header)
            .await
            .map_err(|_| UplinkError::Timeout("sending header"))??;

        let bytes = protocol::stream_body(&mut file, &mut stream, self.socket_timeout).await?;
        protocol::finish_and_await_ack(&mut stream, self.socket_timeout)
            .await
            .map_err(|e| match e {
                ProtocolError::Io(io) if io.kind() == std::io::ErrorKind::TimedOut => {
                    UplinkError::Timeout("awaiting delivery confirmation")
                }
                other => UplinkError::Protocol(other),
            })?;
        Ok(bytes)
    }

    /// Consume the queue until the stop sentinel.
    ///
    /// `abort` ends the current retry wait and stops the consumer; it is
    /// fired only when the operator gives up on draining.
    pub async fn run(&self, mut consumer: QueueConsumer, abort: CancellationToken) -> UploadStats {
        let mut stats = UploadStats::default();
        let mut batch = MissionBatch::default();

        info!(server = %self.server_addr, "[Uploader] Started");
        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }

        while let Some(task) = consumer.next().await {
            if abort.is_cancelled() {
                warn!(path = %task.path.display(), "[Uploader] Drain abandoned, leaving file for the next run");
                consumer.task_done();
                break;
            }
            self.deliver(&task, &mut batch, &mut stats, &abort).await;
            consumer.task_done();
        }

        if !batch.is_empty() {
            info!(
                undeleted = batch.len(),
                "[Uploader] Images delivered without a marker stay on disk"
            );
        }
        info!("[Uploader] Stopped");
        stats
    }

    /// Retry one task until it is delivered, its file vanished, or the
    /// drain is aborted.
    async fn deliver(
        &self,
        task: &UploadTask,
        batch: &mut MissionBatch,
        stats: &mut UploadStats,
        abort: &CancellationToken,
    ) {
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }

        let mut attempt: u32 = 1;
        loop {
            match self.send_file(&task.path).await {
                Ok(bytes) => {
                    stats.bytes_sent += bytes;
                    match task.kind {
                        TaskKind::Image => {
                            stats.images_sent += 1;
                            info!(path = %task.path.display(), bytes = bytes, "[Uploader] Image delivered");
                            batch.record(task.path.clone());
                        }
                        TaskKind::Marker => {
                            stats.markers_sent += 1;
                            let images = batch.len();
                            let deleted = batch.close(&task.path);
                            stats.files_deleted += deleted;
                            info!(
                                marker = %task.path.display(),
                                images = images,
                                deleted = deleted,
                                "[Uploader] Mission marker delivered, batch removed locally"
                            );
                        }
                    }
                    return;
                }
                Err(UplinkError::LocalFileMissing(path)) => {
                    stats.abandoned += 1;
                    warn!(path = %path.display(), kind = %task.kind, "[Uploader] File vanished before upload, skipping");
                    return;
                }
                Err(e @ UplinkError::Unsendable { .. }) => {
                    stats.abandoned += 1;
                    error!(kind = %task.kind, error = %e, "[Uploader] File cannot be uploaded, skipping");
                    return;
                }
                Err(e) => {
                    stats.failed_attempts += 1;
                    if !self.retry.has_next(attempt) {
                        stats.abandoned += 1;
                        error!(path = %task.path.display(), attempts = attempt, error = %e, "[Uploader] Giving up on file");
                        return;
                    }
                    warn!(
                        path = %task.path.display(),
                        attempt = attempt,
                        error = %e,
                        delay = ?self.retry.delay,
                        "[Uploader] Upload failed, retrying"
                    );
                    if !self.retry.wait(abort).await {
                        warn!(path = %task.path.display(), "[Uploader] Retry abandoned on shutdown");
                        return;
                    }
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }
}

/// Connect with a timeout.
pub(crate) async fn connect(addr: &str, timeout: Duration) -> Result<TcpStream, UplinkError> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(UplinkError::Connect {
            addr: addr.to_string(),
            source,
        }),
        Err(_) => Err(UplinkError::Timeout("connecting")),
    }
}
