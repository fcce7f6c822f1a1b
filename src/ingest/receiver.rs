//! Upload receiver: the server side of the upload protocol.

use crate::storage::PartFile;
use crate::uplink::protocol::{self, MessageType, ProtocolError, StatusReport};
use chrono::Local;
use serde::Serialize;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const LISTEN_BACKLOG: i32 = 128;

/// Bind a listener with `SO_REUSEADDR` so a restarted server does not wait
/// out `TIME_WAIT` on its port.
pub fn bind_listener(addr: &str) -> std::io::Result<TcpListener> {
    let addr: SocketAddr = addr.to_socket_addrs()?.next().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("cannot resolve {addr}"))
    })?;
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    TcpListener::from_std(socket.into())
}

/// Latest status report per source.
#[derive(Default)]
pub struct StatusBoard {
    reports: RwLock<HashMap<String, StatusReport>>,
}

impl StatusBoard {
    pub async fn update(&self, report: StatusReport) {
        self.reports.write().await.insert(report.source.clone(), report);
    }

    /// Reports sorted by source name.
    pub async fn snapshot(&self) -> Vec<StatusReport> {
        let mut all: Vec<StatusReport> = self.reports.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.source.cmp(&b.source));
        all
    }
}

/// What one connection delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    File { path: PathBuf, bytes: u64 },
    Status { source: String },
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ReceiverStats {
    pub files_received: u64,
    pub bytes_received: u64,
    pub status_reports: u64,
    pub rejected: u64,
}

pub struct UploadReceiver {
    upload_dir: PathBuf,
    connection_timeout: Duration,
    statuses: Arc<StatusBoard>,
    files_received: AtomicU64,
    bytes_received: AtomicU64,
    status_reports: AtomicU64,
    rejected: AtomicU64,
}

impl UploadReceiver {
    pub fn new(upload_dir: impl Into<PathBuf>, connection_timeout: Duration, statuses: Arc<StatusBoard>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            connection_timeout,
            statuses,
            files_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            status_reports: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn stats(&self) -> ReceiverStats {
        ReceiverStats {
            files_received: self.files_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            status_reports: self.status_reports.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    /// Read one message from `stream`, act on it and answer with an ack.
    ///
    /// The ack is [`protocol::ACK_STORED`] only after the file has been
    /// committed under its final name or the report recorded.
    pub async fn handle_connection<S>(&self, stream: &mut S) -> Result<Received, ProtocolError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let result = self.receive(stream).await;
        if let Err(e) = protocol::write_ack(stream, result.is_ok()).await {
            debug!(error = %e, "[Receiver] Could not send ack");
        }
        result
    }

    /// Header reads are bounded by the connection timeout, file bodies by
    /// the same timeout per read.
    async fn receive<S>(&self, stream: &mut S) -> Result<Received, ProtocolError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let timeout = self.connection_timeout;
        let timed_out = || ProtocolError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "header timed out"));

        let kind = tokio::time::timeout(timeout, protocol::read_message_type(stream))
            .await
            .map_err(|_| timed_out())??;

        match kind {
            MessageType::StatusCheck => {
                let body = tokio::time::timeout(
                    timeout,
                    protocol::read_frame(stream, protocol::MAX_STATUS_LEN, "status"),
                )
                .await
                .map_err(|_| timed_out())??;
                let report: StatusReport = serde_json::from_slice(&body)?;
                let source = report.source.clone();
                info!(
                    source = %source,
                    telemetry = report.telemetry_connected,
                    camera = report.camera_ready,
                    capturing = report.capturing,
                    captured = report.captured,
                    "[Receiver] Status report"
                );
                self.statuses.update(report).await;
                self.status_reports.fetch_add(1, Ordering::Relaxed);
                Ok(Received::Status { source })
            }
            MessageType::FileUpload => {
                let raw = tokio::time::timeout(
                    timeout,
                    protocol::read_frame(stream, protocol::MAX_EXTENSION_LEN, "extension"),
                )
                .await
                .map_err(|_| timed_out())??;
                let extension = String::from_utf8(raw)
                    .map_err(|e| ProtocolError::InvalidExtension(String::from_utf8_lossy(e.as_bytes()).into_owned()))?;
                protocol::validate_extension(&extension)?;

                tokio::fs::create_dir_all(&self.upload_dir).await?;
                let stem = format!("image_{}", Local::now().format("%Y%m%d_%H%M%S_%6f"));
                let (part, mut file) = PartFile::create(&self.upload_dir, &stem, &extension).await?;
                let bytes = protocol::stream_body(stream, &mut file, timeout).await?;
                file.sync_all().await?;
                drop(file);
                let path = part.commit().await?;

                self.files_received.fetch_add(1, Ordering::Relaxed);
                self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
                info!(path = %path.display(), bytes = bytes, "[Receiver] File received");
                Ok(Received::File { path, bytes })
            }
        }
    }

    /// Accept connections until cancelled. Each connection runs on its own
    /// task; in-flight connections are aborted on shutdown.
    pub async fn run(self: Arc<Self>, listener: TcpListener, cancel: CancellationToken) {
        match listener.local_addr() {
            Ok(addr) => info!(addr = %addr, dir = %self.upload_dir.display(), "[Receiver] Listening for uploads"),
            Err(_) => info!(dir = %self.upload_dir.display(), "[Receiver] Listening for uploads"),
        }

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                accepted = listener.accept() => {
                    let (mut stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "[Receiver] Accept failed");
                            continue;
                        }
                    };
                    debug!(peer = %peer, "[Receiver] Connection accepted");
                    let receiver = Arc::clone(&self);
                    connections.spawn(async move {
                        match receiver.handle_connection(&mut stream).await {
                            Ok(_) => {}
                            Err(e) => {
                                receiver.rejected.fetch_add(1, Ordering::Relaxed);
                                warn!(peer = %peer, error = %e, "[Receiver] Connection dropped");
                            }
                        }
                        let _ = stream.shutdown().await;
                    });
                }
            }
        }

        let in_flight = connections.len();
        if in_flight > 0 {
            info!(in_flight = in_flight, "[Receiver] Abandoning in-flight connections");
        }
        connections.shutdown().await;
        info!("[Receiver] Stopped");
    }
}
