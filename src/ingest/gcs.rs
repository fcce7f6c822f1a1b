//! Downstream receiver for forwarded artifacts (`gcs-receiver`).

use crate::storage::PartFile;
use crate::uplink::protocol::{self, ProtocolError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reduce a sender-supplied name to a safe final path component.
///
/// Returns `(stem, extension)`; the extension may be empty.
pub fn sanitize_name(raw: &str) -> Result<(String, String), ProtocolError> {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if last.is_empty() || last == "." || last == ".." {
        return Err(ProtocolError::InvalidName(raw.to_string()));
    }
    match last.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Ok((stem.to_string(), ext.to_string())),
        _ => Ok((last.to_string(), String::new())),
    }
}

pub struct GcsReceiver {
    receive_dir: PathBuf,
    timeout: Duration,
}

impl GcsReceiver {
    pub fn new(receive_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            receive_dir: receive_dir.into(),
            timeout,
        }
    }

    pub fn receive_dir(&self) -> &Path {
        &self.receive_dir
    }

    /// Read one `[u32 nameLen][name][bytes]` transfer, store it and ack.
    pub async fn handle_connection<S>(&self, stream: &mut S) -> Result<PathBuf, ProtocolError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let result = self.receive(stream).await;
        if let Err(e) = protocol::write_ack(stream, result.is_ok()).await {
            debug!(error = %e, "[GcsReceiver] Could not send ack");
        }
        result
    }

    async fn receive<S>(&self, stream: &mut S) -> Result<PathBuf, ProtocolError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let raw = tokio::time::timeout(
            self.timeout,
            protocol::read_frame(stream, protocol::MAX_NAME_LEN, "name"),
        )
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "name timed out"))??;
        let name = String::from_utf8_lossy(&raw).into_owned();
        let (stem, ext) = sanitize_name(&name)?;

        tokio::fs::create_dir_all(&self.receive_dir).await?;
        let (part, mut file) = PartFile::create(&self.receive_dir, &stem, &ext).await?;
        let bytes = protocol::stream_body(stream, &mut file, self.timeout).await?;
        file.sync_all().await?;
        drop(file);
        let path = part.commit().await?;
        info!(path = %path.display(), bytes = bytes, "[GcsReceiver] Artifact received");
        Ok(path)
    }

    pub async fn run(self: Arc<Self>, listener: TcpListener, cancel: CancellationToken) {
        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, dir = %self.receive_dir.display(), "[GcsReceiver] Listening");
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
                            warn!(error = %e, "[GcsReceiver] Accept failed");
                            continue;
                        }
                    };
                    let receiver = Arc::clone(&self);
                    connections.spawn(async move {
                        if let Err(e) = receiver.handle_connection(&mut stream).await {
                            warn!(peer = %peer, error = %e, "[GcsReceiver] Transfer dropped");
                        }
                        let _ = stream.shutdown().await;
                    });
                }
            }
        }
        connections.shutdown().await;
        info!("[GcsReceiver] Stopped");
    }
}
