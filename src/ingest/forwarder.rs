//! Forwards mapping artifacts to the downstream receiver.
//!
//! Frame: `[u32 nameLen][name][bytes ... EOF]`. The receiver answers with
//! an ack byte once the file is stored.

use crate::config::ForwardConfig;
use crate::retry::RetryPolicy;
use crate::uplink::protocol::{self, ProtocolError};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("Artifact not found: {}", .0.display())]
    Missing(PathBuf),

    #[error("Cannot connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    #[error("Forward timed out")]
    Timeout,

    #[error("Forward I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Receiver did not store the artifact: {0}")]
    NotStored(#[from] ProtocolError),

    #[error("Forward failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<ForwardError>,
    },

    #[error("Forward cancelled")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct Forwarder {
    addr: String,
    retry: RetryPolicy,
    socket_timeout: Duration,
}

impl Forwarder {
    pub fn from_config(config: &ForwardConfig) -> Self {
        Self {
            addr: config.addr.clone(),
            retry: RetryPolicy::bounded(config.attempts, config.retry_delay()),
            socket_timeout: config.socket_timeout(),
        }
    }

    pub fn new(addr: impl Into<String>, retry: RetryPolicy, socket_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            retry,
            socket_timeout,
        }
    }

    /// One transfer attempt.
    pub async fn send_once(&self, path: &Path) -> Result<u64, ForwardError> {
        let mut file = match tokio::fs::File::open(path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ForwardError::Missing(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut stream = match tokio::time::timeout(self.socket_timeout, TcpStream::connect(self.addr.as_str())).await {
            Ok(Ok(s)) => s,
            Ok(Err(source)) => {
                return Err(ForwardError::Connect {
                    addr: self.addr.clone(),
                    source,
                })
            }
            Err(_) => return Err(ForwardError::Timeout),
        };

        protocol::write_frame(&mut stream, name.as_bytes()).await?;
        let bytes = protocol::stream_body(&mut file, &mut stream, self.socket_timeout).await?;
        protocol::finish_and_await_ack(&mut stream, self.socket_timeout).await?;
        Ok(bytes)
    }

    /// Send with bounded retry. A missing artifact is not retried.
    ///
    /// On failure the artifact stays where it is.
    pub async fn forward(&self, path: &Path, cancel: &CancellationToken) -> Result<u64, ForwardError> {
        let mut attempt = 1;
        loop {
            match self.send_once(path).await {
                Ok(bytes) => {
                    info!(path = %path.display(), bytes = bytes, to = %self.addr, "[Forwarder] Artifact forwarded");
                    return Ok(bytes);
                }
                Err(ForwardError::Missing(p)) => {
                    warn!(path = %p.display(), "[Forwarder] Artifact not found, skipping");
                    return Err(ForwardError::Missing(p));
                }
                Err(e) => {
                    if !self.retry.has_next(attempt) {
                        error!(path = %path.display(), attempts = attempt, error = %e, "[Forwarder] Giving up, artifact kept in place");
                        return Err(ForwardError::Exhausted {
                            attempts: attempt,
                            last: Box::new(e),
                        });
                    }
                    warn!(path = %path.display(), attempt = attempt, error = %e, "[Forwarder] Forward failed, retrying");
                    if !self.retry.wait(cancel).await {
                        return Err(ForwardError::Cancelled);
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_artifact_not_retried() {
        let forwarder = Forwarder::new("127.0.0.1:9", RetryPolicy::bounded(3, Duration::ZERO), Duration::from_millis(200));
        let err = forwarder
            .forward(Path::new("/nope/odm_orthophoto.tif"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ForwardError::Missing(_)));
    }

    #[tokio::test]
    async fn test_unreachable_receiver_exhausts_attempts() {
        let tmp = tempfile::tempdir().unwrap();
        let artifact = tmp.path().join("ortho.tif");
        std::fs::write(&artifact, b"tif").unwrap();
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let forwarder = Forwarder::new(
            format!("127.0.0.1:{port}"),
            RetryPolicy::bounded(3, Duration::ZERO),
            Duration::from_millis(200),
        );
        let err = forwarder.forward(&artifact, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ForwardError::Exhausted { attempts: 3, .. }));
        assert!(artifact.exists());
    }
}
