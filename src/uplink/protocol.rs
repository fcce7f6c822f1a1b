//! Upload wire protocol
//!
//! Every message starts with a length-prefixed type name; all lengths are
//! big-endian `u32`:
//!
//! ```text
//! status_check:  [u32 typeLen]["status_check"][u32 bodyLen][JSON body]
//! file_upload:   [u32 typeLen]["file_upload"][u32 extLen][ext][raw bytes ... EOF]
//! ```
//!
//! A file upload ends when the sender half-closes. The receiver answers
//! every message with one ack byte before closing: [`ACK_STORED`] once the
//! file is committed (or the report recorded), [`ACK_FAILED`] otherwise. A
//! close without an ack is not a delivery.
//!
//! The downstream relay reuses the framing and the ack:
//! `[u32 nameLen][name][bytes ... EOF]`.

use crate::config::defaults;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const STATUS_CHECK: &str = "status_check";
pub const FILE_UPLOAD: &str = "file_upload";

/// Longest accepted message type name.
pub const MAX_TYPE_LEN: u32 = 64;

/// Longest accepted file extension.
pub const MAX_EXTENSION_LEN: u32 = 16;

/// Longest accepted `status_check` body.
pub const MAX_STATUS_LEN: u32 = defaults::MAX_STATUS_BYTES;

/// Longest accepted relay file name.
pub const MAX_NAME_LEN: u32 = 1024;

/// Chunk size for streaming file bodies.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Receiver reply: message stored.
pub const ACK_STORED: u8 = 0;

/// Receiver reply: message rejected or storing it failed.
pub const ACK_FAILED: u8 = 1;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Unknown message type '{0}'")]
    UnknownType(String),

    #[error("{what} frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { what: &'static str, len: u32, max: u32 },

    #[error("Invalid file extension '{0}'")]
    InvalidExtension(String),

    #[error("Invalid file name '{0}'")]
    InvalidName(String),

    #[error("Peer closed without confirming delivery")]
    NotConfirmed,

    #[error("Peer refused the message (ack {0})")]
    Refused(u8),

    #[error("Malformed status report: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    StatusCheck,
    FileUpload,
}

impl MessageType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StatusCheck => STATUS_CHECK,
            Self::FileUpload => FILE_UPLOAD,
        }
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, ProtocolError> {
        match raw {
            b"status_check" => Ok(Self::StatusCheck),
            b"file_upload" => Ok(Self::FileUpload),
            other => Err(ProtocolError::UnknownType(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }
}

/// Connectivity snapshot sent by the trigger process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub source: String,
    pub telemetry_connected: bool,
    pub camera_ready: bool,
    pub capturing: bool,
    pub captured: u64,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Framing
// ============================================================================

/// Write `[u32 len][bytes]`.
pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "frame too large"))?;
    w.write_all(&len.to_be_bytes()).await?;
    w.write_all(bytes).await
}

/// Read `[u32 len][bytes]`, rejecting frames longer than `max`.
pub async fn read_frame<R: AsyncRead + Unpin>(
    r: &mut R,
    max: u32,
    what: &'static str,
) -> Result<Vec<u8>, ProtocolError> {
    let len = r.read_u32().await?;
    if len > max {
        return Err(ProtocolError::FrameTooLarge { what, len, max });
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf).await?;
    Ok(buf)
}

pub async fn write_message_type<W: AsyncWrite + Unpin>(
    w: &mut W,
    kind: MessageType,
) -> std::io::Result<()> {
    write_frame(w, kind.as_str().as_bytes()).await
}

pub async fn read_message_type<R: AsyncRead + Unpin>(r: &mut R) -> Result<MessageType, ProtocolError> {
    let raw = read_frame(r, MAX_TYPE_LEN, "type").await?;
    MessageType::from_bytes(&raw)
}

/// Extensions are 1-16 ASCII alphanumerics; anything else could escape the
/// generated file name.
pub fn validate_extension(ext: &str) -> Result<(), ProtocolError> {
    let ok = !ext.is_empty()
        && ext.len() <= MAX_EXTENSION_LEN as usize
        && ext.chars().all(|c| c.is_ascii_alphanumeric());
    if ok {
        Ok(())
    } else {
        Err(ProtocolError::InvalidExtension(ext.to_string()))
    }
}

// ============================================================================
// Transfer helpers
// ============================================================================

/// Copy `src` into `dst` chunk by chunk until `src` reaches EOF.
///
/// Every single read and write is bounded by `idle_timeout`, so a stalled
/// peer fails the transfer while a slow but moving one does not.
pub async fn stream_body<R, W>(src: &mut R, dst: &mut W, idle_timeout: Duration) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let timed_out = |what: &str| std::io::Error::new(std::io::ErrorKind::TimedOut, format!("{what} timed out"));
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = tokio::time::timeout(idle_timeout, src.read(&mut buf))
            .await
            .map_err(|_| timed_out("read"))??;
        if n == 0 {
            break;
        }
        tokio::time::timeout(idle_timeout, dst.write_all(&buf[..n]))
            .await
            .map_err(|_| timed_out("write"))??;
        total += n as u64;
    }
    dst.flush().await?;
    Ok(total)
}

/// Write the one-byte reply that ends a message exchange.
pub async fn write_ack<W: AsyncWrite + Unpin>(w: &mut W, stored: bool) -> std::io::Result<()> {
    let code = if stored { ACK_STORED } else { ACK_FAILED };
    w.write_all(&[code]).await?;
    w.flush().await
}

/// Half-close our side and wait for the receiver's ack.
///
/// Only [`ACK_STORED`] counts as delivered. EOF before the ack is
/// [`ProtocolError::NotConfirmed`]; waiting past `timeout` is an I/O
/// `TimedOut`.
pub async fn finish_and_await_ack<S>(stream: &mut S, timeout: Duration) -> Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.shutdown().await?;
    let mut ack = [0u8; 1];
    let n = tokio::time::timeout(timeout, stream.read(&mut ack))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "peer did not confirm delivery"))??;
    match (n, ack[0]) {
        (0, _) => Err(ProtocolError::NotConfirmed),
        (_, ACK_STORED) => Ok(()),
        (_, code) => Err(ProtocolError::Refused(code)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_upload_header_layout() {
        let mut buf = Vec::new();
        write_message_type(&mut buf, MessageType::FileUpload).await.unwrap();
        write_frame(&mut buf, b"jpg").await.unwrap();

        let mut expected = Vec::new();
        expected.extend_from_slice(&11u32.to_be_bytes());
        expected.extend_from_slice(b"file_upload");
        expected.extend_from_slice(&3u32.to_be_bytes());
        expected.extend_from_slice(b"jpg");
        assert_eq!(buf, expected);
    }

    #[tokio::test]
    async fn test_read_header_back() {
        let mut buf = Vec::new();
        write_message_type(&mut buf, MessageType::StatusCheck).await.unwrap();
        write_frame(&mut buf, b"{}").await.unwrap();

        let mut r = buf.as_slice();
        assert_eq!(read_message_type(&mut r).await.unwrap(), MessageType::StatusCheck);
        assert_eq!(read_frame(&mut r, MAX_STATUS_LEN, "status").await.unwrap(), b"{}");
    }

    #[tokio::test]
    async fn test_unknown_type_rejected() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"format_disk").await.unwrap();
        let mut r = buf.as_slice();
        assert!(matches!(
            read_message_type(&mut r).await,
            Err(ProtocolError::UnknownType(t)) if t == "format_disk"
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let mut r: &[u8] = &[0xFF, 0xFF, 0xFF, 0xFF];
        assert!(matches!(
            read_frame(&mut r, MAX_EXTENSION_LEN, "extension").await,
            Err(ProtocolError::FrameTooLarge { len: u32::MAX, .. })
        ));
    }

    #[tokio::test]
    async fn test_truncated_frame_is_io_error() {
        let mut r: &[u8] = &[0, 0, 0, 5, b'a'];
        assert!(matches!(
            read_frame(&mut r, 16, "extension").await,
            Err(ProtocolError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_ack_decides_delivery() {
        let (mut client, mut server) = tokio::io::duplex(64);
        write_ack(&mut server, true).await.unwrap();
        assert!(finish_and_await_ack(&mut client, Duration::from_secs(1)).await.is_ok());

        let (mut client, mut server) = tokio::io::duplex(64);
        write_ack(&mut server, false).await.unwrap();
        assert!(matches!(
            finish_and_await_ack(&mut client, Duration::from_secs(1)).await,
            Err(ProtocolError::Refused(ACK_FAILED))
        ));

        let (mut client, server) = tokio::io::duplex(64);
        drop(server);
        assert!(matches!(
            finish_and_await_ack(&mut client, Duration::from_secs(1)).await,
            Err(ProtocolError::NotConfirmed) | Err(ProtocolError::Io(_))
        ));
    }

    #[test]
    fn test_extension_validation() {
        assert!(validate_extension("jpg").is_ok());
        assert!(validate_extension("flag").is_ok());
        assert!(validate_extension("").is_err());
        assert!(validate_extension("../x").is_err());
        assert!(validate_extension("j.pg").is_err());
        assert!(validate_extension("abcdefghijklmnopq").is_err());
    }

    #[test]
    fn test_status_report_json() {
        let json = r#"{"source":"drone-1","telemetry_connected":true,"camera_ready":false,"capturing":false,"captured":4,"timestamp":"2024-01-01T00:00:00Z"}"#;
        let report: StatusReport = serde_json::from_str(json).unwrap();
        assert_eq!(report.source, "drone-1");
        assert_eq!(report.captured, 4);
    }
}
