//! `status_check` producer

use super::protocol::{self, MessageType, ProtocolError, StatusReport};
use super::uploader::{connect, UplinkError};
use crate::config::StatusConfig;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Send one status report and wait for the server's ack.
pub async fn send_status(addr: &str, report: &StatusReport, timeout: Duration) -> Result<(), UplinkError> {
    let body = serde_json::to_vec(report).map_err(ProtocolError::from)?;
    let mut stream = connect(addr, timeout).await?;
    let send = async {
        protocol::write_message_type(&mut stream, MessageType::StatusCheck).await?;
        protocol::write_frame(&mut stream, &body).await?;
        protocol::finish_and_await_ack(&mut stream, timeout).await
    };
    let acked: Result<(), ProtocolError> = tokio::time::timeout(timeout, send)
        .await
        .map_err(|_| UplinkError::Timeout("sending status"))?;
    acked?;
    Ok(())
}

/// Periodically report `snapshot()` to the server until cancelled.
///
/// Failures are logged; the next interval simply tries again.
pub async fn run_status_reporter<F>(
    config: StatusConfig,
    timeout: Duration,
    snapshot: F,
    cancel: CancellationToken,
) where
    F: Fn() -> StatusReport + Send,
{
    info!(server = %config.server_addr, interval = ?config.interval(), "[StatusReporter] Started");
    let mut interval = tokio::time::interval(config.interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        let report = snapshot();
        match send_status(&config.server_addr, &report, timeout).await {
            Ok(()) => debug!(source = %report.source, "[StatusReporter] Status delivered"),
            Err(e) => warn!(error = %e, "[StatusReporter] Status report failed"),
        }
    }
    info!("[StatusReporter] Stopped");
}
