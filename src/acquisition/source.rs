//! Telemetry source: handshake, event delivery and the reconnect loop.

use super::{LinkConnector, TelemetryEndpoint, TelemetryError};
use crate::retry::RetryPolicy;
use crate::types::TelemetryEvent;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Events buffered between the blocking reader and async consumers.
const READER_CHANNEL_CAPACITY: usize = 64;

/// Opens telemetry connections for one endpoint.
pub struct TelemetrySource {
    connector: Arc<dyn LinkConnector>,
    endpoint: TelemetryEndpoint,
    heartbeat_timeout: Duration,
}

/// A connected link that has completed the heartbeat handshake.
///
/// Dropping it stops the reader thread at its next message.
pub struct Connection {
    rx: mpsc::Receiver<Result<TelemetryEvent, TelemetryError>>,
    system_id: u8,
}

impl TelemetrySource {
    pub fn new(
        connector: Arc<dyn LinkConnector>,
        endpoint: TelemetryEndpoint,
        heartbeat_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            endpoint,
            heartbeat_timeout,
        }
    }

    pub const fn endpoint(&self) -> &TelemetryEndpoint {
        &self.endpoint
    }

    /// Open the link and wait for the first heartbeat.
    ///
    /// Status texts seen before the heartbeat are discarded.
    pub async fn connect(&self) -> Result<Connection, TelemetryError> {
        let (tx, mut rx) = mpsc::channel(READER_CHANNEL_CAPACITY);
        let connector = Arc::clone(&self.connector);
        let endpoint = self.endpoint.clone();

        tokio::task::spawn_blocking(move || reader_thread(connector.as_ref(), &endpoint, &tx));

        let deadline = Instant::now() + self.heartbeat_timeout;
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Err(_) => return Err(TelemetryError::HeartbeatTimeout(self.heartbeat_timeout)),
                Ok(None) => return Err(TelemetryError::Closed),
                Ok(Some(Err(e))) => return Err(e),
                Ok(Some(Ok(TelemetryEvent::Heartbeat { system_id }))) => {
                    info!(
                        endpoint = %self.endpoint,
                        system_id = system_id,
                        "[Telemetry] Heartbeat received, link established"
                    );
                    return Ok(Connection { rx, system_id });
                }
                Ok(Some(Ok(TelemetryEvent::StatusText { text }))) => {
                    debug!(text = %text, "[Telemetry] Discarding status text before heartbeat");
                }
            }
        }
    }
}

impl Connection {
    pub const fn system_id(&self) -> u8 {
        self.system_id
    }

    /// Wait up to `timeout` for the next event.
    ///
    /// `Ok(None)` means nothing arrived in time; errors mean the link is gone.
    pub async fn next_event(&mut self, timeout: Duration) -> Result<Option<TelemetryEvent>, TelemetryError> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Err(_) => Ok(None),
            Ok(None) => Err(TelemetryError::Closed),
            Ok(Some(result)) => result.map(Some),
        }
    }
}

/// Blocking side: owns the link until it fails or the receiver goes away.
fn reader_thread(
    connector: &dyn LinkConnector,
    endpoint: &TelemetryEndpoint,
    tx: &mpsc::Sender<Result<TelemetryEvent, TelemetryError>>,
) {
    let mut link = match connector.connect(endpoint) {
        Ok(link) => link,
        Err(e) => {
            let _ = tx.blocking_send(Err(e));
            return;
        }
    };

    loop {
        match link.recv_event() {
            Ok(Some(event)) => {
                if tx.blocking_send(Ok(event)).is_err() {
                    return;
                }
            }
            Ok(None) => {
                if tx.is_closed() {
                    return;
                }
            }
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                return;
            }
        }
    }
}

/// Keep a telemetry connection alive until cancelled.
///
/// Every event after the handshake is forwarded to `events`. `connected`
/// mirrors the link state for status reporting.
pub async fn run_telemetry(
    source: TelemetrySource,
    events: mpsc::Sender<TelemetryEvent>,
    connected: Arc<AtomicBool>,
    reconnect: RetryPolicy,
    cancel: CancellationToken,
) {
    let poll = Duration::from_secs(1);

    'outer: loop {
        if cancel.is_cancelled() {
            break;
        }

        info!(endpoint = %source.endpoint(), "[Telemetry] Connecting");
        let connect_result = tokio::select! {
            _ = cancel.cancelled() => break,
            r = source.connect() => r,
        };

        match connect_result {
            Ok(mut conn) => {
                connected.store(true, Ordering::Relaxed);
                loop {
                    let next = tokio::select! {
                        _ = cancel.cancelled() => break 'outer,
                        r = conn.next_event(poll) => r,
                    };
                    match next {
                        Ok(Some(event)) => {
                            if events.send(event).await.is_err() {
                                debug!("[Telemetry] Event consumer gone, stopping");
                                break 'outer;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(error = %e, "[Telemetry] Link lost");
                            break;
                        }
                    }
                }
                connected.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                warn!(error = %e, "[Telemetry] Connection failed");
            }
        }

        info!(delay = ?reconnect.delay, "[Telemetry] Reconnecting after delay");
        if !reconnect.wait(&cancel).await {
            break;
        }
    }

    connected.store(false, Ordering::Relaxed);
    info!("[Telemetry] Stopped");
}
