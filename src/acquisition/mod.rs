//! Telemetry acquisition
//!
//! Connects to the flight controller, performs the heartbeat handshake and
//! delivers [`TelemetryEvent`](crate::types::TelemetryEvent)s to the trigger
//! controller. The wire transport sits behind [`LinkConnector`] so the
//! reconnect and handshake logic can be driven by scripted links in tests.

pub mod endpoint;
pub mod link;
pub mod mavlink_link;
pub mod source;

pub use endpoint::TelemetryEndpoint;
pub use link::{LinkConnector, TelemetryLink};
pub use mavlink_link::MavlinkConnector;
pub use source::{run_telemetry, Connection, TelemetrySource};

use std::time::Duration;
use thiserror::Error;

/// Telemetry errors. All of them end the current connection; the outer
/// loop reconnects after a fixed delay.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Invalid telemetry endpoint {0}")]
    InvalidEndpoint(String),

    #[error("Telemetry connection failed: {0}")]
    Connect(String),

    #[error("Telemetry I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No heartbeat within {0:?}")]
    HeartbeatTimeout(Duration),

    #[error("Telemetry link closed")]
    Closed,
}
