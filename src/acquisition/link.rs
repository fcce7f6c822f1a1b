//! Transport abstraction for telemetry links.
//!
//! Links are blocking: the source runs them on a dedicated blocking thread
//! and forwards decoded events over a channel.

use super::{TelemetryEndpoint, TelemetryError};
use crate::types::TelemetryEvent;

/// An open telemetry link.
pub trait TelemetryLink: Send {
    /// Block until the next message arrives.
    ///
    /// Returns `Ok(None)` for messages that are not surfaced (other message
    /// types, undecodable frames). Any `Err` ends the link.
    fn recv_event(&mut self) -> Result<Option<TelemetryEvent>, TelemetryError>;
}

/// Opens links for an endpoint.
pub trait LinkConnector: Send + Sync + 'static {
    fn connect(&self, endpoint: &TelemetryEndpoint) -> Result<Box<dyn TelemetryLink>, TelemetryError>;

    /// Human-readable name for logging.
    fn name(&self) -> &'static str;
}
