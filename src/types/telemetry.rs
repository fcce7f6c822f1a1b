//! Telemetry events surfaced by the link reader

use serde::{Deserialize, Serialize};

/// A flight controller message relevant to the survey.
///
/// Everything else on the link is dropped by the reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TelemetryEvent {
    Heartbeat { system_id: u8 },
    StatusText { text: String },
}

impl TelemetryEvent {
    pub fn status_text(text: impl Into<String>) -> Self {
        Self::StatusText { text: text.into() }
    }

    pub const fn is_heartbeat(&self) -> bool {
        matches!(self, Self::Heartbeat { .. })
    }
}
