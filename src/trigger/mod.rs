//! Trigger controller
//!
//! Turns flight controller status texts into capture state and drives the
//! camera:
//!
//! - [`TriggerController`]: the shared state machine (Idle/Capturing, device
//!   readiness, capture counters) and the single capture cycle
//! - [`run_event_loop`]: feeds telemetry events into the controller
//! - [`CaptureLoop`]: owns the device session, captures while the controller
//!   says so, reconnects on device failures

mod capture_loop;
mod controller;
pub mod marker;

pub use capture_loop::{CaptureLoop, CaptureSettings};
pub use controller::{CaptureError, CaptureStats, CycleGuard, TriggerController, TriggerOutcome};

use crate::config::MissionConfig;
use crate::types::TelemetryEvent;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Waypoint shown when a trigger text carries no waypoint number.
pub const UNKNOWN_WAYPOINT: &str = "N/A";

/// Status-text patterns that define mission events.
#[derive(Debug, Clone)]
pub struct MissionPatterns {
    pub trigger: String,
    pub completion: String,
    pub waypoint: Regex,
    pub marker_extension: String,
    pub dedupe_waypoints: bool,
}

impl MissionPatterns {
    pub fn from_config(config: &MissionConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            trigger: config.trigger_pattern.clone(),
            completion: config.completion_pattern.clone(),
            waypoint: Regex::new(&config.waypoint_regex)?,
            marker_extension: config.marker_extension.clone(),
            dedupe_waypoints: config.dedupe_waypoints,
        })
    }

    /// Waypoint number from a trigger text, if the regex matches.
    pub fn waypoint(&self, text: &str) -> Option<String> {
        self.waypoint
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }
}

/// Deliver telemetry events to the controller until the channel closes or
/// `cancel` fires.
pub async fn run_event_loop(
    controller: Arc<TriggerController>,
    mut events: mpsc::Receiver<TelemetryEvent>,
    cancel: CancellationToken,
) {
    info!("[TriggerLoop] Waiting for mission events");
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            e = events.recv() => e,
        };
        match event {
            Some(TelemetryEvent::StatusText { text }) => {
                controller.on_status_text(&text);
            }
            Some(TelemetryEvent::Heartbeat { system_id }) => {
                debug!(system_id = system_id, "[TriggerLoop] Heartbeat");
            }
            None => break,
        }
    }
    info!("[TriggerLoop] Stopped");
}

/// Sleep unless cancelled first. Returns `false` on cancellation.
pub(crate) async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
