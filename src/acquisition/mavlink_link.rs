//! MAVLink link (ardupilotmega dialect)
//!
//! Only HEARTBEAT and STATUSTEXT are surfaced. Parse errors skip the frame;
//! I/O errors end the link.

use super::{LinkConnector, TelemetryEndpoint, TelemetryError, TelemetryLink};
use crate::types::TelemetryEvent;
use mavlink::ardupilotmega::MavMessage;
use mavlink::error::MessageReadError;
use mavlink::MavConnection;
use tracing::{debug, info};

pub struct MavlinkConnector;

impl LinkConnector for MavlinkConnector {
    fn connect(&self, endpoint: &TelemetryEndpoint) -> Result<Box<dyn TelemetryLink>, TelemetryError> {
        let address = endpoint.to_mavlink_address();
        info!(address = %address, "[Telemetry] Opening MAVLink connection");
        let conn = mavlink::connect::<MavMessage>(&address)
            .map_err(|e| TelemetryError::Connect(format!("{address}: {e}")))?;
        Ok(Box::new(MavlinkLink { conn }))
    }

    fn name(&self) -> &'static str {
        "mavlink"
    }
}

struct MavlinkLink {
    conn: Box<dyn MavConnection<MavMessage> + Send + Sync>,
}

impl TelemetryLink for MavlinkLink {
    fn recv_event(&mut self) -> Result<Option<TelemetryEvent>, TelemetryError> {
        match self.conn.recv() {
            Ok((header, MavMessage::HEARTBEAT(_))) => Ok(Some(TelemetryEvent::Heartbeat {
                system_id: header.system_id,
            })),
            Ok((_, MavMessage::STATUSTEXT(data))) => {
                Ok(Some(TelemetryEvent::status_text(decode_status_text(&data.text))))
            }
            Ok(_) => Ok(None),
            Err(MessageReadError::Io(e)) => Err(TelemetryError::Io(e)),
            Err(e) => {
                debug!(error = %e, "[Telemetry] Skipping undecodable frame");
                Ok(None)
            }
        }
    }
}

/// STATUSTEXT payloads are fixed-size and NUL padded.
pub fn decode_status_text(raw: &[u8]) -> String {
    let bytes: Vec<u8> = raw.iter().copied().take_while(|b| *b != 0).collect();
    String::from_utf8_lossy(&bytes).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_status_text_stops_at_nul() {
        let mut raw = [0u8; 50];
        let msg = b"Mission: 3 SetCamTrigDst";
        raw[..msg.len()].copy_from_slice(msg);
        assert_eq!(decode_status_text(&raw), "Mission: 3 SetCamTrigDst");
    }

    #[test]
    fn test_decode_status_text_full_buffer() {
        let raw = [b'a'; 50];
        assert_eq!(decode_status_text(&raw).len(), 50);
    }
}
