//! Telemetry endpoint addressing
//!
//! - `tcp:HOST:PORT`  MAVLink over TCP (we connect out, SITL style)
//! - `udp:HOST:PORT`  MAVLink over UDP (we listen)
//! - `DEVICE:BAUD`    serial port, e.g. `/dev/ttyAMA0:57600`

use super::TelemetryError;
use std::net::IpAddr;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryEndpoint {
    Tcp { host: String, port: u16 },
    Udp { host: String, port: u16 },
    Serial { device: String, baud: u32 },
}

impl TelemetryEndpoint {
    /// Connection string understood by `mavlink::connect`.
    pub fn to_mavlink_address(&self) -> String {
        match self {
            Self::Tcp { host, port } => format!("tcpout:{host}:{port}"),
            Self::Udp { host, port } => format!("udpin:{host}:{port}"),
            Self::Serial { device, baud } => format!("serial:{device}:{baud}"),
        }
    }

    pub const fn is_serial(&self) -> bool {
        matches!(self, Self::Serial { .. })
    }
}

fn parse_host_port(raw: &str, original: &str) -> Result<(String, u16), TelemetryError> {
    let (host, port) = raw
        .rsplit_once(':')
        .ok_or_else(|| TelemetryError::InvalidEndpoint(format!("{original}: expected HOST:PORT")))?;
    if host.is_empty() {
        return Err(TelemetryError::InvalidEndpoint(format!("{original}: empty host")));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| TelemetryError::InvalidEndpoint(format!("{original}: invalid port '{port}'")))?;
    Ok((host.to_string(), port))
}

impl FromStr for TelemetryEndpoint {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(rest) = s.strip_prefix("tcp:") {
            let (host, port) = parse_host_port(rest, s)?;
            return Ok(Self::Tcp { host, port });
        }
        if let Some(rest) = s.strip_prefix("udp:") {
            let (host, port) = parse_host_port(rest, s)?;
            return Ok(Self::Udp { host, port });
        }

        let (device, baud) = s.rsplit_once(':').ok_or_else(|| {
            TelemetryError::InvalidEndpoint(format!(
                "{s}: expected tcp:HOST:PORT, udp:HOST:PORT or DEVICE:BAUD"
            ))
        })?;
        if device.is_empty() {
            return Err(TelemetryError::InvalidEndpoint(format!("{s}: empty device")));
        }
        if device.parse::<IpAddr>().is_ok() {
            return Err(TelemetryError::InvalidEndpoint(format!(
                "{s}: network address without scheme, use tcp:{s} or udp:{s}"
            )));
        }
        let baud = baud
            .parse::<u32>()
            .ok()
            .filter(|b| *b > 0)
            .ok_or_else(|| TelemetryError::InvalidEndpoint(format!("{s}: invalid baud rate '{baud}'")))?;
        Ok(Self::Serial {
            device: device.to_string(),
            baud,
        })
    }
}

impl std::fmt::Display for TelemetryEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "tcp:{host}:{port}"),
            Self::Udp { host, port } => write!(f, "udp:{host}:{port}"),
            Self::Serial { device, baud } => write!(f, "{device}:{baud}"),
        }
    }
}
