//! Capture device adapters
//!
//! The trigger controller only ever talks to a [`CaptureDevice`]. Two
//! backends exist: a simulated camera for bench runs and tests, and a wired
//! GoPro driven over its HTTP control API. The backend is picked from
//! `camera.backend` at startup.

mod gopro;
mod simulated;

pub use gopro::GoProCamera;
pub use simulated::SimulatedCamera;

use crate::config::CameraConfig;
use crate::types::MediaFile;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;

/// Capture device errors. Any of these puts the controller into its
/// reconnect path.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Device connection failed: {0}")]
    Connect(String),

    #[error("Device rejected {endpoint} (HTTP {status})")]
    Rejected { endpoint: String, status: u16 },

    #[error("Device HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Device returned an unexpected response: {0}")]
    Protocol(String),

    #[error("Local I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Device session is not open")]
    NotOpen,

    #[error("Simulated device failure during {0}")]
    Simulated(&'static str),
}

/// Which device implementation to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeviceBackend {
    #[default]
    Simulated,
    #[value(name = "gopro")]
    GoPro,
}

impl std::fmt::Display for DeviceBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simulated => write!(f, "simulated"),
            Self::GoPro => write!(f, "gopro"),
        }
    }
}

/// The four camera capabilities plus session management.
///
/// Implementations handle transport details internally; callers see one
/// `DeviceError` type for every failure.
#[async_trait]
pub trait CaptureDevice: Send {
    /// Establish the control session.
    async fn open_session(&mut self) -> Result<(), DeviceError>;

    /// Switch the camera into single-photo mode.
    async fn set_photo_mode(&mut self) -> Result<(), DeviceError>;

    /// Press the shutter. Returns once the camera accepted the command;
    /// the file may appear in the listing later.
    async fn trigger_shutter(&mut self) -> Result<(), DeviceError>;

    /// Current media listing.
    async fn list_media(&mut self) -> Result<BTreeSet<MediaFile>, DeviceError>;

    /// Download `file` to `dest`, returning the byte count.
    async fn download(&mut self, file: &MediaFile, dest: &Path) -> Result<u64, DeviceError>;

    /// Release the session. Never fails; errors are logged.
    async fn close_session(&mut self);

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}

/// Build the configured device backend.
pub fn build_device(config: &CameraConfig) -> Result<Box<dyn CaptureDevice>, DeviceError> {
    match config.backend {
        DeviceBackend::Simulated => Ok(Box::new(
            SimulatedCamera::new().with_failure_rate(config.simulated_failure_rate),
        )),
        DeviceBackend::GoPro => {
            let camera = match &config.base_url {
                Some(url) => GoProCamera::with_base_url(url, config.request_timeout())?,
                None => GoProCamera::from_identifier(&config.identifier, config.request_timeout())?,
            };
            Ok(Box::new(camera))
        }
    }
}
