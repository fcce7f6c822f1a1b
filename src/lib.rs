//! AeroSurvey: aerial survey coordination
//!
//! Three cooperating processes keep a photo survey moving from the aircraft
//! to the mapping pipeline.
//!
//! ## Architecture
//!
//! - **Trigger** ([`trigger`], [`acquisition`], [`device`]): follows flight
//!   controller status texts, captures and downloads photos while a survey
//!   leg is active, writes a completion marker at mission end
//! - **Upload client** ([`uplink`]): relays every new capture and the
//!   marker to the server in detection order, then deletes the mission's
//!   files locally
//! - **Ingestion server** ([`ingest`], [`api`]): stores uploads, runs the
//!   mapping pipeline once per completed mission and forwards its results

pub mod acquisition;
pub mod api;
pub mod config;
pub mod device;
pub mod ingest;
pub mod retry;
pub mod storage;
pub mod trigger;
pub mod types;
pub mod uplink;

// Re-export configuration
pub use config::SurveyConfig;

// Re-export commonly used types
pub use types::{CapturedAsset, MediaFile, TaskKind, TelemetryEvent, TriggerState, UploadTask};

pub use device::{CaptureDevice, DeviceBackend, DeviceError};
pub use ingest::{IngestionGate, MappingPipeline};
pub use retry::RetryPolicy;
pub use trigger::TriggerController;
pub use uplink::{UploadQueue, Uploader};
