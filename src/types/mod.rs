//! Shared data structures for the survey workflow
//!
//! - Telemetry: TelemetryEvent (flight controller messages we act on)
//! - Trigger: TriggerState (capture on/off)
//! - Media: MediaFile, CapturedAsset (camera listing and downloaded images)
//! - Upload: UploadTask, TaskKind (items relayed to the ingestion server)

mod media;
mod telemetry;
mod trigger;
mod upload;

pub use media::*;
pub use telemetry::*;
pub use trigger::*;
pub use upload::*;
