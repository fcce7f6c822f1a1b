//! Ingestion server
//!
//! - [`UploadReceiver`] accepts uploads and status reports from clients and
//!   stores files under the upload directory
//! - [`IngestionGate`] waits for completion markers and runs the
//!   [`MappingPipeline`] once per batch
//! - [`Forwarder`] relays mapping artifacts to the downstream
//!   [`GcsReceiver`]

pub mod forwarder;
pub mod gate;
pub mod gcs;
pub mod pipeline;
pub mod receiver;

pub use forwarder::{ForwardError, Forwarder};
pub use gate::{BatchReport, GatePhase, GateSnapshot, IngestionGate};
pub use gcs::GcsReceiver;
pub use pipeline::{ExternalScript, MappingPipeline, PipelineError, PipelineOutcome};
pub use receiver::{bind_listener, ReceiverStats, Received, StatusBoard, UploadReceiver};
