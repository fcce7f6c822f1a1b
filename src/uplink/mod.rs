//! Upload client
//!
//! Relays captured images and completion markers from the capture directory
//! to the ingestion server:
//!
//! - [`CaptureWatcher`] polls the directory and enqueues new files
//! - [`UploadQueue`] keeps them in detection order
//! - [`Uploader`] sends them one connection at a time, retrying the same
//!   file until it is delivered, and deletes a mission's files once its
//!   marker has been delivered
//!
//! The wire format lives in [`protocol`]; the trigger process uses
//! [`status`] to report its health over the same channel.

pub mod protocol;
pub mod queue;
pub mod status;
pub mod uploader;
pub mod watcher;

pub use protocol::{MessageType, ProtocolError, StatusReport};
pub use queue::{QueueConsumer, QueueError, UploadQueue};
pub use uploader::{MissionBatch, UploadStats, Uploader, UplinkError};
pub use watcher::CaptureWatcher;
