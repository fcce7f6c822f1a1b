//! Local storage helpers
//!
//! - [`ProcessLock`]: one process per role and directory
//! - [`PartFile`]: write-then-rename for inbound transfers

pub mod lockfile;
pub mod partfile;

pub use lockfile::ProcessLock;
pub use partfile::{PartFile, PART_SUFFIX};
