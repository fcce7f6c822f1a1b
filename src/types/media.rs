//! Camera media and downloaded assets

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One file in the camera's media listing.
///
/// Ordering and hashing include the folder so identically named files in
/// different DCIM folders stay distinct when snapshots are diffed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MediaFile {
    pub folder: String,
    pub name: String,
}

impl MediaFile {
    pub fn new(folder: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            name: name.into(),
        }
    }

    /// Extension including the leading dot (`.JPG`), or empty.
    pub fn extension(&self) -> String {
        std::path::Path::new(&self.name)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default()
    }
}

impl std::fmt::Display for MediaFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.folder, self.name)
    }
}

/// An image downloaded from the camera into the capture directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedAsset {
    pub local_path: PathBuf,
    /// Extension of the file on the camera, with leading dot
    pub remote_extension: String,
    pub created_at: DateTime<Utc>,
}
