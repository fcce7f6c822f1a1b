//! Upload queue items

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What a queued file represents for the batch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Image,
    /// Completion marker; closes the current batch once delivered
    Marker,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Marker => write!(f, "marker"),
        }
    }
}

/// A file waiting to be relayed to the ingestion server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTask {
    pub path: PathBuf,
    pub kind: TaskKind,
}

impl UploadTask {
    pub fn image(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: TaskKind::Image,
        }
    }

    pub fn marker(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: TaskKind::Marker,
        }
    }

    /// Extension sent in the `file_upload` header (without the dot).
    pub fn wire_extension(&self) -> String {
        self.path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Classify a path by its lower-cased extension.
///
/// Returns `None` for files the uploader does not relay.
pub fn classify(path: &Path, image_extensions: &[String], marker_extension: &str) -> Option<TaskKind> {
    let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
    if ext == marker_extension.to_ascii_lowercase() {
        Some(TaskKind::Marker)
    } else if image_extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)) {
        Some(TaskKind::Image)
    } else {
        None
    }
}
