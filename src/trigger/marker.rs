//! Mission completion markers

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

/// `mission_completed_<YYYYmmdd_HHMMSS_ffffff>.<ext>`
pub fn marker_file_name(now: DateTime<Local>, extension: &str) -> String {
    format!("mission_completed_{}.{}", now.format("%Y%m%d_%H%M%S_%6f"), extension)
}

/// Create the zero-byte completion marker in `dir`.
pub fn create_completion_marker(dir: &Path, extension: &str) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(marker_file_name(Local::now(), extension));
    std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)?;
    Ok(path)
}
