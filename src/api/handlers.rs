//! Browse endpoints: server status, upload directory listing, file download

use axum::extract::{Path as UrlPath, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use super::envelope::{ApiErrorResponse, ApiResponse};
use crate::ingest::{GateSnapshot, IngestionGate, StatusBoard};
use crate::uplink::StatusReport;

/// Shared state behind the router.
#[derive(Clone)]
pub struct AppState {
    pub upload_dir: PathBuf,
    pub gate: Arc<IngestionGate>,
    pub statuses: Arc<StatusBoard>,
}

#[derive(Debug, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub gate: GateSnapshot,
    pub files: usize,
    pub clients: Vec<StatusReport>,
}

fn list_upload_dir(dir: &std::path::Path) -> std::io::Result<Vec<FileEntry>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        files.push(FileEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            size: meta.len(),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
        });
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

/// A bare file name: no separators, not `.` or `..`.
fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\']) && !name.contains('\0')
}

/// GET /api/v1/status
pub async fn get_status(State(state): State<AppState>) -> Response {
    let files = match list_upload_dir(&state.upload_dir) {
        Ok(files) => files.len(),
        Err(e) => {
            warn!(error = %e, "Failed to read upload directory");
            return ApiErrorResponse::internal(format!("cannot read upload directory: {e}"));
        }
    };
    ApiResponse::ok(StatusResponse {
        gate: state.gate.snapshot(),
        files,
        clients: state.statuses.snapshot().await,
    })
}

/// GET /api/v1/files
pub async fn list_files(State(state): State<AppState>) -> Response {
    match list_upload_dir(&state.upload_dir) {
        Ok(files) => ApiResponse::ok(files),
        Err(e) => {
            warn!(error = %e, "Failed to read upload directory");
            ApiErrorResponse::internal(format!("cannot read upload directory: {e}"))
        }
    }
}

/// GET /api/v1/files/:name
pub async fn download_file(State(state): State<AppState>, UrlPath(name): UrlPath<String>) -> Response {
    if !is_plain_name(&name) {
        return ApiErrorResponse::bad_request(format!("invalid file name '{name}'"));
    }
    let path = state.upload_dir.join(&name);
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let mime = mime_guess::from_path(&path).first_or_octet_stream();
            (
                [
                    (header::CONTENT_TYPE, mime.to_string()),
                    (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{name}\"")),
                ],
                bytes,
            )
                .into_response()
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            ApiErrorResponse::not_found(format!("file '{name}' not found"))
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read file");
            ApiErrorResponse::internal(format!("cannot read '{name}': {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_names() {
        assert!(is_plain_name("image_20240101_120000_000001.jpg"));
        assert!(!is_plain_name(".."));
        assert!(!is_plain_name("a/b.jpg"));
        assert!(!is_plain_name("a\\b.jpg"));
        assert!(!is_plain_name(""));
    }
}
