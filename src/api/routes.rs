//! API route definitions
//!
//! - /api/v1/status - gate phase, batch count, client status reports
//! - /api/v1/files - files in the upload directory
//! - /api/v1/files/:name - download one file

use axum::{routing::get, Router};

use super::handlers::{self, AppState};

pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/status", get(handlers::get_status))
        .route("/files", get(handlers::list_files))
        .route("/files/:name", get(handlers::download_file))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{ExternalScript, IngestionGate, StatusBoard};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use std::path::Path;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn create_test_state(dir: &Path) -> AppState {
        let gate = IngestionGate::new(dir, "flag", Arc::new(ExternalScript::new("./run_mapping.sh")), dir);
        AppState {
            upload_dir: dir.to_path_buf(),
            gate: Arc::new(gate),
            statuses: Arc::new(StatusBoard::default()),
        }
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_status_reports_gate_phase() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("image_1.jpg"), b"x").unwrap();
        let (status, v) = get_json(api_routes(create_test_state(tmp.path())), "/status").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(v["data"]["gate"]["phase"], "no_marker");
        assert_eq!(v["data"]["files"], 1);
    }

    #[tokio::test]
    async fn test_list_files_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("b.jpg"), b"bb").unwrap();
        std::fs::write(tmp.path().join("a.jpg"), b"a").unwrap();
        std::fs::create_dir(tmp.path().join("subdir")).unwrap();
        let (status, v) = get_json(api_routes(create_test_state(tmp.path())), "/files").await;

        assert_eq!(status, StatusCode::OK);
        let files = v["data"].as_array().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0]["name"], "a.jpg");
        assert_eq!(files[1]["size"], 2);
    }

    #[tokio::test]
    async fn test_download_sets_content_type() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.jpg"), b"jpeg").unwrap();
        let response = api_routes(create_test_state(tmp.path()))
            .oneshot(Request::builder().uri("/files/a.jpg").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"jpeg");
    }

    #[tokio::test]
    async fn test_download_missing_is_404() {
        let tmp = tempfile::tempdir().unwrap();
        let (status, v) = get_json(api_routes(create_test_state(tmp.path())), "/files/nope.jpg").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(v["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_download_dotdot_is_400() {
        let tmp = tempfile::tempdir().unwrap();
        let (status, _) = get_json(api_routes(create_test_state(tmp.path())), "/files/..").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
