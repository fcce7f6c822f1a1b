//! API Regression Tests
//!
//! In-process tests that build the Axum app via `create_app()` and exercise
//! all /api/v1/* endpoints using `tower::ServiceExt::oneshot()`.
//! No network port is bound.

use aerosurvey::api::{create_app, AppState};
use aerosurvey::ingest::{ExternalScript, IngestionGate, StatusBoard};
use aerosurvey::uplink::StatusReport;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tower::ServiceExt;

fn create_test_state(dir: &Path, statuses: Arc<StatusBoard>) -> AppState {
    let gate = IngestionGate::new(dir, "flag", Arc::new(ExternalScript::new("./run_mapping.sh")), dir);
    AppState {
        upload_dir: dir.to_path_buf(),
        gate: Arc::new(gate),
        statuses,
    }
}

async fn get(app: axum::Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

#[tokio::test]
async fn status_includes_client_reports() {
    let tmp = tempfile::tempdir().unwrap();
    let board = Arc::new(StatusBoard::default());
    board
        .update(StatusReport {
            source: "trigger-C3501325004565".into(),
            telemetry_connected: true,
            camera_ready: false,
            capturing: false,
            captured: 12,
            timestamp: Utc::now(),
        })
        .await;

    let (status, body) = get(create_app(create_test_state(tmp.path(), board)), "/api/v1/status").await;
    assert_eq!(status, StatusCode::OK);
    let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["data"]["clients"][0]["captured"], 12);
    assert_eq!(v["data"]["gate"]["batches_completed"], 0);
    assert_eq!(v["meta"]["version"], "1");
}

#[tokio::test]
async fn files_listing_and_download() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("image_20240501_100000_000001.jpg"), b"jpeg").unwrap();
    let app = create_app(create_test_state(tmp.path(), Arc::new(StatusBoard::default())));

    let (status, body) = get(app.clone(), "/api/v1/files").await;
    assert_eq!(status, StatusCode::OK);
    let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["data"][0]["name"], "image_20240501_100000_000001.jpg");

    let (status, body) = get(app, "/api/v1/files/image_20240501_100000_000001.jpg").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"jpeg");
}

#[tokio::test]
async fn unknown_route_is_404() {
    let tmp = tempfile::tempdir().unwrap();
    let app = create_app(create_test_state(tmp.path(), Arc::new(StatusBoard::default())));
    let (status, _) = get(app, "/api/v1/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
