//! Mission Flow Integration Tests
//!
//! Drives one survey mission through the public library API: status texts
//! into the trigger controller, captures from the simulated camera, the
//! capture-directory watcher, the upload client against a loopback
//! receiver, and the ingestion gate with a counting pipeline.

use aerosurvey::config::{MissionConfig, UplinkConfig};
use aerosurvey::device::{CaptureDevice, SimulatedCamera};
use aerosurvey::ingest::{
    bind_listener, IngestionGate, MappingPipeline, PipelineError, PipelineOutcome, StatusBoard, UploadReceiver,
};
use aerosurvey::retry::RetryPolicy;
use aerosurvey::trigger::{MissionPatterns, TriggerController, TriggerOutcome};
use aerosurvey::types::{TaskKind, TriggerState};
use aerosurvey::uplink::{CaptureWatcher, UploadQueue, UploadStats, Uploader};

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const SOCKET_TIMEOUT: Duration = Duration::from_secs(5);

struct CountingPipeline {
    calls: AtomicUsize,
}

#[async_trait]
impl MappingPipeline for CountingPipeline {
    async fn run(&self, _dataset_dir: &Path) -> Result<PipelineOutcome, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(PipelineOutcome {
            exit_code: Some(0),
            success: true,
            duration: Duration::ZERO,
        })
    }

    fn name(&self) -> &str {
        "counting"
    }
}

struct Server {
    addr: String,
    receiver: Arc<UploadReceiver>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

async fn start_server(upload_dir: &Path, addr: &str) -> Server {
    let listener = bind_listener(addr).unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let receiver = Arc::new(UploadReceiver::new(
        upload_dir,
        SOCKET_TIMEOUT,
        Arc::new(StatusBoard::default()),
    ));
    let cancel = CancellationToken::new();
    let task = tokio::spawn(Arc::clone(&receiver).run(listener, cancel.clone()));
    Server {
        addr,
        receiver,
        cancel,
        task,
    }
}

impl Server {
    async fn stop(self) {
        self.cancel.cancel();
        self.task.await.unwrap();
    }
}

fn files_with_extension(dir: &Path, ext: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|e| e == ext))
        .collect();
    files.sort();
    files
}

/// Enqueue `paths` (plus the stop sentinel) and run the uploader to the end.
async fn upload_all(addr: &str, tasks: Vec<aerosurvey::UploadTask>, retry: RetryPolicy) -> UploadStats {
    let (queue, consumer) = UploadQueue::new();
    for task in tasks {
        queue.enqueue(task).unwrap();
    }
    queue.stop().unwrap();
    Uploader::new(addr, SOCKET_TIMEOUT, retry)
        .run(consumer, CancellationToken::new())
        .await
}

// ============================================================================
// End-to-end mission
// ============================================================================

#[tokio::test]
async fn mission_images_and_marker_reach_server_and_trigger_one_mapping_run() {
    let tmp = tempfile::tempdir().unwrap();
    let capture_dir = tmp.path().join("captures");
    let dataset_dir = tmp.path().join("project");
    let upload_dir = dataset_dir.join("images");
    std::fs::create_dir_all(&capture_dir).unwrap();
    std::fs::create_dir_all(&upload_dir).unwrap();

    // Trigger side: start capturing at waypoint 2, two shots, mission end.
    let patterns = MissionPatterns::from_config(&MissionConfig::default()).unwrap();
    let controller = TriggerController::new(patterns, &capture_dir);
    controller.set_device_ready(true);
    let mut camera = SimulatedCamera::new();
    camera.open_session().await.unwrap();

    let outcome = controller.on_status_text("Mission: 2 SetCamTrigDst");
    assert!(matches!(
        outcome,
        TriggerOutcome::Toggled { state: TriggerState::Capturing, .. }
    ));
    for _ in 0..2 {
        controller
            .capture_cycle(&mut camera, &capture_dir, 3, Duration::from_millis(1))
            .await
            .unwrap();
    }
    let outcome = controller.on_status_text("DigiCamCtrl");
    assert!(matches!(outcome, TriggerOutcome::MissionComplete { marker: Some(_) }));
    assert_eq!(controller.state(), TriggerState::Idle);

    // Upload side: the watcher sees two images, then the marker.
    let uplink = UplinkConfig {
        watch_dir: capture_dir.clone(),
        ..UplinkConfig::default()
    };
    let mut watcher = CaptureWatcher::new(&uplink, "flag");
    let tasks = watcher.scan().unwrap();
    let kinds: Vec<TaskKind> = tasks.iter().map(|t| t.kind).collect();
    assert_eq!(kinds, vec![TaskKind::Image, TaskKind::Image, TaskKind::Marker]);

    let server = start_server(&upload_dir, "127.0.0.1:0").await;
    let stats = upload_all(&server.addr, tasks, RetryPolicy::unbounded(Duration::from_millis(10))).await;
    assert_eq!(stats.images_sent, 2);
    assert_eq!(stats.markers_sent, 1);
    assert_eq!(stats.files_deleted, 3);

    // Batch delete: nothing left locally once the marker was delivered.
    assert!(files_with_extension(&capture_dir, "jpg").is_empty());
    assert!(files_with_extension(&capture_dir, "flag").is_empty());

    // Server side: two images and one marker stored.
    assert_eq!(files_with_extension(&upload_dir, "jpg").len(), 2);
    assert_eq!(files_with_extension(&upload_dir, "flag").len(), 1);
    assert_eq!(server.receiver.stats().files_received, 3);
    server.stop().await;

    let pipeline = Arc::new(CountingPipeline {
        calls: AtomicUsize::new(0),
    });
    let gate = IngestionGate::new(&upload_dir, "flag", pipeline.clone(), &dataset_dir);
    let report = gate.poll_once().await.unwrap();
    assert!(report.succeeded());
    assert_eq!(pipeline.calls.load(Ordering::SeqCst), 1);
    assert!(files_with_extension(&upload_dir, "flag").is_empty());
    assert_eq!(files_with_extension(&upload_dir, "jpg").len(), 2);
}

#[tokio::test]
async fn two_uploaded_markers_coalesce_into_one_mapping_run() {
    let tmp = tempfile::tempdir().unwrap();
    let capture_dir = tmp.path().join("captures");
    let upload_dir = tmp.path().join("images");
    std::fs::create_dir_all(&capture_dir).unwrap();
    std::fs::create_dir_all(&upload_dir).unwrap();

    let first = capture_dir.join("mission_completed_1.flag");
    let second = capture_dir.join("mission_completed_2.flag");
    std::fs::write(&first, b"").unwrap();
    std::fs::write(&second, b"").unwrap();

    let server = start_server(&upload_dir, "127.0.0.1:0").await;
    let stats = upload_all(
        &server.addr,
        vec![aerosurvey::UploadTask::marker(&first), aerosurvey::UploadTask::marker(&second)],
        RetryPolicy::unbounded(Duration::from_millis(10)),
    )
    .await;
    assert_eq!(stats.markers_sent, 2);
    server.stop().await;

    let pipeline = Arc::new(CountingPipeline {
        calls: AtomicUsize::new(0),
    });
    let gate = IngestionGate::new(&upload_dir, "flag", pipeline.clone(), tmp.path());
    let report = gate.poll_once().await.unwrap();
    assert_eq!(report.markers.len(), 2);
    assert!(gate.poll_once().await.is_none());
    assert_eq!(pipeline.calls.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Upload queue failure modes
// ============================================================================

#[tokio::test]
async fn upload_retries_until_server_comes_up() {
    let tmp = tempfile::tempdir().unwrap();
    let capture_dir = tmp.path().join("captures");
    let upload_dir = tmp.path().join("images");
    std::fs::create_dir_all(&capture_dir).unwrap();
    let image = capture_dir.join("2024-05-01_10-00-00.jpg");
    std::fs::write(&image, b"jpeg").unwrap();

    // Reserve a free port, then release it so the first attempts fail.
    let addr = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().to_string()
    };

    let client_addr = addr.clone();
    let client_image = image.clone();
    let client = tokio::spawn(async move {
        upload_all(
            &client_addr,
            vec![aerosurvey::UploadTask::image(&client_image)],
            RetryPolicy::unbounded(Duration::from_millis(50)),
        )
        .await
    });

    tokio::time::sleep(Duration::from_millis(300)).await;
    let server = start_server(&upload_dir, &addr).await;

    let stats = tokio::time::timeout(Duration::from_secs(10), client)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stats.images_sent, 1);
    assert!(stats.failed_attempts >= 1);
    // No marker yet: the image stays on disk.
    assert!(image.exists());
    assert_eq!(server.receiver.stats().files_received, 1);
    server.stop().await;
}

#[tokio::test]
async fn vanished_file_is_abandoned_and_queue_moves_on() {
    let tmp = tempfile::tempdir().unwrap();
    let capture_dir = tmp.path().join("captures");
    let upload_dir = tmp.path().join("images");
    std::fs::create_dir_all(&capture_dir).unwrap();
    let marker = capture_dir.join("mission_completed_1.flag");
    std::fs::write(&marker, b"").unwrap();

    let server = start_server(&upload_dir, "127.0.0.1:0").await;
    let stats = upload_all(
        &server.addr,
        vec![
            aerosurvey::UploadTask::image(capture_dir.join("gone.jpg")),
            aerosurvey::UploadTask::marker(&marker),
        ],
        RetryPolicy::unbounded(Duration::from_millis(10)),
    )
    .await;

    assert_eq!(stats.abandoned, 1);
    assert_eq!(stats.markers_sent, 1);
    assert!(!marker.exists());
    server.stop().await;
}
