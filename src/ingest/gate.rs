//! Ingestion gate
//!
//! Polls the upload directory for completion markers. When one or more are
//! present the mapping pipeline runs once over the dataset, then every
//! marker seen at detection time is deleted whatever the exit code. Markers
//! that arrive while the pipeline runs are picked up by the next poll and
//! coalesce into one batch.

use super::forwarder::{ForwardError, Forwarder};
use super::pipeline::{MappingPipeline, PipelineOutcome};
use crate::storage::PART_SUFFIX;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GatePhase {
    #[default]
    NoMarker,
    MarkerSeen,
    Processing,
}

/// What happened to one batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch: u64,
    pub markers: Vec<PathBuf>,
    pub outcome: Option<PipelineOutcome>,
    /// Set when the pipeline could not be run at all
    pub error: Option<String>,
    pub forwarded: usize,
    pub forward_failures: usize,
    pub cleaned_up: bool,
    pub finished_at: DateTime<Utc>,
}

impl BatchReport {
    pub fn succeeded(&self) -> bool {
        self.outcome.as_ref().is_some_and(|o| o.success)
    }
}

/// Read-only view for the API.
#[derive(Debug, Clone, Serialize)]
pub struct GateSnapshot {
    pub phase: GatePhase,
    pub batches_completed: u64,
    pub last_batch: Option<BatchReport>,
}

#[derive(Default)]
struct GateState {
    phase: GatePhase,
    last_batch: Option<BatchReport>,
}

pub struct IngestionGate {
    upload_dir: PathBuf,
    marker_extension: String,
    pipeline: Arc<dyn MappingPipeline>,
    dataset_dir: PathBuf,
    forwarder: Option<Forwarder>,
    artifacts: Vec<PathBuf>,
    cleanup_dataset: bool,
    state: Mutex<GateState>,
    batches: AtomicU64,
    running: tokio::sync::Mutex<()>,
}

impl IngestionGate {
    pub fn new(
        upload_dir: impl Into<PathBuf>,
        marker_extension: impl Into<String>,
        pipeline: Arc<dyn MappingPipeline>,
        dataset_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            marker_extension: marker_extension.into(),
            pipeline,
            dataset_dir: dataset_dir.into(),
            forwarder: None,
            artifacts: Vec::new(),
            cleanup_dataset: false,
            state: Mutex::new(GateState::default()),
            batches: AtomicU64::new(0),
            running: tokio::sync::Mutex::new(()),
        }
    }

    /// Forward `artifacts` (relative to the dataset directory) after every
    /// successful mapping run.
    pub fn with_forwarding(mut self, forwarder: Forwarder, artifacts: Vec<PathBuf>) -> Self {
        self.forwarder = Some(forwarder);
        self.artifacts = artifacts;
        self
    }

    /// Remove the dataset directory once every artifact was forwarded.
    pub fn with_cleanup(mut self, cleanup: bool) -> Self {
        self.cleanup_dataset = cleanup;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn set_phase(&self, phase: GatePhase) {
        let mut state = self.lock();
        if state.phase != phase {
            debug!(from = ?state.phase, to = ?phase, "[Gate] Phase change");
            state.phase = phase;
        }
    }

    pub fn phase(&self) -> GatePhase {
        self.lock().phase
    }

    pub fn snapshot(&self) -> GateSnapshot {
        let state = self.lock();
        GateSnapshot {
            phase: state.phase,
            batches_completed: self.batches.load(Ordering::Relaxed),
            last_batch: state.last_batch.clone(),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Marker files currently in the upload directory, sorted by name.
    pub fn scan_markers(&self) -> std::io::Result<Vec<PathBuf>> {
        let entries = match std::fs::read_dir(&self.upload_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut markers = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().to_ascii_lowercase())
                .unwrap_or_default();
            if ext == PART_SUFFIX {
                continue;
            }
            if ext.eq_ignore_ascii_case(&self.marker_extension) {
                markers.push(path);
            }
        }
        markers.sort();
        Ok(markers)
    }

    /// One gate cycle. Returns the batch report when the pipeline ran.
    ///
    /// A call while another cycle is processing returns `None` without
    /// scanning.
    pub async fn poll_once(&self) -> Option<BatchReport> {
        let Ok(_running) = self.running.try_lock() else {
            debug!("[Gate] Processing in progress, deferring scan");
            return None;
        };

        let markers = match self.scan_markers() {
            Ok(m) => m,
            Err(e) => {
                warn!(dir = %self.upload_dir.display(), error = %e, "[Gate] Marker scan failed");
                return None;
            }
        };
        if markers.is_empty() {
            self.set_phase(GatePhase::NoMarker);
            return None;
        }

        self.set_phase(GatePhase::MarkerSeen);
        let batch = self.batches.load(Ordering::Relaxed) + 1;
        info!(batch = batch, markers = markers.len(), "[Gate] Completion marker detected, starting mapping");

        self.set_phase(GatePhase::Processing);
        let (outcome, run_error) = match self.pipeline.run(&self.dataset_dir).await {
            Ok(outcome) => (Some(outcome), None),
            Err(e) => {
                error!(pipeline = self.pipeline.name(), error = %e, "[Gate] Mapping process could not run");
                (None, Some(e.to_string()))
            }
        };

        for marker in &markers {
            match std::fs::remove_file(marker) {
                Ok(()) => debug!(marker = %marker.display(), "[Gate] Marker cleared"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(marker = %marker.display(), error = %e, "[Gate] Failed to clear marker"),
            }
        }

        let mut report = BatchReport {
            batch,
            markers,
            outcome,
            error: run_error,
            forwarded: 0,
            forward_failures: 0,
            cleaned_up: false,
            finished_at: Utc::now(),
        };

        if report.succeeded() {
            info!(batch = batch, "[Gate] Mapping completed successfully");
            self.forward_artifacts(&mut report).await;
            if self.cleanup_dataset && report.forward_failures == 0 {
                report.cleaned_up = self.cleanup();
            }
        } else {
            warn!(batch = batch, "[Gate] Mapping failed, markers cleared without retry");
        }

        report.finished_at = Utc::now();
        self.batches.store(batch, Ordering::Relaxed);
        {
            let mut state = self.lock();
            state.last_batch = Some(report.clone());
        }
        self.set_phase(GatePhase::NoMarker);
        Some(report)
    }

    async fn forward_artifacts(&self, report: &mut BatchReport) {
        let Some(forwarder) = &self.forwarder else {
            return;
        };
        // Forwarding is not interrupted by shutdown; run() stops before the
        // next batch instead.
        let never = CancellationToken::new();
        for artifact in &self.artifacts {
            let path = self.dataset_dir.join(artifact);
            match forwarder.forward(&path, &never).await {
                Ok(_) => report.forwarded += 1,
                Err(ForwardError::Missing(p)) => {
                    warn!(path = %p.display(), "[Gate] Expected artifact missing");
                    report.forward_failures += 1;
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "[Gate] Artifact left in place");
                    report.forward_failures += 1;
                }
            }
        }
    }

    fn cleanup(&self) -> bool {
        if let Err(e) = std::fs::remove_dir_all(&self.dataset_dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(dir = %self.dataset_dir.display(), error = %e, "[Gate] Dataset cleanup failed");
                return false;
            }
        }
        if let Err(e) = std::fs::create_dir_all(&self.upload_dir) {
            warn!(dir = %self.upload_dir.display(), error = %e, "[Gate] Failed to recreate upload directory");
            return false;
        }
        info!(dir = %self.dataset_dir.display(), "[Gate] Dataset directory cleaned up");
        true
    }

    /// Poll every `interval` until cancelled.
    ///
    /// Cancellation during a run kills the mapping process and leaves its
    /// markers for the next start.
    pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        info!(
            dir = %self.upload_dir.display(),
            marker = %self.marker_extension,
            pipeline = self.pipeline.name(),
            "[Gate] Watching for completion markers"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                report = self.poll_once() => {
                    if let Some(report) = report {
                        info!(
                            batch = report.batch,
                            success = report.succeeded(),
                            forwarded = report.forwarded,
                            forward_failures = report.forward_failures,
                            "[Gate] Batch finished"
                        );
                    }
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        if self.phase() == GatePhase::Processing {
            warn!("[Gate] Shutdown interrupted a mapping run, markers kept");
        }
        self.set_phase(GatePhase::NoMarker);
        info!("[Gate] Stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::pipeline::PipelineError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Counts invocations; optionally drops a marker mid-run.
    struct FakePipeline {
        calls: AtomicUsize,
        exit_code: i32,
        drop_marker_during_run: Option<PathBuf>,
    }

    impl FakePipeline {
        fn new(exit_code: i32) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                exit_code,
                drop_marker_during_run: None,
            }
        }
    }

    #[async_trait]
    impl MappingPipeline for FakePipeline {
        async fn run(&self, dataset_dir: &Path) -> Result<PipelineOutcome, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(p) = &self.drop_marker_during_run {
                std::fs::write(p, b"").unwrap();
            }
            if self.exit_code == 0 {
                std::fs::create_dir_all(dataset_dir.join("odm_orthophoto")).unwrap();
                std::fs::write(dataset_dir.join("odm_orthophoto/odm_orthophoto.tif"), b"tif").unwrap();
            }
            Ok(PipelineOutcome {
                exit_code: Some(self.exit_code),
                success: self.exit_code == 0,
                duration: Duration::ZERO,
            })
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    fn layout() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let dataset = tmp.path().join("project");
        let uploads = dataset.join("images");
        std::fs::create_dir_all(&uploads).unwrap();
        (tmp, dataset, uploads)
    }

    #[tokio::test]
    async fn test_no_marker_no_invocation() {
        let (_tmp, dataset, uploads) = layout();
        std::fs::write(uploads.join("image_1.jpg"), b"x").unwrap();
        let pipeline = Arc::new(FakePipeline::new(0));
        let gate = IngestionGate::new(&uploads, "flag", pipeline.clone(), &dataset);

        assert!(gate.poll_once().await.is_none());
        assert_eq!(pipeline.calls.load(Ordering::SeqCst), 0);
        assert_eq!(gate.phase(), GatePhase::NoMarker);
    }

    #[tokio::test]
    async fn test_two_markers_one_invocation() {
        let (_tmp, dataset, uploads) = layout();
        std::fs::write(uploads.join("image_1.flag"), b"").unwrap();
        std::fs::write(uploads.join("image_2.flag"), b"").unwrap();
        let pipeline = Arc::new(FakePipeline::new(0));
        let gate = IngestionGate::new(&uploads, "flag", pipeline.clone(), &dataset);

        let report = gate.poll_once().await.unwrap();
        assert_eq!(report.markers.len(), 2);
        assert_eq!(pipeline.calls.load(Ordering::SeqCst), 1);
        assert!(gate.scan_markers().unwrap().is_empty());
        assert!(gate.poll_once().await.is_none());
        assert_eq!(pipeline.calls.load(Ordering::SeqCst), 1);
        assert_eq!(gate.snapshot().batches_completed, 1);
    }

    #[tokio::test]
    async fn test_failed_run_still_clears_markers() {
        let (_tmp, dataset, uploads) = layout();
        std::fs::write(uploads.join("m.flag"), b"").unwrap();
        let pipeline = Arc::new(FakePipeline::new(1));
        let gate = IngestionGate::new(&uploads, "flag", pipeline.clone(), &dataset);

        let report = gate.poll_once().await.unwrap();
        assert!(!report.succeeded());
        assert!(!uploads.join("m.flag").exists());
        assert!(gate.poll_once().await.is_none());
    }

    #[tokio::test]
    async fn test_marker_arriving_during_run_is_next_batch() {
        let (_tmp, dataset, uploads) = layout();
        std::fs::write(uploads.join("a.flag"), b"").unwrap();
        let mut fake = FakePipeline::new(0);
        fake.drop_marker_during_run = Some(uploads.join("b.flag"));
        let pipeline = Arc::new(fake);
        let gate = IngestionGate::new(&uploads, "flag", pipeline.clone(), &dataset);

        let first = gate.poll_once().await.unwrap();
        assert_eq!(first.markers, vec![uploads.join("a.flag")]);
        assert!(uploads.join("b.flag").exists());

        let second = gate.poll_once().await.unwrap();
        assert_eq!(second.batch, 2);
        assert_eq!(pipeline.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_part_files_are_not_markers() {
        let (_tmp, dataset, uploads) = layout();
        std::fs::write(uploads.join("image_1.flag.part"), b"").unwrap();
        let gate = IngestionGate::new(&uploads, "flag", Arc::new(FakePipeline::new(0)), &dataset);
        assert!(gate.scan_markers().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_skipped_when_forward_fails() {
        let (_tmp, dataset, uploads) = layout();
        std::fs::write(uploads.join("m.flag"), b"").unwrap();
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let forwarder = Forwarder::new(
            format!("127.0.0.1:{port}"),
            crate::retry::RetryPolicy::bounded(2, Duration::ZERO),
            Duration::from_millis(200),
        );
        let gate = IngestionGate::new(&uploads, "flag", Arc::new(FakePipeline::new(0)), &dataset)
            .with_forwarding(forwarder, vec![PathBuf::from("odm_orthophoto/odm_orthophoto.tif")])
            .with_cleanup(true);

        let report = gate.poll_once().await.unwrap();
        assert_eq!(report.forward_failures, 1);
        assert!(!report.cleaned_up);
        assert!(dataset.join("odm_orthophoto/odm_orthophoto.tif").exists());
    }

    #[tokio::test]
    async fn test_cleanup_without_forwarding_recreates_upload_dir() {
        let (_tmp, dataset, uploads) = layout();
        std::fs::write(uploads.join("image_1.jpg"), b"x").unwrap();
        std::fs::write(uploads.join("m.flag"), b"").unwrap();
        let gate = IngestionGate::new(&uploads, "flag", Arc::new(FakePipeline::new(0)), &dataset)
            .with_cleanup(true);

        let report = gate.poll_once().await.unwrap();
        assert!(report.cleaned_up);
        assert!(uploads.is_dir());
        assert_eq!(std::fs::read_dir(&uploads).unwrap().count(), 0);
    }
}
