//! Trigger state machine and capture cycle

use super::{marker, MissionPatterns, UNKNOWN_WAYPOINT};
use crate::device::{CaptureDevice, DeviceError};
use crate::storage::PartFile;
use crate::types::{CapturedAsset, MediaFile, TriggerState};
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum CaptureError {
    /// The shutter fired but no new file appeared within the verify budget.
    #[error("No new media file after {attempts} listing attempts")]
    NoNewAsset { attempts: u32 },

    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// What a status text did to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Trigger pattern matched and the state flipped
    Toggled { state: TriggerState, waypoint: String },
    /// Trigger pattern matched but the camera is not ready
    IgnoredNotReady { waypoint: String },
    /// Trigger repeated the last processed waypoint (dedupe enabled)
    DuplicateWaypoint { waypoint: String },
    /// Completion pattern matched; state forced Idle
    MissionComplete { marker: Option<PathBuf> },
    /// Completion pattern matched during a capture cycle; the marker is
    /// written once that cycle's image is saved
    MarkerDeferred,
    /// Neither pattern matched
    Unmatched,
}

/// Capture counters, reported on shutdown and in status reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStats {
    pub captured: u64,
    pub missed: u64,
    pub session_failures: u64,
    pub missions_completed: u64,
}

#[derive(Debug, Default)]
struct Inner {
    state: TriggerState,
    last_waypoint: Option<String>,
    cycle_active: bool,
    pending_markers: u32,
}

/// Held by the capture loop for the length of one capture cycle.
///
/// Completion markers requested while it is alive are written when it is
/// dropped, after the cycle's image has landed.
pub struct CycleGuard<'a> {
    controller: &'a TriggerController,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.controller.finish_cycle();
    }
}

/// Shared between the telemetry event loop and the capture loop.
///
/// State changes go through the mutex; readiness and counters are atomics so
/// the capture loop never blocks the event loop.
pub struct TriggerController {
    patterns: MissionPatterns,
    marker_dir: PathBuf,
    inner: Mutex<Inner>,
    device_ready: AtomicBool,
    captured: AtomicU64,
    missed: AtomicU64,
    session_failures: AtomicU64,
    missions_completed: AtomicU64,
}

impl TriggerController {
    pub fn new(patterns: MissionPatterns, marker_dir: impl Into<PathBuf>) -> Self {
        Self {
            patterns,
            marker_dir: marker_dir.into(),
            inner: Mutex::new(Inner::default()),
            device_ready: AtomicBool::new(false),
            captured: AtomicU64::new(0),
            missed: AtomicU64::new(0),
            session_failures: AtomicU64::new(0),
            missions_completed: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn state(&self) -> TriggerState {
        self.lock().state
    }

    pub fn is_capturing(&self) -> bool {
        self.state().is_capturing()
    }

    pub fn is_device_ready(&self) -> bool {
        self.device_ready.load(Ordering::Acquire)
    }

    pub fn set_device_ready(&self, ready: bool) {
        self.device_ready.store(ready, Ordering::Release);
    }

    pub fn marker_dir(&self) -> &Path {
        &self.marker_dir
    }

    /// React to one status text.
    ///
    /// The completion pattern wins when a text carries both.
    pub fn on_status_text(&self, text: &str) -> TriggerOutcome {
        if text.contains(&self.patterns.completion) {
            return self.complete_mission();
        }
        if !text.contains(&self.patterns.trigger) {
            return TriggerOutcome::Unmatched;
        }

        let waypoint_num = self.patterns.waypoint(text);
        let waypoint = waypoint_num.clone().unwrap_or_else(|| UNKNOWN_WAYPOINT.to_string());

        if !self.is_device_ready() {
            warn!(waypoint = %waypoint, "[Trigger] Trigger received but camera is not ready, ignoring");
            return TriggerOutcome::IgnoredNotReady { waypoint };
        }

        let mut inner = self.lock();
        if self.patterns.dedupe_waypoints
            && waypoint_num.is_some()
            && inner.last_waypoint == waypoint_num
        {
            info!(waypoint = %waypoint, "[Trigger] Repeated trigger for processed waypoint, ignoring");
            return TriggerOutcome::DuplicateWaypoint { waypoint };
        }

        inner.state = inner.state.toggled();
        inner.last_waypoint = waypoint_num;
        let state = inner.state;
        drop(inner);

        if state.is_capturing() {
            info!(waypoint = %waypoint, "[Trigger] STARTING photo capture (waypoint #{})", waypoint);
        } else {
            info!(waypoint = %waypoint, "[Trigger] STOPPING photo capture (waypoint #{})", waypoint);
        }
        TriggerOutcome::Toggled { state, waypoint }
    }

    fn complete_mission(&self) -> TriggerOutcome {
        let deferred = {
            let mut inner = self.lock();
            if inner.state.is_capturing() {
                info!("[Trigger] STOPPING photo capture, mission complete");
            }
            inner.state = TriggerState::Idle;
            inner.last_waypoint = None;
            if inner.cycle_active {
                inner.pending_markers += 1;
            }
            inner.cycle_active
        };
        self.missions_completed.fetch_add(1, Ordering::Relaxed);

        if deferred {
            info!("[Trigger] Mission complete, marker follows the capture in flight");
            return TriggerOutcome::MarkerDeferred;
        }
        info!("[Trigger] Mission complete");
        TriggerOutcome::MissionComplete {
            marker: self.write_marker(),
        }
    }

    fn write_marker(&self) -> Option<PathBuf> {
        match marker::create_completion_marker(&self.marker_dir, &self.patterns.marker_extension) {
            Ok(path) => {
                info!(path = %path.display(), "[Trigger] Created completion marker");
                Some(path)
            }
            Err(e) => {
                error!(dir = %self.marker_dir.display(), error = %e, "[Trigger] Failed to create completion marker");
                None
            }
        }
    }

    /// Start a capture cycle if the controller is capturing.
    ///
    /// Returns `None` while Idle or while another cycle is running.
    pub fn begin_cycle(&self) -> Option<CycleGuard<'_>> {
        let mut inner = self.lock();
        if !inner.state.is_capturing() || inner.cycle_active {
            return None;
        }
        inner.cycle_active = true;
        Some(CycleGuard { controller: self })
    }

    fn finish_cycle(&self) {
        let pending = {
            let mut inner = self.lock();
            inner.cycle_active = false;
            std::mem::take(&mut inner.pending_markers)
        };
        for _ in 0..pending {
            self.write_marker();
        }
    }

    /// One shutter-and-verify attempt.
    ///
    /// Snapshots the listing, fires the shutter, then polls the listing up to
    /// `verify_attempts` times. The first new file is downloaded into
    /// `output_dir`. No retry of the same shot happens here.
    pub async fn capture_cycle(
        &self,
        device: &mut dyn CaptureDevice,
        output_dir: &Path,
        verify_attempts: u32,
        verify_interval: Duration,
    ) -> Result<CapturedAsset, CaptureError> {
        let before = device.list_media().await?;
        device.trigger_shutter().await?;

        for _ in 0..verify_attempts {
            tokio::time::sleep(verify_interval).await;
            let after = device.list_media().await?;
            // Newest name wins if several files appeared at once
            if let Some(new_file) = after.difference(&before).max() {
                return self.download(device, new_file, output_dir).await;
            }
        }

        Err(CaptureError::NoNewAsset {
            attempts: verify_attempts,
        })
    }

    async fn download(
        &self,
        device: &mut dyn CaptureDevice,
        file: &MediaFile,
        output_dir: &Path,
    ) -> Result<CapturedAsset, CaptureError> {
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(DeviceError::Io)?;
        let remote_extension = file.extension();
        let target = asset_path(output_dir, Local::now(), &remote_extension);
        let (part, handle) = PartFile::for_path(&target).await.map_err(DeviceError::Io)?;
        drop(handle);
        info!(file = %file, dest = %target.display(), "[Trigger] Downloading capture");
        // The .part name keeps the watcher away until the transfer is whole
        let bytes = device.download(file, part.part_path()).await?;
        let local_path = part.commit().await.map_err(DeviceError::Io)?;
        info!(path = %local_path.display(), bytes = bytes, "[Trigger] Capture saved");
        Ok(CapturedAsset {
            local_path,
            remote_extension,
            created_at: Utc::now(),
        })
    }

    pub fn record_capture(&self) {
        self.captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.missed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_failure(&self) {
        self.session_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn capture_stats(&self) -> CaptureStats {
        CaptureStats {
            captured: self.captured.load(Ordering::Relaxed),
            missed: self.missed.load(Ordering::Relaxed),
            session_failures: self.session_failures.load(Ordering::Relaxed),
            missions_completed: self.missions_completed.load(Ordering::Relaxed),
        }
    }
}

/// `<YYYY-mm-dd_HH-MM-SS><.ext>` in `dir`, with `_N` appended while the name
/// is taken so an undelivered capture is never overwritten.
pub fn asset_path(dir: &Path, now: DateTime<Local>, extension: &str) -> PathBuf {
    let stem = now.format("%Y-%m-%d_%H-%M-%S").to_string();
    let ext = extension.to_ascii_lowercase();
    let mut candidate = dir.join(format!("{stem}{ext}"));
    let mut n = 1u32;
    while candidate.exists() {
        candidate = dir.join(format!("{stem}_{n}{ext}"));
        n += 1;
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MissionConfig;
    use crate::device::SimulatedCamera;
    use chrono::TimeZone;

    const TRIGGER: &str = "Mission: 3 SetCamTrigDst";
    const COMPLETE: &str = "Mission: 9 DigiCamCtrl";

    fn controller(dir: &Path) -> TriggerController {
        let patterns = MissionPatterns::from_config(&MissionConfig::default()).unwrap();
        TriggerController::new(patterns, dir)
    }

    fn marker_count(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .path()
                    .extension()
                    .is_some_and(|x| x == "flag")
            })
            .count()
    }

    #[test]
    fn test_toggle_parity_when_ready() {
        let tmp = tempfile::tempdir().unwrap();
        let ctl = controller(tmp.path());
        ctl.set_device_ready(true);
        for n in 1..=6 {
            ctl.on_status_text(TRIGGER);
            assert_eq!(ctl.is_capturing(), n % 2 == 1, "after {n} triggers");
        }
    }

    #[test]
    fn test_trigger_ignored_when_device_not_ready() {
        let tmp = tempfile::tempdir().unwrap();
        let ctl = controller(tmp.path());
        let outcome = ctl.on_status_text(TRIGGER);
        assert_eq!(
            outcome,
            TriggerOutcome::IgnoredNotReady {
                waypoint: "3".into()
            }
        );
        assert!(!ctl.is_capturing());
    }

    #[test]
    fn test_waypoint_missing_reports_na() {
        let tmp = tempfile::tempdir().unwrap();
        let ctl = controller(tmp.path());
        ctl.set_device_ready(true);
        match ctl.on_status_text("SetCamTrigDst") {
            TriggerOutcome::Toggled { waypoint, .. } => assert_eq!(waypoint, "N/A"),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_completion_forces_idle_and_writes_one_marker() {
        for start_capturing in [false, true] {
            let tmp = tempfile::tempdir().unwrap();
            let ctl = controller(tmp.path());
            ctl.set_device_ready(true);
            if start_capturing {
                ctl.on_status_text(TRIGGER);
                assert!(ctl.is_capturing());
            }

            let outcome = ctl.on_status_text(COMPLETE);
            assert!(matches!(outcome, TriggerOutcome::MissionComplete { marker: Some(_) }));
            assert_eq!(ctl.state(), TriggerState::Idle);
            assert_eq!(marker_count(tmp.path()), 1);
        }
    }

    #[test]
    fn test_unrelated_text_is_unmatched() {
        let tmp = tempfile::tempdir().unwrap();
        let ctl = controller(tmp.path());
        ctl.set_device_ready(true);
        assert_eq!(ctl.on_status_text("EKF3 IMU0 is using GPS"), TriggerOutcome::Unmatched);
        assert!(!ctl.is_capturing());
    }

    #[test]
    fn test_duplicate_waypoints_toggle_without_dedupe() {
        let tmp = tempfile::tempdir().unwrap();
        let ctl = controller(tmp.path());
        ctl.set_device_ready(true);
        ctl.on_status_text(TRIGGER);
        ctl.on_status_text(TRIGGER);
        assert!(!ctl.is_capturing());
    }

    #[test]
    fn test_dedupe_skips_repeated_waypoint_until_mission_end() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = MissionConfig::default();
        config.dedupe_waypoints = true;
        let ctl = TriggerController::new(MissionPatterns::from_config(&config).unwrap(), tmp.path());
        ctl.set_device_ready(true);

        ctl.on_status_text(TRIGGER);
        assert!(matches!(
            ctl.on_status_text(TRIGGER),
            TriggerOutcome::DuplicateWaypoint { .. }
        ));
        assert!(ctl.is_capturing());

        ctl.on_status_text("Mission: 4 SetCamTrigDst");
        assert!(!ctl.is_capturing());

        ctl.on_status_text(COMPLETE);
        ctl.on_status_text("Mission: 4 SetCamTrigDst");
        assert!(ctl.is_capturing(), "waypoint memory resets after completion");
    }

    #[test]
    fn test_asset_path_collision_suffix() {
        let tmp = tempfile::tempdir().unwrap();
        let t = Local.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let first = asset_path(tmp.path(), t, ".JPG");
        assert_eq!(first.file_name().unwrap(), "2024-01-01_00-00-00.jpg");
        std::fs::write(&first, b"x").unwrap();
        let second = asset_path(tmp.path(), t, ".JPG");
        assert_eq!(second.file_name().unwrap(), "2024-01-01_00-00-00_1.jpg");
    }

    #[tokio::test]
    async fn test_capture_cycle_downloads_new_file() {
        let tmp = tempfile::tempdir().unwrap();
        let ctl = controller(tmp.path());
        let mut cam = SimulatedCamera::new();
        cam.open_session().await.unwrap();

        let asset = ctl
            .capture_cycle(&mut cam, tmp.path(), 5, Duration::ZERO)
            .await
            .unwrap();
        assert!(asset.local_path.exists());
        assert_eq!(asset.remote_extension, ".JPG");
        assert_eq!(asset.local_path.extension().unwrap(), "jpg");
    }

    #[tokio::test]
    async fn test_capture_cycle_without_new_file_is_no_new_asset() {
        let tmp = tempfile::tempdir().unwrap();
        let ctl = controller(tmp.path());
        let mut cam = SimulatedCamera::new().with_dud_shots(1);
        cam.open_session().await.unwrap();

        let err = ctl
            .capture_cycle(&mut cam, tmp.path(), 3, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::NoNewAsset { attempts: 3 }));
    }

    #[tokio::test]
    async fn test_interrupted_download_leaves_nothing_behind() {
        let tmp = tempfile::tempdir().unwrap();
        let ctl = controller(tmp.path());
        let mut cam = SimulatedCamera::new().with_interrupted_downloads(1);
        cam.open_session().await.unwrap();

        let err = ctl
            .capture_cycle(&mut cam, tmp.path(), 3, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::Device(DeviceError::Protocol(_))));
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_completion_during_cycle_defers_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let ctl = controller(tmp.path());
        ctl.set_device_ready(true);
        assert!(ctl.begin_cycle().is_none(), "no cycle while idle");

        ctl.on_status_text(TRIGGER);
        let cycle = ctl.begin_cycle().unwrap();
        assert!(ctl.begin_cycle().is_none(), "one cycle at a time");

        assert_eq!(ctl.on_status_text(COMPLETE), TriggerOutcome::MarkerDeferred);
        assert!(!ctl.is_capturing());
        assert_eq!(marker_count(tmp.path()), 0);

        drop(cycle);
        assert_eq!(marker_count(tmp.path()), 1);
        assert_eq!(ctl.capture_stats().missions_completed, 1);
    }

    #[tokio::test]
    async fn test_capture_cycle_device_error_propagates() {
        let tmp = tempfile::tempdir().unwrap();
        let ctl = controller(tmp.path());
        let mut cam = SimulatedCamera::new();
        let err = ctl
            .capture_cycle(&mut cam, tmp.path(), 3, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::Device(DeviceError::NotOpen)));
    }
}
