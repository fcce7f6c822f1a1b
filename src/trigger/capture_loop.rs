//! Capture loop: device session ownership, shooting and reconnection.

use super::{sleep_or_cancel, CaptureError, TriggerController};
use crate::config::CameraConfig;
use crate::device::{CaptureDevice, DeviceError};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Timing and location knobs of the capture loop.
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub output_dir: PathBuf,
    pub idle_poll: Duration,
    pub inter_shot_delay: Duration,
    pub verify_attempts: u32,
    pub verify_interval: Duration,
    pub reconnect_delay: Duration,
}

impl CaptureSettings {
    pub fn from_config(config: &CameraConfig) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
            idle_poll: config.idle_poll(),
            inter_shot_delay: config.inter_shot_delay(),
            verify_attempts: config.verify_attempts,
            verify_interval: config.verify_interval(),
            reconnect_delay: config.reconnect_delay(),
        }
    }
}

pub struct CaptureLoop {
    controller: Arc<TriggerController>,
    device: Box<dyn CaptureDevice>,
    settings: CaptureSettings,
}

impl CaptureLoop {
    pub fn new(
        controller: Arc<TriggerController>,
        device: Box<dyn CaptureDevice>,
        settings: CaptureSettings,
    ) -> Self {
        Self {
            controller,
            device,
            settings,
        }
    }

    async fn open_session(&mut self) -> Result<(), DeviceError> {
        self.device.open_session().await?;
        self.device.set_photo_mode().await?;
        Ok(())
    }

    /// Run until cancelled.
    ///
    /// A capture cycle that is already running when the state flips to Idle
    /// (or shutdown is requested) completes before the flag is looked at
    /// again. A completion marker requested meanwhile is written after that
    /// cycle's image is saved.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(device = self.device.name(), "[CaptureLoop] Starting");
        let controller = Arc::clone(&self.controller);

        'session: loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.open_session().await {
                Ok(()) => {
                    self.controller.set_device_ready(true);
                    info!(device = self.device.name(), "[CaptureLoop] Camera ready in photo mode");
                }
                Err(e) => {
                    self.controller.set_device_ready(false);
                    self.controller.record_session_failure();
                    warn!(error = %e, delay = ?self.settings.reconnect_delay, "[CaptureLoop] Camera session failed, retrying");
                    self.device.close_session().await;
                    if !sleep_or_cancel(self.settings.reconnect_delay, &cancel).await {
                        break;
                    }
                    continue;
                }
            }

            loop {
                if cancel.is_cancelled() {
                    break 'session;
                }

                let Some(cycle) = controller.begin_cycle() else {
                    if !sleep_or_cancel(self.settings.idle_poll, &cancel).await {
                        break 'session;
                    }
                    continue;
                };

                let result = controller
                    .capture_cycle(
                        self.device.as_mut(),
                        &self.settings.output_dir,
                        self.settings.verify_attempts,
                        self.settings.verify_interval,
                    )
                    .await;
                drop(cycle);

                match result {
                    Ok(_) => {
                        self.controller.record_capture();
                        if !sleep_or_cancel(self.settings.inter_shot_delay, &cancel).await {
                            break 'session;
                        }
                    }
                    Err(CaptureError::NoNewAsset { attempts }) => {
                        self.controller.record_miss();
                        warn!(attempts = attempts, "[CaptureLoop] Could not find new photo after capture");
                    }
                    Err(CaptureError::Device(e)) => {
                        self.controller.set_device_ready(false);
                        self.controller.record_session_failure();
                        warn!(error = %e, delay = ?self.settings.reconnect_delay, "[CaptureLoop] Camera error, reconnecting");
                        self.device.close_session().await;
                        if !sleep_or_cancel(self.settings.reconnect_delay, &cancel).await {
                            break 'session;
                        }
                        continue 'session;
                    }
                }
            }
        }

        self.controller.set_device_ready(false);
        self.device.close_session().await;
        info!("[CaptureLoop] Stopped");
    }
}
