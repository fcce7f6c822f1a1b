//! Simulated camera
//!
//! Behaves like a camera whose shutter always produces a new file that
//! shows up on the next listing. An optional failure rate makes session
//! calls fail at random so the reconnect path gets exercised on the bench.

use super::{CaptureDevice, DeviceError};
use crate::types::MediaFile;
use async_trait::async_trait;
use rand::Rng;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

const SIM_FOLDER: &str = "100GOPRO";

/// Bytes written for every downloaded simulated photo (a JPEG SOI/EOI pair
/// around a short comment so viewers do not choke on it).
const PLACEHOLDER_JPEG: &[u8] = b"\xFF\xD8\xFF\xFE\x00\x10aerosurvey sim\xFF\xD9";

pub struct SimulatedCamera {
    media: BTreeSet<MediaFile>,
    next_index: u32,
    open: bool,
    failure_rate: f64,
    /// Shutter presses that do not produce a file (test hook)
    dud_shots: u32,
    /// Downloads that stop halfway with an error (test hook)
    interrupted_downloads: u32,
    download_delay: Duration,
}

impl SimulatedCamera {
    /// Camera seeded with one existing photo, `GOPR0001.JPG`.
    pub fn new() -> Self {
        let mut media = BTreeSet::new();
        media.insert(MediaFile::new(SIM_FOLDER, "GOPR0001.JPG"));
        Self {
            media,
            next_index: 2,
            open: false,
            failure_rate: 0.0,
            dud_shots: 0,
            interrupted_downloads: 0,
            download_delay: Duration::ZERO,
        }
    }

    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Make the next `n` shutter presses succeed without adding a file.
    pub fn with_dud_shots(mut self, n: u32) -> Self {
        self.dud_shots = n;
        self
    }

    /// Make the next `n` downloads write half the file and then fail.
    pub fn with_interrupted_downloads(mut self, n: u32) -> Self {
        self.interrupted_downloads = n;
        self
    }

    /// Stretch every download by `delay`, like a slow link would.
    pub fn with_download_delay(mut self, delay: Duration) -> Self {
        self.download_delay = delay;
        self
    }

    pub fn media_count(&self) -> usize {
        self.media.len()
    }

    fn maybe_fail(&self, op: &'static str) -> Result<(), DeviceError> {
        if self.failure_rate > 0.0 && rand::thread_rng().gen_bool(self.failure_rate) {
            return Err(DeviceError::Simulated(op));
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), DeviceError> {
        if self.open {
            Ok(())
        } else {
            Err(DeviceError::NotOpen)
        }
    }
}

impl Default for SimulatedCamera {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureDevice for SimulatedCamera {
    async fn open_session(&mut self) -> Result<(), DeviceError> {
        self.maybe_fail("open_session")?;
        self.open = true;
        info!("[SimCamera] Session opened");
        Ok(())
    }

    async fn set_photo_mode(&mut self) -> Result<(), DeviceError> {
        self.ensure_open()?;
        self.maybe_fail("set_photo_mode")?;
        debug!("[SimCamera] Photo mode set");
        Ok(())
    }

    async fn trigger_shutter(&mut self) -> Result<(), DeviceError> {
        self.ensure_open()?;
        self.maybe_fail("trigger_shutter")?;
        if self.dud_shots > 0 {
            self.dud_shots -= 1;
            debug!("[SimCamera] Shutter pressed, no file produced");
            return Ok(());
        }
        let name = format!("GOPR{:04}.JPG", self.next_index);
        self.next_index += 1;
        debug!(file = %name, "[SimCamera] Shutter pressed");
        self.media.insert(MediaFile::new(SIM_FOLDER, name));
        Ok(())
    }

    async fn list_media(&mut self) -> Result<BTreeSet<MediaFile>, DeviceError> {
        self.ensure_open()?;
        Ok(self.media.clone())
    }

    async fn download(&mut self, file: &MediaFile, dest: &Path) -> Result<u64, DeviceError> {
        self.ensure_open()?;
        if !self.media.contains(file) {
            return Err(DeviceError::Protocol(format!("no such media file {file}")));
        }
        if !self.download_delay.is_zero() {
            tokio::time::sleep(self.download_delay).await;
        }
        if self.interrupted_downloads > 0 {
            self.interrupted_downloads -= 1;
            tokio::fs::write(dest, &PLACEHOLDER_JPEG[..PLACEHOLDER_JPEG.len() / 2]).await?;
            return Err(DeviceError::Protocol(format!("transfer of {file} interrupted")));
        }
        tokio::fs::write(dest, PLACEHOLDER_JPEG).await?;
        Ok(PLACEHOLDER_JPEG.len() as u64)
    }

    async fn close_session(&mut self) {
        if self.open {
            self.open = false;
            info!("[SimCamera] Session closed");
        }
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutter_adds_sequential_file() {
        let mut cam = SimulatedCamera::new();
        cam.open_session().await.unwrap();
        let before = cam.list_media().await.unwrap();
        cam.trigger_shutter().await.unwrap();
        let after = cam.list_media().await.unwrap();
        let new: Vec<_> = after.difference(&before).collect();
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].name, "GOPR0002.JPG");
    }

    #[tokio::test]
    async fn test_closed_session_rejects_calls() {
        let mut cam = SimulatedCamera::new();
        assert!(matches!(cam.trigger_shutter().await, Err(DeviceError::NotOpen)));
    }

    #[tokio::test]
    async fn test_full_failure_rate_fails_open() {
        let mut cam = SimulatedCamera::new().with_failure_rate(1.0);
        assert!(matches!(cam.open_session().await, Err(DeviceError::Simulated(_))));
    }

    #[tokio::test]
    async fn test_download_writes_placeholder() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cam = SimulatedCamera::new();
        cam.open_session().await.unwrap();
        let file = MediaFile::new(SIM_FOLDER, "GOPR0001.JPG");
        let dest = tmp.path().join("out.jpg");
        let n = cam.download(&file, &dest).await.unwrap();
        assert_eq!(std::fs::metadata(&dest).unwrap().len(), n);
    }
}
