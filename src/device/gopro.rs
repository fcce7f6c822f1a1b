//! Wired GoPro over the HTTP control API
//!
//! The camera exposes its API on a USB-ethernet link at
//! `172.2X.1YZ.51:8080`, where X, Y and Z are the last three digits of the
//! serial number.

use super::{CaptureDevice, DeviceError};
use crate::config::defaults;
use crate::types::MediaFile;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Photo preset group id understood by the camera.
const PRESET_GROUP_PHOTO: u32 = 1001;

#[derive(Debug, Deserialize)]
struct MediaListResponse {
    #[serde(default)]
    media: Vec<MediaDirectory>,
}

#[derive(Debug, Deserialize)]
struct MediaDirectory {
    d: String,
    #[serde(default)]
    fs: Vec<MediaEntry>,
}

#[derive(Debug, Deserialize)]
struct MediaEntry {
    n: String,
}

/// HTTP client for one wired camera
pub struct GoProCamera {
    http: reqwest::Client,
    base_url: String,
    open: bool,
}

impl GoProCamera {
    /// Derive the wired-USB address from a serial number (or its last three
    /// digits).
    pub fn from_identifier(identifier: &str, timeout: Duration) -> Result<Self, DeviceError> {
        let url = wired_base_url(identifier).ok_or_else(|| {
            DeviceError::Connect(format!(
                "camera identifier '{identifier}' must end in three digits"
            ))
        })?;
        Self::with_base_url(&url, timeout)
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self, DeviceError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            open: false,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, DeviceError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.http.get(&url).send().await.map_err(|e| {
            if e.is_connect() {
                DeviceError::Connect(format!("{url}: {e}"))
            } else {
                DeviceError::Http(e)
            }
        })?;
        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(DeviceError::Rejected {
                endpoint: path.to_string(),
                status: resp.status().as_u16(),
            })
        }
    }

    fn ensure_open(&self) -> Result<(), DeviceError> {
        if self.open {
            Ok(())
        } else {
            Err(DeviceError::NotOpen)
        }
    }
}

/// `172.2X.1YZ.51:8080` from the last three digits of the identifier.
pub fn wired_base_url(identifier: &str) -> Option<String> {
    let digits: Vec<char> = identifier.trim().chars().rev().take(3).collect();
    if digits.len() != 3 || !digits.iter().all(char::is_ascii_digit) {
        return None;
    }
    // digits are reversed: [Z, Y, X]
    Some(format!(
        "http://172.2{}.1{}{}.51:{}",
        digits[2],
        digits[1],
        digits[0],
        defaults::GOPRO_HTTP_PORT
    ))
}

#[async_trait]
impl CaptureDevice for GoProCamera {
    async fn open_session(&mut self) -> Result<(), DeviceError> {
        info!(url = %self.base_url, "[GoPro] Enabling wired control");
        self.get("/gopro/camera/control/wired_usb?p=1").await?;
        self.open = true;
        Ok(())
    }

    async fn set_photo_mode(&mut self) -> Result<(), DeviceError> {
        self.ensure_open()?;
        self.get(&format!("/gopro/camera/presets/set_group?id={PRESET_GROUP_PHOTO}"))
            .await?;
        info!("[GoPro] Photo preset group loaded");
        Ok(())
    }

    async fn trigger_shutter(&mut self) -> Result<(), DeviceError> {
        self.ensure_open()?;
        self.get("/gopro/camera/shutter/start").await?;
        Ok(())
    }

    async fn list_media(&mut self) -> Result<BTreeSet<MediaFile>, DeviceError> {
        self.ensure_open()?;
        let resp = self.get("/gopro/media/list").await?;
        let body: MediaListResponse = resp
            .json()
            .await
            .map_err(|e| DeviceError::Protocol(format!("media list: {e}")))?;
        Ok(body
            .media
            .into_iter()
            .flat_map(|dir| {
                let folder = dir.d;
                dir.fs
                    .into_iter()
                    .map(move |f| MediaFile::new(folder.clone(), f.n))
            })
            .collect())
    }

    async fn download(&mut self, file: &MediaFile, dest: &Path) -> Result<u64, DeviceError> {
        self.ensure_open()?;
        let mut resp = self
            .get(&format!("/videos/DCIM/{}/{}", file.folder, file.name))
            .await?;
        let mut out = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = resp.chunk().await? {
            out.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        out.flush().await?;
        debug!(file = %file, bytes = written, "[GoPro] Download complete");
        Ok(written)
    }

    async fn close_session(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        if let Err(e) = self.get("/gopro/camera/control/wired_usb?p=0").await {
            warn!(error = %e, "[GoPro] Failed to release wired control");
        }
    }

    fn name(&self) -> &str {
        "gopro"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wired_base_url_from_serial() {
        assert_eq!(
            wired_base_url("C3501326042700").as_deref(),
            Some("http://172.27.100.51:8080")
        );
        assert_eq!(wired_base_url("123").as_deref(), Some("http://172.21.123.51:8080"));
    }

    #[test]
    fn test_wired_base_url_rejects_non_digits() {
        assert!(wired_base_url("Simulated").is_none());
        assert!(wired_base_url("12").is_none());
    }

    #[test]
    fn test_media_list_parsing() {
        let json = r#"{"id":"1","media":[{"d":"100GOPRO","fs":[{"n":"GOPR0001.JPG","cre":"1"},{"n":"GOPR0002.JPG"}]}]}"#;
        let parsed: MediaListResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.media.len(), 1);
        assert_eq!(parsed.media[0].fs[1].n, "GOPR0002.JPG");
    }

    #[tokio::test]
    async fn test_unreachable_camera_is_device_error() {
        let mut cam =
            GoProCamera::with_base_url("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        assert!(cam.open_session().await.is_err());
        assert!(matches!(cam.trigger_shutter().await, Err(DeviceError::NotOpen)));
    }
}
