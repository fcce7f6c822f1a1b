//! Survey Configuration - every tunable of the three survey processes
//!
//! Each section implements `Default` with the values the field deployment
//! has always used, so running without a config file keeps the original
//! behaviour.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::defaults;
use crate::device::DeviceBackend;

/// Environment variable pointing at a config file.
pub const CONFIG_ENV_VAR: &str = "AEROSURVEY_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "aerosurvey.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration shared by the trigger, upload and serve processes.
///
/// Load with `SurveyConfig::load()` which searches:
/// 1. `$AEROSURVEY_CONFIG`
/// 2. `./aerosurvey.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SurveyConfig {
    #[serde(default)]
    pub mission: MissionConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub camera: CameraConfig,

    #[serde(default)]
    pub uplink: UplinkConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub forward: ForwardConfig,

    #[serde(default)]
    pub status: StatusConfig,

    #[serde(default)]
    pub gcs: GcsConfig,
}

impl SurveyConfig {
    /// Load configuration using the standard search order, falling back to
    /// defaults when a file is missing or broken.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded survey config from {}", CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded survey config from ./{}", LOCAL_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Parse and validate a TOML document. Unknown keys only warn.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self = toml::from_str(contents)
            .map_err(|source| ConfigError::Parse {
                path: PathBuf::from("<inline>"),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Reject values that would stall or break a process.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let errors = super::validation::validate_ranges(self);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Config parse error ({}): {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Config serialization error: {0}")]
    Serialize(toml::ser::Error),

    #[error("Config validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

// ============================================================================
// Mission
// ============================================================================

/// Telemetry patterns and marker naming that define a mission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MissionConfig {
    /// Status-text substring toggling capture
    pub trigger_pattern: String,

    /// Status-text substring ending the mission
    pub completion_pattern: String,

    /// Regex with one capture group for the waypoint number
    pub waypoint_regex: String,

    /// Extension of the completion marker (without dot)
    pub marker_extension: String,

    /// Ignore a trigger repeating the last processed waypoint number
    pub dedupe_waypoints: bool,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            trigger_pattern: defaults::TRIGGER_PATTERN.to_string(),
            completion_pattern: defaults::COMPLETION_PATTERN.to_string(),
            waypoint_regex: defaults::WAYPOINT_REGEX.to_string(),
            marker_extension: defaults::MARKER_EXTENSION.to_string(),
            dedupe_waypoints: false,
        }
    }
}

// ============================================================================
// Telemetry
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// `tcp:HOST:PORT`, `udp:HOST:PORT` or `DEVICE:BAUD`
    pub endpoint: String,
    pub heartbeat_timeout_secs: u64,
    pub reconnect_delay_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            endpoint: defaults::TELEMETRY_ENDPOINT.to_string(),
            heartbeat_timeout_secs: defaults::HEARTBEAT_TIMEOUT_SECS,
            reconnect_delay_secs: defaults::TELEMETRY_RECONNECT_DELAY_SECS,
        }
    }
}

impl TelemetryConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

// ============================================================================
// Camera
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub backend: DeviceBackend,

    /// Camera serial (or its last digits); selects the wired USB address
    pub identifier: String,

    /// Explicit control API base URL, overrides the identifier-derived one
    pub base_url: Option<String>,

    /// Directory captures are downloaded into
    pub output_dir: PathBuf,

    pub idle_poll_ms: u64,
    pub inter_shot_delay_ms: u64,
    pub verify_attempts: u32,
    pub verify_interval_ms: u64,
    pub reconnect_delay_secs: u64,
    pub request_timeout_secs: u64,

    /// Probability (0.0-1.0) that a simulated shutter call fails
    pub simulated_failure_rate: f64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            backend: DeviceBackend::Simulated,
            identifier: defaults::CAMERA_IDENTIFIER.to_string(),
            base_url: None,
            output_dir: PathBuf::from(defaults::CAPTURE_DIR),
            idle_poll_ms: defaults::IDLE_POLL_MS,
            inter_shot_delay_ms: defaults::INTER_SHOT_DELAY_MS,
            verify_attempts: defaults::VERIFY_ATTEMPTS,
            verify_interval_ms: defaults::VERIFY_INTERVAL_MS,
            reconnect_delay_secs: defaults::DEVICE_RECONNECT_DELAY_SECS,
            request_timeout_secs: defaults::CAMERA_REQUEST_TIMEOUT_SECS,
            simulated_failure_rate: 0.0,
        }
    }
}

impl CameraConfig {
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn inter_shot_delay(&self) -> Duration {
        Duration::from_millis(self.inter_shot_delay_ms)
    }

    pub fn verify_interval(&self) -> Duration {
        Duration::from_millis(self.verify_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// ============================================================================
// Upload client
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UplinkConfig {
    /// Ingestion server `HOST:PORT`
    pub server_addr: String,

    /// Directory watched for new captures and markers
    pub watch_dir: PathBuf,

    /// Lower-case extensions relayed as images
    pub image_extensions: Vec<String>,

    /// Enqueue files already present when the client starts
    pub rescan_existing: bool,

    pub scan_interval_ms: u64,
    pub retry_delay_secs: u64,
    pub socket_timeout_secs: u64,
    pub settle_delay_ms: u64,
    pub start_delay_ms: u64,
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            server_addr: defaults::UPLOAD_SERVER_ADDR.to_string(),
            watch_dir: PathBuf::from(defaults::CAPTURE_DIR),
            image_extensions: defaults::IMAGE_EXTENSIONS
                .iter()
                .map(|e| (*e).to_string())
                .collect(),
            rescan_existing: true,
            scan_interval_ms: defaults::SCAN_INTERVAL_MS,
            retry_delay_secs: defaults::UPLOAD_RETRY_DELAY_SECS,
            socket_timeout_secs: defaults::UPLOAD_SOCKET_TIMEOUT_SECS,
            settle_delay_ms: defaults::UPLOAD_SETTLE_DELAY_MS,
            start_delay_ms: defaults::UPLOAD_START_DELAY_MS,
        }
    }
}

impl UplinkConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs(self.socket_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }
}

// ============================================================================
// Ingestion server
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Upload listener `HOST:PORT`
    pub listen_addr: String,

    /// Directory uploads land in
    pub upload_dir: PathBuf,

    pub connection_timeout_secs: u64,
    pub marker_poll_interval_ms: u64,

    /// Browse API `HOST:PORT`; empty disables the API
    pub api_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: defaults::SERVER_LISTEN_ADDR.to_string(),
            upload_dir: PathBuf::from(defaults::UPLOAD_DIR),
            connection_timeout_secs: defaults::CONNECTION_TIMEOUT_SECS,
            marker_poll_interval_ms: defaults::MARKER_POLL_INTERVAL_MS,
            api_addr: defaults::API_ADDR.to_string(),
        }
    }
}

impl ServerConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn marker_poll_interval(&self) -> Duration {
        Duration::from_millis(self.marker_poll_interval_ms)
    }
}

// ============================================================================
// Mapping pipeline
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Executable invoked as `script <dataset_dir>`
    pub script: PathBuf,

    /// Working dataset directory passed to the script
    pub dataset_dir: PathBuf,

    /// Artifacts (relative to the dataset dir) forwarded after a successful run
    pub artifacts: Vec<PathBuf>,

    /// Remove the dataset directory once every artifact was forwarded
    pub cleanup_dataset: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            script: PathBuf::from(defaults::MAPPING_SCRIPT),
            dataset_dir: PathBuf::from(defaults::DATASET_DIR),
            artifacts: vec![PathBuf::from(defaults::ORTHOPHOTO_ARTIFACT)],
            cleanup_dataset: false,
        }
    }
}

// ============================================================================
// Downstream forwarding
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardConfig {
    pub enabled: bool,
    pub addr: String,
    pub attempts: u32,
    pub retry_delay_secs: u64,
    pub socket_timeout_secs: u64,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: defaults::FORWARD_ADDR.to_string(),
            attempts: defaults::FORWARD_ATTEMPTS,
            retry_delay_secs: defaults::FORWARD_RETRY_DELAY_SECS,
            socket_timeout_secs: defaults::UPLOAD_SOCKET_TIMEOUT_SECS,
        }
    }
}

impl ForwardConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs(self.socket_timeout_secs)
    }
}

// ============================================================================
// Status reporting
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub enabled: bool,
    pub server_addr: String,
    pub interval_secs: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            server_addr: defaults::UPLOAD_SERVER_ADDR.to_string(),
            interval_secs: defaults::STATUS_INTERVAL_SECS,
        }
    }
}

impl StatusConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

// ============================================================================
// Downstream receiver
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GcsConfig {
    pub listen_addr: String,
    pub receive_dir: PathBuf,
}

impl Default for GcsConfig {
    fn default() -> Self {
        Self {
            listen_addr: defaults::GCS_LISTEN_ADDR.to_string(),
            receive_dir: PathBuf::from(defaults::GCS_RECEIVE_DIR),
        }
    }
}
