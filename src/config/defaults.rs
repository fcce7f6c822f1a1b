//! System-wide default constants.
//!
//! Centralises the magic numbers of the survey workflow. Grouped by process
//! so the trigger, upload and ingestion sides can be tuned independently.

// ============================================================================
// Mission patterns
// ============================================================================

/// Status-text substring that toggles photo capture at a survey waypoint.
pub const TRIGGER_PATTERN: &str = "SetCamTrigDst";

/// Status-text substring that marks the end of the mission.
pub const COMPLETION_PATTERN: &str = "DigiCamCtrl";

/// Regex extracting the waypoint number from a trigger status text.
pub const WAYPOINT_REGEX: &str = r"Mission: (\d+) SetCamTrigDst";

/// Extension of the zero-byte mission completion marker.
pub const MARKER_EXTENSION: &str = "flag";

/// Image extensions relayed by the upload client (lower-case).
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp"];

// ============================================================================
// Telemetry
// ============================================================================

/// Default MAVLink endpoint (SITL TCP port).
pub const TELEMETRY_ENDPOINT: &str = "tcp:127.0.0.1:5762";

/// Maximum wait for the first heartbeat after connecting (seconds).
pub const HEARTBEAT_TIMEOUT_SECS: u64 = 30;

/// Delay before tearing down and re-opening a failed telemetry link (seconds).
pub const TELEMETRY_RECONNECT_DELAY_SECS: u64 = 10;

/// Capacity of the event channel between the link reader and the controller.
pub const TELEMETRY_CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// Camera
// ============================================================================

/// Directory the trigger controller downloads captures into and the upload
/// client watches.
pub const CAPTURE_DIR: &str = "gopro_captures";

/// Camera identifier used when none is configured.
pub const CAMERA_IDENTIFIER: &str = "Simulated";

/// Poll interval of the capture loop while not capturing (milliseconds).
pub const IDLE_POLL_MS: u64 = 500;

/// Delay between consecutive shots while capturing (milliseconds).
pub const INTER_SHOT_DELAY_MS: u64 = 3_000;

/// Media-list polls after a shutter trigger before the shot is abandoned.
pub const VERIFY_ATTEMPTS: u32 = 5;

/// Delay between media-list polls (milliseconds).
pub const VERIFY_INTERVAL_MS: u64 = 500;

/// Backoff before a full device reconnection (seconds).
pub const DEVICE_RECONNECT_DELAY_SECS: u64 = 10;

/// HTTP request timeout for the camera control API (seconds).
pub const CAMERA_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Camera HTTP control port.
pub const GOPRO_HTTP_PORT: u16 = 8080;

// ============================================================================
// Upload client
// ============================================================================

/// Ingestion server address the client relays files to.
pub const UPLOAD_SERVER_ADDR: &str = "127.0.0.1:65432";

/// Capture-directory scan interval (milliseconds).
pub const SCAN_INTERVAL_MS: u64 = 1_000;

/// Fixed delay between send attempts of the same item (seconds).
pub const UPLOAD_RETRY_DELAY_SECS: u64 = 5;

/// Socket timeout for connect, send and delivery confirmation (seconds).
pub const UPLOAD_SOCKET_TIMEOUT_SECS: u64 = 10;

/// Pause before the first send attempt of every item (milliseconds).
pub const UPLOAD_SETTLE_DELAY_MS: u64 = 1_000;

/// Pause before the consumer takes its first item (milliseconds).
pub const UPLOAD_START_DELAY_MS: u64 = 2_000;

// ============================================================================
// Ingestion server
// ============================================================================

/// Upload listener bind address.
pub const SERVER_LISTEN_ADDR: &str = "0.0.0.0:65432";

/// Working dataset directory handed to the mapping process.
pub const DATASET_DIR: &str = "datasets/project";

/// Directory uploads are written into (inside the dataset).
pub const UPLOAD_DIR: &str = "datasets/project/images";

/// Per-connection timeout on the upload listener (seconds).
pub const CONNECTION_TIMEOUT_SECS: u64 = 20;

/// Marker scan interval of the ingestion gate (milliseconds).
pub const MARKER_POLL_INTERVAL_MS: u64 = 2_000;

/// Browse API bind address.
pub const API_ADDR: &str = "0.0.0.0:8080";

/// Mapping process entry point.
pub const MAPPING_SCRIPT: &str = "./run_mapping.sh";

/// Artifact forwarded downstream after a successful mapping run.
pub const ORTHOPHOTO_ARTIFACT: &str = "odm_orthophoto/odm_orthophoto.tif";

/// Maximum size of a `status_check` JSON body (bytes).
pub const MAX_STATUS_BYTES: u32 = 64 * 1024;

// ============================================================================
// Downstream relay
// ============================================================================

/// Downstream receiver address.
pub const FORWARD_ADDR: &str = "127.0.0.1:65433";

/// Forward attempts per artifact before giving up.
pub const FORWARD_ATTEMPTS: u32 = 3;

/// Delay between forward attempts (seconds).
pub const FORWARD_RETRY_DELAY_SECS: u64 = 5;

/// Downstream receiver bind address.
pub const GCS_LISTEN_ADDR: &str = "127.0.0.1:65433";

/// Directory the downstream receiver stores artifacts in.
pub const GCS_RECEIVE_DIR: &str = "received_orthophotos";

// ============================================================================
// Status reporting
// ============================================================================

/// Interval between status reports from the trigger process (seconds).
pub const STATUS_INTERVAL_SECS: u64 = 30;
