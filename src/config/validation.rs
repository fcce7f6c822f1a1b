//! Config validation: unknown-key detection with Levenshtein suggestions
//! and range checks.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree, compare against known field names, and emit warnings
//! with "did you mean?" suggestions. Then proceed with normal serde
//! deserialization. Unknown keys never break an existing config.

use std::collections::HashSet;

use super::SurveyConfig;
use crate::uplink::protocol::MAX_EXTENSION_LEN;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Returns the complete set of valid dotted key paths for SurveyConfig.
///
/// Maintained by hand to match the struct hierarchy in survey_config.rs.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [mission]
        "mission",
        "mission.trigger_pattern",
        "mission.completion_pattern",
        "mission.waypoint_regex",
        "mission.marker_extension",
        "mission.dedupe_waypoints",
        // [telemetry]
        "telemetry",
        "telemetry.endpoint",
        "telemetry.heartbeat_timeout_secs",
        "telemetry.reconnect_delay_secs",
        // [camera]
        "camera",
        "camera.backend",
        "camera.identifier",
        "camera.base_url",
        "camera.output_dir",
        "camera.idle_poll_ms",
        "camera.inter_shot_delay_ms",
        "camera.verify_attempts",
        "camera.verify_interval_ms",
        "camera.reconnect_delay_secs",
        "camera.request_timeout_secs",
        "camera.simulated_failure_rate",
        // [uplink]
        "uplink",
        "uplink.server_addr",
        "uplink.watch_dir",
        "uplink.image_extensions",
        "uplink.rescan_existing",
        "uplink.scan_interval_ms",
        "uplink.retry_delay_secs",
        "uplink.socket_timeout_secs",
        "uplink.settle_delay_ms",
        "uplink.start_delay_ms",
        // [server]
        "server",
        "server.listen_addr",
        "server.upload_dir",
        "server.connection_timeout_secs",
        "server.marker_poll_interval_ms",
        "server.api_addr",
        // [pipeline]
        "pipeline",
        "pipeline.script",
        "pipeline.dataset_dir",
        "pipeline.artifacts",
        "pipeline.cleanup_dataset",
        // [forward]
        "forward",
        "forward.enabled",
        "forward.addr",
        "forward.attempts",
        "forward.retry_delay_secs",
        "forward.socket_timeout_secs",
        // [status]
        "status",
        "status.enabled",
        "status.server_addr",
        "status.interval_secs",
        // [gcs]
        "gcs",
        "gcs.listen_addr",
        "gcs.receive_dir",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// For example, a table `{ a = { b = 1, c = 2 } }` yields:
/// `["a", "a.b", "a.c"]`
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a_len = a.len();
    let b_len = b.len();
    if a_len == 0 {
        return b_len;
    }
    if b_len == 0 {
        return a_len;
    }

    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.chars().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1)
                .min(curr[j] + 1)
                .min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_len]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    let mut best: Option<(&str, usize)> = None;
    for &k in known {
        let dist = levenshtein(unknown, k);
        if dist <= 3 {
            if let Some((_, best_dist)) = best {
                if dist < best_dist {
                    best = Some((k, dist));
                }
            } else {
                best = Some((k, dist));
            }
        }
    }
    best.map(|(k, _)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
///
/// This does NOT fail on unknown keys, it only warns. Existing configs
/// always continue to work.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        Err(_) => return Vec::new(), // parse errors are handled by serde later
    };

    let known = known_config_keys();
    let found = walk_toml_keys(&value, "");
    let mut warnings = Vec::new();

    for key in &found {
        if !known.contains(key.as_str()) {
            let suggestion = suggest_correction(key, &known);
            let message = format!("Unknown config key '{key}'");
            warnings.push(ValidationWarning {
                field: key.clone(),
                message,
                suggestion,
            });
        }
    }

    warnings
}

// ============================================================================
// Range Validation
// ============================================================================

/// Check values that would stall a loop or break a contract.
///
/// Returns one message per violation; an empty list means the config is usable.
pub fn validate_ranges(config: &SurveyConfig) -> Vec<String> {
    let mut errors = Vec::new();

    let m = &config.mission;
    if m.trigger_pattern.trim().is_empty() {
        errors.push("mission.trigger_pattern must not be empty".to_string());
    }
    if m.completion_pattern.trim().is_empty() {
        errors.push("mission.completion_pattern must not be empty".to_string());
    }
    if m.trigger_pattern == m.completion_pattern {
        errors.push("mission.trigger_pattern and mission.completion_pattern must differ".to_string());
    }
    if let Err(e) = regex::Regex::new(&m.waypoint_regex) {
        errors.push(format!("mission.waypoint_regex is not a valid regex: {e}"));
    }
    if m.marker_extension.is_empty()
        || m.marker_extension.len() > MAX_EXTENSION_LEN as usize
        || !m.marker_extension.chars().all(|c| c.is_ascii_alphanumeric())
    {
        errors.push(format!(
            "mission.marker_extension = '{}' must be 1-{MAX_EXTENSION_LEN} ASCII alphanumerics",
            m.marker_extension
        ));
    }
    if config
        .uplink
        .image_extensions
        .iter()
        .any(|e| e.eq_ignore_ascii_case(&m.marker_extension))
    {
        errors.push(format!(
            "mission.marker_extension = '{}' collides with uplink.image_extensions",
            m.marker_extension
        ));
    }

    let c = &config.camera;
    if c.verify_attempts == 0 {
        errors.push("camera.verify_attempts must be > 0".to_string());
    }
    if c.idle_poll_ms == 0 {
        errors.push("camera.idle_poll_ms must be > 0 (busy loop otherwise)".to_string());
    }
    if !(0.0..=1.0).contains(&c.simulated_failure_rate) {
        errors.push(format!(
            "camera.simulated_failure_rate = {:.3} is outside 0.0-1.0",
            c.simulated_failure_rate
        ));
    }

    if config.telemetry.heartbeat_timeout_secs == 0 {
        errors.push("telemetry.heartbeat_timeout_secs must be > 0".to_string());
    }

    let u = &config.uplink;
    if u.scan_interval_ms == 0 {
        errors.push("uplink.scan_interval_ms must be > 0".to_string());
    }
    if u.socket_timeout_secs == 0 {
        errors.push("uplink.socket_timeout_secs must be > 0".to_string());
    }
    if u.image_extensions.is_empty() {
        errors.push("uplink.image_extensions must list at least one extension".to_string());
    }
    for ext in &u.image_extensions {
        if ext.is_empty() || ext.len() > MAX_EXTENSION_LEN as usize || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            errors.push(format!(
                "uplink.image_extensions entry '{ext}' must be 1-{MAX_EXTENSION_LEN} ASCII alphanumerics"
            ));
        }
    }

    let s = &config.server;
    if s.marker_poll_interval_ms == 0 {
        errors.push("server.marker_poll_interval_ms must be > 0".to_string());
    }
    if s.connection_timeout_secs == 0 {
        errors.push("server.connection_timeout_secs must be > 0".to_string());
    }

    if config.forward.enabled && config.forward.attempts == 0 {
        errors.push("forward.attempts must be > 0 when forwarding is enabled".to_string());
    }
    if config.status.enabled && config.status.interval_secs == 0 {
        errors.push("status.interval_secs must be > 0 when status reporting is enabled".to_string());
    }

    errors
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein_identical() {
        assert_eq!(levenshtein("hello", "hello"), 0);
    }

    #[test]
    fn test_levenshtein_one_edit() {
        assert_eq!(levenshtein("endpont", "endpoint"), 1);
    }

    #[test]
    fn test_walk_toml_keys_nested() {
        let toml: toml::Value = r#"
            [uplink]
            server_addr = "127.0.0.1:65432"
        "#
        .parse()
        .unwrap();
        let keys = walk_toml_keys(&toml, "");
        assert!(keys.contains(&"uplink".to_string()));
        assert!(keys.contains(&"uplink.server_addr".to_string()));
    }

    #[test]
    fn test_typo_key_produces_warning_with_suggestion() {
        let toml_str = r#"
[telemetry]
endpont = "tcp:127.0.0.1:5762"
"#;
        let warnings = validate_unknown_keys(toml_str);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].suggestion.as_deref(), Some("telemetry.endpoint"));
    }

    #[test]
    fn test_all_valid_keys_produce_zero_warnings() {
        let toml_str = r#"
[mission]
trigger_pattern = "SetCamTrigDst"

[camera]
backend = "simulated"
verify_attempts = 5

[forward]
enabled = true
"#;
        let warnings = validate_unknown_keys(toml_str);
        assert!(warnings.is_empty(), "Expected 0 warnings, got: {:?}", warnings);
    }

    #[test]
    fn test_suggest_correction_no_match_for_garbage() {
        let known = known_config_keys();
        assert!(suggest_correction("completely_unrelated_garbage_key_xyz", &known).is_none());
    }

    #[test]
    fn test_defaults_have_no_range_errors() {
        let errors = validate_ranges(&SurveyConfig::default());
        assert!(errors.is_empty(), "Defaults should validate: {:?}", errors);
    }

    #[test]
    fn test_marker_extension_colliding_with_images() {
        let mut config = SurveyConfig::default();
        config.mission.marker_extension = "JPG".to_string();
        let errors = validate_ranges(&config);
        assert!(errors.iter().any(|e| e.contains("collides")));
    }

    #[test]
    fn test_marker_extension_too_long_for_header() {
        let mut config = SurveyConfig::default();
        config.mission.marker_extension = "missioncompleted1".to_string();
        let errors = validate_ranges(&config);
        assert!(errors.iter().any(|e| e.contains("mission.marker_extension")), "{errors:?}");

        config.mission.marker_extension = "missioncomplete1".to_string();
        assert!(validate_ranges(&config).is_empty());
    }

    #[test]
    fn test_bad_waypoint_regex() {
        let mut config = SurveyConfig::default();
        config.mission.waypoint_regex = "Mission: (\\d+".to_string();
        let errors = validate_ranges(&config);
        assert!(errors.iter().any(|e| e.contains("waypoint_regex")));
    }
}
