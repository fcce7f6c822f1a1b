//! Config Validation Tests
//!
//! Typo detection and range validation, exercised through the public
//! config API the binaries use at startup.

use aerosurvey::config::validation::{known_config_keys, suggest_correction, validate_ranges, validate_unknown_keys};
use aerosurvey::config::{ConfigError, SurveyConfig};
use aerosurvey::device::DeviceBackend;

// ============================================================================
// Typo Detection Tests
// ============================================================================

#[test]
fn typo_in_uplink_key_warns_with_suggestion() {
    let toml_str = r#"
[uplink]
retry_dealy_secs = 3
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 1, "Expected exactly 1 warning");
    assert!(warnings[0].field.contains("retry_dealy_secs"));
    assert_eq!(warnings[0].suggestion.as_deref(), Some("uplink.retry_delay_secs"));
}

#[test]
fn unknown_section_warns_without_breaking_load() {
    let toml_str = r#"
[camera]
backend = "gopro"
identifier = "C3501325004565"

[dashboard]
theme = "dark"
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert!(warnings.iter().any(|w| w.field == "dashboard"));

    let config = SurveyConfig::from_toml_str(toml_str).unwrap();
    assert_eq!(config.camera.backend, DeviceBackend::GoPro);
}

#[test]
fn every_known_key_is_dotted_under_a_known_section() {
    let known = known_config_keys();
    for key in &known {
        if let Some((section, _)) = key.split_once('.') {
            assert!(known.contains(section), "section of {key} missing");
        }
    }
    assert!(suggest_correction("telemetry.endpont", &known).is_some());
}

// ============================================================================
// Range Validation Tests
// ============================================================================

#[test]
fn zero_verify_attempts_fails_validation() {
    let toml_str = r#"
[camera]
verify_attempts = 0
"#;
    let config = SurveyConfig::from_toml_str(toml_str).unwrap();
    match config.validate() {
        Err(ConfigError::Validation(errors)) => {
            assert!(errors.iter().any(|e| e.contains("verify_attempts")));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn forward_attempts_checked_only_when_enabled() {
    let mut config = SurveyConfig::default();
    config.forward.attempts = 0;
    assert!(validate_ranges(&config).is_empty());

    config.forward.enabled = true;
    assert!(validate_ranges(&config).iter().any(|e| e.contains("forward.attempts")));
}

#[test]
fn identical_trigger_and_completion_patterns_rejected() {
    let mut config = SurveyConfig::default();
    config.mission.completion_pattern = config.mission.trigger_pattern.clone();
    assert!(validate_ranges(&config).iter().any(|e| e.contains("must differ")));
}

#[test]
fn path_like_image_extension_rejected() {
    let mut config = SurveyConfig::default();
    config.uplink.image_extensions.push("../jpg".to_string());
    assert!(validate_ranges(&config).iter().any(|e| e.contains("../jpg")));
}

#[test]
fn defaults_round_trip_through_toml() {
    let config = SurveyConfig::default();
    let text = config.to_toml().unwrap();
    let reparsed = SurveyConfig::from_toml_str(&text).unwrap();
    assert_eq!(reparsed.uplink.server_addr, config.uplink.server_addr);
    assert_eq!(reparsed.server.upload_dir, config.server.upload_dir);
    assert!(validate_unknown_keys(&text).is_empty());
}
