// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the autodm configuration system.

use std::io::Write;

use autodm_config::diagnostic::ConfigError;
use autodm_config::{load_and_validate_path, load_and_validate_str, load_config_from_str};

#[test]
fn full_config_deserializes() {
    let toml = r#"
[service]
name = "autodm-staging"
log_level = "debug"

[storage]
database_path = "/tmp/autodm-test.db"
wal_mode = false

[gateway]
host = "0.0.0.0"
port = 8088
verify_token = "hub-secret"
inline_processing = true
worker_count = 2
queue_capacity = 64

[instagram]
graph_api_base = "http://127.0.0.1:9999"
app_id = "1234"
app_secret = "shh"
request_timeout_secs = 5

[vault]
encryption_key = "0000000000000000000000000000000000000000000000000000000000000001"

[scheduler]
enabled = false
poll_interval_secs = 10
batch_size = 20
max_attempts = 5
base_retry_delay_secs = 60
token_refresh_window_days = 3
"#;

    let config = load_and_validate_str(toml).expect("valid config");
    assert_eq!(config.service.name, "autodm-staging");
    assert_eq!(config.storage.database_path, "/tmp/autodm-test.db");
    assert!(!config.storage.wal_mode);
    assert_eq!(config.gateway.port, 8088);
    assert_eq!(config.gateway.verify_token.as_deref(), Some("hub-secret"));
    assert!(config.gateway.inline_processing);
    assert_eq!(config.gateway.worker_count, 2);
    assert_eq!(config.instagram.app_secret.as_deref(), Some("shh"));
    assert_eq!(config.instagram.request_timeout_secs, 5);
    assert!(config.vault.encryption_key.is_some());
    assert!(!config.scheduler.enabled);
    assert_eq!(config.scheduler.max_attempts, 5);
    assert_eq!(config.scheduler.base_retry_delay_secs, 60);
    assert_eq!(config.scheduler.token_refresh_window_days, 3);
}

#[test]
fn empty_config_uses_defaults() {
    let config = load_and_validate_str("").expect("defaults validate");
    assert_eq!(config.gateway.host, "127.0.0.1");
    assert_eq!(config.scheduler.poll_interval_secs, 60);
    assert_eq!(
        config.instagram.graph_api_base,
        "https://graph.facebook.com/v21.0"
    );
}

#[test]
fn unknown_key_yields_suggestion() {
    let toml = r#"
[scheduler]
max_atempts = 4
"#;
    let errors = load_and_validate_str(toml).unwrap_err();
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        ConfigError::UnknownKey {
            key, suggestion, ..
        } => {
            assert_eq!(key, "max_atempts");
            assert_eq!(suggestion.as_deref(), Some("max_attempts"));
        }
        other => panic!("expected UnknownKey, got {other:?}"),
    }
}

#[test]
fn unknown_section_is_rejected() {
    let toml = r#"
[telegram]
bot_token = "x"
"#;
    assert!(load_config_from_str(toml).is_err());
    let errors = load_and_validate_str(toml).unwrap_err();
    assert!(
        matches!(&errors[0], ConfigError::UnknownSection { section, .. } if section == "telegram"),
        "{errors:?}"
    );
}

#[test]
fn wrong_type_is_reported_with_key_path() {
    let toml = r#"
[gateway]
port = "eighty"
"#;
    let errors = load_and_validate_str(toml).unwrap_err();
    assert!(
        errors
            .iter()
            .any(|e| matches!(e, ConfigError::InvalidType { key, .. } if key.contains("port"))),
        "{errors:?}"
    );
}

#[test]
fn validation_errors_are_collected() {
    let toml = r#"
[vault]
encryption_key = "not-hex"

[scheduler]
batch_size = 0
"#;
    let errors = load_and_validate_str(toml).unwrap_err();
    assert_eq!(errors.len(), 2);
    assert!(errors
        .iter()
        .all(|e| matches!(e, ConfigError::Validation { .. })));
}

#[test]
fn config_file_on_disk_is_loaded() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[gateway]\nport = 4100\n\n[scheduler]\nbatch_size = 7").unwrap();

    let config = load_and_validate_path(file.path()).expect("file config validates");
    assert_eq!(config.gateway.port, 4100);
    assert_eq!(config.scheduler.batch_size, 7);
}

#[test]
fn config_file_typo_is_suggested() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[gateway]\nhots = \"0.0.0.0\"").unwrap();

    let errors = load_and_validate_path(file.path()).unwrap_err();
    match &errors[0] {
        ConfigError::UnknownKey {
            section,
            suggestion,
            ..
        } => {
            assert_eq!(section.as_deref(), Some("gateway"));
            assert_eq!(suggestion.as_deref(), Some("host"));
        }
        other => panic!("expected UnknownKey, got {other:?}"),
    }
}
