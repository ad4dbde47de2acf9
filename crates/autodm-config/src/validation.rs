// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes,
//! such as bind addresses, key material shape, and non-zero intervals.

use crate::diagnostic::ConfigError;
use crate::model::AutodmConfig;

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &AutodmConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    let host = config.gateway.host.trim();
    if host.is_empty() {
        errors.push(ConfigError::invalid("gateway.host", "must not be empty"));
    } else {
        let is_valid_ip = host.parse::<std::net::IpAddr>().is_ok();
        let is_valid_hostname = host
            .chars()
            .all(|c| c.is_alphanumeric() || c == '.' || c == '-' || c == ':');
        if !is_valid_ip && !is_valid_hostname {
            errors.push(ConfigError::invalid(
                "gateway.host",
                format!("`{host}` is not a valid IP address or hostname"),
            ));
        }
    }

    if config.gateway.worker_count == 0 {
        errors.push(ConfigError::invalid("gateway.worker_count", "must be at least 1"));
    }

    if config.gateway.queue_capacity == 0 {
        errors.push(ConfigError::invalid("gateway.queue_capacity", "must be at least 1"));
    }

    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError::invalid("storage.database_path", "must not be empty"));
    }

    if !config.instagram.graph_api_base.starts_with("http://")
        && !config.instagram.graph_api_base.starts_with("https://")
    {
        errors.push(ConfigError::invalid(
            "instagram.graph_api_base",
            format!(
                "must be an http(s) URL, got `{}`",
                config.instagram.graph_api_base
            ),
        ));
    }

    if config.instagram.request_timeout_secs == 0 {
        errors.push(ConfigError::invalid(
            "instagram.request_timeout_secs",
            "must be at least 1",
        ));
    }

    if let Some(key) = &config.vault.encryption_key {
        let key = key.trim();
        if key.len() != 64 || !key.chars().all(|c| c.is_ascii_hexdigit()) {
            errors.push(ConfigError::invalid(
                "vault.encryption_key",
                "must be 64 hex characters (32 bytes)",
            ));
        }
    }

    if config.scheduler.poll_interval_secs == 0 {
        errors.push(ConfigError::invalid("scheduler.poll_interval_secs", "must be at least 1"));
    }

    if config.scheduler.batch_size == 0 {
        errors.push(ConfigError::invalid("scheduler.batch_size", "must be at least 1"));
    }

    if config.scheduler.max_attempts == 0 {
        errors.push(ConfigError::invalid("scheduler.max_attempts", "must be at least 1"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has_error(errors: &[ConfigError], field: &str) -> bool {
        errors
            .iter()
            .any(|e| matches!(e, ConfigError::Validation { key, .. } if key.ends_with(field)))
    }

    #[test]
    fn default_config_validates() {
        let config = AutodmConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn empty_database_path_fails_validation() {
        let mut config = AutodmConfig::default();
        config.storage.database_path = "".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert!(has_error(&errors, "database_path"));
    }

    #[test]
    fn short_encryption_key_fails_validation() {
        let mut config = AutodmConfig::default();
        config.vault.encryption_key = Some("abcd".to_string());
        let errors = validate_config(&config).unwrap_err();
        assert!(has_error(&errors, "encryption_key"));
        let ConfigError::Validation { help, .. } = &errors[0] else {
            panic!("expected Validation, got {errors:?}");
        };
        assert!(help.is_some());
    }

    #[test]
    fn zero_intervals_are_all_reported() {
        let mut config = AutodmConfig::default();
        config.scheduler.poll_interval_secs = 0;
        config.scheduler.max_attempts = 0;
        config.gateway.worker_count = 0;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(has_error(&errors, "poll_interval_secs"));
        assert!(has_error(&errors, "max_attempts"));
        assert!(has_error(&errors, "worker_count"));
    }

    #[test]
    fn valid_custom_config_passes() {
        let mut config = AutodmConfig::default();
        config.gateway.host = "0.0.0.0".to_string();
        config.storage.database_path = "/tmp/test.db".to_string();
        config.vault.encryption_key = Some("ab".repeat(32));
        config.instagram.graph_api_base = "http://localhost:9999".to_string();
        assert!(validate_config(&config).is_ok());
    }
}
