// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the autodm service.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use serde::{Deserialize, Serialize};

/// Top-level autodm configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AutodmConfig {
    /// Process identity and logging.
    #[serde(default)]
    pub service: ServiceConfig,

    /// SQLite storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Inbound webhook server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Instagram Graph API settings.
    #[serde(default)]
    pub instagram: InstagramConfig,

    /// Credential encryption settings.
    #[serde(default)]
    pub vault: VaultConfig,

    /// Deferred job runner settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Process identity and logging.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Name reported in logs and the health endpoint.
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
        }
    }
}

fn default_service_name() -> String {
    "autodm".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("autodm").join("autodm.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("autodm.db"))
        .to_string_lossy()
        .to_string()
}

fn default_wal_mode() -> bool {
    true
}

/// Inbound webhook server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Token the platform echoes during the webhook subscription handshake.
    #[serde(default)]
    pub verify_token: Option<String>,

    /// Process comments inside the webhook request instead of queueing them.
    #[serde(default)]
    pub inline_processing: bool,

    /// Number of tasks draining the inbound comment queue.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Capacity of the inbound comment queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            verify_token: None,
            inline_processing: false,
            worker_count: default_worker_count(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_worker_count() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    1024
}

/// Instagram Graph API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct InstagramConfig {
    /// Versioned Graph API base URL.
    #[serde(default = "default_graph_api_base")]
    pub graph_api_base: String,

    /// Facebook app id used for token exchange.
    #[serde(default)]
    pub app_id: Option<String>,

    /// Facebook app secret. Used for token exchange and webhook signatures.
    #[serde(default)]
    pub app_secret: Option<String>,

    /// Timeout applied to every outbound API call.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for InstagramConfig {
    fn default() -> Self {
        Self {
            graph_api_base: default_graph_api_base(),
            app_id: None,
            app_secret: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_graph_api_base() -> String {
    "https://graph.facebook.com/v21.0".to_string()
}

fn default_request_timeout_secs() -> u64 {
    15
}

/// Credential encryption configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct VaultConfig {
    /// 32-byte AES key as 64 hex characters.
    #[serde(default)]
    pub encryption_key: Option<String>,
}

/// Deferred job runner configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Run the polling loop inside `autodm serve`.
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,

    /// Seconds between polls.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Maximum jobs claimed per poll.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Attempts before a job is marked permanently failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff base: a job that failed `n` times waits `base * 2^n` seconds.
    #[serde(default = "default_base_retry_delay_secs")]
    pub base_retry_delay_secs: u64,

    /// Schedule a token refresh when a page token expires within this many days.
    #[serde(default = "default_token_refresh_window_days")]
    pub token_refresh_window_days: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            poll_interval_secs: default_poll_interval_secs(),
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            base_retry_delay_secs: default_base_retry_delay_secs(),
            token_refresh_window_days: default_token_refresh_window_days(),
        }
    }
}

fn default_scheduler_enabled() -> bool {
    true
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_batch_size() -> u32 {
    50
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_retry_delay_secs() -> u64 {
    30
}

fn default_token_refresh_window_days() -> u32 {
    7
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = AutodmConfig::default();
        assert_eq!(config.service.name, "autodm");
        assert_eq!(config.gateway.port, 3000);
        assert!(!config.gateway.inline_processing);
        assert_eq!(config.instagram.request_timeout_secs, 15);
        assert_eq!(config.scheduler.max_attempts, 3);
        assert!(config.vault.encryption_key.is_none());
        assert!(config.storage.database_path.ends_with("autodm.db"));
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config: AutodmConfig = toml::from_str(
            r#"
[scheduler]
poll_interval_secs = 5
"#,
        )
        .unwrap();
        assert_eq!(config.scheduler.poll_interval_secs, 5);
        assert_eq!(config.scheduler.batch_size, 50);
        assert!(config.scheduler.enabled);
    }

    #[test]
    fn unknown_gateway_key_is_rejected() {
        let result = toml::from_str::<AutodmConfig>(
            r#"
[gateway]
prot = 8080
"#,
        );
        assert!(result.is_err());
    }
}
