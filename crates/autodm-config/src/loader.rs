// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./autodm.toml` > `~/.config/autodm/autodm.toml` > `/etc/autodm/autodm.toml`
//! with environment variable overrides via `AUTODM_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::AutodmConfig;

/// Prefix of every environment override.
pub(crate) const ENV_PREFIX: &str = "AUTODM_";

/// Top-level sections, used to turn `AUTODM_<SECTION>_<KEY>` into `section.key`.
pub(crate) const SECTIONS: &[&str] = &[
    "service",
    "storage",
    "gateway",
    "instagram",
    "vault",
    "scheduler",
];

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/autodm/autodm.toml` (system-wide)
/// 3. `~/.config/autodm/autodm.toml` (user XDG config)
/// 4. `./autodm.toml` (local directory)
/// 5. `AUTODM_*` environment variables
pub fn load_config() -> Result<AutodmConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env vars).
///
/// Used for testing and explicit configuration.
pub fn load_config_from_str(toml_content: &str) -> Result<AutodmConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(AutodmConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<AutodmConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(AutodmConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the Figment used internally for config loading.
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(AutodmConfig::default()))
        .merge(Toml::file("/etc/autodm/autodm.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("autodm/autodm.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("autodm.toml"))
        .merge(env_provider())
}

/// Environment provider mapping `AUTODM_GATEWAY_VERIFY_TOKEN` to `gateway.verify_token`.
///
/// Only the first underscore after a known section name becomes a dot, so
/// underscore-containing keys survive intact.
fn env_provider() -> Env {
    Env::prefixed(ENV_PREFIX).map(|key| map_env_key(key.as_str()).into())
}

/// Map a lowercased, prefix-stripped env key to its dotted config path.
pub fn map_env_key(key: &str) -> String {
    for section in SECTIONS {
        if let Some(rest) = key
            .strip_prefix(section)
            .and_then(|r| r.strip_prefix('_'))
        {
            return format!("{section}.{rest}");
        }
    }
    key.to_string()
}
