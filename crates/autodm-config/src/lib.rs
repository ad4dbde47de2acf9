// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration system for the autodm service.
//!
//! TOML files are merged over compiled defaults following the XDG hierarchy,
//! then `AUTODM_*` environment variables are applied on top. Unknown keys are
//! rejected and reported as miette diagnostics with typo suggestions.
//!
//! ```no_run
//! use autodm_config::load_and_validate;
//!
//! let config = load_and_validate().expect("config errors");
//! println!("listening on {}:{}", config.gateway.host, config.gateway.port);
//! ```

pub mod diagnostic;
pub mod loader;
pub mod model;
pub mod validation;

use std::path::Path;

pub use diagnostic::{render_errors, ConfigError};
pub use loader::{load_config, load_config_from_path, load_config_from_str};
pub use model::AutodmConfig;

/// Load configuration from the XDG hierarchy and validate it.
pub fn load_and_validate() -> Result<AutodmConfig, Vec<ConfigError>> {
    match loader::load_config() {
        Ok(config) => {
            validation::validate_config(&config)?;
            Ok(config)
        }
        Err(err) => {
            let toml_sources = collect_toml_sources();
            Err(diagnostic::figment_to_config_errors(err, &toml_sources))
        }
    }
}

/// Load configuration from an explicit file (plus env overrides) and validate it.
pub fn load_and_validate_path(path: &Path) -> Result<AutodmConfig, Vec<ConfigError>> {
    match loader::load_config_from_path(path) {
        Ok(config) => {
            validation::validate_config(&config)?;
            Ok(config)
        }
        Err(err) => {
            let sources = std::fs::read_to_string(path)
                .map(|content| vec![(path.display().to_string(), content)])
                .unwrap_or_default();
            Err(diagnostic::figment_to_config_errors(err, &sources))
        }
    }
}

/// Load configuration from a TOML string and validate it.
pub fn load_and_validate_str(toml_content: &str) -> Result<AutodmConfig, Vec<ConfigError>> {
    match loader::load_config_from_str(toml_content) {
        Ok(config) => {
            validation::validate_config(&config)?;
            Ok(config)
        }
        Err(err) => {
            let sources = vec![("<inline>".to_string(), toml_content.to_string())];
            Err(diagnostic::figment_to_config_errors(err, &sources))
        }
    }
}

/// Read whichever config files exist so diagnostics can point into them.
fn collect_toml_sources() -> Vec<(String, String)> {
    let mut sources = Vec::new();

    if let Ok(content) = std::fs::read_to_string("autodm.toml") {
        let path = std::env::current_dir()
            .map(|d| d.join("autodm.toml").display().to_string())
            .unwrap_or_else(|_| "autodm.toml".to_string());
        sources.push((path, content));
    }

    if let Some(config_dir) = dirs::config_dir() {
        let path = config_dir.join("autodm/autodm.toml");
        if let Ok(content) = std::fs::read_to_string(&path) {
            sources.push((path.display().to_string(), content));
        }
    }

    let system_path = Path::new("/etc/autodm/autodm.toml");
    if let Ok(content) = std::fs::read_to_string(system_path) {
        sources.push((system_path.display().to_string(), content));
    }

    sources
}
