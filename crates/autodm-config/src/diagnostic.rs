// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration errors rendered as miette diagnostics.
//!
//! Every error is tied back to the `AutodmConfig` section it belongs to, so
//! the help line can name the nearest valid key, the compiled default, and
//! the `AUTODM_*` variable that sets the same value.

#![allow(unused_assignments)] // triggered by miette's Diagnostic derive

use figment::error::{Error as FigmentError, Kind};
use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use crate::loader::{ENV_PREFIX, SECTIONS};
use crate::model::AutodmConfig;

/// Minimum Jaro-Winkler similarity for a "did you mean" hint.
const SUGGESTION_THRESHOLD: f64 = 0.75;

/// A configuration problem, ready for [`render_errors`].
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    /// A `[section]` that `AutodmConfig` does not have.
    #[error("unknown configuration section `[{section}]`")]
    #[diagnostic(code(autodm::config::unknown_section))]
    UnknownSection {
        section: String,
        suggestion: Option<String>,
        #[help]
        help: String,
        #[label("not an autodm section")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    /// A key its section does not accept.
    #[error("unknown configuration key `{}`", dotted(.section.as_deref(), .key))]
    #[diagnostic(code(autodm::config::unknown_key))]
    UnknownKey {
        /// Section the key appeared in; `None` at the top level.
        section: Option<String>,
        key: String,
        suggestion: Option<String>,
        #[help]
        help: String,
        #[label("this key is not recognized")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    /// A value that does not deserialize into the key's type.
    #[error("invalid value for `{key}`: found {found}, expected {expected}")]
    #[diagnostic(code(autodm::config::invalid_type))]
    InvalidType {
        /// Dotted path, e.g. `gateway.port`.
        key: String,
        found: String,
        expected: String,
        #[help]
        help: Option<String>,
    },

    #[error("missing required key `{key}`")]
    #[diagnostic(code(autodm::config::missing_key))]
    MissingKey {
        key: String,
        #[help]
        help: Option<String>,
    },

    /// A value that parsed but is not usable.
    #[error("invalid `{key}`: {message}")]
    #[diagnostic(code(autodm::config::validation))]
    Validation {
        /// Dotted path, e.g. `vault.encryption_key`.
        key: String,
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("configuration error: {0}")]
    #[diagnostic(code(autodm::config::other))]
    Other(String),
}

impl ConfigError {
    /// A validation failure for `key`, with the standing advice for that key.
    pub fn invalid(key: &str, message: impl Into<String>) -> Self {
        ConfigError::Validation {
            key: key.to_string(),
            message: message.into(),
            help: validation_hint(key).map(str::to_string),
        }
    }
}

fn dotted(section: Option<&str>, key: &str) -> String {
    match section {
        Some(section) => format!("{section}.{key}"),
        None => key.to_string(),
    }
}

/// Name of the environment variable that sets `section.key`.
pub fn env_var_name(section: &str, key: &str) -> String {
    format!("{ENV_PREFIX}{section}_{key}").to_uppercase()
}

/// Advice attached to validation failures of specific keys.
fn validation_hint(key: &str) -> Option<&'static str> {
    match key {
        "vault.encryption_key" => {
            Some("run `autodm generate-key`, or unset it and export AUTODM_VAULT_ENCRYPTION_KEY")
        }
        "gateway.host" => Some("use an IP address such as `0.0.0.0` or a plain hostname"),
        "instagram.graph_api_base" => Some("e.g. https://graph.facebook.com/v21.0"),
        _ => None,
    }
}

/// Translate a figment failure into diagnostics.
///
/// `toml_sources` holds `(path, content)` for each file that may have been
/// read, so unknown keys can be underlined in place.
pub fn figment_to_config_errors(
    err: FigmentError,
    toml_sources: &[(String, String)],
) -> Vec<ConfigError> {
    let defaults = toml::Value::try_from(AutodmConfig::default()).ok();
    err.into_iter()
        .map(|error| convert(&error, toml_sources, defaults.as_ref()))
        .collect()
}

fn convert(
    error: &FigmentError,
    toml_sources: &[(String, String)],
    defaults: Option<&toml::Value>,
) -> ConfigError {
    let from_env = is_env_error(error);
    match &error.kind {
        Kind::UnknownField(field, expected) => {
            let Some(section) = containing_table(&error.path, field).first() else {
                return unknown_section(error, field, toml_sources);
            };
            let suggestion = suggest_key(field, expected);
            let (span, src) = locate(error, Some(section), field, toml_sources);
            ConfigError::UnknownKey {
                help: unknown_key_help(section, suggestion.as_deref(), expected, from_env),
                section: Some(section.clone()),
                key: field.clone(),
                suggestion,
                span,
                src,
            }
        }
        Kind::InvalidType(found, expected) => {
            let key = error.path.join(".");
            ConfigError::InvalidType {
                help: default_hint(&error.path, defaults, from_env),
                key,
                found: found.to_string(),
                expected: expected.to_string(),
            }
        }
        Kind::MissingField(field) => {
            let mut path = error.path.clone();
            path.push(field.to_string());
            ConfigError::MissingKey {
                help: default_hint(&path, defaults, from_env),
                key: path.join("."),
            }
        }
        _ => ConfigError::Other(error.to_string()),
    }
}

/// Path of the table holding `field`; figment reports unknown keys with the
/// key itself appended.
fn containing_table<'a>(path: &'a [String], field: &str) -> &'a [String] {
    match path.split_last() {
        Some((last, parent)) if last == field => parent,
        _ => path,
    }
}

fn unknown_section(
    error: &FigmentError,
    section: &str,
    toml_sources: &[(String, String)],
) -> ConfigError {
    let suggestion = suggest_key(section, SECTIONS);
    let help = match &suggestion {
        Some(s) => format!("did you mean `[{s}]`? Sections: {}", SECTIONS.join(", ")),
        None => format!("sections: {}", SECTIONS.join(", ")),
    };
    let (span, src) = locate(error, None, &format!("[{section}]"), toml_sources);
    ConfigError::UnknownSection {
        section: section.to_string(),
        suggestion,
        help,
        span,
        src,
    }
}

fn unknown_key_help(
    section: &str,
    suggestion: Option<&str>,
    expected: &[&str],
    from_env: bool,
) -> String {
    let mut help = match suggestion {
        Some(s) if from_env => format!("did you mean {}?", env_var_name(section, s)),
        Some(s) => format!("did you mean `{s}`?"),
        None => String::new(),
    };
    if !help.is_empty() {
        help.push(' ');
    }
    help.push_str(&format!("[{section}] accepts: {}", expected.join(", ")));
    help
}

/// Help for a key whose value was wrong or absent: its default, and the
/// variable to set when the bad value came from the environment.
fn default_hint(
    path: &[String],
    defaults: Option<&toml::Value>,
    from_env: bool,
) -> Option<String> {
    let [section, key] = path else {
        return None;
    };
    let default = defaults
        .and_then(|d| d.get(section.as_str()))
        .and_then(|s| s.get(key.as_str()))
        .map(|value| format!("default is `{key} = {value}`"));
    let env = from_env.then(|| format!("check {}", env_var_name(section, key)));
    match (default, env) {
        (Some(d), Some(e)) => Some(format!("{d}; {e}")),
        (d, e) => d.or(e),
    }
}

fn is_env_error(error: &FigmentError) -> bool {
    error
        .metadata
        .as_ref()
        .is_some_and(|m| m.name.contains("environment"))
}

/// Span of `needle` in whichever config file produced `error`.
fn locate(
    error: &FigmentError,
    section: Option<&str>,
    needle: &str,
    toml_sources: &[(String, String)],
) -> (Option<SourceSpan>, Option<NamedSource<String>>) {
    let source = error.metadata.as_ref().and_then(|m| m.source.as_ref());
    let Some(figment::Source::File(path)) = source else {
        return (None, None);
    };
    let path = path.display().to_string();
    toml_sources
        .iter()
        .find(|(p, _)| *p == path)
        .and_then(|(p, content)| {
            let offset = find_key_offset(content, section, needle)?;
            Some((
                Some(SourceSpan::new(offset.into(), needle.len())),
                Some(NamedSource::new(p, content.clone())),
            ))
        })
        .unwrap_or((None, None))
}

/// Byte offset of `key` at the start of a line inside `[section]`.
///
/// The search ends at the next table header. With `section = None` only the
/// lines before the first header are searched, unless `key` is itself a
/// header such as `[telegram]`.
pub fn find_key_offset(content: &str, section: Option<&str>, key: &str) -> Option<usize> {
    let mut current: Option<&str> = None;
    let mut offset = 0;
    for line in content.split_inclusive('\n') {
        let trimmed = line.trim_start();
        let indent = line.len() - trimmed.len();
        if trimmed.starts_with('[') {
            if trimmed.starts_with(key) {
                return Some(offset + indent);
            }
            current = trimmed
                .trim_end()
                .strip_prefix('[')
                .and_then(|h| h.strip_suffix(']'))
                .map(str::trim);
        } else if current == section {
            if let Some(rest) = trimmed.strip_prefix(key) {
                if rest.trim_start().starts_with('=') {
                    return Some(offset + indent);
                }
            }
        }
        offset += line.len();
    }
    None
}

/// Closest valid key by Jaro-Winkler similarity, if any is close enough.
pub fn suggest_key(unknown: &str, valid_keys: &[&str]) -> Option<String> {
    valid_keys
        .iter()
        .map(|key| (strsim::jaro_winkler(unknown, key), *key))
        .filter(|(score, _)| *score > SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, key)| key.to_string())
}

/// Print each error to stderr with miette's graphical renderer.
pub fn render_errors(errors: &[ConfigError]) {
    let handler = miette::GraphicalReportHandler::new();
    for error in errors {
        let mut out = String::new();
        match handler.render_report(&mut out, error) {
            Ok(()) => eprint!("{out}"),
            Err(_) => eprintln!("error: {error}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_config_from_str;

    fn errors_for(toml: &str) -> Vec<ConfigError> {
        let err = load_config_from_str(toml).unwrap_err();
        figment_to_config_errors(err, &[("<inline>".to_string(), toml.to_string())])
    }

    #[test]
    fn suggests_close_gateway_key() {
        let valid = &["host", "port", "verify_token", "worker_count"];
        assert_eq!(suggest_key("prot", valid), Some("port".to_string()));
        assert_eq!(
            suggest_key("verfy_token", valid),
            Some("verify_token".to_string())
        );
        assert_eq!(suggest_key("qqqqqq", valid), None);
    }

    #[test]
    fn env_names_follow_the_loader_prefix() {
        assert_eq!(
            env_var_name("vault", "encryption_key"),
            "AUTODM_VAULT_ENCRYPTION_KEY"
        );
        assert_eq!(env_var_name("gateway", "port"), "AUTODM_GATEWAY_PORT");
    }

    #[test]
    fn key_offset_stays_inside_its_section() {
        let content = "[service]\nprot = 1\n\n[gateway]\nhost = \"x\"\nprot = 8080\n\n[vault]\n";
        let offset = find_key_offset(content, Some("gateway"), "prot").unwrap();
        assert!(offset > content.find("[gateway]").unwrap());
        assert_eq!(&content[offset..offset + 4], "prot");

        assert_eq!(find_key_offset(content, Some("vault"), "prot"), None);
        assert_eq!(
            find_key_offset(content, None, "[vault]"),
            content.find("[vault]")
        );
    }

    #[test]
    fn key_offset_requires_an_assignment() {
        let content = "[gateway]\nports = 1\nport = 2\n";
        let offset = find_key_offset(content, Some("gateway"), "port").unwrap();
        assert_eq!(&content[offset..], "port = 2\n");
    }

    #[test]
    fn unknown_key_lists_its_section() {
        let errors = errors_for("[scheduler]\nmax_atempts = 4\n");
        let [ConfigError::UnknownKey {
            section,
            key,
            suggestion,
            help,
            span,
            ..
        }] = errors.as_slice()
        else {
            panic!("expected one UnknownKey, got {errors:?}");
        };
        assert_eq!(section.as_deref(), Some("scheduler"));
        assert_eq!(key, "max_atempts");
        assert_eq!(suggestion.as_deref(), Some("max_attempts"));
        assert!(help.starts_with("did you mean `max_attempts`?"), "{help}");
        assert!(help.contains("[scheduler] accepts:"), "{help}");
        assert!(help.contains("token_refresh_window_days"), "{help}");
        assert!(span.is_none());
    }

    #[test]
    fn unknown_section_suggests_a_section() {
        let errors = errors_for("[schedular]\nenabled = false\n");
        let [ConfigError::UnknownSection {
            section,
            suggestion,
            ..
        }] = errors.as_slice()
        else {
            panic!("expected one UnknownSection, got {errors:?}");
        };
        assert_eq!(section, "schedular");
        assert_eq!(suggestion.as_deref(), Some("scheduler"));
    }

    #[test]
    fn wrong_type_shows_the_default() {
        let errors = errors_for("[gateway]\nport = \"eighty\"\n");
        let [ConfigError::InvalidType { key, help, .. }] = errors.as_slice() else {
            panic!("expected one InvalidType, got {errors:?}");
        };
        assert_eq!(key, "gateway.port");
        assert_eq!(help.as_deref(), Some("default is `port = 3000`"));
    }

    #[test]
    fn env_help_names_the_variable() {
        let valid = &["host", "verify_token"];
        let help = unknown_key_help("gateway", Some("verify_token"), valid, true);
        assert!(
            help.starts_with("did you mean AUTODM_GATEWAY_VERIFY_TOKEN?"),
            "{help}"
        );
    }

    #[test]
    fn vault_key_failure_points_at_generate_key() {
        let error = ConfigError::invalid("vault.encryption_key", "must be 64 hex characters");
        let ConfigError::Validation { help, .. } = &error else {
            panic!("expected Validation");
        };
        assert!(help.as_deref().unwrap_or_default().contains("autodm generate-key"));
        assert_eq!(
            error.to_string(),
            "invalid `vault.encryption_key`: must be 64 hex characters"
        );
    }
}
