// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reading tokens from an operator without echoing them.

use std::io::{BufRead, IsTerminal};

use autodm_core::AutodmError;
use secrecy::SecretString;

/// Read a secret from the terminal (no echo) or, when stdin is piped, from the
/// first line of stdin.
pub fn read_secret(label: &str) -> Result<SecretString, AutodmError> {
    let raw = if std::io::stdin().is_terminal() {
        eprint!("{label}: ");
        rpassword::read_password()
            .map_err(|e| AutodmError::Vault(format!("failed to read {label}: {e}")))?
    } else {
        let mut line = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|e| AutodmError::Vault(format!("failed to read {label}: {e}")))?;
        line
    };
    normalize_secret(label, raw)
}

fn normalize_secret(label: &str, raw: String) -> Result<SecretString, AutodmError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AutodmError::Vault(format!("empty {label} not allowed")));
    }
    Ok(SecretString::from(trimmed.to_string()))
}
