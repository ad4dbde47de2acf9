// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Encryption of access tokens into the `nonceHex:ciphertextHex` storage form.

use autodm_core::AutodmError;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

use crate::crypto::{self, NONCE_LEN};

/// Environment variable consulted when no key is present in configuration.
pub const ENCRYPTION_KEY_ENV_VAR: &str = "AUTODM_VAULT_ENCRYPTION_KEY";

/// Seals and opens channel credentials with the service-wide AES key.
///
/// Debug output never includes key material.
#[derive(Clone)]
pub struct CredentialCipher {
    key: Zeroizing<[u8; 32]>,
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl CredentialCipher {
    /// Build a cipher from a 64-character hex key.
    pub fn from_hex(key_hex: &str) -> Result<Self, AutodmError> {
        let bytes = Zeroizing::new(
            hex::decode(key_hex.trim())
                .map_err(|e| AutodmError::Config(format!("encryption key is not hex: {e}")))?,
        );
        let key: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            AutodmError::Config(format!(
                "encryption key must be 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self {
            key: Zeroizing::new(key),
        })
    }

    /// Build a cipher from configuration, falling back to
    /// [`ENCRYPTION_KEY_ENV_VAR`].
    pub fn from_config_or_env(configured: Option<&str>) -> Result<Self, AutodmError> {
        if let Some(key) = configured.filter(|k| !k.trim().is_empty()) {
            return Self::from_hex(key);
        }
        match std::env::var(ENCRYPTION_KEY_ENV_VAR) {
            Ok(key) if !key.trim().is_empty() => Self::from_hex(&key),
            _ => Err(AutodmError::Config(format!(
                "no encryption key configured; set vault.encryption_key or {ENCRYPTION_KEY_ENV_VAR}"
            ))),
        }
    }

    /// Build a cipher around a fresh random key. Returns the hex form so it
    /// can be written to configuration.
    pub fn generate() -> Result<(Self, SecretString), AutodmError> {
        let key = Zeroizing::new(crypto::generate_random_key()?);
        let encoded = SecretString::from(hex::encode(*key));
        Ok((Self { key }, encoded))
    }

    /// Encrypt a token for storage.
    pub fn encrypt(&self, plaintext: &SecretString) -> Result<String, AutodmError> {
        let (ciphertext, nonce) = crypto::seal(&self.key, plaintext.expose_secret().as_bytes())?;
        Ok(format!("{}:{}", hex::encode(nonce), hex::encode(ciphertext)))
    }

    /// Decrypt a stored `nonceHex:ciphertextHex` value.
    pub fn decrypt(&self, stored: &str) -> Result<SecretString, AutodmError> {
        let (nonce_hex, ciphertext_hex) = stored
            .split_once(':')
            .ok_or_else(|| AutodmError::Vault("stored credential is malformed".to_string()))?;

        let nonce_vec = hex::decode(nonce_hex)
            .map_err(|_| AutodmError::Vault("credential nonce is not hex".to_string()))?;
        let nonce: [u8; NONCE_LEN] = nonce_vec
            .as_slice()
            .try_into()
            .map_err(|_| AutodmError::Vault("credential nonce has wrong length".to_string()))?;
        let ciphertext = hex::decode(ciphertext_hex)
            .map_err(|_| AutodmError::Vault("credential ciphertext is not hex".to_string()))?;

        let plaintext = Zeroizing::new(crypto::open(&self.key, &nonce, &ciphertext)?);
        let text = std::str::from_utf8(&plaintext)
            .map_err(|_| AutodmError::Vault("decrypted credential is not UTF-8".to_string()))?;
        Ok(SecretString::from(text.to_string()))
    }
}

/// Shorten a secret for log output: first and last four characters.
pub fn mask_secret(value: &str) -> String {
    if value.len() < 10 || !value.is_ascii() {
        return "****".to_string();
    }
    format!("{}...{}", &value[..4], &value[value.len() - 4..])
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn stored_form_is_two_hex_parts() {
        let cipher = CredentialCipher::from_hex(KEY).unwrap();
        let stored = cipher
            .encrypt(&SecretString::from("EAAGpagetoken".to_string()))
            .unwrap();
        let (nonce, body) = stored.split_once(':').unwrap();
        assert_eq!(nonce.len(), NONCE_LEN * 2);
        assert!(body.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(
            cipher.decrypt(&stored).unwrap().expose_secret(),
            "EAAGpagetoken"
        );
    }

    #[test]
    fn key_must_be_32_bytes() {
        assert!(matches!(
            CredentialCipher::from_hex("abcd"),
            Err(AutodmError::Config(_))
        ));
        assert!(CredentialCipher::from_hex("zz").is_err());
    }

    #[test]
    fn other_key_cannot_decrypt() {
        let (a, _) = CredentialCipher::generate().unwrap();
        let (b, _) = CredentialCipher::generate().unwrap();
        let stored = a.encrypt(&SecretString::from("token".to_string())).unwrap();
        assert!(matches!(b.decrypt(&stored), Err(AutodmError::Vault(_))));
    }

    #[test]
    fn generated_hex_round_trips_through_from_hex() {
        let (cipher, hex_key) = CredentialCipher::generate().unwrap();
        let reloaded = CredentialCipher::from_hex(hex_key.expose_secret()).unwrap();
        let stored = cipher.encrypt(&SecretString::from("abc".to_string())).unwrap();
        assert_eq!(reloaded.decrypt(&stored).unwrap().expose_secret(), "abc");
    }

    #[test]
    fn malformed_values_are_rejected() {
        let cipher = CredentialCipher::from_hex(KEY).unwrap();
        for bad in ["", "no-separator", "zz:00", "0011:zz", "00:0011"] {
            assert!(cipher.decrypt(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn debug_redacts_key() {
        let cipher = CredentialCipher::from_hex(KEY).unwrap();
        let rendered = format!("{cipher:?}");
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("0102"));
    }

    #[test]
    fn configured_key_wins() {
        assert!(CredentialCipher::from_config_or_env(Some(KEY)).is_ok());
    }

    #[test]
    fn mask_secret_keeps_edges() {
        assert_eq!(mask_secret("EAAGabcdefghijklmn"), "EAAG...klmn");
        assert_eq!(mask_secret("short"), "****");
    }
}
