// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Low-level AES-256-GCM seal/open operations.
//!
//! Every call to [`seal`] draws a fresh 96-bit nonce from the system CSPRNG.

use autodm_core::AutodmError;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};

/// Length of the GCM nonce in bytes.
pub const NONCE_LEN: usize = 12;

/// Length of the GCM authentication tag appended to every ciphertext.
pub const TAG_LEN: usize = 16;

fn aead_key(key: &[u8; 32]) -> Result<LessSafeKey, AutodmError> {
    let unbound = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|_| AutodmError::Vault("invalid AES-256-GCM key".to_string()))?;
    Ok(LessSafeKey::new(unbound))
}

/// Encrypt `plaintext`, returning `(ciphertext_with_tag, nonce)`.
pub fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<(Vec<u8>, [u8; NONCE_LEN]), AutodmError> {
    let key = aead_key(key)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|_| AutodmError::Vault("failed to generate random nonce".to_string()))?;

    let mut in_out = plaintext.to_vec();
    key.seal_in_place_append_tag(
        Nonce::assume_unique_for_key(nonce_bytes),
        Aad::empty(),
        &mut in_out,
    )
    .map_err(|_| AutodmError::Vault("AES-256-GCM encryption failed".to_string()))?;

    Ok((in_out, nonce_bytes))
}

/// Decrypt a ciphertext produced by [`seal`].
///
/// Fails when the key is wrong or the ciphertext or nonce was altered.
pub fn open(
    key: &[u8; 32],
    nonce_bytes: &[u8; NONCE_LEN],
    ciphertext: &[u8],
) -> Result<Vec<u8>, AutodmError> {
    let key = aead_key(key)?;

    let mut in_out = ciphertext.to_vec();
    let plaintext = key
        .open_in_place(
            Nonce::assume_unique_for_key(*nonce_bytes),
            Aad::empty(),
            &mut in_out,
        )
        .map_err(|_| {
            AutodmError::Vault("decryption failed: wrong key or corrupted data".to_string())
        })?;

    Ok(plaintext.to_vec())
}

/// Generate a random 32-byte key suitable for AES-256-GCM.
pub fn generate_random_key() -> Result<[u8; 32], AutodmError> {
    let mut key = [0u8; 32];
    SystemRandom::new()
        .fill(&mut key)
        .map_err(|_| AutodmError::Vault("failed to generate random key".to_string()))?;
    Ok(key)
}
