// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Credential encryption for connected channels.
//!
//! Page and user access tokens are stored as `nonceHex:ciphertextHex`, sealed
//! with AES-256-GCM under a single service key supplied through configuration.
//! Decrypted tokens only ever live inside [`secrecy::SecretString`].

pub mod cipher;
pub mod crypto;
pub mod prompt;

pub use cipher::{mask_secret, CredentialCipher, ENCRYPTION_KEY_ENV_VAR};
pub use prompt::read_secret;
