// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the autodm pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

/// The primary error type used across all autodm crates.
#[derive(Debug, Error)]
pub enum AutodmError {
    /// Configuration errors (invalid TOML, missing keys, bad key material).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, row decoding).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Credential encryption or decryption failure.
    #[error("vault error: {0}")]
    Vault(String),

    /// Outbound message delivery failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// The channel is missing data required to send (page id) and must be
    /// reconnected by its owner.
    #[error("channel {channel_id} needs reconnection: {reason}")]
    ChannelNeedsReconnect { channel_id: String, reason: String },

    /// Token refresh cannot proceed for this channel.
    #[error("credential error for channel {channel_id}: {message}")]
    Credential { channel_id: String, message: String },

    /// A referenced record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Upstream (Graph API) failure outside of message dispatch.
    #[error("upstream error: {message}")]
    Upstream {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AutodmError {
    /// Whether the scheduler should spend another attempt on work that failed
    /// with this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            AutodmError::Dispatch(e) => e.is_retryable(),
            AutodmError::Upstream { .. } | AutodmError::Timeout { .. } => true,
            AutodmError::Storage { .. } => true,
            AutodmError::Config(_)
            | AutodmError::Vault(_)
            | AutodmError::ChannelNeedsReconnect { .. }
            | AutodmError::Credential { .. }
            | AutodmError::NotFound { .. }
            | AutodmError::Internal(_) => false,
        }
    }
}

/// Classification of a failed outbound message call.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DispatchErrorKind {
    /// Connection refused, DNS failure, reset.
    Transport,
    /// The call exceeded the configured timeout.
    Timeout,
    /// Platform throttling.
    RateLimited,
    /// Expired or revoked access token.
    Auth,
    /// The recipient cannot be messaged.
    InvalidRecipient,
    /// Message rejected by platform policy.
    Rejected,
    /// Upstream 5xx or an unrecognised error body.
    Upstream,
}

/// Failure of a single messaging API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchError {
    pub kind: DispatchErrorKind,
    pub message: String,
    /// Provider error code, when the platform returned one.
    pub code: Option<i64>,
}

impl DispatchError {
    pub fn new(kind: DispatchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    /// Transient failures are retried through the deferred job backoff;
    /// permanent ones are recorded and dropped.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            DispatchErrorKind::Transport
                | DispatchErrorKind::Timeout
                | DispatchErrorKind::RateLimited
                | DispatchErrorKind::Upstream
        )
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "dispatch failed ({}, code {code}): {}", self.kind, self.message),
            None => write!(f, "dispatch failed ({}): {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for DispatchError {}
