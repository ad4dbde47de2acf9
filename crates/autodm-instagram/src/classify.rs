// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mapping of Graph API failures onto [`DispatchErrorKind`].

use autodm_core::{DispatchError, DispatchErrorKind};

use crate::types::GraphErrorEnvelope;

/// Classify a non-success Graph API response.
///
/// Provider error codes take precedence over the HTTP status because the
/// Graph API reports most failures as 400 regardless of cause.
pub fn classify_response(status: u16, body: &str) -> DispatchError {
    let Ok(envelope) = serde_json::from_str::<GraphErrorEnvelope>(body) else {
        let kind = classify_status(status);
        return DispatchError::new(kind, format!("Graph API returned {status}: {}", truncate(body)));
    };

    let err = envelope.error;
    let kind = match (err.code, err.error_subcode) {
        (Some(code), subcode) => classify_code(code, subcode).unwrap_or_else(|| classify_status(status)),
        (None, _) => classify_status(status),
    };

    let message = match &err.type_ {
        Some(type_) => format!("{type_}: {}", err.message),
        None => err.message.clone(),
    };
    let dispatch = DispatchError::new(kind, message);
    match err.code {
        Some(code) => dispatch.with_code(code),
        None => dispatch,
    }
}

fn classify_code(code: i64, subcode: Option<i64>) -> Option<DispatchErrorKind> {
    let kind = match (code, subcode) {
        // Expired, revoked or otherwise invalid access token.
        (190 | 102 | 463 | 467, _) => DispatchErrorKind::Auth,
        // Application, user and page level throttling.
        (4 | 17 | 32 | 613 | 80002 | 80006, _) => DispatchErrorKind::RateLimited,
        (_, Some(2018001 | 2018034 | 2018108)) => DispatchErrorKind::InvalidRecipient,
        (551, _) => DispatchErrorKind::InvalidRecipient,
        (10 | 200..=299, _) => DispatchErrorKind::Rejected,
        // Unknown or temporarily unavailable.
        (1 | 2, _) => DispatchErrorKind::Upstream,
        (100, _) => DispatchErrorKind::Rejected,
        _ => return None,
    };
    Some(kind)
}

fn classify_status(status: u16) -> DispatchErrorKind {
    match status {
        401 => DispatchErrorKind::Auth,
        429 => DispatchErrorKind::RateLimited,
        500..=599 => DispatchErrorKind::Upstream,
        _ => DispatchErrorKind::Rejected,
    }
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(200) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
