// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP request handlers for the webhook gateway.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{info, warn};

use crate::server::{GatewayState, Ingest};
use crate::signature::{self, SIGNATURE_HEADER};
use crate::webhook::{self, WebhookPayload};
use crate::worker;

/// Query parameters of the subscription handshake.
#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
        .into_response()
}

/// GET /webhooks/instagram
///
/// Echoes `hub.challenge` when the mode is `subscribe` and the token matches.
pub async fn verify_subscription(
    State(state): State<GatewayState>,
    Query(query): Query<VerifyQuery>,
) -> Response {
    let expected = state.verify_token.as_deref();
    let accepted = query.mode.as_deref() == Some("subscribe")
        && expected.is_some()
        && query.verify_token.as_deref() == expected;

    match (accepted, query.challenge) {
        (true, Some(challenge)) => {
            info!("webhook subscription verified");
            (StatusCode::OK, challenge).into_response()
        }
        _ => {
            warn!(mode = ?query.mode, "webhook subscription rejected");
            StatusCode::FORBIDDEN.into_response()
        }
    }
}

/// POST /webhooks/instagram
pub async fn receive_webhook(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(secret) = &state.app_secret {
        let sig = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok());

        match sig {
            Some(sig) if signature::verify(secret.expose_secret(), &body, sig) => {}
            Some(_) => {
                warn!("invalid webhook signature");
                return StatusCode::UNAUTHORIZED.into_response();
            }
            None => {
                warn!("missing X-Hub-Signature-256 header");
                return StatusCode::UNAUTHORIZED.into_response();
            }
        }
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "unparseable webhook body");
            return error_response(StatusCode::BAD_REQUEST, "invalid webhook payload");
        }
    };

    let comments = webhook::extract_comments(&payload);
    if comments.is_empty() {
        return StatusCode::OK.into_response();
    }

    match &state.ingest {
        Ingest::Inline => {
            for inbound in comments {
                if worker::process(&state.processor, inbound).await.is_none() {
                    return error_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "comment processing failed",
                    );
                }
            }
        }
        Ingest::Queued(tx) => {
            for inbound in comments {
                match tx.try_send(inbound) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!("comment queue full, asking for redelivery");
                        return error_response(
                            StatusCode::SERVICE_UNAVAILABLE,
                            "comment queue full",
                        );
                    }
                    Err(TrySendError::Closed(_)) => {
                        return error_response(
                            StatusCode::SERVICE_UNAVAILABLE,
                            "comment workers not running",
                        );
                    }
                }
            }
        }
    }

    StatusCode::OK.into_response()
}

/// GET /health
pub async fn get_health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.health.start_time.elapsed().as_secs(),
    })
}

/// GET /metrics
///
/// Prometheus text exposition, or 404 when no recorder is installed.
pub async fn get_metrics(State(state): State<GatewayState>) -> Response {
    match &state.health.prometheus_render {
        Some(render) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
