// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.
//!
//! Sets up routes, middleware, and shared state for the webhook endpoints.

use std::sync::Arc;

use autodm_core::AutodmError;
use autodm_engine::CommentProcessor;
use axum::{routing::get, Router};
use secrecy::SecretString;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::webhook::InboundComment;

/// Route the platform delivers comment webhooks to.
pub const WEBHOOK_PATH: &str = "/webhooks/instagram";

/// Health state for the liveness and metrics endpoints.
#[derive(Clone)]
pub struct HealthState {
    /// Process start time for uptime calculation.
    pub start_time: std::time::Instant,
    /// Optional Prometheus metrics render function.
    pub prometheus_render: Option<Arc<dyn Fn() -> String + Send + Sync>>,
}

impl HealthState {
    pub fn new(prometheus_render: Option<Arc<dyn Fn() -> String + Send + Sync>>) -> Self {
        Self {
            start_time: std::time::Instant::now(),
            prometheus_render,
        }
    }
}

/// How accepted comments reach the processor.
#[derive(Clone)]
pub enum Ingest {
    /// Processed inside the webhook request.
    Inline,
    /// Pushed onto the worker queue; the request is acknowledged at once.
    Queued(mpsc::Sender<InboundComment>),
}

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub processor: Arc<CommentProcessor>,
    pub ingest: Ingest,
    /// Token the subscription handshake must echo. `None` rejects every
    /// handshake.
    pub verify_token: Option<String>,
    /// App secret for body signatures. `None` disables the check.
    pub app_secret: Option<Arc<SecretString>>,
    pub health: HealthState,
}

/// Gateway server configuration (mirrors `GatewayConfig` from autodm-config).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Build the gateway router:
/// - GET/POST /webhooks/instagram
/// - GET /health
/// - GET /metrics
pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route(
            WEBHOOK_PATH,
            get(handlers::verify_subscription).post(handlers::receive_webhook),
        )
        .route("/health", get(handlers::get_health))
        .route("/metrics", get(handlers::get_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the gateway until `cancel` fires, then drain in-flight requests.
pub async fn start_server(
    config: &ServerConfig,
    state: GatewayState,
    cancel: CancellationToken,
) -> Result<(), AutodmError> {
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AutodmError::Config(format!("failed to bind gateway to {addr}: {e}")))?;

    tracing::info!("gateway listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| AutodmError::Internal(format!("gateway server error: {e}")))?;

    tracing::info!("gateway stopped");
    Ok(())
}
