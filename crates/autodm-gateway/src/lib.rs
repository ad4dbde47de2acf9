// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Instagram webhook gateway.
//!
//! Verifies subscription handshakes and delivery signatures, extracts comment
//! events, and hands them to the comment processor either inline or through
//! a bounded worker queue.

pub mod handlers;
pub mod server;
pub mod signature;
pub mod webhook;
pub mod worker;

pub use server::{
    build_router, start_server, GatewayState, HealthState, Ingest, ServerConfig, WEBHOOK_PATH,
};
pub use webhook::{extract_comments, InboundComment, WebhookPayload};
pub use worker::{comment_queue, spawn_workers};
