// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Instagram Graph API client.
//!
//! [`GraphClient`] implements [`autodm_core::MessagingApi`]: sending DMs
//! through the page messaging endpoint, exchanging long-lived user tokens,
//! listing pages, and listing a business account's media. Failed calls are
//! classified into [`autodm_core::DispatchErrorKind`] so callers can decide
//! whether to retry.

pub mod classify;
pub mod client;
pub mod types;

pub use classify::classify_response;
pub use client::{GraphClient, DEFAULT_GRAPH_API_BASE};
