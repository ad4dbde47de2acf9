// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Messaging platform API trait (Instagram Graph API, mocks in tests).

use async_trait::async_trait;

use crate::error::{AutodmError, DispatchError};
use crate::types::{Attachment, PageGrant, RemoteMedia, TokenGrant};

/// Outbound calls the pipeline makes against the messaging platform.
///
/// Tokens are passed in per call as plaintext borrowed from a freshly
/// decrypted secret; implementations must not retain them.
#[async_trait]
pub trait MessagingApi: Send + Sync + 'static {
    /// Sends a text DM from `page_id` to `recipient_id`. Returns the provider message id.
    async fn send_text(
        &self,
        page_id: &str,
        page_token: &str,
        recipient_id: &str,
        text: &str,
    ) -> Result<String, DispatchError>;

    /// Sends one attachment as its own message. Returns the provider message id.
    async fn send_attachment(
        &self,
        page_id: &str,
        page_token: &str,
        recipient_id: &str,
        attachment: &Attachment,
    ) -> Result<String, DispatchError>;

    /// Exchanges a still-valid long-lived user token for a refreshed one.
    async fn exchange_user_token(&self, user_token: &str) -> Result<TokenGrant, AutodmError>;

    /// Lists the pages the user manages, each with its page-scoped token.
    async fn list_pages(&self, user_token: &str) -> Result<Vec<PageGrant>, AutodmError>;

    /// Lists recent posts of a business account.
    async fn list_media(
        &self,
        account_id: &str,
        page_token: &str,
    ) -> Result<Vec<RemoteMedia>, AutodmError>;
}
