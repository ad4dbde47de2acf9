// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock messaging platform for deterministic testing.
//!
//! `MockMessenger` implements [`MessagingApi`] by recording every outbound
//! call. Failures are scripted through FIFO queues: each queued error is
//! returned by the next matching call, after which calls succeed again.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use autodm_core::types::{Attachment, PageGrant, RemoteMedia, TokenGrant};
use autodm_core::{AutodmError, DispatchError, MessagingApi};
use secrecy::SecretString;
use tokio::sync::Mutex;

/// Body of one recorded outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentBody {
    Text(String),
    Attachment(Attachment),
}

/// One recorded outbound message call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub page_id: String,
    pub page_token: String,
    pub recipient_id: String,
    pub body: SentBody,
    pub message_id: String,
}

#[derive(Default)]
struct State {
    sent: Vec<SentMessage>,
    text_failures: VecDeque<DispatchError>,
    attachment_failures: VecDeque<DispatchError>,
    exchange_failures: VecDeque<AutodmError>,
    exchanged_tokens: Vec<String>,
    refreshed_token: Option<(String, Option<i64>)>,
    pages: Vec<(String, String, Option<String>)>,
    media: Vec<RemoteMedia>,
    next_id: u64,
}

/// A messaging platform that records calls instead of sending them.
#[derive(Clone, Default)]
pub struct MockMessenger {
    state: Arc<Mutex<State>>,
}

impl MockMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `send_text` call with `error`.
    pub async fn fail_next_text(&self, error: DispatchError) {
        self.state.lock().await.text_failures.push_back(error);
    }

    /// Fail the next `send_attachment` call with `error`.
    pub async fn fail_next_attachment(&self, error: DispatchError) {
        self.state.lock().await.attachment_failures.push_back(error);
    }

    /// Fail the next `exchange_user_token` call with `error`.
    pub async fn fail_next_exchange(&self, error: AutodmError) {
        self.state.lock().await.exchange_failures.push_back(error);
    }

    /// Token returned by `exchange_user_token`, with its lifetime in seconds.
    pub async fn set_refreshed_user_token(&self, token: &str, expires_in: Option<i64>) {
        self.state.lock().await.refreshed_token = Some((token.to_string(), expires_in));
    }

    /// Add a page to the list returned by `list_pages`.
    pub async fn add_page(&self, page_id: &str, page_token: &str, instagram_account_id: Option<&str>) {
        self.state.lock().await.pages.push((
            page_id.to_string(),
            page_token.to_string(),
            instagram_account_id.map(str::to_string),
        ));
    }

    /// Add a post to the list returned by `list_media`.
    pub async fn add_media(&self, media_id: &str, caption: Option<&str>, permalink: Option<&str>) {
        self.state.lock().await.media.push(RemoteMedia {
            media_id: media_id.to_string(),
            caption: caption.map(str::to_string),
            permalink: permalink.map(str::to_string),
        });
    }

    /// Every successful outbound message, in call order.
    pub async fn sent(&self) -> Vec<SentMessage> {
        self.state.lock().await.sent.clone()
    }

    /// Successful text messages only.
    pub async fn sent_texts(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .sent
            .iter()
            .filter_map(|m| match &m.body {
                SentBody::Text(text) => Some(text.clone()),
                SentBody::Attachment(_) => None,
            })
            .collect()
    }

    /// User tokens passed to `exchange_user_token`, in call order.
    pub async fn exchanged_tokens(&self) -> Vec<String> {
        self.state.lock().await.exchanged_tokens.clone()
    }

    async fn record(
        &self,
        page_id: &str,
        page_token: &str,
        recipient_id: &str,
        body: SentBody,
    ) -> String {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let message_id = format!("mid.mock.{}", state.next_id);
        state.sent.push(SentMessage {
            page_id: page_id.to_string(),
            page_token: page_token.to_string(),
            recipient_id: recipient_id.to_string(),
            body,
            message_id: message_id.clone(),
        });
        message_id
    }
}

#[async_trait]
impl MessagingApi for MockMessenger {
    async fn send_text(
        &self,
        page_id: &str,
        page_token: &str,
        recipient_id: &str,
        text: &str,
    ) -> Result<String, DispatchError> {
        if let Some(error) = self.state.lock().await.text_failures.pop_front() {
            return Err(error);
        }
        Ok(self
            .record(page_id, page_token, recipient_id, SentBody::Text(text.to_string()))
            .await)
    }

    async fn send_attachment(
        &self,
        page_id: &str,
        page_token: &str,
        recipient_id: &str,
        attachment: &Attachment,
    ) -> Result<String, DispatchError> {
        if let Some(error) = self.state.lock().await.attachment_failures.pop_front() {
            return Err(error);
        }
        Ok(self
            .record(
                page_id,
                page_token,
                recipient_id,
                SentBody::Attachment(attachment.clone()),
            )
            .await)
    }

    async fn exchange_user_token(&self, user_token: &str) -> Result<TokenGrant, AutodmError> {
        let mut state = self.state.lock().await;
        state.exchanged_tokens.push(user_token.to_string());
        if let Some(error) = state.exchange_failures.pop_front() {
            return Err(error);
        }
        let (token, expires_in) = state
            .refreshed_token
            .clone()
            .unwrap_or_else(|| (format!("{user_token}-refreshed"), Some(5_184_000)));
        Ok(TokenGrant {
            access_token: SecretString::from(token),
            expires_in,
        })
    }

    async fn list_pages(&self, _user_token: &str) -> Result<Vec<PageGrant>, AutodmError> {
        let state = self.state.lock().await;
        Ok(state
            .pages
            .iter()
            .map(|(page_id, token, account)| PageGrant {
                page_id: page_id.clone(),
                access_token: SecretString::from(token.clone()),
                instagram_account_id: account.clone(),
            })
            .collect())
    }

    async fn list_media(
        &self,
        _account_id: &str,
        _page_token: &str,
    ) -> Result<Vec<RemoteMedia>, AutodmError> {
        Ok(self.state.lock().await.media.clone())
    }
}
