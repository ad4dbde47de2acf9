// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for the Instagram Graph API.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use autodm_core::types::{Attachment, PageGrant, RemoteMedia, TokenGrant};
use autodm_core::{AutodmError, DispatchError, DispatchErrorKind, MessagingApi};
use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::classify::classify_response;
use crate::types::{
    AccessTokenResponse, AttachmentPayload, MediaResponse, OutboundAttachment, OutboundMessage,
    PagesResponse, Recipient, SendMessageRequest, SendMessageResponse,
};

/// Versioned Graph API root used when none is configured.
pub const DEFAULT_GRAPH_API_BASE: &str = "https://graph.facebook.com/v21.0";

/// Upper bound on media pages followed in one listing.
const MAX_MEDIA_PAGES: usize = 20;

/// Graph API client.
///
/// Every request carries the configured timeout; an elapsed timeout is
/// reported as [`DispatchErrorKind::Timeout`].
#[derive(Clone)]
pub struct GraphClient {
    client: reqwest::Client,
    base_url: String,
    app_id: Option<String>,
    app_secret: Option<SecretString>,
}

impl std::fmt::Debug for GraphClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphClient")
            .field("base_url", &self.base_url)
            .field("app_id", &self.app_id)
            .field("app_secret", &self.app_secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl GraphClient {
    /// Build a client against `base_url` (for example [`DEFAULT_GRAPH_API_BASE`]).
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AutodmError> {
        let mut headers = HeaderMap::new();
        headers.insert("accept", HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| AutodmError::Upstream {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            app_id: None,
            app_secret: None,
        })
    }

    /// Attach app credentials, required for token exchange.
    pub fn with_app_credentials(mut self, app_id: String, app_secret: SecretString) -> Self {
        self.app_id = Some(app_id);
        self.app_secret = Some(app_secret);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_message(
        &self,
        page_id: &str,
        page_token: &str,
        body: &SendMessageRequest,
    ) -> Result<String, DispatchError> {
        let url = format!("{}/{page_id}/messages", self.base_url);
        let started = Instant::now();

        let response = self
            .client
            .post(&url)
            .bearer_auth(page_token)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;
        debug!(
            status = %status,
            page_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "send message response received"
        );

        if !status.is_success() {
            let err = classify_response(status.as_u16(), &text);
            warn!(status = %status, kind = %err.kind, code = ?err.code, "send message failed");
            return Err(err);
        }

        let parsed: SendMessageResponse = serde_json::from_str(&text).map_err(|e| {
            DispatchError::new(
                DispatchErrorKind::Upstream,
                format!("unexpected send response: {e}"),
            )
        })?;
        Ok(parsed.message_id)
    }

    /// GET `url` and decode a JSON body, classifying failures.
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        bearer: Option<&str>,
    ) -> Result<T, AutodmError> {
        let mut request = self.client.get(url).query(query);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(AutodmError::Dispatch(classify_response(status.as_u16(), &text)));
        }
        serde_json::from_str(&text).map_err(|e| AutodmError::Upstream {
            message: format!("unexpected response from {}: {e}", redact_url(url)),
            source: Some(Box::new(e)),
        })
    }
}

fn transport_error(e: reqwest::Error) -> DispatchError {
    if e.is_timeout() {
        DispatchError::new(DispatchErrorKind::Timeout, format!("request timed out: {e}"))
    } else {
        DispatchError::new(DispatchErrorKind::Transport, format!("HTTP request failed: {e}"))
    }
}

/// Drop the query string, which may carry tokens.
fn redact_url(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

#[async_trait]
impl MessagingApi for GraphClient {
    async fn send_text(
        &self,
        page_id: &str,
        page_token: &str,
        recipient_id: &str,
        text: &str,
    ) -> Result<String, DispatchError> {
        let body = SendMessageRequest {
            recipient: Recipient {
                id: recipient_id.to_string(),
            },
            message: OutboundMessage {
                text: Some(text.to_string()),
                attachment: None,
            },
        };
        self.post_message(page_id, page_token, &body).await
    }

    async fn send_attachment(
        &self,
        page_id: &str,
        page_token: &str,
        recipient_id: &str,
        attachment: &Attachment,
    ) -> Result<String, DispatchError> {
        let body = SendMessageRequest {
            recipient: Recipient {
                id: recipient_id.to_string(),
            },
            message: OutboundMessage {
                text: None,
                attachment: Some(OutboundAttachment {
                    kind: attachment.kind.to_string(),
                    payload: AttachmentPayload {
                        url: attachment.url.clone(),
                    },
                }),
            },
        };
        self.post_message(page_id, page_token, &body).await
    }

    async fn exchange_user_token(&self, user_token: &str) -> Result<TokenGrant, AutodmError> {
        let (Some(app_id), Some(app_secret)) = (&self.app_id, &self.app_secret) else {
            return Err(AutodmError::Config(
                "instagram.app_id and instagram.app_secret are required for token exchange"
                    .to_string(),
            ));
        };

        let url = format!("{}/oauth/access_token", self.base_url);
        let response: AccessTokenResponse = self
            .get_json(
                &url,
                &[
                    ("grant_type", "fb_exchange_token"),
                    ("client_id", app_id.as_str()),
                    ("client_secret", app_secret.expose_secret()),
                    ("fb_exchange_token", user_token),
                ],
                None,
            )
            .await?;

        Ok(TokenGrant {
            access_token: SecretString::from(response.access_token),
            expires_in: response.expires_in,
        })
    }

    async fn list_pages(&self, user_token: &str) -> Result<Vec<PageGrant>, AutodmError> {
        let url = format!("{}/me/accounts", self.base_url);
        let response: PagesResponse = self
            .get_json(
                &url,
                &[("fields", "id,name,access_token,instagram_business_account")],
                Some(user_token),
            )
            .await?;

        Ok(response
            .data
            .into_iter()
            .map(|page| PageGrant {
                page_id: page.id,
                access_token: SecretString::from(page.access_token),
                instagram_account_id: page.instagram_business_account.map(|a| a.id),
            })
            .collect())
    }

    async fn list_media(
        &self,
        account_id: &str,
        page_token: &str,
    ) -> Result<Vec<RemoteMedia>, AutodmError> {
        let first = format!("{}/{account_id}/media", self.base_url);
        let mut response: MediaResponse = self
            .get_json(&first, &[("fields", "id,caption,permalink")], Some(page_token))
            .await?;

        let mut items = Vec::new();
        for page in 1.. {
            items.extend(response.data.drain(..).map(|m| RemoteMedia {
                media_id: m.id,
                caption: m.caption,
                permalink: m.permalink,
            }));
            let next = response.paging.as_ref().and_then(|p| p.next.clone());
            match next {
                Some(next) if page < MAX_MEDIA_PAGES => {
                    response = self.get_json(&next, &[], Some(page_token)).await?;
                }
                Some(_) => {
                    warn!(account_id, pages = page, "media listing truncated");
                    break;
                }
                None => break,
            }
        }
        Ok(items)
    }
}
