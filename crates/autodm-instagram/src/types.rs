// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Graph API request and response bodies.

use serde::{Deserialize, Serialize};

/// Body of `POST /{page_id}/messages`.
#[derive(Debug, Clone, Serialize)]
pub struct SendMessageRequest {
    pub recipient: Recipient,
    pub message: OutboundMessage,
}

#[derive(Debug, Clone, Serialize)]
pub struct Recipient {
    pub id: String,
}

/// Either `text` or `attachment` is set.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OutboundMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<OutboundAttachment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundAttachment {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: AttachmentPayload,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttachmentPayload {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageResponse {
    #[serde(default)]
    pub recipient_id: Option<String>,
    pub message_id: String,
}

/// Error envelope returned by every Graph endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphErrorEnvelope {
    pub error: GraphErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default)]
    pub type_: Option<String>,
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub error_subcode: Option<i64>,
    #[serde(default)]
    pub fbtrace_id: Option<String>,
}

/// Response of `GET /oauth/access_token`.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessTokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// Response of `GET /me/accounts`.
#[derive(Debug, Clone, Deserialize)]
pub struct PagesResponse {
    #[serde(default)]
    pub data: Vec<PageEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageEntry {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub access_token: String,
    #[serde(default)]
    pub instagram_business_account: Option<AccountRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountRef {
    pub id: String,
}

/// Response of `GET /{account_id}/media`.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaResponse {
    #[serde(default)]
    pub data: Vec<MediaEntry>,
    #[serde(default)]
    pub paging: Option<Paging>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaEntry {
    pub id: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub permalink: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Paging {
    #[serde(default)]
    pub next: Option<String>,
}
