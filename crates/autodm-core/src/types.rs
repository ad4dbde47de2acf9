// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain records shared by storage, engine, and gateway crates.
//!
//! Enumerated fields are persisted as their snake_case string form. Timestamps
//! are persisted as UTC text in [`TIMESTAMP_FORMAT`], which sorts lexically in
//! chronological order, so range predicates can be evaluated in SQL.

use chrono::{DateTime, NaiveDateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::AutodmError;

/// Text format of every persisted timestamp.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Render a timestamp in the persisted text form.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a persisted timestamp.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, AutodmError> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| AutodmError::Storage {
            source: format!("invalid timestamp `{raw}`: {e}").into(),
        })
}

// --- Channel ---

/// Health of a channel's stored credentials.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Error,
    RequiresReconnect,
}

/// A connected social account and its encrypted credentials.
///
/// Token fields hold `ivHex:encryptedHex` ciphertext, never plaintext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub id: String,
    pub platform: String,
    /// Instagram business account id named by inbound webhooks.
    pub platform_account_id: String,
    /// Facebook page the business account is linked to. Required for sending.
    pub page_id: Option<String>,
    pub encrypted_page_token: Option<String>,
    /// Legacy generic token from channels connected before page tokens were stored.
    pub encrypted_access_token: Option<String>,
    pub encrypted_user_token: Option<String>,
    pub token_expires_at: Option<String>,
    pub user_token_expires_at: Option<String>,
    pub connection_status: ConnectionStatus,
    pub created_at: String,
    pub updated_at: String,
}

/// Re-encrypted credentials written back after a token refresh.
#[derive(Debug, Clone)]
pub struct CredentialUpdate {
    pub encrypted_user_token: String,
    pub user_token_expires_at: Option<String>,
    pub encrypted_page_token: String,
    pub token_expires_at: Option<String>,
}

// --- Automation rules ---

/// Lifecycle state of a rule. Only `Active` rules are evaluated.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    Active,
    Paused,
    Draft,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Fires on every comment.
    NewComment,
    /// Fires only when the comment contains one of the configured keywords.
    KeywordComment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub kind: TriggerKind,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub exclude_keywords: Vec<String>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
    Video,
    Audio,
    File,
}

/// Media sent as a follow-up message after the text DM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseConfig {
    /// Message body with `{{var}}` placeholders.
    pub message_template: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub delay_seconds: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deduplication {
    pub enabled: bool,
    pub window_hours: u32,
}

impl Default for Deduplication {
    fn default() -> Self {
        Self {
            enabled: false,
            window_hours: 24,
        }
    }
}

/// Running counters maintained as a side effect of processing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleStats {
    pub total_triggered: i64,
    pub total_sent: i64,
    pub total_failed: i64,
    pub total_deduped: i64,
    pub last_triggered_at: Option<String>,
    pub last_sent_at: Option<String>,
}

/// Trigger/response configuration for one channel, optionally scoped to one post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutomationRule {
    pub id: String,
    pub channel_id: String,
    /// `None` applies the rule to every post on the channel.
    pub media_id: Option<String>,
    pub name: String,
    pub status: RuleStatus,
    pub trigger: Trigger,
    pub response: ResponseConfig,
    pub deduplication: Deduplication,
    /// Maximum `sent` DMs per local calendar day.
    pub daily_limit: u32,
    pub stats: RuleStats,
    pub created_at: String,
    pub updated_at: String,
}

/// Relative counter increments applied to a rule in one statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsUpdate {
    pub triggered: bool,
    pub deduped: bool,
    pub sent: bool,
    pub failed: bool,
    pub last_triggered_at: Option<String>,
    pub last_sent_at: Option<String>,
}

// --- Audit log ---

/// Outcome recorded for one (rule, comment) evaluation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Queued,
    Sent,
    Failed,
    RateLimited,
    Deduped,
    KeywordFiltered,
}

impl LogStatus {
    /// Terminal statuses are never updated after insert.
    pub fn is_terminal(self) -> bool {
        !matches!(self, LogStatus::Queued)
    }
}

/// One audit row. Only `queued` rows ever change, and only once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutomationLog {
    pub id: String,
    pub rule_id: String,
    pub channel_id: String,
    pub comment_id: String,
    pub commenter_id: String,
    pub commenter_username: Option<String>,
    pub media_id: String,
    pub comment_text: String,
    pub message: Option<String>,
    pub status: LogStatus,
    /// Why a `keyword_filtered` row was filtered (`no_keyword_match`, `excluded`).
    pub filter_reason: Option<String>,
    pub provider_message_id: Option<String>,
    pub error_message: Option<String>,
    pub response_time_ms: Option<i64>,
    pub created_at: String,
    pub sent_at: Option<String>,
}

impl AutomationLog {
    /// Build a fresh log row for `comment` evaluated against `rule`.
    pub fn for_comment(
        rule: &AutomationRule,
        comment: &CommentEvent,
        status: LogStatus,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            rule_id: rule.id.clone(),
            channel_id: rule.channel_id.clone(),
            comment_id: comment.comment_id.clone(),
            commenter_id: comment.commenter_id.clone(),
            commenter_username: comment.commenter_username.clone(),
            media_id: comment.media_id.clone(),
            comment_text: comment.text.clone(),
            message: None,
            status,
            filter_reason: None,
            provider_message_id: None,
            error_message: None,
            response_time_ms: None,
            created_at: format_timestamp(created_at),
            sent_at: None,
        }
    }
}

// --- Inbound comment ---

/// A comment event extracted from an inbound webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentEvent {
    pub comment_id: String,
    pub text: String,
    pub commenter_id: String,
    pub commenter_username: Option<String>,
    /// Post the comment was left on.
    pub media_id: String,
}

// --- Deferred jobs ---

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    SendDm,
    SyncMedia,
    RefreshToken,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Payload of a delayed DM send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendDmPayload {
    pub channel_id: String,
    pub recipient_id: String,
    pub message: String,
    pub rule_id: String,
    pub log_id: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Typed job payload, persisted as JSON next to the job kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    SendDm(SendDmPayload),
    SyncMedia { channel_id: String },
    RefreshToken { channel_id: String },
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::SendDm(_) => JobKind::SendDm,
            JobPayload::SyncMedia { .. } => JobKind::SyncMedia,
            JobPayload::RefreshToken { .. } => JobKind::RefreshToken,
        }
    }

    pub fn channel_id(&self) -> &str {
        match self {
            JobPayload::SendDm(p) => &p.channel_id,
            JobPayload::SyncMedia { channel_id } | JobPayload::RefreshToken { channel_id } => {
                channel_id
            }
        }
    }
}

/// A durably persisted unit of work to run no earlier than `execute_after`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredJob {
    pub id: i64,
    pub kind: JobKind,
    pub channel_id: String,
    pub payload: JobPayload,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub execute_after: String,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

/// Result of sweeping `processing` jobs whose worker went quiet.
///
/// Every released job is charged one attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaleRelease {
    /// Jobs returned to `pending`.
    pub requeued: usize,
    /// Jobs with no attempts left, now `failed`.
    pub abandoned: Vec<DeferredJob>,
}

// --- Media cache ---

/// Cached post metadata used to fill `{{post_caption}}` and `{{post_link}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    pub media_id: String,
    pub channel_id: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub permalink: Option<String>,
    pub synced_at: String,
}

// --- Upstream credential grants ---

/// A refreshed user token returned by the OAuth exchange.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: SecretString,
    /// Lifetime in seconds, when the platform reports one.
    pub expires_in: Option<i64>,
}

/// One page from the user's page list, with its page-scoped token.
#[derive(Debug, Clone)]
pub struct PageGrant {
    pub page_id: String,
    pub access_token: SecretString,
    pub instagram_account_id: Option<String>,
}

/// Post metadata as returned by the platform, before caching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMedia {
    pub media_id: String,
    pub caption: Option<String>,
    pub permalink: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn timestamps_roundtrip_and_sort_lexically() {
        let earlier = parse_timestamp("2026-01-01T09:00:00.000Z").unwrap();
        let later = earlier + chrono::Duration::milliseconds(1500);
        let (a, b) = (format_timestamp(earlier), format_timestamp(later));
        assert_eq!(a, "2026-01-01T09:00:00.000Z");
        assert_eq!(b, "2026-01-01T09:00:01.500Z");
        assert!(a < b);
        assert_eq!(parse_timestamp(&b).unwrap(), later);
    }

    #[test]
    fn malformed_timestamp_is_a_storage_error() {
        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(AutodmError::Storage { .. })
        ));
    }

    #[test]
    fn enums_use_snake_case_text() {
        assert_eq!(LogStatus::KeywordFiltered.to_string(), "keyword_filtered");
        assert_eq!(LogStatus::from_str("rate_limited").unwrap(), LogStatus::RateLimited);
        assert_eq!(TriggerKind::KeywordComment.to_string(), "keyword_comment");
        assert_eq!(JobKind::from_str("refresh_token").unwrap(), JobKind::RefreshToken);
        assert_eq!(
            ConnectionStatus::RequiresReconnect.to_string(),
            "requires_reconnect"
        );
    }

    #[test]
    fn job_payload_is_tagged_json() {
        let payload = JobPayload::RefreshToken {
            channel_id: "ch-1".into(),
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(json, r#"{"type":"refresh_token","channel_id":"ch-1"}"#);
        assert_eq!(payload.kind(), JobKind::RefreshToken);
        assert_eq!(payload.channel_id(), "ch-1");
    }

    #[test]
    fn only_queued_logs_are_mutable() {
        assert!(!LogStatus::Queued.is_terminal());
        for status in [
            LogStatus::Sent,
            LogStatus::Failed,
            LogStatus::RateLimited,
            LogStatus::Deduped,
            LogStatus::KeywordFiltered,
        ] {
            assert!(status.is_terminal());
        }
    }
}
