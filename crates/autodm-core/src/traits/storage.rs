// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Storage trait for channels, rules, the audit log, deferred jobs, and the media cache.

use async_trait::async_trait;

use crate::error::AutodmError;
use crate::types::{
    AutomationLog, AutomationRule, Channel, ConnectionStatus, CredentialUpdate, DeferredJob,
    JobKind, JobPayload, MediaItem, StaleRelease, StatsUpdate,
};

/// Durable state shared by every worker process.
///
/// All cross-worker coordination (dedup windows, daily limits, job claims)
/// goes through this trait; implementations hold no in-memory state that
/// would diverge between processes.
#[async_trait]
pub trait AutomationStore: Send + Sync + 'static {
    // --- Channels ---

    async fn insert_channel(&self, channel: &Channel) -> Result<(), AutodmError>;

    async fn get_channel(&self, id: &str) -> Result<Option<Channel>, AutodmError>;

    async fn find_channel_by_account(
        &self,
        platform_account_id: &str,
    ) -> Result<Option<Channel>, AutodmError>;

    async fn update_channel_credentials(
        &self,
        id: &str,
        update: &CredentialUpdate,
    ) -> Result<(), AutodmError>;

    async fn set_connection_status(
        &self,
        id: &str,
        status: ConnectionStatus,
    ) -> Result<(), AutodmError>;

    /// Connected channels whose page token expires before `before`.
    async fn list_channels_expiring_before(
        &self,
        before: &str,
    ) -> Result<Vec<Channel>, AutodmError>;

    // --- Rules ---

    async fn insert_rule(&self, rule: &AutomationRule) -> Result<(), AutodmError>;

    async fn get_rule(&self, id: &str) -> Result<Option<AutomationRule>, AutodmError>;

    /// Active rules for the channel that apply to every post or to `media_id`.
    async fn list_active_rules(
        &self,
        channel_id: &str,
        media_id: &str,
    ) -> Result<Vec<AutomationRule>, AutodmError>;

    async fn update_rule_stats(&self, rule_id: &str, update: &StatsUpdate)
        -> Result<(), AutodmError>;

    // --- Audit log ---

    async fn insert_log(&self, log: &AutomationLog) -> Result<(), AutodmError>;

    async fn get_log(&self, id: &str) -> Result<Option<AutomationLog>, AutodmError>;

    async fn list_logs_for_comment(
        &self,
        comment_id: &str,
    ) -> Result<Vec<AutomationLog>, AutodmError>;

    /// Whether a `sent` or `queued` log exists for the commenter, rule and
    /// channel created at or after `since`.
    async fn has_recent_delivery(
        &self,
        rule_id: &str,
        commenter_id: &str,
        channel_id: &str,
        since: &str,
    ) -> Result<bool, AutodmError>;

    /// Number of `sent` logs for the rule created at or after `since`.
    async fn count_sent_since(&self, rule_id: &str, since: &str) -> Result<i64, AutodmError>;

    /// Transitions a `queued` log to `sent`. Returns false if the row was not queued.
    async fn mark_log_sent(
        &self,
        id: &str,
        sent_at: &str,
        response_time_ms: i64,
        provider_message_id: &str,
    ) -> Result<bool, AutodmError>;

    /// Transitions a `queued` log to `failed`. Returns false if the row was not queued.
    async fn mark_log_failed(
        &self,
        id: &str,
        error_message: &str,
        response_time_ms: i64,
    ) -> Result<bool, AutodmError>;

    // --- Deferred jobs ---

    /// Persists a pending job. Returns the job id.
    async fn enqueue_job(
        &self,
        payload: &JobPayload,
        execute_after: &str,
        max_attempts: u32,
    ) -> Result<i64, AutodmError>;

    async fn get_job(&self, id: i64) -> Result<Option<DeferredJob>, AutodmError>;

    /// Pending jobs due at `now`, oldest first, at most `limit`.
    async fn list_due_jobs(&self, now: &str, limit: u32) -> Result<Vec<DeferredJob>, AutodmError>;

    /// Moves a job from `pending` to `processing`. Returns false if another
    /// worker claimed it first.
    async fn claim_job(&self, id: i64, now: &str) -> Result<bool, AutodmError>;

    async fn complete_job(&self, id: i64, completed_at: &str) -> Result<(), AutodmError>;

    /// Returns a job to `pending` with a new attempt count and due time.
    async fn retry_job(
        &self,
        id: i64,
        attempts: u32,
        execute_after: &str,
        error: &str,
    ) -> Result<(), AutodmError>;

    /// Marks a job permanently `failed`.
    async fn fail_job(&self, id: i64, attempts: u32, error: &str) -> Result<(), AutodmError>;

    /// Whether a pending or processing job of `kind` exists for the channel.
    async fn has_open_job(&self, kind: JobKind, channel_id: &str) -> Result<bool, AutodmError>;

    /// Sweeps `processing` jobs untouched since `before`. Each one is charged
    /// an attempt; jobs that still have attempts left go back to `pending`,
    /// the rest are failed.
    async fn release_stale_jobs(&self, before: &str) -> Result<StaleRelease, AutodmError>;

    // --- Media cache ---

    async fn upsert_media(&self, items: &[MediaItem]) -> Result<(), AutodmError>;

    async fn get_media(&self, media_id: &str) -> Result<Option<MediaItem>, AutodmError>;
}
