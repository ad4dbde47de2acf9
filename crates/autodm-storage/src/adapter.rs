// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the [`AutomationStore`] trait.

use async_trait::async_trait;
use autodm_core::types::{
    format_timestamp, AutomationLog, AutomationRule, Channel, ConnectionStatus, CredentialUpdate,
    DeferredJob, JobKind, JobPayload, MediaItem, StaleRelease, StatsUpdate,
};
use autodm_core::{AutodmError, AutomationStore};
use tracing::debug;

use crate::database::Database;
use crate::queries;

/// SQLite-backed automation store.
///
/// Delegates every operation to the typed query modules. Cloning shares the
/// same underlying connection.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Open the database at `path` and wrap it.
    pub async fn open(path: &str, wal_mode: bool) -> Result<Self, AutodmError> {
        let db = Database::open_with(path, wal_mode).await?;
        debug!(path, "SQLite store initialized");
        Ok(Self { db })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Round-trip a trivial statement through the connection.
    pub async fn health_check(&self) -> Result<(), AutodmError> {
        self.db
            .connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await
            .map_err(crate::database::map_tr_err)
    }

    pub async fn close(self) -> Result<(), AutodmError> {
        self.db.close().await
    }
}

fn now() -> String {
    format_timestamp(chrono::Utc::now())
}

#[async_trait]
impl AutomationStore for SqliteStore {
    async fn insert_channel(&self, channel: &Channel) -> Result<(), AutodmError> {
        queries::channels::insert_channel(&self.db, channel).await
    }

    async fn get_channel(&self, id: &str) -> Result<Option<Channel>, AutodmError> {
        queries::channels::get_channel(&self.db, id).await
    }

    async fn find_channel_by_account(
        &self,
        platform_account_id: &str,
    ) -> Result<Option<Channel>, AutodmError> {
        queries::channels::find_by_account(&self.db, platform_account_id).await
    }

    async fn update_channel_credentials(
        &self,
        id: &str,
        update: &CredentialUpdate,
    ) -> Result<(), AutodmError> {
        queries::channels::update_credentials(&self.db, id, update, &now()).await
    }

    async fn set_connection_status(
        &self,
        id: &str,
        status: ConnectionStatus,
    ) -> Result<(), AutodmError> {
        queries::channels::set_connection_status(&self.db, id, status, &now()).await
    }

    async fn list_channels_expiring_before(
        &self,
        before: &str,
    ) -> Result<Vec<Channel>, AutodmError> {
        queries::channels::list_expiring_before(&self.db, before).await
    }

    async fn insert_rule(&self, rule: &AutomationRule) -> Result<(), AutodmError> {
        queries::rules::insert_rule(&self.db, rule).await
    }

    async fn get_rule(&self, id: &str) -> Result<Option<AutomationRule>, AutodmError> {
        queries::rules::get_rule(&self.db, id).await
    }

    async fn list_active_rules(
        &self,
        channel_id: &str,
        media_id: &str,
    ) -> Result<Vec<AutomationRule>, AutodmError> {
        queries::rules::list_active_rules(&self.db, channel_id, media_id).await
    }

    async fn update_rule_stats(
        &self,
        rule_id: &str,
        update: &StatsUpdate,
    ) -> Result<(), AutodmError> {
        queries::rules::update_stats(&self.db, rule_id, update, &now()).await
    }

    async fn insert_log(&self, log: &AutomationLog) -> Result<(), AutodmError> {
        queries::logs::insert_log(&self.db, log).await
    }

    async fn get_log(&self, id: &str) -> Result<Option<AutomationLog>, AutodmError> {
        queries::logs::get_log(&self.db, id).await
    }

    async fn list_logs_for_comment(
        &self,
        comment_id: &str,
    ) -> Result<Vec<AutomationLog>, AutodmError> {
        queries::logs::list_for_comment(&self.db, comment_id).await
    }

    async fn has_recent_delivery(
        &self,
        rule_id: &str,
        commenter_id: &str,
        channel_id: &str,
        since: &str,
    ) -> Result<bool, AutodmError> {
        queries::logs::has_recent_delivery(&self.db, rule_id, commenter_id, channel_id, since)
            .await
    }

    async fn count_sent_since(&self, rule_id: &str, since: &str) -> Result<i64, AutodmError> {
        queries::logs::count_sent_since(&self.db, rule_id, since).await
    }

    async fn mark_log_sent(
        &self,
        id: &str,
        sent_at: &str,
        response_time_ms: i64,
        provider_message_id: &str,
    ) -> Result<bool, AutodmError> {
        queries::logs::mark_sent(&self.db, id, sent_at, response_time_ms, provider_message_id)
            .await
    }

    async fn mark_log_failed(
        &self,
        id: &str,
        error_message: &str,
        response_time_ms: i64,
    ) -> Result<bool, AutodmError> {
        queries::logs::mark_failed(&self.db, id, error_message, response_time_ms).await
    }

    async fn enqueue_job(
        &self,
        payload: &JobPayload,
        execute_after: &str,
        max_attempts: u32,
    ) -> Result<i64, AutodmError> {
        queries::jobs::enqueue(&self.db, payload, execute_after, max_attempts, &now()).await
    }

    async fn get_job(&self, id: i64) -> Result<Option<DeferredJob>, AutodmError> {
        queries::jobs::get_job(&self.db, id).await
    }

    async fn list_due_jobs(&self, now: &str, limit: u32) -> Result<Vec<DeferredJob>, AutodmError> {
        queries::jobs::list_due(&self.db, now, limit).await
    }

    async fn claim_job(&self, id: i64, now: &str) -> Result<bool, AutodmError> {
        queries::jobs::claim(&self.db, id, now).await
    }

    async fn complete_job(&self, id: i64, completed_at: &str) -> Result<(), AutodmError> {
        queries::jobs::complete(&self.db, id, completed_at).await
    }

    async fn retry_job(
        &self,
        id: i64,
        attempts: u32,
        execute_after: &str,
        error: &str,
    ) -> Result<(), AutodmError> {
        queries::jobs::retry(&self.db, id, attempts, execute_after, error, &now()).await
    }

    async fn fail_job(&self, id: i64, attempts: u32, error: &str) -> Result<(), AutodmError> {
        queries::jobs::fail(&self.db, id, attempts, error, &now()).await
    }

    async fn has_open_job(&self, kind: JobKind, channel_id: &str) -> Result<bool, AutodmError> {
        queries::jobs::has_open(&self.db, kind, channel_id).await
    }

    async fn release_stale_jobs(&self, before: &str) -> Result<StaleRelease, AutodmError> {
        queries::jobs::release_stale(&self.db, before, &now()).await
    }

    async fn upsert_media(&self, items: &[MediaItem]) -> Result<(), AutodmError> {
        queries::media::upsert(&self.db, items).await
    }

    async fn get_media(&self, media_id: &str) -> Result<Option<MediaItem>, AutodmError> {
        queries::media::get(&self.db, media_id).await
    }
}
