// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Audit log writes, dedup lookups, and daily counts.

use autodm_core::types::AutomationLog;
use autodm_core::AutodmError;
use rusqlite::{params, OptionalExtension};

use crate::database::{map_tr_err, Database};
use crate::queries::enum_column;

const LOG_COLUMNS: &str = "id, rule_id, channel_id, comment_id, commenter_id, commenter_username,
     media_id, comment_text, message, status, filter_reason, provider_message_id,
     error_message, response_time_ms, created_at, sent_at";

fn row_to_log(row: &rusqlite::Row<'_>) -> rusqlite::Result<AutomationLog> {
    Ok(AutomationLog {
        id: row.get(0)?,
        rule_id: row.get(1)?,
        channel_id: row.get(2)?,
        comment_id: row.get(3)?,
        commenter_id: row.get(4)?,
        commenter_username: row.get(5)?,
        media_id: row.get(6)?,
        comment_text: row.get(7)?,
        message: row.get(8)?,
        status: enum_column(row, 9)?,
        filter_reason: row.get(10)?,
        provider_message_id: row.get(11)?,
        error_message: row.get(12)?,
        response_time_ms: row.get(13)?,
        created_at: row.get(14)?,
        sent_at: row.get(15)?,
    })
}

pub async fn insert_log(db: &Database, log: &AutomationLog) -> Result<(), AutodmError> {
    let l = log.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO automation_logs (id, rule_id, channel_id, comment_id, commenter_id,
                     commenter_username, media_id, comment_text, message, status, filter_reason,
                     provider_message_id, error_message, response_time_ms, created_at, sent_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    l.id,
                    l.rule_id,
                    l.channel_id,
                    l.comment_id,
                    l.commenter_id,
                    l.commenter_username,
                    l.media_id,
                    l.comment_text,
                    l.message,
                    l.status.to_string(),
                    l.filter_reason,
                    l.provider_message_id,
                    l.error_message,
                    l.response_time_ms,
                    l.created_at,
                    l.sent_at,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_log(db: &Database, id: &str) -> Result<Option<AutomationLog>, AutodmError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {LOG_COLUMNS} FROM automation_logs WHERE id = ?1"),
                params![id],
                row_to_log,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// All log rows written for one inbound comment, oldest first.
pub async fn list_for_comment(
    db: &Database,
    comment_id: &str,
) -> Result<Vec<AutomationLog>, AutodmError> {
    let comment_id = comment_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {LOG_COLUMNS} FROM automation_logs
                 WHERE comment_id = ?1
                 ORDER BY created_at ASC, rowid ASC"
            ))?;
            let rows = stmt.query_map(params![comment_id], row_to_log)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Whether the commenter already received (or is queued to receive) a DM
/// from this rule on this channel since `since`.
pub async fn has_recent_delivery(
    db: &Database,
    rule_id: &str,
    commenter_id: &str,
    channel_id: &str,
    since: &str,
) -> Result<bool, AutodmError> {
    let rule_id = rule_id.to_string();
    let commenter_id = commenter_id.to_string();
    let channel_id = channel_id.to_string();
    let since = since.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT EXISTS(
                     SELECT 1 FROM automation_logs
                     WHERE rule_id = ?1
                       AND commenter_id = ?2
                       AND channel_id = ?3
                       AND status IN ('sent', 'queued')
                       AND created_at >= ?4
                 )",
                params![rule_id, commenter_id, channel_id, since],
                |row| row.get(0),
            )
        })
        .await
        .map_err(map_tr_err)
}

pub async fn count_sent_since(
    db: &Database,
    rule_id: &str,
    since: &str,
) -> Result<i64, AutodmError> {
    let rule_id = rule_id.to_string();
    let since = since.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM automation_logs
                 WHERE rule_id = ?1 AND status = 'sent' AND created_at >= ?2",
                params![rule_id, since],
                |row| row.get(0),
            )
        })
        .await
        .map_err(map_tr_err)
}

/// `queued` -> `sent`. Returns false when the row is missing or already terminal.
pub async fn mark_sent(
    db: &Database,
    id: &str,
    sent_at: &str,
    response_time_ms: i64,
    provider_message_id: &str,
) -> Result<bool, AutodmError> {
    let id = id.to_string();
    let sent_at = sent_at.to_string();
    let provider_message_id = provider_message_id.to_string();
    let affected = db
        .connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE automation_logs SET
                     status = 'sent',
                     sent_at = ?1,
                     response_time_ms = ?2,
                     provider_message_id = ?3
                 WHERE id = ?4 AND status = 'queued'",
                params![sent_at, response_time_ms, provider_message_id, id],
            )
        })
        .await
        .map_err(map_tr_err)?;
    Ok(affected == 1)
}

/// `queued` -> `failed`. Returns false when the row is missing or already terminal.
pub async fn mark_failed(
    db: &Database,
    id: &str,
    error_message: &str,
    response_time_ms: i64,
) -> Result<bool, AutodmError> {
    let id = id.to_string();
    let error_message = error_message.to_string();
    let affected = db
        .connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE automation_logs SET
                     status = 'failed',
                     error_message = ?1,
                     response_time_ms = ?2
                 WHERE id = ?3 AND status = 'queued'",
                params![error_message, response_time_ms, id],
            )
        })
        .await
        .map_err(map_tr_err)?;
    Ok(affected == 1)
}
