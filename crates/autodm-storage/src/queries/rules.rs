// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Automation rule reads and atomic stat counters.

use autodm_core::types::{
    AutomationRule, Deduplication, ResponseConfig, RuleStats, StatsUpdate, Trigger,
};
use autodm_core::AutodmError;
use rusqlite::{params, OptionalExtension};

use crate::database::{map_tr_err, Database};
use crate::queries::{enum_column, json_column, to_json};

const RULE_COLUMNS: &str = "id, channel_id, media_id, name, status, trigger_kind, keywords,
     exclude_keywords, message_template, attachments, delay_seconds, dedup_enabled,
     dedup_window_hours, daily_limit, total_triggered, total_sent, total_failed,
     total_deduped, last_triggered_at, last_sent_at, created_at, updated_at";

fn row_to_rule(row: &rusqlite::Row<'_>) -> rusqlite::Result<AutomationRule> {
    Ok(AutomationRule {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        media_id: row.get(2)?,
        name: row.get(3)?,
        status: enum_column(row, 4)?,
        trigger: Trigger {
            kind: enum_column(row, 5)?,
            keywords: json_column(row, 6)?,
            exclude_keywords: json_column(row, 7)?,
        },
        response: ResponseConfig {
            message_template: row.get(8)?,
            attachments: json_column(row, 9)?,
            delay_seconds: row.get(10)?,
        },
        deduplication: Deduplication {
            enabled: row.get(11)?,
            window_hours: row.get(12)?,
        },
        daily_limit: row.get(13)?,
        stats: RuleStats {
            total_triggered: row.get(14)?,
            total_sent: row.get(15)?,
            total_failed: row.get(16)?,
            total_deduped: row.get(17)?,
            last_triggered_at: row.get(18)?,
            last_sent_at: row.get(19)?,
        },
        created_at: row.get(20)?,
        updated_at: row.get(21)?,
    })
}

pub async fn insert_rule(db: &Database, rule: &AutomationRule) -> Result<(), AutodmError> {
    let r = rule.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO automation_rules (id, channel_id, media_id, name, status,
                     trigger_kind, keywords, exclude_keywords, message_template, attachments,
                     delay_seconds, dedup_enabled, dedup_window_hours, daily_limit,
                     total_triggered, total_sent, total_failed, total_deduped,
                     last_triggered_at, last_sent_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                         ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)",
                params![
                    r.id,
                    r.channel_id,
                    r.media_id,
                    r.name,
                    r.status.to_string(),
                    r.trigger.kind.to_string(),
                    to_json(&r.trigger.keywords)?,
                    to_json(&r.trigger.exclude_keywords)?,
                    r.response.message_template,
                    to_json(&r.response.attachments)?,
                    r.response.delay_seconds,
                    r.deduplication.enabled,
                    r.deduplication.window_hours,
                    r.daily_limit,
                    r.stats.total_triggered,
                    r.stats.total_sent,
                    r.stats.total_failed,
                    r.stats.total_deduped,
                    r.stats.last_triggered_at,
                    r.stats.last_sent_at,
                    r.created_at,
                    r.updated_at,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_rule(db: &Database, id: &str) -> Result<Option<AutomationRule>, AutodmError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {RULE_COLUMNS} FROM automation_rules WHERE id = ?1"),
                params![id],
                row_to_rule,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Active rules for the channel that target every post or exactly `media_id`,
/// oldest first.
pub async fn list_active_rules(
    db: &Database,
    channel_id: &str,
    media_id: &str,
) -> Result<Vec<AutomationRule>, AutodmError> {
    let channel_id = channel_id.to_string();
    let media_id = media_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RULE_COLUMNS} FROM automation_rules
                 WHERE channel_id = ?1
                   AND status = 'active'
                   AND (media_id IS NULL OR media_id = ?2)
                 ORDER BY created_at ASC, id ASC"
            ))?;
            let rows = stmt.query_map(params![channel_id, media_id], row_to_rule)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Apply counter increments in one statement so concurrent workers never
/// lose an update.
pub async fn update_stats(
    db: &Database,
    rule_id: &str,
    update: &StatsUpdate,
    now: &str,
) -> Result<(), AutodmError> {
    let rule_id = rule_id.to_string();
    let u = update.clone();
    let now = now.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE automation_rules SET
                     total_triggered = total_triggered + ?1,
                     total_deduped = total_deduped + ?2,
                     total_sent = total_sent + ?3,
                     total_failed = total_failed + ?4,
                     last_triggered_at = COALESCE(?5, last_triggered_at),
                     last_sent_at = COALESCE(?6, last_sent_at),
                     updated_at = ?7
                 WHERE id = ?8",
                params![
                    i64::from(u.triggered),
                    i64::from(u.deduped),
                    i64::from(u.sent),
                    i64::from(u.failed),
                    u.last_triggered_at,
                    u.last_sent_at,
                    now,
                    rule_id,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}
