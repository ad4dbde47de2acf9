// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deferred job persistence.
//!
//! A job moves `pending -> processing -> completed | failed`, or back to
//! `pending` with a later `execute_after` when a retry is scheduled. The
//! `pending -> processing` step is a conditional update, so exactly one
//! worker wins a claim.

use autodm_core::types::{DeferredJob, JobKind, JobPayload, JobStatus, StaleRelease};
use autodm_core::AutodmError;
use rusqlite::{params, OptionalExtension};

use crate::database::{map_tr_err, Database};
use crate::queries::{enum_column, json_column, to_json};

const JOB_COLUMNS: &str = "id, kind, channel_id, payload, status, attempts, max_attempts,
     execute_after, last_error, created_at, updated_at, completed_at";

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeferredJob> {
    Ok(DeferredJob {
        id: row.get(0)?,
        kind: enum_column(row, 1)?,
        channel_id: row.get(2)?,
        payload: json_column(row, 3)?,
        status: enum_column(row, 4)?,
        attempts: row.get(5)?,
        max_attempts: row.get(6)?,
        execute_after: row.get(7)?,
        last_error: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
        completed_at: row.get(11)?,
    })
}

/// Persist a pending job. Returns its id.
pub async fn enqueue(
    db: &Database,
    payload: &JobPayload,
    execute_after: &str,
    max_attempts: u32,
    now: &str,
) -> Result<i64, AutodmError> {
    let kind = payload.kind().to_string();
    let channel_id = payload.channel_id().to_string();
    let payload = payload.clone();
    let execute_after = execute_after.to_string();
    let now = now.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO deferred_jobs (kind, channel_id, payload, status, attempts,
                     max_attempts, execute_after, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'pending', 0, ?4, ?5, ?6, ?6)",
                params![kind, channel_id, to_json(&payload)?, max_attempts, execute_after, now],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_job(db: &Database, id: i64) -> Result<Option<DeferredJob>, AutodmError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {JOB_COLUMNS} FROM deferred_jobs WHERE id = ?1"),
                params![id],
                row_to_job,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Pending jobs whose `execute_after` has passed, earliest first.
pub async fn list_due(db: &Database, now: &str, limit: u32) -> Result<Vec<DeferredJob>, AutodmError> {
    let now = now.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM deferred_jobs
                 WHERE status = 'pending' AND execute_after <= ?1
                 ORDER BY execute_after ASC, id ASC
                 LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![now, limit], row_to_job)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Atomically move a job from `pending` to `processing`.
pub async fn claim(db: &Database, id: i64, now: &str) -> Result<bool, AutodmError> {
    let now = now.to_string();
    let affected = db
        .connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE deferred_jobs SET status = 'processing', updated_at = ?1
                 WHERE id = ?2 AND status = 'pending'",
                params![now, id],
            )
        })
        .await
        .map_err(map_tr_err)?;
    Ok(affected == 1)
}

pub async fn complete(db: &Database, id: i64, completed_at: &str) -> Result<(), AutodmError> {
    let completed_at = completed_at.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE deferred_jobs SET status = 'completed', completed_at = ?1, updated_at = ?1
                 WHERE id = ?2",
                params![completed_at, id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn retry(
    db: &Database,
    id: i64,
    attempts: u32,
    execute_after: &str,
    error: &str,
    now: &str,
) -> Result<(), AutodmError> {
    let execute_after = execute_after.to_string();
    let error = error.to_string();
    let now = now.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE deferred_jobs SET status = 'pending', attempts = ?1,
                     execute_after = ?2, last_error = ?3, updated_at = ?4
                 WHERE id = ?5",
                params![attempts, execute_after, error, now, id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn fail(
    db: &Database,
    id: i64,
    attempts: u32,
    error: &str,
    now: &str,
) -> Result<(), AutodmError> {
    let error = error.to_string();
    let now = now.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE deferred_jobs SET status = 'failed', attempts = ?1,
                     last_error = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![attempts, error, now, id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn has_open(db: &Database, kind: JobKind, channel_id: &str) -> Result<bool, AutodmError> {
    let kind = kind.to_string();
    let channel_id = channel_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT EXISTS(
                     SELECT 1 FROM deferred_jobs
                     WHERE kind = ?1 AND channel_id = ?2
                       AND status IN ('pending', 'processing')
                 )",
                params![kind, channel_id],
                |row| row.get(0),
            )
        })
        .await
        .map_err(map_tr_err)
}

/// Error recorded on a job whose worker stopped reporting.
pub const ABANDONED_ERROR: &str = "abandoned";

/// Sweep `processing` jobs last touched before `before`.
///
/// Covers workers that died between claim and completion. The lost run
/// counts as an attempt, so a job that keeps killing its worker still
/// exhausts `max_attempts`.
pub async fn release_stale(
    db: &Database,
    before: &str,
    now: &str,
) -> Result<StaleRelease, AutodmError> {
    let before = before.to_string();
    let now = now.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let stale: Vec<DeferredJob> = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {JOB_COLUMNS} FROM deferred_jobs
                     WHERE status = 'processing' AND updated_at < ?1
                     ORDER BY id ASC"
                ))?;
                let rows = stmt.query_map(params![before], row_to_job)?;
                rows.collect::<rusqlite::Result<_>>()?
            };

            let mut release = StaleRelease::default();
            for mut job in stale {
                job.attempts += 1;
                job.updated_at = now.clone();
                if job.attempts >= job.max_attempts {
                    tx.execute(
                        "UPDATE deferred_jobs SET status = 'failed', attempts = ?1,
                             last_error = ?2, updated_at = ?3
                         WHERE id = ?4 AND status = 'processing'",
                        params![job.attempts, ABANDONED_ERROR, now, job.id],
                    )?;
                    job.status = JobStatus::Failed;
                    job.last_error = Some(ABANDONED_ERROR.to_string());
                    release.abandoned.push(job);
                } else {
                    tx.execute(
                        "UPDATE deferred_jobs SET status = 'pending', attempts = ?1,
                             last_error = ?2, updated_at = ?3
                         WHERE id = ?4 AND status = 'processing'",
                        params![job.attempts, ABANDONED_ERROR, now, job.id],
                    )?;
                    release.requeued += 1;
                }
            }
            tx.commit()?;
            Ok(release)
        })
        .await
        .map_err(map_tr_err)
}
