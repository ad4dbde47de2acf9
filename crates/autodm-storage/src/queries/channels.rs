// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel records and credential updates.

use autodm_core::types::{Channel, ConnectionStatus, CredentialUpdate};
use autodm_core::AutodmError;
use rusqlite::{params, OptionalExtension};

use crate::database::{map_tr_err, Database};
use crate::queries::enum_column;

const CHANNEL_COLUMNS: &str = "id, platform, platform_account_id, page_id, encrypted_page_token,
     encrypted_access_token, encrypted_user_token, token_expires_at, user_token_expires_at,
     connection_status, created_at, updated_at";

fn row_to_channel(row: &rusqlite::Row<'_>) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: row.get(0)?,
        platform: row.get(1)?,
        platform_account_id: row.get(2)?,
        page_id: row.get(3)?,
        encrypted_page_token: row.get(4)?,
        encrypted_access_token: row.get(5)?,
        encrypted_user_token: row.get(6)?,
        token_expires_at: row.get(7)?,
        user_token_expires_at: row.get(8)?,
        connection_status: enum_column(row, 9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

pub async fn insert_channel(db: &Database, channel: &Channel) -> Result<(), AutodmError> {
    let c = channel.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO channels (id, platform, platform_account_id, page_id,
                     encrypted_page_token, encrypted_access_token, encrypted_user_token,
                     token_expires_at, user_token_expires_at, connection_status,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    c.id,
                    c.platform,
                    c.platform_account_id,
                    c.page_id,
                    c.encrypted_page_token,
                    c.encrypted_access_token,
                    c.encrypted_user_token,
                    c.token_expires_at,
                    c.user_token_expires_at,
                    c.connection_status.to_string(),
                    c.created_at,
                    c.updated_at,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_channel(db: &Database, id: &str) -> Result<Option<Channel>, AutodmError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE id = ?1"),
                params![id],
                row_to_channel,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Look up the channel an inbound webhook entry refers to.
pub async fn find_by_account(
    db: &Database,
    platform_account_id: &str,
) -> Result<Option<Channel>, AutodmError> {
    let account = platform_account_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {CHANNEL_COLUMNS} FROM channels
                     WHERE platform_account_id = ?1
                     ORDER BY created_at ASC LIMIT 1"
                ),
                params![account],
                row_to_channel,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Store refreshed credentials and mark the channel connected.
pub async fn update_credentials(
    db: &Database,
    id: &str,
    update: &CredentialUpdate,
    now: &str,
) -> Result<(), AutodmError> {
    let channel_id = id.to_string();
    let id = channel_id.clone();
    let u = update.clone();
    let now = now.to_string();
    let affected = db
        .connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE channels SET
                     encrypted_user_token = ?1,
                     user_token_expires_at = ?2,
                     encrypted_page_token = ?3,
                     token_expires_at = ?4,
                     connection_status = 'connected',
                     updated_at = ?5
                 WHERE id = ?6",
                params![
                    u.encrypted_user_token,
                    u.user_token_expires_at,
                    u.encrypted_page_token,
                    u.token_expires_at,
                    now,
                    id,
                ],
            )
        })
        .await
        .map_err(map_tr_err)?;
    if affected == 0 {
        return Err(AutodmError::NotFound {
            entity: "channel",
            id: channel_id,
        });
    }
    Ok(())
}

pub async fn set_connection_status(
    db: &Database,
    id: &str,
    status: ConnectionStatus,
    now: &str,
) -> Result<(), AutodmError> {
    let id = id.to_string();
    let now = now.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE channels SET connection_status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.to_string(), now, id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Connected channels with a page token expiring before `before`.
pub async fn list_expiring_before(
    db: &Database,
    before: &str,
) -> Result<Vec<Channel>, AutodmError> {
    let before = before.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CHANNEL_COLUMNS} FROM channels
                 WHERE connection_status = 'connected'
                   AND token_expires_at IS NOT NULL
                   AND token_expires_at < ?1
                 ORDER BY token_expires_at ASC"
            ))?;
            let rows = stmt.query_map(params![before], row_to_channel)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}
