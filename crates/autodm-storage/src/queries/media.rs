// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cached post metadata.

use autodm_core::types::MediaItem;
use autodm_core::AutodmError;
use rusqlite::{params, OptionalExtension};

use crate::database::{map_tr_err, Database};

/// Insert or refresh media rows in one transaction.
pub async fn upsert(db: &Database, items: &[MediaItem]) -> Result<(), AutodmError> {
    let items = items.to_vec();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO media_items (media_id, channel_id, caption, permalink, synced_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(media_id) DO UPDATE SET
                         caption = excluded.caption,
                         permalink = excluded.permalink,
                         synced_at = excluded.synced_at",
                )?;
                for item in &items {
                    stmt.execute(params![
                        item.media_id,
                        item.channel_id,
                        item.caption,
                        item.permalink,
                        item.synced_at,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get(db: &Database, media_id: &str) -> Result<Option<MediaItem>, AutodmError> {
    let media_id = media_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT media_id, channel_id, caption, permalink, synced_at
                 FROM media_items WHERE media_id = ?1",
                params![media_id],
                |row| {
                    Ok(MediaItem {
                        media_id: row.get(0)?,
                        channel_id: row.get(1)?,
                        caption: row.get(2)?,
                        permalink: row.get(3)?,
                        synced_at: row.get(4)?,
                    })
                },
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}
