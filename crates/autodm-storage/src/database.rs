// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All statements run on tokio-rusqlite's single background thread, so one
//! `Database` per process is the only writer. Clone the handle rather than
//! opening a second connection.

use std::path::Path;

use autodm_core::AutodmError;
use tracing::{debug, info};

/// Handle to the service database.
#[derive(Clone)]
pub struct Database {
    conn: tokio_rusqlite::Connection,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Open (creating if needed) the database at `path` in WAL mode and apply
    /// pending migrations.
    pub async fn open(path: &str) -> Result<Self, AutodmError> {
        Self::open_with(path, true).await
    }

    /// Open the database, choosing whether to enable WAL journaling.
    pub async fn open_with(path: &str, wal_mode: bool) -> Result<Self, AutodmError> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| AutodmError::Storage {
                    source: Box::new(e),
                })?;
            }
        }

        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(|e| AutodmError::Storage {
                source: Box::new(e),
            })?;

        conn.call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute_batch(
                "PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;
                 PRAGMA synchronous = NORMAL;",
            )?;
            if wal_mode {
                conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            }
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;

        conn.call(|conn| -> Result<(), AutodmError> { crate::migrations::run_migrations(conn) })
            .await
            .map_err(|e| AutodmError::Storage {
                source: format!("migration failed: {e}").into(),
            })?;

        info!(path, wal_mode, "database opened");
        Ok(Self { conn })
    }

    /// The underlying tokio-rusqlite connection.
    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    /// Checkpoint the WAL and close the connection.
    pub async fn close(self) -> Result<(), AutodmError> {
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        debug!("WAL checkpoint complete");
        self.conn.close().await.map_err(|e| AutodmError::Storage {
            source: Box::new(e),
        })
    }
}

/// Convert a tokio-rusqlite error into `AutodmError::Storage`.
pub(crate) fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> AutodmError {
    AutodmError::Storage {
        source: Box::new(e),
    }
}
