// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedded database migrations using refinery.
//!
//! SQL files under `migrations/` are compiled into the binary and applied on
//! every [`Database::open`](crate::Database::open).

use autodm_core::AutodmError;

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Run all pending migrations against the given connection.
pub fn run_migrations(conn: &mut rusqlite::Connection) -> Result<(), AutodmError> {
    let report = embedded::migrations::runner()
        .run(conn)
        .map_err(|e| AutodmError::Storage {
            source: Box::new(e),
        })?;
    for migration in report.applied_migrations() {
        tracing::debug!(name = migration.name(), version = migration.version(), "migration applied");
    }
    Ok(())
}
