// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for the autodm service.
//!
//! WAL-mode SQLite with embedded refinery migrations and a single-writer
//! connection via `tokio-rusqlite`. [`SqliteStore`] implements
//! [`autodm_core::AutomationStore`] over the typed query modules.

pub mod adapter;
pub mod database;
pub mod migrations;
pub mod queries;

pub use adapter::SqliteStore;
pub use database::Database;
