// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for autodm integration tests.
//!
//! Provides a scripted messaging platform and a throwaway SQLite store so the
//! pipeline can be exercised end to end without network access.
//!
//! # Components
//!
//! - [`MockMessenger`] - Records outbound DMs and replays scripted failures
//! - [`TestStore`] - Temp-dir SQLite store with a random credential key and seeding helpers

pub mod harness;
pub mod mock_messenger;

pub use harness::{comment, rule, TestStore, TEST_MEDIA_ID, TEST_PAGE_ID};
pub use mock_messenger::{MockMessenger, SentBody, SentMessage};
