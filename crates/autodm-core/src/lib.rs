// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the autodm comment-to-DM pipeline.
//!
//! Defines the domain records (channels, rules, audit logs, deferred jobs),
//! the shared error type, and the two adapter traits every other crate is
//! written against: [`AutomationStore`] and [`MessagingApi`].

pub mod error;
pub mod traits;
pub mod types;

pub use error::{AutodmError, DispatchError, DispatchErrorKind};
pub use traits::{AutomationStore, MessagingApi};
