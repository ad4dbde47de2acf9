// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapter traits at the pipeline's I/O seams.
//!
//! Both traits use `#[async_trait]` so implementations can be shared as
//! `Arc<dyn Trait>` between the comment processor, dispatcher, and scheduler.

pub mod messaging;
pub mod storage;

pub use messaging::MessagingApi;
pub use storage::AutomationStore;
