// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Background comment processing.
//!
//! Webhook handlers push onto a bounded queue and acknowledge at once;
//! a fixed pool of workers drains it. Workers exit once every sender is
//! dropped and the queue is empty.

use std::sync::Arc;

use autodm_engine::{telemetry, CommentProcessor};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::webhook::InboundComment;

/// Create the bounded comment queue.
pub fn comment_queue(
    capacity: usize,
) -> (mpsc::Sender<InboundComment>, mpsc::Receiver<InboundComment>) {
    mpsc::channel(capacity.max(1))
}

/// Spawn `count` workers sharing one receiver.
pub fn spawn_workers(
    processor: Arc<CommentProcessor>,
    rx: mpsc::Receiver<InboundComment>,
    count: usize,
) -> Vec<JoinHandle<()>> {
    let rx = Arc::new(Mutex::new(rx));
    (0..count.max(1))
        .map(|worker| {
            let processor = Arc::clone(&processor);
            let rx = Arc::clone(&rx);
            tokio::spawn(async move {
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(inbound) = next else {
                        debug!(worker, "comment queue closed");
                        break;
                    };
                    process(&processor, inbound).await;
                }
            })
        })
        .collect()
}

/// Run one comment through the processor, logging propagated errors.
pub(crate) async fn process(
    processor: &CommentProcessor,
    inbound: InboundComment,
) -> Option<autodm_engine::ProcessingResult> {
    match processor
        .process_comment(&inbound.platform_account_id, &inbound.comment)
        .await
    {
        Ok(result) => Some(result),
        Err(e) => {
            telemetry::record_comment("failed");
            error!(
                account_id = inbound.platform_account_id.as_str(),
                comment_id = inbound.comment.comment_id.as_str(),
                error = %e,
                "comment processing failed"
            );
            None
        }
    }
}
