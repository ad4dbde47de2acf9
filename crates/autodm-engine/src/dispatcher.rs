// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound DM delivery and its audit/statistics bookkeeping.
//!
//! [`Dispatcher::send_dm`] performs the platform calls only. [`Dispatcher::deliver`]
//! wraps it for a queued audit row: success moves the row to `sent` and bumps
//! `total_sent`; a failure that will not be retried moves it to `failed` and
//! bumps `total_failed`. A row is transitioned at most once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use autodm_core::types::{format_timestamp, Attachment, Channel, SendDmPayload, StatsUpdate};
use autodm_core::{AutodmError, AutomationStore, DispatchError, DispatchErrorKind, MessagingApi};
use autodm_vault::CredentialCipher;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, error, info, warn};

use crate::telemetry;

/// Upper bound for a single platform call when none is configured.
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Result of a successful DM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReceipt {
    /// Provider id of the text message.
    pub message_id: String,
    /// Attachments that were delivered after the text.
    pub attachments_sent: usize,
}

/// Sends DMs on behalf of a channel.
pub struct Dispatcher {
    store: Arc<dyn AutomationStore>,
    messenger: Arc<dyn MessagingApi>,
    cipher: CredentialCipher,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn AutomationStore>,
        messenger: Arc<dyn MessagingApi>,
        cipher: CredentialCipher,
    ) -> Self {
        Self {
            store,
            messenger,
            cipher,
            timeout: DEFAULT_DISPATCH_TIMEOUT,
        }
    }

    /// Bound each platform call by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send `message` to `recipient_id`, then each attachment as a follow-up.
    ///
    /// The page token is decrypted for this call only. Attachment failures are
    /// logged and do not fail the send.
    pub async fn send_dm(
        &self,
        channel: &Channel,
        recipient_id: &str,
        message: &str,
        attachments: &[Attachment],
    ) -> Result<DispatchReceipt, AutodmError> {
        let page_id = channel
            .page_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AutodmError::ChannelNeedsReconnect {
                channel_id: channel.id.clone(),
                reason: "no page id on record".to_string(),
            })?;
        let token = decrypt_page_token(&self.cipher, channel)?;

        let message_id = match self
            .bounded(self.messenger.send_text(
                page_id,
                token.expose_secret(),
                recipient_id,
                message,
            ))
            .await
        {
            Ok(id) => {
                telemetry::record_dispatch("ok");
                id
            }
            Err(e) => {
                telemetry::record_dispatch(&e.kind.to_string());
                return Err(e.into());
            }
        };

        let mut attachments_sent = 0;
        for attachment in attachments {
            match self
                .bounded(self.messenger.send_attachment(
                    page_id,
                    token.expose_secret(),
                    recipient_id,
                    attachment,
                ))
                .await
            {
                Ok(_) => attachments_sent += 1,
                Err(e) => warn!(
                    channel_id = channel.id.as_str(),
                    kind = %attachment.kind,
                    error = %e,
                    "attachment send failed"
                ),
            }
        }

        Ok(DispatchReceipt {
            message_id,
            attachments_sent,
        })
    }

    /// Deliver a queued DM described by `payload`, loading its channel first.
    ///
    /// `final_attempt` says whether a failure ends delivery for good. When it
    /// does not (and the error is retryable) the audit row stays `queued` so a
    /// later attempt can still mark it `sent`.
    pub async fn deliver(
        &self,
        payload: &SendDmPayload,
        final_attempt: bool,
    ) -> Result<DispatchReceipt, AutodmError> {
        let lookup = self
            .store
            .get_channel(&payload.channel_id)
            .await
            .and_then(|found| {
                found.ok_or_else(|| AutodmError::NotFound {
                    entity: "channel",
                    id: payload.channel_id.clone(),
                })
            });
        match lookup {
            Ok(channel) => self.deliver_to(&channel, payload, final_attempt).await,
            Err(e) if final_attempt || !e.is_retryable() => {
                self.record_failed(payload, &e, 0).await?;
                warn!(
                    channel_id = payload.channel_id.as_str(),
                    log_id = payload.log_id.as_str(),
                    error = %e,
                    "DM abandoned before send"
                );
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Mark the audit row of a DM whose job was given up as `failed`.
    pub async fn abandon(
        &self,
        payload: &SendDmPayload,
        reason: &AutodmError,
    ) -> Result<(), AutodmError> {
        self.record_failed(payload, reason, 0).await
    }

    /// [`deliver`](Self::deliver) for an already loaded channel.
    pub async fn deliver_to(
        &self,
        channel: &Channel,
        payload: &SendDmPayload,
        final_attempt: bool,
    ) -> Result<DispatchReceipt, AutodmError> {
        let started = Instant::now();
        let result = self
            .send_dm(
                channel,
                &payload.recipient_id,
                &payload.message,
                &payload.attachments,
            )
            .await;
        let elapsed_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

        match result {
            Ok(receipt) => {
                // The DM is out; bookkeeping errors must not trigger a resend.
                if let Err(e) = self.record_sent(payload, &receipt, elapsed_ms).await {
                    error!(
                        log_id = payload.log_id.as_str(),
                        rule_id = payload.rule_id.as_str(),
                        error = %e,
                        "DM sent but audit update failed"
                    );
                }
                info!(
                    channel_id = channel.id.as_str(),
                    rule_id = payload.rule_id.as_str(),
                    log_id = payload.log_id.as_str(),
                    message_id = receipt.message_id.as_str(),
                    elapsed_ms,
                    "DM sent"
                );
                Ok(receipt)
            }
            Err(e) if final_attempt || !e.is_retryable() => {
                self.record_failed(payload, &e, elapsed_ms).await?;
                warn!(
                    channel_id = channel.id.as_str(),
                    rule_id = payload.rule_id.as_str(),
                    log_id = payload.log_id.as_str(),
                    error = %e,
                    "DM failed"
                );
                Err(e)
            }
            Err(e) => {
                debug!(
                    log_id = payload.log_id.as_str(),
                    error = %e,
                    "DM failed, audit row left queued for retry"
                );
                Err(e)
            }
        }
    }

    async fn record_sent(
        &self,
        payload: &SendDmPayload,
        receipt: &DispatchReceipt,
        elapsed_ms: i64,
    ) -> Result<(), AutodmError> {
        let now = format_timestamp(chrono::Utc::now());
        let transitioned = self
            .store
            .mark_log_sent(&payload.log_id, &now, elapsed_ms, &receipt.message_id)
            .await?;
        if !transitioned {
            warn!(
                log_id = payload.log_id.as_str(),
                "audit row was no longer queued, leaving it unchanged"
            );
            return Ok(());
        }
        self.store
            .update_rule_stats(
                &payload.rule_id,
                &StatsUpdate {
                    sent: true,
                    last_sent_at: Some(now),
                    ..StatsUpdate::default()
                },
            )
            .await
    }

    async fn record_failed(
        &self,
        payload: &SendDmPayload,
        error: &AutodmError,
        elapsed_ms: i64,
    ) -> Result<(), AutodmError> {
        let transitioned = self
            .store
            .mark_log_failed(&payload.log_id, &error.to_string(), elapsed_ms)
            .await?;
        if !transitioned {
            return Ok(());
        }
        self.store
            .update_rule_stats(
                &payload.rule_id,
                &StatsUpdate {
                    failed: true,
                    ..StatsUpdate::default()
                },
            )
            .await
    }

    async fn bounded<F>(&self, call: F) -> Result<String, DispatchError>
    where
        F: std::future::Future<Output = Result<String, DispatchError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::new(
                DispatchErrorKind::Timeout,
                format!("no response within {:?}", self.timeout),
            )),
        }
    }
}

/// Decrypt the channel's page-level token, preferring the page token over
/// the legacy generic token.
pub(crate) fn decrypt_page_token(
    cipher: &CredentialCipher,
    channel: &Channel,
) -> Result<SecretString, AutodmError> {
    let sealed = channel
        .encrypted_page_token
        .as_deref()
        .or(channel.encrypted_access_token.as_deref())
        .ok_or_else(|| AutodmError::ChannelNeedsReconnect {
            channel_id: channel.id.clone(),
            reason: "no page access token on record".to_string(),
        })?;
    cipher.decrypt(sealed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use autodm_core::types::{AttachmentKind, AutomationLog, LogStatus};
    use autodm_test_utils::{comment, rule, MockMessenger, SentBody, TestStore, TEST_PAGE_ID};

    struct Fixture {
        store: TestStore,
        messenger: MockMessenger,
        dispatcher: Dispatcher,
    }

    async fn fixture() -> Fixture {
        let store = TestStore::new().await.unwrap();
        let messenger = MockMessenger::new();
        let dispatcher = Dispatcher::new(
            store.store(),
            Arc::new(messenger.clone()),
            store.cipher().clone(),
        );
        Fixture {
            store,
            messenger,
            dispatcher,
        }
    }

    async fn queued_payload(f: &Fixture) -> SendDmPayload {
        let channel = f.store.seed_channel("ch-1", "ig-1").await.unwrap();
        let rule = f.store.seed_rule(rule("r-1", &channel.id)).await.unwrap();
        let mut log = AutomationLog::for_comment(
            &rule,
            &comment("u-1", "hi"),
            LogStatus::Queued,
            chrono::Utc::now(),
        );
        log.message = Some("hello there".into());
        f.store.store().insert_log(&log).await.unwrap();
        SendDmPayload {
            channel_id: channel.id,
            recipient_id: "u-1".into(),
            message: "hello there".into(),
            rule_id: rule.id,
            log_id: log.id,
            attachments: vec![],
        }
    }

    #[tokio::test]
    async fn send_uses_decrypted_page_token() {
        let f = fixture().await;
        let channel = f.store.channel("ch-1", "ig-1").unwrap();
        let receipt = f
            .dispatcher
            .send_dm(&channel, "u-1", "hello", &[])
            .await
            .unwrap();
        let sent = f.messenger.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].page_id, TEST_PAGE_ID);
        assert_eq!(sent[0].page_token, "page-token-ch-1");
        assert_eq!(sent[0].message_id, receipt.message_id);
    }

    #[tokio::test]
    async fn legacy_token_is_used_without_page_token() {
        let f = fixture().await;
        let mut channel = f.store.channel("ch-1", "ig-1").unwrap();
        channel.encrypted_page_token = None;
        channel.encrypted_access_token = Some(f.store.seal("legacy-token").unwrap());
        f.dispatcher
            .send_dm(&channel, "u-1", "hello", &[])
            .await
            .unwrap();
        assert_eq!(f.messenger.sent().await[0].page_token, "legacy-token");
    }

    #[tokio::test]
    async fn missing_page_id_needs_reconnect() {
        let f = fixture().await;
        let mut channel = f.store.channel("ch-1", "ig-1").unwrap();
        channel.page_id = None;
        let err = f
            .dispatcher
            .send_dm(&channel, "u-1", "hello", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, AutodmError::ChannelNeedsReconnect { .. }));
        assert!(!err.is_retryable());
        assert!(f.messenger.sent().await.is_empty());
    }

    #[tokio::test]
    async fn attachment_failure_does_not_fail_send() {
        let f = fixture().await;
        let channel = f.store.channel("ch-1", "ig-1").unwrap();
        f.messenger
            .fail_next_attachment(DispatchError::new(DispatchErrorKind::Rejected, "bad url"))
            .await;
        let attachments = vec![
            Attachment {
                kind: AttachmentKind::Image,
                url: "https://cdn.example/a.png".into(),
            },
            Attachment {
                kind: AttachmentKind::File,
                url: "https://cdn.example/guide.pdf".into(),
            },
        ];
        let receipt = f
            .dispatcher
            .send_dm(&channel, "u-1", "hello", &attachments)
            .await
            .unwrap();
        assert_eq!(receipt.attachments_sent, 1);
        let sent = f.messenger.sent().await;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].body, SentBody::Text("hello".into()));
        assert_eq!(sent[1].body, SentBody::Attachment(attachments[1].clone()));
    }

    #[tokio::test]
    async fn deliver_marks_log_sent_and_counts() {
        let f = fixture().await;
        let payload = queued_payload(&f).await;
        let receipt = f.dispatcher.deliver(&payload, true).await.unwrap();

        let log = f.store.store().get_log(&payload.log_id).await.unwrap().unwrap();
        assert_eq!(log.status, LogStatus::Sent);
        assert_eq!(log.provider_message_id, Some(receipt.message_id));
        assert!(log.sent_at.is_some());
        let rule = f.store.reload_rule(&payload.rule_id).await.unwrap();
        assert_eq!(rule.stats.total_sent, 1);
        assert!(rule.stats.last_sent_at.is_some());
    }

    #[tokio::test]
    async fn final_failure_marks_log_failed() {
        let f = fixture().await;
        let payload = queued_payload(&f).await;
        f.messenger
            .fail_next_text(
                DispatchError::new(DispatchErrorKind::InvalidRecipient, "cannot message user")
                    .with_code(551),
            )
            .await;
        let err = f.dispatcher.deliver(&payload, false).await.unwrap_err();
        assert!(!err.is_retryable());

        let log = f.store.store().get_log(&payload.log_id).await.unwrap().unwrap();
        assert_eq!(log.status, LogStatus::Failed);
        assert!(log.error_message.unwrap().contains("cannot message user"));
        let rule = f.store.reload_rule(&payload.rule_id).await.unwrap();
        assert_eq!(rule.stats.total_failed, 1);
    }

    #[tokio::test]
    async fn retryable_failure_keeps_log_queued() {
        let f = fixture().await;
        let payload = queued_payload(&f).await;
        f.messenger
            .fail_next_text(DispatchError::new(DispatchErrorKind::Upstream, "500"))
            .await;
        assert!(f.dispatcher.deliver(&payload, false).await.is_err());
        let log = f.store.store().get_log(&payload.log_id).await.unwrap().unwrap();
        assert_eq!(log.status, LogStatus::Queued);

        f.dispatcher.deliver(&payload, false).await.unwrap();
        let log = f.store.store().get_log(&payload.log_id).await.unwrap().unwrap();
        assert_eq!(log.status, LogStatus::Sent);
        let rule = f.store.reload_rule(&payload.rule_id).await.unwrap();
        assert_eq!(rule.stats.total_failed, 0);
        assert_eq!(rule.stats.total_sent, 1);
    }

    #[tokio::test]
    async fn unknown_channel_fails_the_audit_row() {
        let f = fixture().await;
        let mut payload = queued_payload(&f).await;
        payload.channel_id = "gone".into();
        // Not found is permanent, so even a non-final attempt closes the row.
        let err = f.dispatcher.deliver(&payload, false).await.unwrap_err();
        assert!(matches!(err, AutodmError::NotFound { entity: "channel", .. }));

        let log = f.store.store().get_log(&payload.log_id).await.unwrap().unwrap();
        assert_eq!(log.status, LogStatus::Failed);
        assert!(log.error_message.unwrap().contains("gone"));
        let rule = f.store.reload_rule(&payload.rule_id).await.unwrap();
        assert_eq!(rule.stats.total_failed, 1);
        assert!(f.messenger.sent().await.is_empty());
    }

    #[tokio::test]
    async fn abandoned_delivery_fails_the_audit_row_once() {
        let f = fixture().await;
        let payload = queued_payload(&f).await;
        let reason = AutodmError::Internal("delivery abandoned".into());
        f.dispatcher.abandon(&payload, &reason).await.unwrap();
        f.dispatcher.abandon(&payload, &reason).await.unwrap();

        let log = f.store.store().get_log(&payload.log_id).await.unwrap().unwrap();
        assert_eq!(log.status, LogStatus::Failed);
        let rule = f.store.reload_rule(&payload.rule_id).await.unwrap();
        assert_eq!(rule.stats.total_failed, 1);
    }

    struct SlowMessenger;

    #[async_trait::async_trait]
    impl MessagingApi for SlowMessenger {
        async fn send_text(&self, _: &str, _: &str, _: &str, _: &str) -> Result<String, DispatchError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("late".into())
        }

        async fn send_attachment(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &Attachment,
        ) -> Result<String, DispatchError> {
            Ok("late".into())
        }

        async fn exchange_user_token(
            &self,
            _: &str,
        ) -> Result<autodm_core::types::TokenGrant, AutodmError> {
            Err(AutodmError::Internal("unused".into()))
        }

        async fn list_pages(
            &self,
            _: &str,
        ) -> Result<Vec<autodm_core::types::PageGrant>, AutodmError> {
            Ok(vec![])
        }

        async fn list_media(
            &self,
            _: &str,
            _: &str,
        ) -> Result<Vec<autodm_core::types::RemoteMedia>, AutodmError> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn slow_platform_call_times_out_as_retryable() {
        let store = TestStore::new().await.unwrap();
        let dispatcher = Dispatcher::new(store.store(), Arc::new(SlowMessenger), store.cipher().clone())
            .with_timeout(Duration::from_millis(50));
        let channel = store.channel("ch-1", "ig-1").unwrap();
        let err = dispatcher
            .send_dm(&channel, "u-1", "hello", &[])
            .await
            .unwrap_err();
        match &err {
            AutodmError::Dispatch(e) => assert_eq!(e.kind, DispatchErrorKind::Timeout),
            other => panic!("expected dispatch timeout, got {other:?}"),
        }
        assert!(err.is_retryable());
    }
}
