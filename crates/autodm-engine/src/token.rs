// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Long-lived token refresh for connected channels.
//!
//! The user token is exchanged for a fresh one, then the page token is
//! re-derived from the user's page list (page tokens cannot be refreshed on
//! their own). Both are re-sealed and stored together.

use std::sync::Arc;

use autodm_core::types::{format_timestamp, Channel, ConnectionStatus, CredentialUpdate, PageGrant};
use autodm_core::{AutodmError, AutomationStore, DispatchErrorKind, MessagingApi};
use autodm_vault::CredentialCipher;
use chrono::{DateTime, Duration, Utc};
use secrecy::ExposeSecret;
use tracing::{info, warn};

/// Lifetime assumed for a long-lived token when the platform omits `expires_in`.
const LONG_LIVED_TOKEN_DAYS: i64 = 60;

/// Outcome of a successful refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub expires_at: DateTime<Utc>,
}

/// Refreshes stored channel credentials against the platform.
pub struct TokenRefresher {
    store: Arc<dyn AutomationStore>,
    messenger: Arc<dyn MessagingApi>,
    cipher: CredentialCipher,
}

impl TokenRefresher {
    pub fn new(
        store: Arc<dyn AutomationStore>,
        messenger: Arc<dyn MessagingApi>,
        cipher: CredentialCipher,
    ) -> Self {
        Self {
            store,
            messenger,
            cipher,
        }
    }

    /// Refresh the user and page tokens of `channel_id`.
    ///
    /// A channel without a user token is marked `requires_reconnect`. Any
    /// other failure marks it `error` (or `requires_reconnect` when the
    /// platform rejects the token) and returns the error.
    pub async fn refresh_token(&self, channel_id: &str) -> Result<RefreshOutcome, AutodmError> {
        let channel = self
            .store
            .get_channel(channel_id)
            .await?
            .ok_or_else(|| AutodmError::NotFound {
                entity: "channel",
                id: channel_id.to_string(),
            })?;

        let Some(sealed_user_token) = channel.encrypted_user_token.as_deref() else {
            self.mark(&channel, ConnectionStatus::RequiresReconnect).await;
            return Err(AutodmError::Credential {
                channel_id: channel.id.clone(),
                message: "no user token on record; the account must be reconnected".to_string(),
            });
        };

        match self.exchange(&channel, sealed_user_token).await {
            Ok(outcome) => {
                info!(
                    channel_id = channel.id.as_str(),
                    expires_at = %outcome.expires_at,
                    "channel credentials refreshed"
                );
                Ok(outcome)
            }
            Err(e) => {
                let status = if needs_reconnect(&e) {
                    ConnectionStatus::RequiresReconnect
                } else {
                    ConnectionStatus::Error
                };
                warn!(
                    channel_id = channel.id.as_str(),
                    status = %status,
                    error = %e,
                    "token refresh failed"
                );
                self.mark(&channel, status).await;
                Err(e)
            }
        }
    }

    async fn exchange(
        &self,
        channel: &Channel,
        sealed_user_token: &str,
    ) -> Result<RefreshOutcome, AutodmError> {
        let user_token = self.cipher.decrypt(sealed_user_token)?;
        let grant = self
            .messenger
            .exchange_user_token(user_token.expose_secret())
            .await?;

        let pages = self
            .messenger
            .list_pages(grant.access_token.expose_secret())
            .await?;
        let page = find_page(channel, &pages).ok_or_else(|| AutodmError::Credential {
            channel_id: channel.id.clone(),
            message: "the connected page is no longer managed by this user".to_string(),
        })?;

        let expires_at = token_expiry(Utc::now(), grant.expires_in)?;
        let expires_text = format_timestamp(expires_at);

        let update = CredentialUpdate {
            encrypted_user_token: self.cipher.encrypt(&grant.access_token)?,
            user_token_expires_at: Some(expires_text.clone()),
            encrypted_page_token: self.cipher.encrypt(&page.access_token)?,
            token_expires_at: Some(expires_text),
        };
        self.store
            .update_channel_credentials(&channel.id, &update)
            .await?;

        Ok(RefreshOutcome { expires_at })
    }

    async fn mark(&self, channel: &Channel, status: ConnectionStatus) {
        if let Err(e) = self.store.set_connection_status(&channel.id, status).await {
            warn!(
                channel_id = channel.id.as_str(),
                error = %e,
                "failed to record connection status"
            );
        }
    }
}

/// The page the channel sends from: matched by page id, else by linked
/// business account.
fn find_page<'a>(channel: &Channel, pages: &'a [PageGrant]) -> Option<&'a PageGrant> {
    if let Some(page_id) = channel.page_id.as_deref() {
        if let Some(page) = pages.iter().find(|p| p.page_id == page_id) {
            return Some(page);
        }
    }
    pages
        .iter()
        .find(|p| p.instagram_account_id.as_deref() == Some(channel.platform_account_id.as_str()))
}

fn needs_reconnect(error: &AutodmError) -> bool {
    match error {
        AutodmError::Dispatch(e) => e.kind == DispatchErrorKind::Auth,
        AutodmError::Credential { .. } | AutodmError::ChannelNeedsReconnect { .. } => true,
        _ => false,
    }
}

/// Expiry of a token granted at `now` that lives `expires_in` seconds.
///
/// A missing or non-positive lifetime means the long-lived default. A lifetime
/// past what a timestamp can hold is rejected as a bad upstream response.
fn token_expiry(
    now: DateTime<Utc>,
    expires_in: Option<i64>,
) -> Result<DateTime<Utc>, AutodmError> {
    let lifetime = match expires_in.filter(|secs| *secs > 0) {
        Some(secs) => Duration::try_seconds(secs),
        None => Duration::try_days(LONG_LIVED_TOKEN_DAYS),
    };
    lifetime
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .ok_or_else(|| AutodmError::Upstream {
            message: format!("token lifetime out of range: {expires_in:?} seconds"),
            source: None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use autodm_core::DispatchError;
    use autodm_test_utils::{MockMessenger, TestStore, TEST_PAGE_ID};

    async fn setup() -> (TestStore, MockMessenger, TokenRefresher) {
        let store = TestStore::new().await.unwrap();
        let messenger = MockMessenger::new();
        let refresher = TokenRefresher::new(
            store.store(),
            Arc::new(messenger.clone()),
            store.cipher().clone(),
        );
        (store, messenger, refresher)
    }

    #[tokio::test]
    async fn refresh_reseals_both_tokens() {
        let (store, messenger, refresher) = setup().await;
        store.seed_channel("ch-1", "ig-1").await.unwrap();
        messenger
            .set_refreshed_user_token("user-token-new", Some(3600))
            .await;
        messenger
            .add_page(TEST_PAGE_ID, "page-token-new", Some("ig-1"))
            .await;

        let before = Utc::now();
        let outcome = refresher.refresh_token("ch-1").await.unwrap();
        assert!(outcome.expires_at >= before + Duration::seconds(3600));
        assert_eq!(messenger.exchanged_tokens().await, vec!["user-token-ch-1"]);

        let channel = store.store().get_channel("ch-1").await.unwrap().unwrap();
        assert_eq!(channel.connection_status, ConnectionStatus::Connected);
        let cipher = store.cipher();
        let page = cipher
            .decrypt(channel.encrypted_page_token.as_deref().unwrap())
            .unwrap();
        let user = cipher
            .decrypt(channel.encrypted_user_token.as_deref().unwrap())
            .unwrap();
        assert_eq!(page.expose_secret(), "page-token-new");
        assert_eq!(user.expose_secret(), "user-token-new");
        assert_eq!(
            channel.token_expires_at,
            Some(format_timestamp(outcome.expires_at))
        );
    }

    #[tokio::test]
    async fn page_is_found_by_business_account() {
        let (store, messenger, refresher) = setup().await;
        store.seed_channel("ch-1", "ig-1").await.unwrap();
        messenger.add_page("other-page", "nope", Some("ig-2")).await;
        messenger.add_page("moved-page", "page-token-new", Some("ig-1")).await;
        refresher.refresh_token("ch-1").await.unwrap();
        let channel = store.store().get_channel("ch-1").await.unwrap().unwrap();
        let page = store
            .cipher()
            .decrypt(channel.encrypted_page_token.as_deref().unwrap())
            .unwrap();
        assert_eq!(page.expose_secret(), "page-token-new");
    }

    #[tokio::test]
    async fn missing_user_token_requires_reconnect() {
        let (store, messenger, refresher) = setup().await;
        let mut channel = store.channel("ch-1", "ig-1").unwrap();
        channel.encrypted_user_token = None;
        store.store().insert_channel(&channel).await.unwrap();

        let err = refresher.refresh_token("ch-1").await.unwrap_err();
        assert!(matches!(err, AutodmError::Credential { .. }));
        assert!(!err.is_retryable());
        assert!(messenger.exchanged_tokens().await.is_empty());
        let channel = store.store().get_channel("ch-1").await.unwrap().unwrap();
        assert_eq!(channel.connection_status, ConnectionStatus::RequiresReconnect);
    }

    #[tokio::test]
    async fn upstream_failure_marks_error() {
        let (store, messenger, refresher) = setup().await;
        store.seed_channel("ch-1", "ig-1").await.unwrap();
        messenger
            .fail_next_exchange(AutodmError::Upstream {
                message: "graph unavailable".into(),
                source: None,
            })
            .await;
        let err = refresher.refresh_token("ch-1").await.unwrap_err();
        assert!(err.is_retryable());
        let channel = store.store().get_channel("ch-1").await.unwrap().unwrap();
        assert_eq!(channel.connection_status, ConnectionStatus::Error);
    }

    #[tokio::test]
    async fn revoked_token_requires_reconnect() {
        let (store, messenger, refresher) = setup().await;
        store.seed_channel("ch-1", "ig-1").await.unwrap();
        messenger
            .fail_next_exchange(AutodmError::Dispatch(
                DispatchError::new(DispatchErrorKind::Auth, "session invalidated").with_code(190),
            ))
            .await;
        refresher.refresh_token("ch-1").await.unwrap_err();
        let channel = store.store().get_channel("ch-1").await.unwrap().unwrap();
        assert_eq!(channel.connection_status, ConnectionStatus::RequiresReconnect);
    }

    #[tokio::test]
    async fn lost_page_requires_reconnect() {
        let (store, _messenger, refresher) = setup().await;
        store.seed_channel("ch-1", "ig-1").await.unwrap();
        let err = refresher.refresh_token("ch-1").await.unwrap_err();
        assert!(matches!(err, AutodmError::Credential { .. }));
        let channel = store.store().get_channel("ch-1").await.unwrap().unwrap();
        assert_eq!(channel.connection_status, ConnectionStatus::RequiresReconnect);
    }

    #[test]
    fn token_expiry_defaults_when_lifetime_is_missing() {
        let now = Utc::now();
        assert_eq!(
            token_expiry(now, None).unwrap(),
            now + Duration::days(LONG_LIVED_TOKEN_DAYS)
        );
        assert_eq!(
            token_expiry(now, Some(0)).unwrap(),
            now + Duration::days(LONG_LIVED_TOKEN_DAYS)
        );
        assert_eq!(token_expiry(now, Some(90)).unwrap(), now + Duration::seconds(90));
    }

    #[test]
    fn token_expiry_rejects_unrepresentable_lifetimes() {
        let now = Utc::now();
        assert!(token_expiry(now, Some(i64::MAX)).is_err());
        // Representable as a duration, but not as a date.
        assert!(token_expiry(now, Some(i64::MAX / 1_000)).is_err());
    }

    #[tokio::test]
    async fn absurd_token_lifetime_marks_error() {
        let (store, messenger, refresher) = setup().await;
        store.seed_channel("ch-1", "ig-1").await.unwrap();
        messenger
            .set_refreshed_user_token("user-token-new", Some(i64::MAX))
            .await;
        messenger
            .add_page(TEST_PAGE_ID, "page-token-new", Some("ig-1"))
            .await;

        let err = refresher.refresh_token("ch-1").await.unwrap_err();
        assert!(matches!(err, AutodmError::Upstream { .. }));
        let channel = store.store().get_channel("ch-1").await.unwrap().unwrap();
        assert_eq!(channel.connection_status, ConnectionStatus::Error);
        let cipher = store.cipher();
        let user = cipher
            .decrypt(channel.encrypted_user_token.as_deref().unwrap())
            .unwrap();
        assert_eq!(user.expose_secret(), "user-token-ch-1");
    }
}
