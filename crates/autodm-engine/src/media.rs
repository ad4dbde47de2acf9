// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post metadata cache refresh.

use std::sync::Arc;

use autodm_core::types::{format_timestamp, MediaItem};
use autodm_core::{AutodmError, AutomationStore, MessagingApi};
use autodm_vault::CredentialCipher;
use secrecy::ExposeSecret;
use tracing::info;

use crate::dispatcher::decrypt_page_token;

/// Copies a channel's recent posts into the media cache.
pub struct MediaSync {
    store: Arc<dyn AutomationStore>,
    messenger: Arc<dyn MessagingApi>,
    cipher: CredentialCipher,
}

impl MediaSync {
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

    /// Fetch the channel's posts and upsert them. Returns the number cached.
    pub async fn sync_media(&self, channel_id: &str) -> Result<usize, AutodmError> {
        let channel = self
            .store
            .get_channel(channel_id)
            .await?
            .ok_or_else(|| AutodmError::NotFound {
                entity: "channel",
                id: channel_id.to_string(),
            })?;
        let token = decrypt_page_token(&self.cipher, &channel)?;
        let remote = self
            .messenger
            .list_media(&channel.platform_account_id, token.expose_secret())
            .await?;

        let synced_at = format_timestamp(chrono::Utc::now());
        let items: Vec<MediaItem> = remote
            .into_iter()
            .map(|m| MediaItem {
                media_id: m.media_id,
                channel_id: channel.id.clone(),
                caption: m.caption,
                permalink: m.permalink,
                synced_at: synced_at.clone(),
            })
            .collect();
        self.store.upsert_media(&items).await?;

        info!(
            channel_id = channel.id.as_str(),
            count = items.len(),
            "media cache synced"
        );
        Ok(items.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autodm_test_utils::{MockMessenger, TestStore};

    #[tokio::test]
    async fn posts_are_cached_for_the_channel() {
        let store = TestStore::new().await.unwrap();
        store.seed_channel("ch-1", "ig-1").await.unwrap();
        let messenger = MockMessenger::new();
        messenger
            .add_media("m-1", Some("Spring drop"), Some("https://instagram.com/p/m1"))
            .await;
        messenger.add_media("m-2", None, None).await;

        let sync = MediaSync::new(store.store(), Arc::new(messenger), store.cipher().clone());
        assert_eq!(sync.sync_media("ch-1").await.unwrap(), 2);

        let cached = store.store().get_media("m-1").await.unwrap().unwrap();
        assert_eq!(cached.channel_id, "ch-1");
        assert_eq!(cached.caption.as_deref(), Some("Spring drop"));
        assert!(store.store().get_media("m-2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unknown_channel_is_not_found() {
        let store = TestStore::new().await.unwrap();
        let sync = MediaSync::new(
            store.store(),
            Arc::new(MockMessenger::new()),
            store.cipher().clone(),
        );
        assert!(matches!(
            sync.sync_media("missing").await,
            Err(AutodmError::NotFound { .. })
        ));
    }
}
