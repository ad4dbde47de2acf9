// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Throwaway persistence fixture for integration tests.
//!
//! `TestStore` opens a SQLite database in a temp directory, generates a
//! random credential key, and offers helpers that seed channels and rules
//! with sensible defaults. The temp directory lives as long as the fixture.

use std::sync::Arc;

use autodm_core::types::{
    format_timestamp, AutomationRule, Channel, CommentEvent, ConnectionStatus, Deduplication,
    ResponseConfig, RuleStats, RuleStatus, Trigger, TriggerKind,
};
use autodm_core::{AutodmError, AutomationStore};
use autodm_storage::SqliteStore;
use autodm_vault::CredentialCipher;
use secrecy::SecretString;

/// Page id given to every seeded channel.
pub const TEST_PAGE_ID: &str = "page-100";

/// Media id used by [`comment`].
pub const TEST_MEDIA_ID: &str = "media-1";

/// Temp-dir SQLite store plus the cipher its credentials are sealed with.
pub struct TestStore {
    store: Arc<SqliteStore>,
    cipher: CredentialCipher,
    _temp_dir: tempfile::TempDir,
}

impl TestStore {
    /// Create a fresh database with all migrations applied.
    pub async fn new() -> Result<Self, AutodmError> {
        let temp_dir =
            tempfile::TempDir::new().map_err(|e| AutodmError::Storage { source: e.into() })?;
        let db_path = temp_dir.path().join("autodm-test.db");
        let store = SqliteStore::open(&db_path.to_string_lossy(), true).await?;
        let (cipher, _key) = CredentialCipher::generate()?;
        Ok(Self {
            store: Arc::new(store),
            cipher,
            _temp_dir: temp_dir,
        })
    }

    /// The store as the trait object the pipeline consumes.
    pub fn store(&self) -> Arc<dyn AutomationStore> {
        self.store.clone()
    }

    pub fn sqlite(&self) -> &SqliteStore {
        &self.store
    }

    pub fn cipher(&self) -> &CredentialCipher {
        &self.cipher
    }

    /// Seal `plaintext` with the fixture's key.
    pub fn seal(&self, plaintext: &str) -> Result<String, AutodmError> {
        self.cipher.encrypt(&SecretString::from(plaintext.to_string()))
    }

    /// A connected channel for `account_id` with a page token and a user
    /// token, not yet persisted.
    ///
    /// Plaintext tokens are `page-token-<id>` and `user-token-<id>`.
    pub fn channel(&self, id: &str, account_id: &str) -> Result<Channel, AutodmError> {
        let now = format_timestamp(chrono::Utc::now());
        let expires = format_timestamp(chrono::Utc::now() + chrono::Duration::days(60));
        Ok(Channel {
            id: id.to_string(),
            platform: "instagram".to_string(),
            platform_account_id: account_id.to_string(),
            page_id: Some(TEST_PAGE_ID.to_string()),
            encrypted_page_token: Some(self.seal(&format!("page-token-{id}"))?),
            encrypted_access_token: None,
            encrypted_user_token: Some(self.seal(&format!("user-token-{id}"))?),
            token_expires_at: Some(expires.clone()),
            user_token_expires_at: Some(expires),
            connection_status: ConnectionStatus::Connected,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Persist a default channel and return it.
    pub async fn seed_channel(&self, id: &str, account_id: &str) -> Result<Channel, AutodmError> {
        let channel = self.channel(id, account_id)?;
        self.store.insert_channel(&channel).await?;
        Ok(channel)
    }

    /// Persist `rule` and return it.
    pub async fn seed_rule(&self, rule: AutomationRule) -> Result<AutomationRule, AutodmError> {
        self.store.insert_rule(&rule).await?;
        Ok(rule)
    }

    /// Reload a rule, failing if it disappeared.
    pub async fn reload_rule(&self, id: &str) -> Result<AutomationRule, AutodmError> {
        self.store
            .get_rule(id)
            .await?
            .ok_or_else(|| AutodmError::NotFound {
                entity: "rule",
                id: id.to_string(),
            })
    }
}

/// An active `new_comment` rule for `channel_id` that sends immediately.
pub fn rule(id: &str, channel_id: &str) -> AutomationRule {
    let now = format_timestamp(chrono::Utc::now());
    AutomationRule {
        id: id.to_string(),
        channel_id: channel_id.to_string(),
        media_id: None,
        name: format!("rule {id}"),
        status: RuleStatus::Active,
        trigger: Trigger {
            kind: TriggerKind::NewComment,
            keywords: Vec::new(),
            exclude_keywords: Vec::new(),
        },
        response: ResponseConfig {
            message_template: "Hi {{username}}, thanks for the comment!".to_string(),
            attachments: Vec::new(),
            delay_seconds: 0,
        },
        deduplication: Deduplication::default(),
        daily_limit: 100,
        stats: RuleStats::default(),
        created_at: now.clone(),
        updated_at: now,
    }
}

/// A comment on [`TEST_MEDIA_ID`] with a random comment id.
pub fn comment(commenter_id: &str, text: &str) -> CommentEvent {
    CommentEvent {
        comment_id: uuid::Uuid::new_v4().to_string(),
        text: text.to_string(),
        commenter_id: commenter_id.to_string(),
        commenter_username: Some(format!("{commenter_id}_handle")),
        media_id: TEST_MEDIA_ID.to_string(),
    }
}
