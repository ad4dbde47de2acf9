// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared wiring for every command that touches the store or the platform.

use std::sync::Arc;
use std::time::Duration;

use autodm_config::AutodmConfig;
use autodm_core::AutodmError;
use autodm_engine::Pipeline;
use autodm_instagram::GraphClient;
use autodm_storage::SqliteStore;
use autodm_vault::CredentialCipher;
use secrecy::SecretString;
use tracing::{debug, info};

/// An opened store plus the engine built on it.
pub struct Runtime {
    pub store: Arc<SqliteStore>,
    pub pipeline: Pipeline,
}

impl Runtime {
    /// Open the database, build the Graph client, and wire the pipeline.
    pub async fn open(config: &AutodmConfig) -> Result<Self, AutodmError> {
        let cipher = CredentialCipher::from_config_or_env(config.vault.encryption_key.as_deref())?;

        let store = Arc::new(
            SqliteStore::open(&config.storage.database_path, config.storage.wal_mode).await?,
        );
        info!(path = config.storage.database_path.as_str(), "database opened");

        let client = graph_client(config)?;
        let pipeline = Pipeline::new(store.clone(), Arc::new(client), cipher, config);
        Ok(Self { store, pipeline })
    }

    /// Close the database once every other handle is gone.
    pub async fn close(self) -> Result<(), AutodmError> {
        let Self { store, pipeline } = self;
        drop(pipeline);
        match Arc::try_unwrap(store) {
            Ok(store) => store.close().await,
            Err(_) => {
                debug!("store still shared at shutdown, leaving close to drop");
                Ok(())
            }
        }
    }
}

fn graph_client(config: &AutodmConfig) -> Result<GraphClient, AutodmError> {
    let ig = &config.instagram;
    let client = GraphClient::new(
        &ig.graph_api_base,
        Duration::from_secs(ig.request_timeout_secs),
    )?;
    Ok(match (&ig.app_id, &ig.app_secret) {
        (Some(app_id), Some(app_secret)) => {
            client.with_app_credentials(app_id.clone(), SecretString::from(app_secret.clone()))
        }
        _ => client,
    })
}
