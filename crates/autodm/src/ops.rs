// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One-shot operator commands.

use autodm_config::AutodmConfig;
use autodm_core::AutodmError;
use autodm_vault::{mask_secret, read_secret, CredentialCipher};
use secrecy::ExposeSecret;
use tracing::info;

use crate::runtime::Runtime;

/// `autodm tick`: one scheduler poll, report printed as JSON.
pub async fn run_tick(config: &AutodmConfig) -> Result<(), AutodmError> {
    let runtime = Runtime::open(config).await?;
    let report = runtime.pipeline.scheduler.poll().await;
    let closed = runtime.close().await;
    let report = report?;
    closed?;

    let json = serde_json::to_string_pretty(&report)
        .map_err(|e| AutodmError::Internal(format!("failed to encode poll report: {e}")))?;
    println!("{json}");
    Ok(())
}

/// `autodm refresh-token <channel>`.
pub async fn run_refresh_token(config: &AutodmConfig, channel_id: &str) -> Result<(), AutodmError> {
    let runtime = Runtime::open(config).await?;
    let outcome = runtime.pipeline.refresher.refresh_token(channel_id).await;
    let closed = runtime.close().await;
    let outcome = outcome?;
    closed?;

    println!("{channel_id}: tokens refreshed, expires at {}", outcome.expires_at.to_rfc3339());
    Ok(())
}

/// `autodm sync-media <channel>`.
pub async fn run_sync_media(config: &AutodmConfig, channel_id: &str) -> Result<(), AutodmError> {
    let runtime = Runtime::open(config).await?;
    let count = runtime.pipeline.media.sync_media(channel_id).await;
    let closed = runtime.close().await;
    let count = count?;
    closed?;

    println!("{channel_id}: {count} posts cached");
    Ok(())
}

/// `autodm seal-token`: prints the stored form of a token.
pub fn run_seal_token(config: &AutodmConfig) -> Result<(), AutodmError> {
    let cipher = CredentialCipher::from_config_or_env(config.vault.encryption_key.as_deref())?;
    let token = read_secret("access token")?;
    let sealed = cipher.encrypt(&token)?;
    info!(token = %mask_secret(token.expose_secret()), "token sealed");
    println!("{sealed}");
    Ok(())
}

/// `autodm generate-key`.
pub fn run_generate_key() -> Result<(), AutodmError> {
    let (_cipher, encoded) = CredentialCipher::generate()?;
    println!("{}", encoded.expose_secret());
    Ok(())
}
