// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Autodm - Instagram comment-to-DM automation.
//!
//! This is the binary entry point for the service and its operator commands.

mod ops;
mod runtime;
mod serve;
mod shutdown;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Autodm - Instagram comment-to-DM automation.
#[derive(Parser, Debug)]
#[command(name = "autodm", version, about, long_about = None)]
struct Cli {
    /// Load configuration from this file instead of the standard locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the webhook gateway, comment workers, and job scheduler.
    Serve,
    /// Run every due deferred job once and exit.
    Tick,
    /// Refresh a channel's access tokens now.
    RefreshToken {
        /// Channel id.
        channel_id: String,
    },
    /// Re-cache a channel's recent posts.
    SyncMedia {
        /// Channel id.
        channel_id: String,
    },
    /// Encrypt an access token (read from the terminal or stdin) for storage.
    SealToken,
    /// Print a fresh 256-bit encryption key.
    GenerateKey,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => autodm_config::load_and_validate_path(path),
        None => autodm_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            autodm_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    init_tracing(&config.service.log_level);

    let result = match cli.command {
        Some(Commands::Serve) => serve::run_serve(config).await,
        Some(Commands::Tick) => ops::run_tick(&config).await,
        Some(Commands::RefreshToken { channel_id }) => {
            ops::run_refresh_token(&config, &channel_id).await
        }
        Some(Commands::SyncMedia { channel_id }) => ops::run_sync_media(&config, &channel_id).await,
        Some(Commands::SealToken) => ops::run_seal_token(&config),
        Some(Commands::GenerateKey) => ops::run_generate_key(),
        None => {
            println!("autodm: use --help for available commands");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

/// Initialize the tracing subscriber. `RUST_LOG` overrides the configured level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("autodm={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn refresh_token_takes_a_channel() {
        let cli = Cli::try_parse_from(["autodm", "refresh-token", "ch-1"]).unwrap();
        match cli.command {
            Some(Commands::RefreshToken { channel_id }) => assert_eq!(channel_id, "ch-1"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::try_parse_from(["autodm", "tick", "--config", "/tmp/autodm.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/autodm.toml")));
        assert!(matches!(cli.command, Some(Commands::Tick)));
    }

    #[test]
    fn binary_loads_config_defaults() {
        let config = autodm_config::load_and_validate_str("").expect("defaults should be valid");
        assert!(!config.storage.database_path.is_empty());
    }
}
