// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Comment-to-DM automation engine.
//!
//! The [`Pipeline`] wires the engine components around one store, one
//! messaging client, and one credential cipher:
//! - [`CommentProcessor`] evaluates inbound comments against rules
//! - [`Dispatcher`] sends DMs and settles their audit rows
//! - [`Scheduler`] drains deferred jobs (delayed sends, token refresh, media sync)
//! - [`TokenRefresher`] and [`MediaSync`] back the non-DM job kinds

pub mod dispatcher;
pub mod media;
pub mod processor;
pub mod scheduler;
pub mod telemetry;
pub mod template;
pub mod token;

use std::sync::Arc;
use std::time::Duration;

use autodm_config::AutodmConfig;
use autodm_core::{AutomationStore, MessagingApi};
use autodm_vault::CredentialCipher;

pub use dispatcher::{DispatchReceipt, Dispatcher};
pub use media::MediaSync;
pub use processor::{CommentProcessor, ProcessingResult, RuleOutcome, RuleResult, SkipReason};
pub use scheduler::{PollReport, Scheduler, SchedulerSettings};
pub use template::{format_message, TemplateVars};
pub use token::{RefreshOutcome, TokenRefresher};

/// Every engine component, sharing one store, client, and cipher.
#[derive(Clone)]
pub struct Pipeline {
    pub processor: Arc<CommentProcessor>,
    pub dispatcher: Arc<Dispatcher>,
    pub scheduler: Arc<Scheduler>,
    pub refresher: Arc<TokenRefresher>,
    pub media: Arc<MediaSync>,
}

impl Pipeline {
    /// Build the pipeline from configuration.
    pub fn new(
        store: Arc<dyn AutomationStore>,
        messenger: Arc<dyn MessagingApi>,
        cipher: CredentialCipher,
        config: &AutodmConfig,
    ) -> Self {
        let settings = SchedulerSettings::from(&config.scheduler);
        let timeout = Duration::from_secs(config.instagram.request_timeout_secs);
        Self::with_settings(store, messenger, cipher, settings, timeout)
    }

    /// Build the pipeline with explicit scheduler settings and dispatch timeout.
    pub fn with_settings(
        store: Arc<dyn AutomationStore>,
        messenger: Arc<dyn MessagingApi>,
        cipher: CredentialCipher,
        settings: SchedulerSettings,
        dispatch_timeout: Duration,
    ) -> Self {
        let dispatcher = Arc::new(
            Dispatcher::new(store.clone(), messenger.clone(), cipher.clone())
                .with_timeout(dispatch_timeout),
        );
        let refresher = Arc::new(TokenRefresher::new(
            store.clone(),
            messenger.clone(),
            cipher.clone(),
        ));
        let media = Arc::new(MediaSync::new(store.clone(), messenger, cipher));
        let processor = Arc::new(CommentProcessor::new(
            store.clone(),
            dispatcher.clone(),
            settings.max_attempts,
        ));
        let scheduler = Arc::new(Scheduler::new(
            store,
            dispatcher.clone(),
            refresher.clone(),
            media.clone(),
            settings,
        ));
        Self {
            processor,
            dispatcher,
            scheduler,
            refresher,
            media,
        }
    }
}
