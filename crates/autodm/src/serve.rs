// SPDX-FileCopyrightText: 2026 Autodm Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `autodm serve` command implementation.
//!
//! Opens the store, starts the job scheduler and the comment workers, and
//! serves the webhook gateway until SIGTERM/SIGINT. On shutdown the gateway
//! drains in-flight requests, workers finish the queued comments, and the
//! scheduler completes its current poll.

use std::sync::Arc;

use autodm_config::AutodmConfig;
use autodm_core::AutodmError;
use autodm_engine::telemetry;
use autodm_gateway::{
    comment_queue, spawn_workers, start_server, GatewayState, HealthState, Ingest, ServerConfig,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use secrecy::SecretString;
use tracing::{error, info, warn};

use crate::runtime::Runtime;
use crate::shutdown;

/// Runs the `autodm serve` command.
pub async fn run_serve(config: AutodmConfig) -> Result<(), AutodmError> {
    info!("starting autodm serve");

    let prometheus_render = install_prometheus();
    telemetry::register_metrics();

    let runtime = Runtime::open(&config).await?;
    let cancel = shutdown::install_signal_handler();

    let scheduler_handle = if config.scheduler.enabled {
        let scheduler = runtime.pipeline.scheduler.clone();
        let cancel = cancel.clone();
        Some(tokio::spawn(async move { scheduler.run(cancel).await }))
    } else {
        info!("scheduler disabled by configuration");
        None
    };

    let processor = runtime.pipeline.processor.clone();
    let (ingest, workers) = if config.gateway.inline_processing {
        info!("processing comments inside webhook requests");
        (Ingest::Inline, Vec::new())
    } else {
        let (tx, rx) = comment_queue(config.gateway.queue_capacity);
        let workers = spawn_workers(processor.clone(), rx, config.gateway.worker_count);
        info!(
            workers = workers.len(),
            capacity = config.gateway.queue_capacity,
            "comment workers started"
        );
        (Ingest::Queued(tx), workers)
    };

    if config.gateway.verify_token.is_none() {
        warn!("gateway.verify_token is not set; subscription handshakes will be rejected");
    }
    if config.instagram.app_secret.is_none() {
        warn!("instagram.app_secret is not set; webhook signatures are not checked");
    }

    let state = GatewayState {
        processor,
        ingest,
        verify_token: config.gateway.verify_token.clone(),
        app_secret: config
            .instagram
            .app_secret
            .clone()
            .map(|s| Arc::new(SecretString::from(s))),
        health: HealthState::new(prometheus_render),
    };
    let server_config = ServerConfig {
        host: config.gateway.host.clone(),
        port: config.gateway.port,
    };

    let served = start_server(&server_config, state, cancel.clone()).await;
    // A server failure still has to stop the scheduler.
    cancel.cancel();

    for worker in workers {
        if let Err(e) = worker.await {
            error!(error = %e, "comment worker panicked");
        }
    }
    if let Some(handle) = scheduler_handle {
        if let Err(e) = handle.await {
            error!(error = %e, "scheduler task panicked");
        }
    }

    runtime.close().await?;
    info!("autodm serve shutdown complete");
    served
}

/// Install the global Prometheus recorder. Metrics are optional: a failure
/// leaves `/metrics` disabled.
fn install_prometheus() -> Option<Arc<dyn Fn() -> String + Send + Sync>> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            info!("prometheus metrics enabled");
            Some(Arc::new(move || handle.render()))
        }
        Err(e) => {
            warn!(error = %e, "prometheus initialization failed, continuing without metrics");
            None
        }
    }
}
