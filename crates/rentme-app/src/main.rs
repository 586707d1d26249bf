//! Rentme outbox relay process.
//!
//! Connects to the configured storage, checks that the booking pipeline
//! wires up, and runs `OUTBOX_WORKERS` relay workers until Ctrl-C.

use std::sync::Arc;

use rentme_app::config::AppConfig;
use rentme_app::error::AppError;
use rentme_app::wiring::{build_pipeline, producer, relay_workers, Backend, PipelineOptions};
use rentme_core::clock::{Clock, SystemClock};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Initialize tracing subscriber.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    info!("starting Rentme outbox relay");

    let config = AppConfig::from_env()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let backend = Backend::connect(&config.storage).await?;
    build_pipeline(&backend, &clock, PipelineOptions::from(&config))?;
    let producer = producer(&config)?;

    let cancel = CancellationToken::new();
    let mut workers = JoinSet::new();
    for worker in relay_workers(&config, &backend, &producer, &clock) {
        let token = cancel.child_token();
        workers.spawn(async move { worker.run(token).await });
    }
    info!(workers = config.workers, "relay workers running");

    tokio::signal::ctrl_c().await?;
    info!("received Ctrl-C, stopping relay workers");
    cancel.cancel();

    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "relay worker task failed");
        }
    }
    info!("outbox relay stopped");
    Ok(())
}
