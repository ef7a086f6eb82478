//! Taskline Runner
//!
//! A stateless worker that executes dispatched job tasks step by step.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Steps: One executor per step type (scripts, git, docker, archives, ...)
//! - Services: Job execution and log buffering
//! - Scheduler: Claiming jobs and managing their lifecycle
//!
//! The runner registers the infrastructures it serves, claims queued jobs
//! from the orchestrator, runs their steps in order and streams logs, step
//! status and outputs back.

mod config;
mod context;
mod object_store;
mod process;
mod scheduler;
mod service;
mod step;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use taskline_client::OrchestratorClient;
use taskline_core::domain::common::Infrastructure;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::object_store::{LocalObjectStore, ObjectStore};
use crate::scheduler::JobPoller;
use crate::service::{ExecutionService, StandardExecutionService};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskline_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Taskline Runner");

    let config = load_config()?;
    info!(
        "Loaded configuration: runner_id={}, orchestrator_url={}, infrastructures={:?}",
        config.runner_id, config.orchestrator_url, config.infrastructures
    );

    tokio::fs::create_dir_all(&config.workspace_base)
        .await
        .with_context(|| format!("Failed to create {}", config.workspace_base.display()))?;

    let client = Arc::new(
        OrchestratorClient::new(config.orchestrator_url.clone()).with_runner_id(config.runner_id.clone()),
    );

    info!("Registering with orchestrator");
    register_with_retry(&client, &config.runner_id, &config.infrastructures).await?;
    info!("Registered successfully");

    let execution: Arc<dyn ExecutionService> = Arc::new(StandardExecutionService::new());
    let object_store: Arc<dyn ObjectStore> =
        Arc::new(LocalObjectStore::new(config.object_store_root.clone()));

    let poller = JobPoller::new(config.clone(), client, execution, object_store);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
        }
        signal.cancel();
    });

    info!(
        "Poll interval: {:?}, Log send interval: {:?}",
        config.poll_interval, config.log_send_interval
    );

    if let Err(e) = poller.run(shutdown).await {
        error!("Poller error: {}", e);
        return Err(e);
    }

    info!("Runner stopped");
    Ok(())
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<Config> {
    match Config::from_env() {
        Ok(config) => {
            config.validate()?;
            Ok(config)
        }
        Err(e) => {
            info!("Failed to load config from environment ({}), using defaults", e);
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}

/// Register with orchestrator with retry logic and exponential backoff
///
/// This handles the case where the orchestrator may not be ready yet when
/// the runner starts (common in container environments).
async fn register_with_retry(
    client: &Arc<OrchestratorClient>,
    runner_id: &str,
    infrastructures: &[Infrastructure],
) -> Result<()> {
    const MAX_RETRIES: u32 = 10;
    const INITIAL_DELAY_MS: u64 = 500;
    const MAX_DELAY_MS: u64 = 30_000;

    let mut attempt = 0;
    let mut delay_ms = INITIAL_DELAY_MS;

    loop {
        attempt += 1;

        match client
            .register_runner(runner_id, infrastructures.to_vec())
            .await
        {
            Ok(_) => {
                if attempt > 1 {
                    info!(
                        "Successfully registered with orchestrator after {} attempt(s)",
                        attempt
                    );
                }
                return Ok(());
            }
            Err(e) if e.is_client_error() => {
                return Err(anyhow::anyhow!("Orchestrator rejected registration: {}", e));
            }
            Err(e) => {
                if attempt >= MAX_RETRIES {
                    error!(
                        "Failed to register with orchestrator after {} attempts",
                        MAX_RETRIES
                    );
                    return Err(anyhow::anyhow!(
                        "Failed to register with orchestrator: {}",
                        e
                    ));
                }

                warn!(
                    "Failed to register with orchestrator (attempt {}/{}): {}",
                    attempt, MAX_RETRIES, e
                );
                warn!("Retrying in {} ms...", delay_ms);

                tokio::time::sleep(Duration::from_millis(delay_ms)).await;

                delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
            }
        }
    }
}
