//! Runner Service
//!
//! Registration and liveness of the runners that claim dispatched jobs.

use std::sync::Arc;
use std::time::Duration;

use taskline_core::domain::runner::Runner;
use taskline_core::dto::runner::RegisterRunner;
use tokio_util::sync::CancellationToken;

use crate::repository::{RunnerStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("runner {0} not found")]
    NotFound(String),

    #[error("{0}")]
    ValidationError(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, RunnerError>;

#[derive(Clone)]
pub struct RunnerService {
    store: Arc<dyn RunnerStore>,
}

impl RunnerService {
    pub fn new(store: Arc<dyn RunnerStore>) -> Self {
        Self { store }
    }

    /// Register a runner with the orchestrator
    ///
    /// A runner registering again keeps its entry and refreshes its heartbeat.
    pub async fn register_runner(&self, req: RegisterRunner) -> Result<Runner> {
        validate_register_request(&req)?;
        let runner = self.store.register_runner(&req).await?;
        tracing::info!("Runner registered: {}", runner.id);
        Ok(runner)
    }

    pub async fn update_heartbeat(&self, runner_id: &str) -> Result<()> {
        if !self.store.update_heartbeat(runner_id).await? {
            return Err(RunnerError::NotFound(runner_id.to_string()));
        }
        tracing::debug!("Heartbeat received from runner: {}", runner_id);
        Ok(())
    }

    pub async fn get_runner(&self, id: &str) -> Result<Runner> {
        self.store
            .find_runner(id)
            .await?
            .ok_or_else(|| RunnerError::NotFound(id.to_string()))
    }

    pub async fn list_runners(&self) -> Result<Vec<Runner>> {
        Ok(self.store.list_runners().await?)
    }

    pub async fn delete_runner(&self, id: &str) -> Result<()> {
        if !self.store.delete_runner(id).await? {
            return Err(RunnerError::NotFound(id.to_string()));
        }
        tracing::info!("Runner deleted: {}", id);
        Ok(())
    }

    /// Mark runners without a recent heartbeat as offline
    pub async fn mark_stale_runners_offline(&self, timeout: Duration) -> Result<u64> {
        let count = self
            .store
            .mark_stale_runners_offline(timeout.as_secs() as i64)
            .await?;
        if count > 0 {
            tracing::info!("Marked {} runner(s) as offline", count);
        }
        Ok(count)
    }

    /// Sweeps stale runners every `timeout / 3` until shutdown
    pub async fn run_stale_sweeper(self, timeout: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval((timeout / 3).max(Duration::from_secs(1)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.mark_stale_runners_offline(timeout).await {
                        tracing::warn!("Failed to sweep stale runners: {}", e);
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
    }
}

// =============================================================================
// Validation
// =============================================================================

fn validate_register_request(req: &RegisterRunner) -> Result<()> {
    if req.runner_id.trim().is_empty() {
        return Err(RunnerError::ValidationError(
            "Runner ID cannot be empty".to_string(),
        ));
    }

    if req.runner_id.len() > 255 {
        return Err(RunnerError::ValidationError(
            "Runner ID is too long (max 255 characters)".to_string(),
        ));
    }

    Ok(())
}
