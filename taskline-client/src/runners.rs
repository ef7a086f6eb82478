//! Runner-related API endpoints

use taskline_core::domain::common::Infrastructure;
use taskline_core::domain::runner::Runner;
use taskline_core::dto::runner::RegisterRunner;

use crate::error::Result;
use crate::{OrchestratorClient, segment};

impl OrchestratorClient {
    // =============================================================================
    // Runner Registration & Lifecycle
    // =============================================================================

    /// Register a runner for the infrastructures it can execute job tasks on
    pub async fn register_runner(
        &self,
        runner_id: &str,
        infrastructures: Vec<Infrastructure>,
    ) -> Result<Runner> {
        let response = self
            .client
            .post(self.url("/api/runners/register"))
            .json(&RegisterRunner {
                runner_id: runner_id.to_string(),
                infrastructures,
            })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Keeps the runner marked online; call well inside the stale timeout
    pub async fn send_heartbeat(&self, runner_id: &str) -> Result<()> {
        let url = self.url(&format!("/api/runners/{}/heartbeat", segment(runner_id)));
        let response = self.client.post(url).send().await?;

        self.handle_empty_response(response).await
    }

    // =============================================================================
    // Runner Query
    // =============================================================================

    pub async fn list_runners(&self) -> Result<Vec<Runner>> {
        let response = self.client.get(self.url("/api/runners")).send().await?;

        self.handle_response(response).await
    }

    pub async fn get_runner(&self, runner_id: &str) -> Result<Runner> {
        let url = self.url(&format!("/api/runners/{}", segment(runner_id)));
        let response = self.client.get(url).send().await?;

        self.handle_response(response).await
    }

    pub async fn delete_runner(&self, runner_id: &str) -> Result<()> {
        let url = self.url(&format!("/api/runners/{}", segment(runner_id)));
        let response = self.client.delete(url).send().await?;

        self.handle_empty_response(response).await
    }
}
