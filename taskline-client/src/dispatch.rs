//! Dispatch endpoints used by runners

use taskline_core::domain::common::Infrastructure;
use taskline_core::domain::log::LogEntry;
use taskline_core::dto::dispatch::{
    CancelState, ClaimRequest, DispatchCompletion, DispatchedJob, StepUpdate,
};
use taskline_core::dto::log::LogBatch;
use uuid::Uuid;

use crate::error::Result;
use crate::{OrchestratorClient, RUNNER_ID_HEADER};

impl OrchestratorClient {
    fn dispatch_post(&self, dispatch_id: Uuid, action: &str) -> reqwest::RequestBuilder {
        let request = self
            .client
            .post(self.url(&format!("/api/dispatch/{}/{}", dispatch_id, action)));
        match &self.runner_id {
            Some(runner_id) => request.header(RUNNER_ID_HEADER, runner_id),
            None => request,
        }
    }

    /// Takes the oldest queued job this runner can execute, if any
    pub async fn claim_job(
        &self,
        runner_id: &str,
        infrastructures: &[Infrastructure],
    ) -> Result<Option<DispatchedJob>> {
        let response = self
            .client
            .post(self.url("/api/dispatch/claim"))
            .json(&ClaimRequest {
                runner_id: runner_id.to_string(),
                infrastructures: infrastructures.to_vec(),
            })
            .send()
            .await?;

        self.handle_response(response).await
    }

    pub async fn update_step(&self, dispatch_id: Uuid, update: &StepUpdate) -> Result<()> {
        let response = self
            .dispatch_post(dispatch_id, "steps")
            .json(update)
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    pub async fn send_logs(&self, dispatch_id: Uuid, entries: Vec<LogEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let response = self
            .dispatch_post(dispatch_id, "logs")
            .json(&LogBatch { entries })
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    pub async fn complete_job(&self, dispatch_id: Uuid, completion: &DispatchCompletion) -> Result<()> {
        let response = self
            .dispatch_post(dispatch_id, "complete")
            .json(completion)
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    /// Whether the orchestrator asked for the job to stop
    ///
    /// A dispatch the orchestrator no longer knows is reported as cancelled.
    pub async fn is_cancelled(&self, dispatch_id: Uuid) -> Result<bool> {
        let url = self.url(&format!("/api/dispatch/{}/cancelled", dispatch_id));
        let response = self.client.get(url).send().await?;

        match self.handle_response::<CancelState>(response).await {
            Ok(state) => Ok(state.cancelled),
            Err(e) if e.is_not_found() => Ok(true),
            Err(e) => Err(e),
        }
    }
}
