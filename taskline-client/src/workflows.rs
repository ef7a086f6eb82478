//! Workflow, task and job log endpoints

use serde_json::Value as JsonValue;
use taskline_core::domain::catalog::CatalogKind;
use taskline_core::domain::job_info::JobInfo;
use taskline_core::domain::log::LogEntry;
use taskline_core::domain::task::WorkflowTask;
use taskline_core::domain::workflow::WorkflowDefinition;
use taskline_core::dto::task::{
    ApproveRequest, CreateTask, CreateTaskResponse, DecisionRequest, TaskSummary,
};

use crate::error::{ClientError, Result};
use crate::{OrchestratorClient, segment};

impl OrchestratorClient {
    fn task_path(&self, workflow: &str, task_id: i64) -> String {
        self.url(&format!("/api/workflows/{}/tasks/{}", segment(workflow), task_id))
    }

    // =============================================================================
    // Workflow Definitions
    // =============================================================================

    pub async fn save_workflow(&self, workflow: &WorkflowDefinition) -> Result<WorkflowDefinition> {
        if workflow.name.is_empty() {
            return Err(ClientError::ParseError("workflow has no name".to_string()));
        }
        let url = self.url(&format!("/api/workflows/{}", segment(&workflow.name)));
        let response = self.client.put(url).json(workflow).send().await?;

        self.handle_response(response).await
    }

    pub async fn get_workflow(&self, name: &str) -> Result<WorkflowDefinition> {
        let url = self.url(&format!("/api/workflows/{}", segment(name)));
        let response = self.client.get(url).send().await?;

        self.handle_response(response).await
    }

    /// Workflow with catalog options filled in
    pub async fn get_preset(&self, name: &str) -> Result<WorkflowDefinition> {
        let url = self.url(&format!("/api/workflows/{}/preset", segment(name)));
        let response = self.client.get(url).send().await?;

        self.handle_response(response).await
    }

    pub async fn refresh_args(&self, name: &str, args: &WorkflowDefinition) -> Result<WorkflowDefinition> {
        let url = self.url(&format!("/api/workflows/{}/args/refresh", segment(name)));
        let response = self.client.post(url).json(args).send().await?;

        self.handle_response(response).await
    }

    /// Output keys a job publishes
    pub async fn get_job_outputs(&self, name: &str, job: &str) -> Result<Vec<String>> {
        let url = self.url(&format!(
            "/api/workflows/{}/jobs/{}/outputs",
            segment(name),
            segment(job)
        ));
        let response = self.client.get(url).send().await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Tasks
    // =============================================================================

    pub async fn create_task(&self, name: &str, req: CreateTask) -> Result<CreateTaskResponse> {
        let url = self.url(&format!("/api/workflows/{}/tasks", segment(name)));
        let response = self.client.post(url).json(&req).send().await?;

        self.handle_response(response).await
    }

    pub async fn list_tasks(&self, name: &str, limit: Option<i64>) -> Result<Vec<TaskSummary>> {
        let url = self.url(&format!("/api/workflows/{}/tasks", segment(name)));
        let mut request = self.client.get(url);
        if let Some(limit) = limit {
            request = request.query(&[("limit", limit)]);
        }
        let response = request.send().await?;

        self.handle_response(response).await
    }

    pub async fn get_task(&self, name: &str, task_id: i64) -> Result<WorkflowTask> {
        let response = self.client.get(self.task_path(name, task_id)).send().await?;

        self.handle_response(response).await
    }

    pub async fn cancel_task(&self, name: &str, task_id: i64) -> Result<()> {
        let url = format!("{}/cancel", self.task_path(name, task_id));
        let response = self.client.post(url).send().await?;

        self.handle_empty_response(response).await
    }

    /// Vote on the workflow approval gate
    pub async fn approve_task(&self, name: &str, task_id: i64, req: &ApproveRequest) -> Result<()> {
        let url = format!("{}/approve", self.task_path(name, task_id));
        let response = self.client.post(url).json(req).send().await?;

        self.handle_empty_response(response).await
    }

    /// Vote on an approval job
    pub async fn approve_job(
        &self,
        name: &str,
        task_id: i64,
        job: &str,
        req: &ApproveRequest,
    ) -> Result<()> {
        let url = format!("{}/jobs/{}/approve", self.task_path(name, task_id), segment(job));
        let response = self.client.post(url).json(req).send().await?;

        self.handle_empty_response(response).await
    }

    /// Continue or abort a job paused for a manual check
    pub async fn decide_job(
        &self,
        name: &str,
        task_id: i64,
        job: &str,
        req: &DecisionRequest,
    ) -> Result<()> {
        let url = format!("{}/jobs/{}/decision", self.task_path(name, task_id), segment(job));
        let response = self.client.post(url).json(req).send().await?;

        self.handle_empty_response(response).await
    }

    // =============================================================================
    // Logs, Audit and Catalog
    // =============================================================================

    pub async fn get_job_logs(&self, name: &str, task_id: i64, job: &str) -> Result<Vec<LogEntry>> {
        let url = format!("{}/jobs/{}/logs", self.task_path(name, task_id), segment(job));
        let response = self.client.get(url).send().await?;

        self.handle_response(response).await
    }

    pub async fn list_job_infos(&self, workflow: Option<&str>) -> Result<Vec<JobInfo>> {
        let mut request = self.client.get(self.url("/api/job-infos"));
        if let Some(workflow) = workflow {
            request = request.query(&[("workflow", workflow)]);
        }
        let response = request.send().await?;

        self.handle_response(response).await
    }

    pub async fn upsert_catalog_record(
        &self,
        kind: CatalogKind,
        key: &str,
        document: &JsonValue,
    ) -> Result<()> {
        let url = self.url(&format!("/api/catalog/{}/{}", kind.as_str(), segment(key)));
        let response = self.client.put(url).json(document).send().await?;

        self.handle_empty_response(response).await
    }
}
