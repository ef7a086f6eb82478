//! Workflow API Handlers
//!
//! Saving and reading workflow definitions, triggering tasks, and the
//! operator actions on a running task.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use taskline_core::domain::task::WorkflowTask;
use taskline_core::domain::workflow::WorkflowDefinition;
use taskline_core::dto::task::{
    ApproveRequest, CreateTask, CreateTaskResponse, DecisionRequest, TaskSummary,
};

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};

const DEFAULT_TASK_LIMIT: i64 = 50;

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub limit: Option<i64>,
}

// =============================================================================
// Workflow Definitions
// =============================================================================

/// PUT /api/workflows/{name}
/// Create or replace a workflow definition
pub async fn save_workflow(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(mut workflow): Json<WorkflowDefinition>,
) -> ApiResult<Json<WorkflowDefinition>> {
    if workflow.name.is_empty() {
        workflow.name = name.clone();
    }
    if workflow.name != name {
        return Err(ApiError::BadRequest(format!(
            "workflow name {} does not match path {}",
            workflow.name, name
        )));
    }

    tracing::info!("Saving workflow: {}", name);
    let saved = state.workflows.save_workflow(workflow).await?;
    Ok(Json(saved))
}

/// GET /api/workflows/{name}
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<WorkflowDefinition>> {
    Ok(Json(state.workflows.get_workflow(&name).await?))
}

/// GET /api/workflows/{name}/preset
/// Workflow with catalog options filled in, as shown before a trigger
pub async fn get_preset(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<WorkflowDefinition>> {
    Ok(Json(state.workflows.preset(&name).await?))
}

/// POST /api/workflows/{name}/args/refresh
/// Bring previously used trigger args up to date with the stored workflow
pub async fn refresh_args(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(args): Json<WorkflowDefinition>,
) -> ApiResult<Json<WorkflowDefinition>> {
    Ok(Json(state.workflows.refresh_args(&name, args).await?))
}

/// GET /api/workflows/{name}/jobs/{job}/outputs
/// Output keys a job publishes, for building placeholders
pub async fn get_job_outputs(
    State(state): State<AppState>,
    Path((name, job)): Path<(String, String)>,
) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(state.workflows.job_outputs(&name, &job).await?))
}

// =============================================================================
// Tasks
// =============================================================================

/// POST /api/workflows/{name}/tasks
/// Trigger a workflow
pub async fn create_task(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<CreateTask>,
) -> ApiResult<(StatusCode, Json<CreateTaskResponse>)> {
    tracing::info!("Triggering workflow: {}", name);
    let created = state.workflows.create_task(&name, req).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/workflows/{name}/tasks?limit=
pub async fn list_tasks(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<ListTasksQuery>,
) -> ApiResult<Json<Vec<TaskSummary>>> {
    let limit = query.limit.unwrap_or(DEFAULT_TASK_LIMIT).clamp(1, 500);
    Ok(Json(state.workflows.list_tasks(&name, limit).await?))
}

/// GET /api/workflows/{name}/tasks/{id}
pub async fn get_task(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, i64)>,
) -> ApiResult<Json<WorkflowTask>> {
    Ok(Json(state.workflows.get_task(&name, id).await?))
}

/// POST /api/workflows/{name}/tasks/{id}/cancel
pub async fn cancel_task(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, i64)>,
) -> ApiResult<StatusCode> {
    tracing::info!("Cancelling task {}#{}", name, id);
    state.workflows.cancel_task(&name, id).await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /api/workflows/{name}/tasks/{id}/approve
/// Vote on the workflow-level approval gate
pub async fn approve_task(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, i64)>,
    Json(req): Json<ApproveRequest>,
) -> ApiResult<StatusCode> {
    tracing::info!("{} votes on task {}#{}: approve={}", req.user, name, id, req.approve);
    state.workflows.approve_task(&name, id, req).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/workflows/{name}/tasks/{id}/jobs/{job}/approve
pub async fn approve_job(
    State(state): State<AppState>,
    Path((name, id, job)): Path<(String, i64, String)>,
    Json(req): Json<ApproveRequest>,
) -> ApiResult<StatusCode> {
    tracing::info!(
        "{} votes on job {} of {}#{}: approve={}",
        req.user,
        job,
        name,
        id,
        req.approve
    );
    state.workflows.approve_job(&name, id, &job, req).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/workflows/{name}/tasks/{id}/jobs/{job}/decision
/// Continue or abort a job paused for a manual check
pub async fn decide_job(
    State(state): State<AppState>,
    Path((name, id, job)): Path<(String, i64, String)>,
    Json(req): Json<DecisionRequest>,
) -> ApiResult<StatusCode> {
    tracing::info!("{} decides {:?} on job {} of {}#{}", req.user, req.decision, job, name, id);
    state.workflows.decide_job(&name, id, &job, req).await?;
    Ok(StatusCode::NO_CONTENT)
}
