//! Dispatch API Handlers
//!
//! The runner side of freestyle job execution: claiming queued jobs,
//! reporting step progress, shipping logs, completing, and polling for
//! cancellation. Runners identify themselves with the `x-runner-id`
//! header; reports from a runner other than the claimant are refused.

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};
use taskline_core::dto::dispatch::{
    CancelState, ClaimRequest, DispatchCompletion, DispatchedJob, StepUpdate,
};
use taskline_core::dto::log::LogBatch;
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::dispatch::DispatchError;

pub const RUNNER_ID_HEADER: &str = "x-runner-id";

fn runner_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(RUNNER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}

/// POST /api/dispatch/claim
/// Hands the oldest queued job the runner can execute to it, if any
pub async fn claim_job(
    State(state): State<AppState>,
    Json(req): Json<ClaimRequest>,
) -> ApiResult<Json<Option<DispatchedJob>>> {
    if req.runner_id.trim().is_empty() {
        return Err(ApiError::BadRequest("Runner ID cannot be empty".to_string()));
    }
    tracing::debug!("Runner {} polling for work", req.runner_id);
    Ok(Json(state.queue.claim(&req)))
}

/// POST /api/dispatch/{id}/steps
pub async fn update_step(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(update): Json<StepUpdate>,
) -> ApiResult<StatusCode> {
    tracing::debug!("Step {} of dispatch {} is {:?}", update.name, id, update.status);
    state.queue.step_update(id, runner_id(&headers), update)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/dispatch/{id}/logs
/// Logs are stored against the job the dispatch belongs to
pub async fn add_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(batch): Json<LogBatch>,
) -> ApiResult<StatusCode> {
    let owner = state
        .queue
        .owner(id)
        .ok_or(ApiError::from(DispatchError::NotFound(id)))?;
    state
        .logs
        .add_log_entries(&owner.workflow_name, owner.task_id, &owner.job_name, batch.entries)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/dispatch/{id}/complete
pub async fn complete_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(completion): Json<DispatchCompletion>,
) -> ApiResult<StatusCode> {
    tracing::info!("Dispatch {} completed with {}", id, completion.status);
    state.queue.complete(id, runner_id(&headers), completion)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/dispatch/{id}/cancelled
pub async fn is_cancelled(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CancelState>> {
    let cancelled = state.queue.is_cancelled(id)?;
    Ok(Json(CancelState { cancelled }))
}
