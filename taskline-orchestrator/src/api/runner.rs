//! Runner API Handlers
//!
//! HTTP endpoints for runner management and lifecycle.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use taskline_core::domain::runner::Runner;
use taskline_core::dto::runner::RegisterRunner;

use crate::api::AppState;
use crate::api::error::ApiResult;

// =============================================================================
// Runner Registration & Lifecycle
// =============================================================================

/// POST /api/runners/register
/// Register a runner with the orchestrator
pub async fn register_runner(
    State(state): State<AppState>,
    Json(req): Json<RegisterRunner>,
) -> ApiResult<Json<Runner>> {
    tracing::info!("Registering runner: {}", req.runner_id);
    Ok(Json(state.runners.register_runner(req).await?))
}

/// POST /api/runners/{id}/heartbeat
/// Update heartbeat for a runner to keep it marked as online
pub async fn runner_heartbeat(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.runners.update_heartbeat(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Runner Query Endpoints
// =============================================================================

/// GET /api/runners
/// List all registered runners
pub async fn list_runners(State(state): State<AppState>) -> ApiResult<Json<Vec<Runner>>> {
    tracing::debug!("Listing all runners");
    Ok(Json(state.runners.list_runners().await?))
}

/// GET /api/runners/{id}
pub async fn get_runner(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Runner>> {
    Ok(Json(state.runners.get_runner(&id).await?))
}

/// DELETE /api/runners/{id}
/// Delete a runner registration
pub async fn delete_runner(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    tracing::info!("Deleting runner: {}", id);
    state.runners.delete_runner(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
