//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod catalog;
pub mod dispatch;
pub mod error;
pub mod health;
pub mod logs;
pub mod runner;
pub mod workflow;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, put},
};
use tower_http::trace::TraceLayer;

use crate::dispatch::RunnerQueue;
use crate::repository::{Catalog, JobInfoStore};
use crate::service::{LogService, RunnerService, WorkflowTaskService};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub workflows: WorkflowTaskService,
    pub runners: RunnerService,
    pub logs: LogService,
    pub queue: Arc<RunnerQueue>,
    pub job_infos: Arc<dyn JobInfoStore>,
    pub catalog: Arc<dyn Catalog>,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Workflow endpoints
        .route(
            "/api/workflows/{name}",
            put(workflow::save_workflow).get(workflow::get_workflow),
        )
        .route("/api/workflows/{name}/preset", get(workflow::get_preset))
        .route("/api/workflows/{name}/args/refresh", post(workflow::refresh_args))
        .route(
            "/api/workflows/{name}/jobs/{job}/outputs",
            get(workflow::get_job_outputs),
        )
        // Task endpoints
        .route(
            "/api/workflows/{name}/tasks",
            post(workflow::create_task).get(workflow::list_tasks),
        )
        .route("/api/workflows/{name}/tasks/{id}", get(workflow::get_task))
        .route("/api/workflows/{name}/tasks/{id}/cancel", post(workflow::cancel_task))
        .route("/api/workflows/{name}/tasks/{id}/approve", post(workflow::approve_task))
        .route(
            "/api/workflows/{name}/tasks/{id}/jobs/{job}/approve",
            post(workflow::approve_job),
        )
        .route(
            "/api/workflows/{name}/tasks/{id}/jobs/{job}/decision",
            post(workflow::decide_job),
        )
        // Log endpoints
        .route(
            "/api/workflows/{name}/tasks/{id}/jobs/{job}/logs",
            get(logs::get_job_logs),
        )
        .route(
            "/api/workflows/{name}/tasks/{id}/jobs/{job}/logs/stream",
            get(logs::stream_job_logs),
        )
        // Audit and catalog endpoints
        .route("/api/job-infos", get(catalog::list_job_infos))
        .route("/api/catalog/{kind}/{key}", put(catalog::upsert_record))
        // Runner endpoints
        .route("/api/runners/register", post(runner::register_runner))
        .route("/api/runners/{id}/heartbeat", post(runner::runner_heartbeat))
        .route("/api/runners", get(runner::list_runners))
        .route(
            "/api/runners/{id}",
            get(runner::get_runner).delete(runner::delete_runner),
        )
        // Dispatch endpoints used by runners
        .route("/api/dispatch/claim", post(dispatch::claim_job))
        .route("/api/dispatch/{id}/steps", post(dispatch::update_step))
        .route("/api/dispatch/{id}/logs", post(dispatch::add_logs))
        .route("/api/dispatch/{id}/complete", post(dispatch::complete_job))
        .route("/api/dispatch/{id}/cancelled", get(dispatch::is_cancelled))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
