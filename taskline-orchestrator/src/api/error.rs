//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::dispatch::DispatchError;
use crate::repository::StoreError;
use crate::service::cronjob::CronjobError;
use crate::service::log::LogError;
use crate::service::runner::RunnerError;
use crate::service::workflow_task::WorkflowTaskError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Forbidden(String),
    Conflict(String),
    DatabaseError(StoreError),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::DatabaseError(err) => {
                tracing::error!("Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::DatabaseError(err)
    }
}

impl From<CronjobError> for ApiError {
    fn from(err: CronjobError) -> Self {
        match err {
            CronjobError::ValidationError(msg) => ApiError::BadRequest(msg),
            CronjobError::Store(err) => ApiError::DatabaseError(err),
            CronjobError::Encode(err) => ApiError::InternalError(err.to_string()),
        }
    }
}

impl From<WorkflowTaskError> for ApiError {
    fn from(err: WorkflowTaskError) -> Self {
        match err {
            WorkflowTaskError::NotFound(msg) => ApiError::NotFound(msg),
            WorkflowTaskError::ValidationError(msg) => ApiError::BadRequest(msg),
            WorkflowTaskError::Forbidden(msg) => ApiError::Forbidden(msg),
            WorkflowTaskError::Conflict(msg) => ApiError::Conflict(msg),
            WorkflowTaskError::Compile(err) => ApiError::BadRequest(err.to_string()),
            WorkflowTaskError::Cronjob(err) => err.into(),
            WorkflowTaskError::Store(err) => ApiError::DatabaseError(err),
        }
    }
}

impl From<RunnerError> for ApiError {
    fn from(err: RunnerError) -> Self {
        match err {
            RunnerError::NotFound(id) => ApiError::NotFound(format!("Runner {} not found", id)),
            RunnerError::ValidationError(msg) => ApiError::BadRequest(msg),
            RunnerError::Store(err) => ApiError::DatabaseError(err),
        }
    }
}

impl From<LogError> for ApiError {
    fn from(err: LogError) -> Self {
        match err {
            LogError::ValidationError(msg) => ApiError::BadRequest(msg),
            LogError::Store(err) => ApiError::DatabaseError(err),
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::NotFound(_) => ApiError::NotFound(err.to_string()),
            DispatchError::NotOwner { .. } => ApiError::Conflict(err.to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
