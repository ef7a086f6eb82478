//! Catalog and audit API Handlers

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use taskline_core::domain::catalog::CatalogKind;
use taskline_core::domain::job_info::JobInfo;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
pub struct JobInfoQuery {
    pub workflow: Option<String>,
}

/// GET /api/job-infos?workflow=
/// Audit records of finished jobs
pub async fn list_job_infos(
    State(state): State<AppState>,
    Query(query): Query<JobInfoQuery>,
) -> ApiResult<Json<Vec<JobInfo>>> {
    let infos = state.job_infos.list_job_infos(query.workflow.as_deref()).await?;
    Ok(Json(infos))
}

/// PUT /api/catalog/{kind}/{key}
/// Store a registry, cluster, database instance or other catalog record
pub async fn upsert_record(
    State(state): State<AppState>,
    Path((kind, key)): Path<(CatalogKind, String)>,
    Json(document): Json<JsonValue>,
) -> ApiResult<StatusCode> {
    if !document.is_object() {
        return Err(ApiError::BadRequest(
            "catalog record must be a JSON object".to_string(),
        ));
    }

    tracing::info!("Upserting catalog record {:?}/{}", kind, key);
    state.catalog.upsert_record(kind, &key, document).await?;
    Ok(StatusCode::NO_CONTENT)
}
