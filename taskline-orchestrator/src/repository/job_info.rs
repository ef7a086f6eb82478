//! Job Info Repository
//!
//! Append-only audit rows written once per finished job.

use sqlx::PgPool;
use sqlx::types::Json;
use taskline_core::domain::job_info::JobInfo;

use super::workflow::DocumentRow;
use super::{StoreResult, from_document};

pub async fn insert(pool: &PgPool, info: &JobInfo) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO job_infos (id, workflow_name, task_id, job_name, job_type, status, document, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(info.id)
    .bind(&info.workflow_name)
    .bind(info.task_id)
    .bind(&info.job_name)
    .bind(info.job_type.to_string())
    .bind(info.status.as_str())
    .bind(Json(info))
    .bind(chrono::Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

/// List job infos, optionally restricted to one workflow
pub async fn list(pool: &PgPool, workflow_name: Option<&str>) -> StoreResult<Vec<JobInfo>> {
    let rows = sqlx::query_as::<_, DocumentRow>(
        r#"
        SELECT document FROM job_infos
        WHERE ($1::TEXT IS NULL OR workflow_name = $1)
        ORDER BY created_at DESC
        "#,
    )
    .bind(workflow_name)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(|r| from_document(r.document)).collect()
}
