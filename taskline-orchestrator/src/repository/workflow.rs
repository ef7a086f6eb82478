//! Workflow Repository
//!
//! Stores workflow definitions as JSON documents keyed by name.

use serde_json::Value as JsonValue;
use sqlx::PgPool;
use sqlx::types::Json;
use taskline_core::domain::workflow::WorkflowDefinition;

use super::{StoreResult, from_document};

/// Insert or replace a workflow definition
pub async fn save(pool: &PgPool, workflow: &WorkflowDefinition) -> StoreResult<()> {
    let now = chrono::Utc::now();

    sqlx::query(
        r#"
        INSERT INTO workflows (name, project, document, updated_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (name) DO UPDATE SET
            project = EXCLUDED.project,
            document = EXCLUDED.document,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(&workflow.name)
    .bind(&workflow.project)
    .bind(Json(workflow))
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Find a workflow definition by name
pub async fn find_by_name(pool: &PgPool, name: &str) -> StoreResult<Option<WorkflowDefinition>> {
    let row = sqlx::query_as::<_, DocumentRow>("SELECT document FROM workflows WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await?;

    row.map(|r| from_document(r.document)).transpose()
}

/// List all workflow definitions
pub async fn list_all(pool: &PgPool) -> StoreResult<Vec<WorkflowDefinition>> {
    let rows = sqlx::query_as::<_, DocumentRow>(
        "SELECT document FROM workflows ORDER BY updated_at DESC",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(|r| from_document(r.document)).collect()
}

#[derive(sqlx::FromRow)]
pub(crate) struct DocumentRow {
    pub(crate) document: JsonValue,
}
