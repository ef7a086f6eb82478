//! Workflow Task Repository
//!
//! Handles persistence of workflow tasks. The full task is stored as a
//! JSON document; status and timestamps are duplicated into columns for
//! listing and recovery queries.

use sqlx::PgPool;
use sqlx::types::Json;
use taskline_core::domain::task::WorkflowTask;

use super::workflow::DocumentRow;
use super::{StoreResult, from_document};

/// Statuses a task can be left in when the orchestrator stops
const UNFINISHED_STATUSES: &[&str] = &[
    "created",
    "prepare",
    "running",
    "waiting_approve",
    "manual_check",
];

/// Allocate the next task ID for a workflow
///
/// The counter row is bumped atomically, so concurrent triggers never
/// share an ID.
pub async fn next_task_id(pool: &PgPool, workflow_name: &str) -> StoreResult<i64> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO workflow_task_counters (workflow_name, last_task_id)
        VALUES ($1, 1)
        ON CONFLICT (workflow_name) DO UPDATE SET
            last_task_id = workflow_task_counters.last_task_id + 1
        RETURNING last_task_id
        "#,
    )
    .bind(workflow_name)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// Insert a new task
pub async fn create(pool: &PgPool, task: &WorkflowTask) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO workflow_tasks (workflow_name, task_id, status, creator, document, create_time, end_time)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(&task.workflow_name)
    .bind(task.task_id)
    .bind(task.status.as_str())
    .bind(&task.creator)
    .bind(Json(task))
    .bind(task.create_time)
    .bind(task.end_time)
    .execute(pool)
    .await?;

    Ok(())
}

/// Replace the stored state of a task
pub async fn update(pool: &PgPool, task: &WorkflowTask) -> StoreResult<()> {
    sqlx::query(
        r#"
        UPDATE workflow_tasks
        SET status = $3, document = $4, end_time = $5
        WHERE workflow_name = $1 AND task_id = $2
        "#,
    )
    .bind(&task.workflow_name)
    .bind(task.task_id)
    .bind(task.status.as_str())
    .bind(Json(task))
    .bind(task.end_time)
    .execute(pool)
    .await?;

    Ok(())
}

/// Find a task by workflow name and task ID
pub async fn find(
    pool: &PgPool,
    workflow_name: &str,
    task_id: i64,
) -> StoreResult<Option<WorkflowTask>> {
    let row = sqlx::query_as::<_, DocumentRow>(
        "SELECT document FROM workflow_tasks WHERE workflow_name = $1 AND task_id = $2",
    )
    .bind(workflow_name)
    .bind(task_id)
    .fetch_optional(pool)
    .await?;

    row.map(|r| from_document(r.document)).transpose()
}

/// List the most recent tasks of a workflow
pub async fn list_by_workflow(
    pool: &PgPool,
    workflow_name: &str,
    limit: i64,
) -> StoreResult<Vec<WorkflowTask>> {
    let rows = sqlx::query_as::<_, DocumentRow>(
        r#"
        SELECT document FROM workflow_tasks
        WHERE workflow_name = $1
        ORDER BY task_id DESC
        LIMIT $2
        "#,
    )
    .bind(workflow_name)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(|r| from_document(r.document)).collect()
}

/// List tasks that have not reached a terminal status
pub async fn list_unfinished(pool: &PgPool) -> StoreResult<Vec<WorkflowTask>> {
    let statuses: Vec<String> = UNFINISHED_STATUSES.iter().map(|s| s.to_string()).collect();

    let rows = sqlx::query_as::<_, DocumentRow>(
        r#"
        SELECT document FROM workflow_tasks
        WHERE status = ANY($1)
        ORDER BY create_time ASC
        "#,
    )
    .bind(statuses)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(|r| from_document(r.document)).collect()
}
