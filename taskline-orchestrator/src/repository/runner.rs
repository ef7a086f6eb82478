//! Runner Repository
//!
//! Handles all database operations related to runners.

use sqlx::PgPool;
use taskline_core::domain::common::Infrastructure;
use taskline_core::domain::runner::{Runner, RunnerStatus};
use taskline_core::dto::runner::RegisterRunner;

use super::StoreResult;

/// Create or update a runner registration in the database
pub async fn register(pool: &PgPool, req: &RegisterRunner) -> StoreResult<Runner> {
    let now = chrono::Utc::now();

    let runner = Runner {
        id: req.runner_id.clone(),
        infrastructures: req.infrastructures.clone(),
        registered_at: now,
        last_heartbeat_at: now,
        status: RunnerStatus::Online,
    };

    let infrastructures: Vec<String> = req.infrastructures.iter().map(|i| i.to_string()).collect();

    sqlx::query(
        r#"
        INSERT INTO runners (id, infrastructures, registered_at, last_heartbeat_at, status)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (id) DO UPDATE SET
            infrastructures = EXCLUDED.infrastructures,
            last_heartbeat_at = EXCLUDED.last_heartbeat_at,
            status = EXCLUDED.status
        "#,
    )
    .bind(&req.runner_id)
    .bind(&infrastructures)
    .bind(now)
    .bind(now)
    .bind(RunnerStatus::Online.as_str())
    .execute(pool)
    .await?;

    Ok(runner)
}

/// Update the last heartbeat time for a runner
pub async fn update_heartbeat(pool: &PgPool, runner_id: &str) -> StoreResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE runners
        SET last_heartbeat_at = $1, status = $2
        WHERE id = $3
        "#,
    )
    .bind(chrono::Utc::now())
    .bind(RunnerStatus::Online.as_str())
    .bind(runner_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Find a runner by ID
pub async fn find_by_id(pool: &PgPool, id: &str) -> StoreResult<Option<Runner>> {
    let row = sqlx::query_as::<_, RunnerRow>(
        r#"
        SELECT id, infrastructures, registered_at, last_heartbeat_at, status
        FROM runners
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// List all runners
pub async fn list_all(pool: &PgPool) -> StoreResult<Vec<Runner>> {
    let rows = sqlx::query_as::<_, RunnerRow>(
        r#"
        SELECT id, infrastructures, registered_at, last_heartbeat_at, status
        FROM runners
        ORDER BY registered_at DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Delete a runner by ID
pub async fn delete(pool: &PgPool, id: &str) -> StoreResult<bool> {
    let result = sqlx::query("DELETE FROM runners WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Mark runners as offline if they haven't sent a heartbeat recently
/// Returns the number of runners marked as offline
pub async fn mark_stale_runners_offline(pool: &PgPool, timeout_seconds: i64) -> StoreResult<u64> {
    let cutoff_time = chrono::Utc::now() - chrono::Duration::seconds(timeout_seconds);

    let result = sqlx::query(
        r#"
        UPDATE runners
        SET status = $1
        WHERE last_heartbeat_at < $2 AND status != $1
        "#,
    )
    .bind(RunnerStatus::Offline.as_str())
    .bind(cutoff_time)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct RunnerRow {
    id: String,
    infrastructures: Vec<String>,
    registered_at: chrono::DateTime<chrono::Utc>,
    last_heartbeat_at: chrono::DateTime<chrono::Utc>,
    status: String,
}

impl From<RunnerRow> for Runner {
    fn from(row: RunnerRow) -> Self {
        let status = match row.status.as_str() {
            "Online" => RunnerStatus::Online,
            _ => RunnerStatus::Offline,
        };

        Runner {
            id: row.id,
            infrastructures: row
                .infrastructures
                .iter()
                .filter_map(|i| i.parse::<Infrastructure>().ok())
                .collect(),
            registered_at: row.registered_at,
            last_heartbeat_at: row.last_heartbeat_at,
            status,
        }
    }
}
