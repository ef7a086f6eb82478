//! Log Repository
//!
//! Handles all database operations related to job logs.

use sqlx::PgPool;
use taskline_core::domain::log::{LogEntry, LogLevel};

use super::StoreResult;

/// Add log entries for a job of a task
pub async fn add_entries(
    pool: &PgPool,
    workflow_name: &str,
    task_id: i64,
    job_name: &str,
    entries: &[LogEntry],
) -> StoreResult<()> {
    let mut tx = pool.begin().await?;

    for entry in entries {
        sqlx::query(
            r#"
            INSERT INTO job_logs (workflow_name, task_id, job_name, timestamp, level, step, message)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(workflow_name)
        .bind(task_id)
        .bind(job_name)
        .bind(entry.timestamp)
        .bind(level_to_string(entry.level))
        .bind(&entry.step)
        .bind(&entry.message)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Get all log entries for a job of a task
pub async fn find_by_job(
    pool: &PgPool,
    workflow_name: &str,
    task_id: i64,
    job_name: &str,
) -> StoreResult<Vec<LogEntry>> {
    let rows = sqlx::query_as::<_, LogRow>(
        r#"
        SELECT timestamp, level, step, message
        FROM job_logs
        WHERE workflow_name = $1 AND task_id = $2 AND job_name = $3
        ORDER BY timestamp ASC, id ASC
        "#,
    )
    .bind(workflow_name)
    .bind(task_id)
    .bind(job_name)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

// =============================================================================
// Helper Functions
// =============================================================================

fn level_to_string(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Debug => "Debug",
        LogLevel::Info => "Info",
        LogLevel::Warning => "Warning",
        LogLevel::Error => "Error",
    }
}

fn string_to_level(s: &str) -> LogLevel {
    match s {
        "Debug" => LogLevel::Debug,
        "Warning" => LogLevel::Warning,
        "Error" => LogLevel::Error,
        _ => LogLevel::Info,
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct LogRow {
    timestamp: chrono::DateTime<chrono::Utc>,
    level: String,
    step: Option<String>,
    message: String,
}

impl From<LogRow> for LogEntry {
    fn from(row: LogRow) -> Self {
        LogEntry {
            timestamp: row.timestamp,
            level: string_to_level(&row.level),
            step: row.step,
            message: row.message,
        }
    }
}
