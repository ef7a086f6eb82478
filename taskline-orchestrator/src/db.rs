use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Workflow definitions are stored as documents keyed by name
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workflows (
            name VARCHAR(255) PRIMARY KEY,
            project VARCHAR(255) NOT NULL DEFAULT '',
            document JSONB NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workflow_task_counters (
            workflow_name VARCHAR(255) PRIMARY KEY,
            last_task_id BIGINT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workflow_tasks (
            workflow_name VARCHAR(255) NOT NULL,
            task_id BIGINT NOT NULL,
            status VARCHAR(50) NOT NULL,
            creator VARCHAR(255) NOT NULL,
            document JSONB NOT NULL,
            create_time TIMESTAMPTZ NOT NULL,
            end_time TIMESTAMPTZ,
            PRIMARY KEY (workflow_name, task_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cronjobs (
            id VARCHAR(64) PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            parent_type VARCHAR(50) NOT NULL,
            enabled BOOLEAN NOT NULL,
            document JSONB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS msg_queue (
            id BIGSERIAL PRIMARY KEY,
            topic VARCHAR(255) NOT NULL,
            payload JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            consumed_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_infos (
            id UUID PRIMARY KEY,
            workflow_name VARCHAR(255) NOT NULL,
            task_id BIGINT NOT NULL,
            job_name VARCHAR(255) NOT NULL,
            job_type VARCHAR(50) NOT NULL,
            status VARCHAR(50) NOT NULL,
            document JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_logs (
            id BIGSERIAL PRIMARY KEY,
            workflow_name VARCHAR(255) NOT NULL,
            task_id BIGINT NOT NULL,
            job_name VARCHAR(255) NOT NULL,
            timestamp TIMESTAMPTZ NOT NULL,
            level VARCHAR(20) NOT NULL,
            step VARCHAR(255),
            message TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS runners (
            id VARCHAR(255) PRIMARY KEY,
            infrastructures TEXT[] NOT NULL,
            registered_at TIMESTAMPTZ NOT NULL,
            last_heartbeat_at TIMESTAMPTZ NOT NULL,
            status VARCHAR(50) NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Registries, clusters and database instances
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS catalog (
            kind VARCHAR(50) NOT NULL,
            key VARCHAR(255) NOT NULL,
            document JSONB NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (kind, key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_workflow_tasks_status ON workflow_tasks(status)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_cronjobs_parent ON cronjobs(name, parent_type)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_msg_queue_pending ON msg_queue(topic, id) WHERE consumed_at IS NULL",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_job_infos_workflow ON job_infos(workflow_name, task_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_job_logs_job ON job_logs(workflow_name, task_id, job_name, timestamp)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_runners_last_heartbeat ON runners(last_heartbeat_at)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
