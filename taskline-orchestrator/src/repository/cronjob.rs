//! Cronjob Repository

use sqlx::PgPool;
use sqlx::types::Json;
use taskline_core::domain::cronjob::{Cronjob, CronjobParent};

use super::workflow::DocumentRow;
use super::{StoreResult, from_document};

/// List the cronjobs belonging to a parent
pub async fn list_by_parent(
    pool: &PgPool,
    parent_name: &str,
    parent_type: CronjobParent,
) -> StoreResult<Vec<Cronjob>> {
    let rows = sqlx::query_as::<_, DocumentRow>(
        "SELECT document FROM cronjobs WHERE name = $1 AND parent_type = $2 ORDER BY id",
    )
    .bind(parent_name)
    .bind(parent_type.as_str())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(|r| from_document(r.document)).collect()
}

/// List every enabled cronjob
pub async fn list_enabled(pool: &PgPool) -> StoreResult<Vec<Cronjob>> {
    let rows = sqlx::query_as::<_, DocumentRow>(
        "SELECT document FROM cronjobs WHERE enabled = TRUE ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(|r| from_document(r.document)).collect()
}

pub async fn create(pool: &PgPool, cronjob: &Cronjob) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO cronjobs (id, name, parent_type, enabled, document)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(&cronjob.id)
    .bind(&cronjob.name)
    .bind(cronjob.parent_type.as_str())
    .bind(cronjob.schedule.enabled)
    .bind(Json(cronjob))
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn update(pool: &PgPool, cronjob: &Cronjob) -> StoreResult<()> {
    sqlx::query(
        r#"
        UPDATE cronjobs
        SET name = $2, parent_type = $3, enabled = $4, document = $5
        WHERE id = $1
        "#,
    )
    .bind(&cronjob.id)
    .bind(&cronjob.name)
    .bind(cronjob.parent_type.as_str())
    .bind(cronjob.schedule.enabled)
    .bind(Json(cronjob))
    .execute(pool)
    .await?;

    Ok(())
}

/// Delete cronjobs by ID, returning how many rows went away
pub async fn delete_by_ids(pool: &PgPool, ids: &[String]) -> StoreResult<u64> {
    if ids.is_empty() {
        return Ok(0);
    }

    let result = sqlx::query("DELETE FROM cronjobs WHERE id = ANY($1)")
        .bind(ids)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}
