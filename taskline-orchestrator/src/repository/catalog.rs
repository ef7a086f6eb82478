//! Catalog Repository
//!
//! Collaborator records (builds, registries, environments, ...) stored as
//! JSON documents under a kind and a key.

use serde_json::Value as JsonValue;
use sqlx::PgPool;
use sqlx::types::Json;
use taskline_core::domain::catalog::CatalogKind;

use super::StoreResult;
use super::workflow::DocumentRow;

pub async fn get(pool: &PgPool, kind: CatalogKind, key: &str) -> StoreResult<Option<JsonValue>> {
    let row = sqlx::query_as::<_, DocumentRow>(
        "SELECT document FROM catalog WHERE kind = $1 AND key = $2",
    )
    .bind(kind.as_str())
    .bind(key)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.document))
}

pub async fn list(pool: &PgPool, kind: CatalogKind) -> StoreResult<Vec<JsonValue>> {
    let rows = sqlx::query_as::<_, DocumentRow>(
        "SELECT document FROM catalog WHERE kind = $1 ORDER BY key",
    )
    .bind(kind.as_str())
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.document).collect())
}

pub async fn upsert(
    pool: &PgPool,
    kind: CatalogKind,
    key: &str,
    document: JsonValue,
) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO catalog (kind, key, document, updated_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (kind, key) DO UPDATE SET
            document = EXCLUDED.document,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(kind.as_str())
    .bind(key)
    .bind(Json(document))
    .bind(chrono::Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}
