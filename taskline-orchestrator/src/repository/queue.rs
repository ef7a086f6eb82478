//! Message Queue Repository
//!
//! A table-backed queue. Consumers claim rows with `SKIP LOCKED` so two
//! orchestrators never take the same message.

use serde_json::Value as JsonValue;
use sqlx::PgPool;
use sqlx::types::Json;

use super::{QueueMessage, StoreResult};

pub async fn publish(pool: &PgPool, topic: &str, payload: JsonValue) -> StoreResult<()> {
    sqlx::query("INSERT INTO msg_queue (topic, payload, created_at) VALUES ($1, $2, $3)")
        .bind(topic)
        .bind(Json(payload))
        .bind(chrono::Utc::now())
        .execute(pool)
        .await?;

    Ok(())
}

/// Claim up to `limit` messages of a topic, oldest first
pub async fn consume(pool: &PgPool, topic: &str, limit: i64) -> StoreResult<Vec<QueueMessage>> {
    let mut rows = sqlx::query_as::<_, QueueRow>(
        r#"
        UPDATE msg_queue
        SET consumed_at = now()
        WHERE id IN (
            SELECT id FROM msg_queue
            WHERE topic = $1 AND consumed_at IS NULL
            ORDER BY id
            LIMIT $2
            FOR UPDATE SKIP LOCKED
        )
        RETURNING id, topic, payload, created_at
        "#,
    )
    .bind(topic)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.sort_by_key(|row| row.id);
    Ok(rows.into_iter().map(|r| r.into()).collect())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct QueueRow {
    id: i64,
    topic: String,
    payload: JsonValue,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl From<QueueRow> for QueueMessage {
    fn from(row: QueueRow) -> Self {
        QueueMessage {
            id: row.id,
            topic: row.topic,
            payload: row.payload,
            created_at: row.created_at,
        }
    }
}
