use sqlx::SqliteConnection;

use crate::{
    db_types::{LedgerWrite, PendingWrite},
    traits::LedgerError,
};

pub async fn insert_pending_write(
    write: &LedgerWrite,
    error: &str,
    conn: &mut SqliteConnection,
) -> Result<PendingWrite, LedgerError> {
    let payload = serde_json::to_string(write)?;
    let entry = sqlx::query_as(
        r#"
            INSERT INTO pending_writes (kind, external_ref, payload, last_error) VALUES ($1, $2, $3, $4)
            RETURNING *;
        "#,
    )
    .bind(write.kind())
    .bind(write.external_ref())
    .bind(payload)
    .bind(error)
    .fetch_one(conn)
    .await?;
    Ok(entry)
}

/// Live entries, least-attempted first. An entry that keeps failing drops behind newer ones.
pub async fn fetch_unresolved(limit: i64, conn: &mut SqliteConnection) -> Result<Vec<PendingWrite>, LedgerError> {
    let entries = sqlx::query_as(
        r#"
            SELECT * FROM pending_writes
            WHERE resolved_at IS NULL AND abandoned_at IS NULL
            ORDER BY attempts ASC, id ASC
            LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(conn)
    .await?;
    Ok(entries)
}

pub async fn fetch_abandoned(limit: i64, conn: &mut SqliteConnection) -> Result<Vec<PendingWrite>, LedgerError> {
    let entries = sqlx::query_as(
        "SELECT * FROM pending_writes WHERE resolved_at IS NULL AND abandoned_at IS NOT NULL ORDER BY id ASC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(conn)
    .await?;
    Ok(entries)
}

pub async fn mark_resolved(id: i64, conn: &mut SqliteConnection) -> Result<PendingWrite, LedgerError> {
    sqlx::query_as(
        r#"
            UPDATE pending_writes SET resolved_at = COALESCE(resolved_at, CURRENT_TIMESTAMP), attempts = attempts + 1
            WHERE id = $1
            RETURNING *;
        "#,
    )
    .bind(id)
    .fetch_optional(conn)
    .await?
    .ok_or(LedgerError::PendingWriteNotFound(id))
}

pub async fn record_failure(id: i64, error: &str, conn: &mut SqliteConnection) -> Result<PendingWrite, LedgerError> {
    sqlx::query_as(
        r#"
            UPDATE pending_writes SET attempts = attempts + 1, last_error = $1
            WHERE id = $2
            RETURNING *;
        "#,
    )
    .bind(error)
    .bind(id)
    .fetch_optional(conn)
    .await?
    .ok_or(LedgerError::PendingWriteNotFound(id))
}

pub async fn mark_abandoned(id: i64, error: &str, conn: &mut SqliteConnection) -> Result<PendingWrite, LedgerError> {
    sqlx::query_as(
        r#"
            UPDATE pending_writes SET attempts = attempts + 1, last_error = $1, abandoned_at = CURRENT_TIMESTAMP
            WHERE id = $2
            RETURNING *;
        "#,
    )
    .bind(error)
    .bind(id)
    .fetch_optional(conn)
    .await?
    .ok_or(LedgerError::PendingWriteNotFound(id))
}
