use sqlx::SqliteConnection;

use super::is_unique_violation;
use crate::{
    db_types::{ExternalRef, NewUser, User},
    traits::LedgerError,
};

pub async fn insert_user(user: NewUser, conn: &mut SqliteConnection) -> Result<User, LedgerError> {
    let NewUser { name, email, gateway_customer_id } = user;
    sqlx::query_as(
        r#"
            INSERT INTO users (name, email, gateway_customer_id) VALUES ($1, $2, $3)
            RETURNING *;
        "#,
    )
    .bind(name.clone())
    .bind(email.clone())
    .bind(gateway_customer_id)
    .fetch_one(conn)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            LedgerError::UserAlreadyExists { name, email }
        } else {
            LedgerError::from(e)
        }
    })
}

pub async fn fetch_user_by_identity(
    name: &str,
    email: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<User>, LedgerError> {
    let user = sqlx::query_as("SELECT * FROM users WHERE name = $1 AND email = $2")
        .bind(name)
        .bind(email)
        .fetch_optional(conn)
        .await?;
    Ok(user)
}

pub async fn fetch_user(id: i64, conn: &mut SqliteConnection) -> Result<Option<User>, LedgerError> {
    let user = sqlx::query_as("SELECT * FROM users WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(user)
}

/// Backfills the gateway customer id. An existing reference is never overwritten.
pub async fn backfill_gateway_ref(
    user_id: i64,
    customer_ref: &ExternalRef,
    conn: &mut SqliteConnection,
) -> Result<User, LedgerError> {
    sqlx::query(
        r#"
            UPDATE users SET gateway_customer_id = $1, updated_at = CURRENT_TIMESTAMP
            WHERE id = $2 AND gateway_customer_id IS NULL
        "#,
    )
    .bind(customer_ref)
    .bind(user_id)
    .execute(&mut *conn)
    .await?;
    fetch_user(user_id, conn).await?.ok_or(LedgerError::UserNotFound(user_id))
}
