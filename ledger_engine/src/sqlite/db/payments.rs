use chrono::Duration;
use sqlx::SqliteConnection;

use super::is_unique_violation;
use crate::{
    db_types::{ExternalRef, NewPayment, Payment, PaymentStatus},
    traits::LedgerError,
};

pub async fn idempotent_insert(payment: NewPayment, conn: &mut SqliteConnection) -> Result<Payment, LedgerError> {
    let external_ref = payment.external_ref.clone();
    sqlx::query_as(
        r#"
            INSERT INTO payments (user_id, external_ref, amount, currency, method, status)
            VALUES ($1, $2, $3, $4, $5, 'pending')
            RETURNING *;
        "#,
    )
    .bind(payment.user_id)
    .bind(payment.external_ref)
    .bind(payment.amount)
    .bind(payment.currency)
    .bind(payment.method)
    .fetch_one(conn)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            LedgerError::PaymentAlreadyExists(external_ref)
        } else {
            LedgerError::from(e)
        }
    })
}

pub async fn fetch_payment(
    external_ref: &ExternalRef,
    conn: &mut SqliteConnection,
) -> Result<Option<Payment>, LedgerError> {
    let payment =
        sqlx::query_as("SELECT * FROM payments WHERE external_ref = $1").bind(external_ref).fetch_optional(conn).await?;
    Ok(payment)
}

pub async fn fetch_payment_by_id(id: i64, conn: &mut SqliteConnection) -> Result<Option<Payment>, LedgerError> {
    let payment = sqlx::query_as("SELECT * FROM payments WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(payment)
}

/// Moves the payment from `expected` to `new_status` in a single conditional update.
///
/// Returns `None` if the payment does not exist or is no longer in `expected`.
pub async fn compare_and_set_status(
    external_ref: &ExternalRef,
    expected: PaymentStatus,
    new_status: PaymentStatus,
    conn: &mut SqliteConnection,
) -> Result<Option<Payment>, LedgerError> {
    let payment = sqlx::query_as(
        r#"
            UPDATE payments SET status = $1, updated_at = CURRENT_TIMESTAMP
            WHERE external_ref = $2 AND status = $3
            RETURNING *;
        "#,
    )
    .bind(new_status)
    .bind(external_ref)
    .bind(expected)
    .fetch_optional(conn)
    .await?;
    Ok(payment)
}

/// Pending payments whose last status change, and last poll if there was one, are both older than `older_than`.
///
/// Payments that were never polled, or were polled longest ago, come first. A payment that the gateway keeps
/// reporting as pending therefore moves to the back of the queue after each poll.
pub async fn fetch_stale_pending(
    older_than: Duration,
    limit: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<Payment>, LedgerError> {
    let modifier = format!("-{} seconds", older_than.num_seconds().max(0));
    let payments = sqlx::query_as(
        r#"
            SELECT * FROM payments
            WHERE status = 'pending'
              AND updated_at <= datetime('now', $1)
              AND (polled_at IS NULL OR polled_at <= datetime('now', $2))
            ORDER BY polled_at IS NOT NULL, COALESCE(polled_at, updated_at) ASC, id ASC
            LIMIT $3
        "#,
    )
    .bind(modifier.as_str())
    .bind(modifier.as_str())
    .bind(limit)
    .fetch_all(conn)
    .await?;
    Ok(payments)
}

pub async fn mark_polled(external_ref: &ExternalRef, conn: &mut SqliteConnection) -> Result<Payment, LedgerError> {
    sqlx::query_as("UPDATE payments SET polled_at = CURRENT_TIMESTAMP WHERE external_ref = $1 RETURNING *;")
        .bind(external_ref)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| LedgerError::PaymentNotFound(external_ref.clone()))
}
