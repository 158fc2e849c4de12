use sqlx::SqliteConnection;

use super::{is_unique_violation, payments};
use crate::{
    db_types::{ExternalRef, MinorUnits, NewRefund, Refund, RefundStatus},
    traits::LedgerError,
};

/// Inserts a refund, provided that the running total of non-failed refunds (including this one) does not exceed the
/// payment amount. The bound check and the insert are one statement.
pub async fn insert_bounded(refund: NewRefund, conn: &mut SqliteConnection) -> Result<Refund, LedgerError> {
    let NewRefund { payment_id, external_ref, amount } = refund;
    let inserted: Option<Refund> = sqlx::query_as(
        r#"
            INSERT INTO refunds (payment_id, external_ref, amount, status)
            SELECT $1, $2, $3, 'pending'
            WHERE $3 + (SELECT COALESCE(SUM(amount), 0) FROM refunds WHERE payment_id = $1 AND status != 'failed')
                <= (SELECT amount FROM payments WHERE id = $1)
            RETURNING *;
        "#,
    )
    .bind(payment_id)
    .bind(&external_ref)
    .bind(amount)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            LedgerError::RefundAlreadyExists(external_ref.clone())
        } else {
            LedgerError::from(e)
        }
    })?;
    match inserted {
        Some(refund) => Ok(refund),
        None => {
            // A re-delivered refund fails the bound check before it can hit the unique index
            if fetch_refund(&external_ref, conn).await?.is_some() {
                return Err(LedgerError::RefundAlreadyExists(external_ref));
            }
            let payment = payments::fetch_payment_by_id(payment_id, conn)
                .await?
                .ok_or(LedgerError::PaymentIdNotFound(payment_id))?;
            let refunded = refunded_total(payment_id, conn).await?;
            Err(LedgerError::RefundExceedsPayment {
                payment_id,
                requested: amount,
                remaining: payment.amount.saturating_sub(refunded),
            })
        },
    }
}

pub async fn refunded_total(payment_id: i64, conn: &mut SqliteConnection) -> Result<MinorUnits, LedgerError> {
    let total: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount), 0) FROM refunds WHERE payment_id = $1 AND status != 'failed'",
    )
    .bind(payment_id)
    .fetch_one(conn)
    .await?;
    Ok(MinorUnits::from(total))
}

pub async fn fetch_refund(
    external_ref: &ExternalRef,
    conn: &mut SqliteConnection,
) -> Result<Option<Refund>, LedgerError> {
    let refund =
        sqlx::query_as("SELECT * FROM refunds WHERE external_ref = $1").bind(external_ref).fetch_optional(conn).await?;
    Ok(refund)
}

pub async fn fetch_refunds_for_payment(
    payment_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<Refund>, LedgerError> {
    let refunds = sqlx::query_as("SELECT * FROM refunds WHERE payment_id = $1 ORDER BY created_at ASC, id ASC")
        .bind(payment_id)
        .fetch_all(conn)
        .await?;
    Ok(refunds)
}

pub async fn compare_and_set_status(
    external_ref: &ExternalRef,
    expected: RefundStatus,
    new_status: RefundStatus,
    conn: &mut SqliteConnection,
) -> Result<Option<Refund>, LedgerError> {
    let refund = sqlx::query_as(
        r#"
            UPDATE refunds SET status = $1, updated_at = CURRENT_TIMESTAMP
            WHERE external_ref = $2 AND status = $3
            RETURNING *;
        "#,
    )
    .bind(new_status)
    .bind(external_ref)
    .bind(expected)
    .fetch_optional(conn)
    .await?;
    Ok(refund)
}
