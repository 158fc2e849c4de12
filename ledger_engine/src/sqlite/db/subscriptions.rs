use sqlx::SqliteConnection;

use super::is_unique_violation;
use crate::{
    db_types::{ExternalRef, NewSubscription, Subscription, SubscriptionStatus},
    lifecycle::Lifecycle,
    traits::LedgerError,
};

pub async fn idempotent_insert(
    subscription: NewSubscription,
    conn: &mut SqliteConnection,
) -> Result<Subscription, LedgerError> {
    let external_ref = subscription.external_ref.clone();
    let end_date = subscription.status.is_terminal().then(chrono::Utc::now);
    sqlx::query_as(
        r#"
            INSERT INTO subscriptions (user_id, payment_id, external_ref, price_ref, amount, currency, status, end_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *;
        "#,
    )
    .bind(subscription.user_id)
    .bind(subscription.payment_id)
    .bind(subscription.external_ref)
    .bind(subscription.price_ref)
    .bind(subscription.amount)
    .bind(subscription.currency)
    .bind(subscription.status)
    .bind(end_date)
    .fetch_one(conn)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            LedgerError::SubscriptionAlreadyExists(external_ref)
        } else {
            LedgerError::from(e)
        }
    })
}

pub async fn fetch_subscription(
    external_ref: &ExternalRef,
    conn: &mut SqliteConnection,
) -> Result<Option<Subscription>, LedgerError> {
    let subscription = sqlx::query_as("SELECT * FROM subscriptions WHERE external_ref = $1")
        .bind(external_ref)
        .fetch_optional(conn)
        .await?;
    Ok(subscription)
}

/// Conditional status update. Terminal statuses also close the subscription by setting `end_date`.
pub async fn compare_and_set_status(
    external_ref: &ExternalRef,
    expected: SubscriptionStatus,
    new_status: SubscriptionStatus,
    conn: &mut SqliteConnection,
) -> Result<Option<Subscription>, LedgerError> {
    let subscription = sqlx::query_as(
        r#"
            UPDATE subscriptions SET
                status = $1,
                end_date = CASE WHEN $4 THEN CURRENT_TIMESTAMP ELSE end_date END,
                updated_at = CURRENT_TIMESTAMP
            WHERE external_ref = $2 AND status = $3
            RETURNING *;
        "#,
    )
    .bind(new_status)
    .bind(external_ref)
    .bind(expected)
    .bind(new_status.is_terminal())
    .fetch_optional(conn)
    .await?;
    Ok(subscription)
}
