use sqlx::SqliteConnection;

use crate::{
    db_types::{NewTransaction, Transaction, TransactionKind},
    traits::LedgerError,
};

/// Inserts the log entry unless one already exists for `(kind, related_id)`.
///
/// The existence check is the `ON CONFLICT` clause of the insert itself, so two concurrent deliveries of the same
/// event cannot both insert. Returns `None` if the entry already existed.
pub async fn insert_if_absent(
    transaction: NewTransaction,
    conn: &mut SqliteConnection,
) -> Result<Option<Transaction>, LedgerError> {
    let inserted = sqlx::query_as(
        r#"
            INSERT INTO transactions (user_id, kind, amount, currency, related_id, external_ref)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (kind, related_id) DO NOTHING
            RETURNING *;
        "#,
    )
    .bind(transaction.user_id)
    .bind(transaction.kind)
    .bind(transaction.amount)
    .bind(transaction.currency)
    .bind(transaction.related_id)
    .bind(transaction.external_ref)
    .fetch_optional(conn)
    .await?;
    Ok(inserted)
}

pub async fn fetch_transaction(
    kind: TransactionKind,
    related_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<Transaction>, LedgerError> {
    let transaction = sqlx::query_as("SELECT * FROM transactions WHERE kind = $1 AND related_id = $2")
        .bind(kind)
        .bind(related_id)
        .fetch_optional(conn)
        .await?;
    Ok(transaction)
}

pub async fn fetch_transactions_for_user(
    user_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<Transaction>, LedgerError> {
    let transactions =
        sqlx::query_as("SELECT * FROM transactions WHERE user_id = $1 ORDER BY created_at ASC, id ASC")
            .bind(user_id)
            .fetch_all(conn)
            .await?;
    Ok(transactions)
}
