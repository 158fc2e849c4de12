//! `SqliteDatabase` is a concrete implementation of a payment ledger backend.
//!
//! Unsurprisingly, it uses SQLite as the backend and implements all the traits defined in the [`crate::traits`]
//! module.
use std::fmt::Debug;

use chrono::Duration;
use log::*;
use sqlx::SqlitePool;

use super::db::{db_url, new_pool, payments, pending_writes, refunds, subscriptions, transactions, users};
use crate::{
    db_types::{
        ExternalRef,
        LedgerWrite,
        MinorUnits,
        NewPayment,
        NewRefund,
        NewSubscription,
        NewTransaction,
        NewUser,
        Payment,
        PaymentStatus,
        PendingWrite,
        Refund,
        RefundStatus,
        Subscription,
        SubscriptionStatus,
        Transaction,
        User,
    },
    traits::{LedgerError, LedgerStore, WriteJournal},
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl LedgerStore for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn create_user(&self, user: NewUser) -> Result<User, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let user = users::insert_user(user, &mut conn).await?;
        debug!("🗃️ User #{} ({}) has been saved in the DB", user.id, user.email);
        Ok(user)
    }

    async fn find_user_by_identity(&self, name: &str, email: &str) -> Result<Option<User>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        users::fetch_user_by_identity(name, email, &mut conn).await
    }

    async fn set_user_gateway_ref(&self, user_id: i64, customer_ref: &ExternalRef) -> Result<User, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let user = users::backfill_gateway_ref(user_id, customer_ref, &mut conn).await?;
        trace!("🗃️ User #{user_id} has gateway reference {:?}", user.gateway_customer_id);
        Ok(user)
    }

    async fn create_payment(&self, payment: NewPayment) -> Result<Payment, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let payment = payments::idempotent_insert(payment, &mut conn).await?;
        debug!("🗃️ Payment [{}] has been saved in the DB with id {}", payment.external_ref, payment.id);
        Ok(payment)
    }

    async fn payment_by_external_ref(&self, external_ref: &ExternalRef) -> Result<Option<Payment>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        payments::fetch_payment(external_ref, &mut conn).await
    }

    async fn set_payment_status(
        &self,
        external_ref: &ExternalRef,
        expected: PaymentStatus,
        new_status: PaymentStatus,
    ) -> Result<Option<Payment>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let result = payments::compare_and_set_status(external_ref, expected, new_status, &mut conn).await?;
        match &result {
            Some(_) => trace!("🗃️ Payment [{external_ref}] moved from {expected} to {new_status}"),
            None => trace!("🗃️ Payment [{external_ref}] was not in status {expected}. Nothing updated"),
        }
        Ok(result)
    }

    async fn stale_pending_payments(&self, older_than: Duration, limit: i64) -> Result<Vec<Payment>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        payments::fetch_stale_pending(older_than, limit, &mut conn).await
    }

    async fn mark_payment_polled(&self, external_ref: &ExternalRef) -> Result<Payment, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let payment = payments::mark_polled(external_ref, &mut conn).await?;
        trace!("🗃️ Payment [{external_ref}] marked as polled at {:?}", payment.polled_at);
        Ok(payment)
    }

    async fn create_refund(&self, refund: NewRefund) -> Result<Refund, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let refund = refunds::insert_bounded(refund, &mut conn).await?;
        debug!(
            "🗃️ Refund [{}] of {} against payment #{} has been saved with id {}",
            refund.external_ref, refund.amount, refund.payment_id, refund.id
        );
        Ok(refund)
    }

    async fn refund_by_external_ref(&self, external_ref: &ExternalRef) -> Result<Option<Refund>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        refunds::fetch_refund(external_ref, &mut conn).await
    }

    async fn refunds_for_payment(&self, payment_id: i64) -> Result<Vec<Refund>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        refunds::fetch_refunds_for_payment(payment_id, &mut conn).await
    }

    async fn refunded_total(&self, payment_id: i64) -> Result<MinorUnits, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        refunds::refunded_total(payment_id, &mut conn).await
    }

    async fn set_refund_status(
        &self,
        external_ref: &ExternalRef,
        expected: RefundStatus,
        new_status: RefundStatus,
    ) -> Result<Option<Refund>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let result = refunds::compare_and_set_status(external_ref, expected, new_status, &mut conn).await?;
        if result.is_some() {
            trace!("🗃️ Refund [{external_ref}] moved from {expected} to {new_status}");
        }
        Ok(result)
    }

    async fn create_subscription(&self, subscription: NewSubscription) -> Result<Subscription, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let subscription = subscriptions::idempotent_insert(subscription, &mut conn).await?;
        debug!(
            "🗃️ Subscription [{}] ({}) has been saved in the DB with id {}",
            subscription.external_ref, subscription.status, subscription.id
        );
        Ok(subscription)
    }

    async fn subscription_by_external_ref(
        &self,
        external_ref: &ExternalRef,
    ) -> Result<Option<Subscription>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        subscriptions::fetch_subscription(external_ref, &mut conn).await
    }

    async fn set_subscription_status(
        &self,
        external_ref: &ExternalRef,
        expected: SubscriptionStatus,
        new_status: SubscriptionStatus,
    ) -> Result<Option<Subscription>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let result = subscriptions::compare_and_set_status(external_ref, expected, new_status, &mut conn).await?;
        if result.is_some() {
            trace!("🗃️ Subscription [{external_ref}] moved from {expected} to {new_status}");
        }
        Ok(result)
    }

    async fn append_transaction(&self, transaction: NewTransaction) -> Result<(Transaction, bool), LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let kind = transaction.kind;
        let related_id = transaction.related_id;
        if let Some(inserted) = transactions::insert_if_absent(transaction, &mut conn).await? {
            debug!("🗃️ Logged {kind} transaction #{} for [{}]", inserted.id, inserted.external_ref);
            return Ok((inserted, true));
        }
        let existing = transactions::fetch_transaction(kind, related_id, &mut conn).await?.ok_or_else(|| {
            LedgerError::DatabaseError(format!("{kind} transaction for #{related_id} conflicted but cannot be found"))
        })?;
        trace!("🗃️ {kind} transaction for #{related_id} already exists as #{}. Not logging again.", existing.id);
        Ok((existing, false))
    }

    async fn transactions_for_user(&self, user_id: i64) -> Result<Vec<Transaction>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        transactions::fetch_transactions_for_user(user_id, &mut conn).await
    }

    async fn close(&mut self) -> Result<(), LedgerError> {
        self.pool.close().await;
        Ok(())
    }
}

impl WriteJournal for SqliteDatabase {
    async fn insert_pending_write(&self, write: &LedgerWrite, error: &str) -> Result<PendingWrite, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let entry = pending_writes::insert_pending_write(write, error, &mut conn).await?;
        warn!("🗃️ Journaled {} for [{}] as entry #{}", entry.kind, entry.external_ref, entry.id);
        Ok(entry)
    }

    async fn unresolved_pending_writes(&self, limit: i64) -> Result<Vec<PendingWrite>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        pending_writes::fetch_unresolved(limit, &mut conn).await
    }

    async fn abandoned_pending_writes(&self, limit: i64) -> Result<Vec<PendingWrite>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        pending_writes::fetch_abandoned(limit, &mut conn).await
    }

    async fn resolve_pending_write(&self, id: i64) -> Result<PendingWrite, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        pending_writes::mark_resolved(id, &mut conn).await
    }

    async fn record_pending_write_failure(&self, id: i64, error: &str) -> Result<PendingWrite, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        pending_writes::record_failure(id, error, &mut conn).await
    }

    async fn abandon_pending_write(&self, id: i64, error: &str) -> Result<PendingWrite, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let entry = pending_writes::mark_abandoned(id, error, &mut conn).await?;
        error!("🗃️ Journal entry #{id} ({} for [{}]) abandoned after {} attempts", entry.kind, entry.external_ref, entry.attempts);
        Ok(entry)
    }
}

impl SqliteDatabase {
    /// Creates a new database API object
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        SqliteDatabase::new_with_url(url.as_str(), max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        trace!("Creating new database connection pool with url {url}");
        let pool = new_pool(url, max_connections).await?;
        let url = url.to_string();
        Ok(Self { url, pool })
    }

    /// Applies any outstanding schema migrations.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./src/sqlite/migrations").run(&self.pool).await
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
