use chrono::Duration;
use thiserror::Error;

use crate::{
    db_types::{
        ExternalRef,
        MinorUnits,
        NewPayment,
        NewRefund,
        NewSubscription,
        NewTransaction,
        NewUser,
        Payment,
        PaymentStatus,
        Refund,
        RefundStatus,
        Subscription,
        SubscriptionStatus,
        Transaction,
        User,
    },
    traits::WriteJournal,
};

/// The persistence contract for the payment ledger.
///
/// Backends store rows and nothing more. They make no decisions about whether a status change is *allowed*; that is
/// the job of [`crate::ReconciliationApi`]. What they must guarantee:
/// * Every write is a single-row, atomic operation.
/// * The `set_*_status` methods are compare-and-swap. The row is only updated if its current status equals
///   `expected`, and `Ok(None)` is returned if it does not (or the row does not exist).
/// * [`LedgerStore::create_refund`] checks the cumulative refund bound in the same statement as the insert.
/// * [`LedgerStore::append_transaction`] never creates two rows for the same `(kind, related_id)` pair.
#[allow(async_fn_in_trait)]
pub trait LedgerStore: Clone + WriteJournal {
    /// The URL of the database
    fn url(&self) -> &str;

    /// Inserts a new user. Fails with [`LedgerError::UserAlreadyExists`] if the (name, email) identity is taken.
    async fn create_user(&self, user: NewUser) -> Result<User, LedgerError>;

    async fn find_user_by_identity(&self, name: &str, email: &str) -> Result<Option<User>, LedgerError>;

    /// Sets the gateway customer reference for a user, but only if the user does not have one yet.
    /// Returns the user record as it stands after the call.
    async fn set_user_gateway_ref(&self, user_id: i64, customer_ref: &ExternalRef) -> Result<User, LedgerError>;

    /// Inserts a new payment in `pending` status.
    async fn create_payment(&self, payment: NewPayment) -> Result<Payment, LedgerError>;

    async fn payment_by_external_ref(&self, external_ref: &ExternalRef) -> Result<Option<Payment>, LedgerError>;

    async fn set_payment_status(
        &self,
        external_ref: &ExternalRef,
        expected: PaymentStatus,
        new_status: PaymentStatus,
    ) -> Result<Option<Payment>, LedgerError>;

    /// Payments that are still `pending`, have not changed for at least `older_than`, and have not been polled within
    /// `older_than` either. Payments that were polled least recently come first.
    async fn stale_pending_payments(&self, older_than: Duration, limit: i64) -> Result<Vec<Payment>, LedgerError>;

    /// Stamps the payment as polled now, without touching its status.
    async fn mark_payment_polled(&self, external_ref: &ExternalRef) -> Result<Payment, LedgerError>;

    /// Inserts a new refund in `pending` status.
    ///
    /// Fails with [`LedgerError::RefundExceedsPayment`] if the sum of the payment's non-failed refunds plus this one
    /// would exceed the payment amount.
    async fn create_refund(&self, refund: NewRefund) -> Result<Refund, LedgerError>;

    async fn refund_by_external_ref(&self, external_ref: &ExternalRef) -> Result<Option<Refund>, LedgerError>;

    /// Every refund recorded against the payment, whatever its status, oldest first.
    async fn refunds_for_payment(&self, payment_id: i64) -> Result<Vec<Refund>, LedgerError>;

    /// The total of all refunds against the payment that have not failed.
    async fn refunded_total(&self, payment_id: i64) -> Result<MinorUnits, LedgerError>;

    async fn set_refund_status(
        &self,
        external_ref: &ExternalRef,
        expected: RefundStatus,
        new_status: RefundStatus,
    ) -> Result<Option<Refund>, LedgerError>;

    async fn create_subscription(&self, subscription: NewSubscription) -> Result<Subscription, LedgerError>;

    async fn subscription_by_external_ref(
        &self,
        external_ref: &ExternalRef,
    ) -> Result<Option<Subscription>, LedgerError>;

    /// Compare-and-swap on the subscription status. Moving into a terminal status also sets `end_date`.
    async fn set_subscription_status(
        &self,
        external_ref: &ExternalRef,
        expected: SubscriptionStatus,
        new_status: SubscriptionStatus,
    ) -> Result<Option<Subscription>, LedgerError>;

    /// Appends an entry to the transaction log, unless one already exists for the same `(kind, related_id)`.
    ///
    /// Returns the stored transaction and `true` if it was inserted by this call.
    async fn append_transaction(&self, transaction: NewTransaction) -> Result<(Transaction, bool), LedgerError>;

    /// All transactions for the user, oldest first.
    async fn transactions_for_user(&self, user_id: i64) -> Result<Vec<Transaction>, LedgerError>;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), LedgerError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("The ledger database reported an error: {0}")]
    DatabaseError(String),
    #[error("A user with identity {name} <{email}> already exists")]
    UserAlreadyExists { name: String, email: String },
    #[error("The requested user #{0} does not exist")]
    UserNotFound(i64),
    #[error("Cannot insert payment, since it already exists with reference {0}")]
    PaymentAlreadyExists(ExternalRef),
    #[error("Cannot insert refund, since it already exists with reference {0}")]
    RefundAlreadyExists(ExternalRef),
    #[error("Cannot insert subscription, since it already exists with reference {0}")]
    SubscriptionAlreadyExists(ExternalRef),
    #[error("The requested payment {0} does not exist")]
    PaymentNotFound(ExternalRef),
    #[error("The requested payment (internal id {0}) does not exist")]
    PaymentIdNotFound(i64),
    #[error("The requested refund {0} does not exist")]
    RefundNotFound(ExternalRef),
    #[error("The requested subscription {0} does not exist")]
    SubscriptionNotFound(ExternalRef),
    #[error("A refund of {requested} exceeds the {remaining} that is still refundable on payment #{payment_id}")]
    RefundExceedsPayment { payment_id: i64, requested: MinorUnits, remaining: MinorUnits },
    #[error("Journal entry #{0} does not exist")]
    PendingWriteNotFound(i64),
    #[error("Journal entry could not be (de)serialized. {0}")]
    JournalFormatError(String),
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::DatabaseError(e.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        LedgerError::JournalFormatError(e.to_string())
    }
}
