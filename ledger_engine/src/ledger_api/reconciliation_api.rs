use std::fmt::Debug;

use log::*;

use super::{
    errors::ReconciliationError,
    status_store::{StatusRow, StatusStore},
};
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
        UpdateSource,
        User,
    },
    events::{EventProducers, PaymentStatusChangedEvent, RefundRecordedEvent},
    lifecycle::{evaluate, Lifecycle, StatusChange},
    traits::{LedgerError, LedgerStore},
};

/// How many times a compare-and-swap is retried when another writer keeps changing the row underneath us.
const MAX_SWAP_ATTEMPTS: usize = 5;

/// A journal entry that has failed this many replays is abandoned and left for an operator.
pub const MAX_REPLAY_ATTEMPTS: i64 = 30;

/// The outcome of a pass over the pending-write journal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub resolved: usize,
    pub failed: usize,
    pub abandoned: usize,
}

/// `ReconciliationApi` is the single writer of the payment ledger.
///
/// Every status the gateway reports, whether in a synchronous response, a webhook, or a poll by the reconciliation
/// worker, is passed through here and only written if the relevant state machine allows it
/// (see [`crate::lifecycle`]). Row creation is idempotent on the gateway reference, and the transaction log gets
/// exactly one entry per payment and per refund.
pub struct ReconciliationApi<B> {
    db: B,
    producers: EventProducers,
}

impl<B> Debug for ReconciliationApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReconciliationApi")
    }
}

impl<B: Clone> Clone for ReconciliationApi<B> {
    fn clone(&self) -> Self {
        Self { db: self.db.clone(), producers: self.producers.clone() }
    }
}

impl<B> ReconciliationApi<B> {
    pub fn new(db: B, producers: EventProducers) -> Self {
        Self { db, producers }
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut B {
        &mut self.db
    }
}

impl<B> ReconciliationApi<B>
where B: LedgerStore
{
    //------------------------------------------   Users   ------------------------------------------------------------

    pub async fn find_user(&self, name: &str, email: &str) -> Result<Option<User>, ReconciliationError> {
        Ok(self.db.find_user_by_identity(name, email).await?)
    }

    /// Creates a user for the given identity, or returns the existing one.
    ///
    /// Two requests for a new identity can race each other. The loser's insert fails on the unique identity index and
    /// it returns the winner's row instead. If the winner had no gateway customer reference and this call has one,
    /// the reference is filled in.
    pub async fn register_user(&self, user: NewUser) -> Result<User, ReconciliationError> {
        let customer_ref = user.gateway_customer_id.clone();
        match self.db.create_user(user).await {
            Ok(user) => {
                info!("🔄️👤️ New user #{} registered for {}", user.id, user.email);
                Ok(user)
            },
            Err(LedgerError::UserAlreadyExists { name, email }) => {
                debug!("🔄️👤️ User {name} <{email}> was created concurrently. Using the existing record.");
                let existing = self.db.find_user_by_identity(&name, &email).await?.ok_or_else(|| {
                    LedgerError::DatabaseError(format!("User {name} <{email}> exists but cannot be fetched"))
                })?;
                match (&existing.gateway_customer_id, customer_ref) {
                    (None, Some(customer_ref)) => self.link_gateway_customer(existing.id, &customer_ref).await,
                    _ => Ok(existing),
                }
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Records the gateway customer reference for a user that does not have one yet. An existing reference is never
    /// overwritten.
    pub async fn link_gateway_customer(
        &self,
        user_id: i64,
        customer_ref: &ExternalRef,
    ) -> Result<User, ReconciliationError> {
        let user = self.db.set_user_gateway_ref(user_id, customer_ref).await?;
        if user.gateway_customer_id.as_ref() != Some(customer_ref) {
            warn!(
                "🔄️👤️ User #{user_id} is already linked to gateway customer {:?}. {customer_ref} was not stored.",
                user.gateway_customer_id
            );
        }
        Ok(user)
    }

    /// The transaction history for an identity, oldest first. An unknown identity simply has no history.
    pub async fn transactions_for_identity(
        &self,
        name: &str,
        email: &str,
    ) -> Result<Vec<Transaction>, ReconciliationError> {
        match self.db.find_user_by_identity(name, email).await? {
            Some(user) => Ok(self.db.transactions_for_user(user.id).await?),
            None => {
                trace!("🔄️👤️ No user for {name} <{email}>. Returning an empty history.");
                Ok(Vec::new())
            },
        }
    }

    //------------------------------------------  Payments  -----------------------------------------------------------

    pub async fn payment(&self, external_ref: &ExternalRef) -> Result<Payment, ReconciliationError> {
        self.db
            .payment_by_external_ref(external_ref)
            .await?
            .ok_or_else(|| ReconciliationError::unknown(PaymentStatus::ENTITY, external_ref))
    }

    /// Writes a new `pending` payment and its transaction log entry.
    ///
    /// Recording the same payment twice is harmless: the stored row is returned and no second transaction is
    /// written.
    pub async fn record_payment(&self, payment: NewPayment) -> Result<Payment, ReconciliationError> {
        let external_ref = payment.external_ref.clone();
        let payment = match self.db.create_payment(payment).await {
            Ok(p) => p,
            Err(LedgerError::PaymentAlreadyExists(_)) => {
                debug!("🔄️💰️ Payment [{external_ref}] is already in the ledger.");
                self.payment(&external_ref).await?
            },
            Err(e) => return Err(e.into()),
        };
        let (tx, inserted) = self.db.append_transaction(NewTransaction::for_payment(&payment)).await?;
        if inserted {
            info!("🔄️💰️ Payment [{external_ref}] for {} {} recorded as transaction #{}", payment.amount, payment.currency, tx.id);
        }
        Ok(payment)
    }

    /// Proposes a new status for a payment. See [`Self::apply_status`] for the rules.
    ///
    /// Subscribers to `on_payment_status_changed` are notified only when the row actually changed.
    pub async fn apply_payment_status(
        &self,
        external_ref: &ExternalRef,
        proposed: PaymentStatus,
        source: UpdateSource,
    ) -> Result<StatusChange<PaymentStatus>, ReconciliationError> {
        let (change, payment) = self.apply_status::<Payment>(external_ref, proposed, source).await?;
        if let StatusChange::Applied { from, .. } = change {
            self.notify_payment_status_changed(payment, from, source).await;
        }
        Ok(change)
    }

    /// How much of the payment has not been refunded yet.
    pub async fn refundable_amount(&self, payment: &Payment) -> Result<MinorUnits, ReconciliationError> {
        let refunded = self.db.refunded_total(payment.id).await?;
        Ok(payment.amount.saturating_sub(refunded))
    }

    /// Payments that have been `pending` for longer than `older_than`. These are candidates for polling the gateway.
    pub async fn stale_pending_payments(
        &self,
        older_than: chrono::Duration,
        limit: i64,
    ) -> Result<Vec<Payment>, ReconciliationError> {
        Ok(self.db.stale_pending_payments(older_than, limit).await?)
    }

    /// Records that the gateway was just asked about this payment, so that it is not picked again until it is stale
    /// once more.
    pub async fn mark_payment_polled(&self, external_ref: &ExternalRef) -> Result<Payment, ReconciliationError> {
        Ok(self.db.mark_payment_polled(external_ref).await?)
    }

    //------------------------------------------  Refunds   -----------------------------------------------------------

    /// Writes a refund against the payment with reference `payment_ref`, logs it, and then proposes `status` for it.
    ///
    /// The cumulative refund bound is enforced by the store; a refund that would exceed it fails with
    /// [`LedgerError::RefundExceedsPayment`]. Recording the same refund twice returns the stored row.
    pub async fn record_refund(
        &self,
        payment_ref: &ExternalRef,
        refund_ref: ExternalRef,
        amount: MinorUnits,
        status: RefundStatus,
        source: UpdateSource,
    ) -> Result<Refund, ReconciliationError> {
        let payment = self.payment(payment_ref).await?;
        let new_refund = NewRefund { payment_id: payment.id, external_ref: refund_ref.clone(), amount };
        let (refund, is_new) = match self.db.create_refund(new_refund).await {
            Ok(r) => (r, true),
            Err(LedgerError::RefundAlreadyExists(_)) => {
                debug!("🔄️↩️ Refund [{refund_ref}] is already in the ledger.");
                let existing = self
                    .db
                    .refund_by_external_ref(&refund_ref)
                    .await?
                    .ok_or_else(|| ReconciliationError::unknown(RefundStatus::ENTITY, &refund_ref))?;
                (existing, false)
            },
            Err(e) => return Err(e.into()),
        };
        let (tx, inserted) = self.db.append_transaction(NewTransaction::for_refund(&payment, &refund)).await?;
        if inserted {
            info!("🔄️↩️ Refund [{refund_ref}] of {amount} on [{payment_ref}] recorded as transaction #{}", tx.id);
        }
        if is_new {
            self.notify_refund_recorded(refund.clone(), payment).await;
        }
        if status == refund.status {
            return Ok(refund);
        }
        let (_, refund) = self.apply_status::<Refund>(&refund_ref, status, source).await?;
        Ok(refund)
    }

    pub async fn apply_refund_status(
        &self,
        external_ref: &ExternalRef,
        proposed: RefundStatus,
        source: UpdateSource,
    ) -> Result<StatusChange<RefundStatus>, ReconciliationError> {
        let (change, _) = self.apply_status::<Refund>(external_ref, proposed, source).await?;
        Ok(change)
    }

    /// Every refund ever recorded against the payment, including failed ones.
    pub async fn refunds_for_payment(&self, payment: &Payment) -> Result<Vec<Refund>, ReconciliationError> {
        Ok(self.db.refunds_for_payment(payment.id).await?)
    }

    pub async fn refund(&self, external_ref: &ExternalRef) -> Result<Refund, ReconciliationError> {
        self.db
            .refund_by_external_ref(external_ref)
            .await?
            .ok_or_else(|| ReconciliationError::unknown(RefundStatus::ENTITY, external_ref))
    }

    //------------------------------------------ Subscriptions --------------------------------------------------------

    pub async fn subscription(&self, external_ref: &ExternalRef) -> Result<Subscription, ReconciliationError> {
        self.db
            .subscription_by_external_ref(external_ref)
            .await?
            .ok_or_else(|| ReconciliationError::unknown(SubscriptionStatus::ENTITY, external_ref))
    }

    /// Stores a subscription in whatever status the gateway reported for it.
    ///
    /// If the subscription is already known, the reported status is proposed as a transition instead.
    pub async fn record_subscription(
        &self,
        subscription: NewSubscription,
        source: UpdateSource,
    ) -> Result<Subscription, ReconciliationError> {
        let external_ref = subscription.external_ref.clone();
        let reported = subscription.status;
        match self.db.create_subscription(subscription).await {
            Ok(s) => {
                info!("🔄️🔁️ Subscription [{external_ref}] recorded with status {}", s.status);
                Ok(s)
            },
            Err(LedgerError::SubscriptionAlreadyExists(_)) => {
                debug!("🔄️🔁️ Subscription [{external_ref}] is already in the ledger.");
                let (_, existing) = self.apply_status::<Subscription>(&external_ref, reported, source).await?;
                Ok(existing)
            },
            Err(e) => Err(e.into()),
        }
    }

    pub async fn apply_subscription_status(
        &self,
        external_ref: &ExternalRef,
        proposed: SubscriptionStatus,
        source: UpdateSource,
    ) -> Result<StatusChange<SubscriptionStatus>, ReconciliationError> {
        let (change, _) = self.apply_status::<Subscription>(external_ref, proposed, source).await?;
        Ok(change)
    }

    //------------------------------------------  Journal   -----------------------------------------------------------

    /// Journals a ledger write that could not be completed after the gateway had already acted on the request.
    pub async fn record_pending_write(&self, write: &LedgerWrite, error: &str) -> Result<PendingWrite, ReconciliationError> {
        error!(
            "🔄️📒️ Ledger write {} for [{}] failed after the gateway accepted it: {error}. Journaling it for replay.",
            write.kind(),
            write.external_ref()
        );
        Ok(self.db.insert_pending_write(write, error).await?)
    }

    /// Applies a single ledger write. Every write is idempotent, so this is safe to call for a write that already
    /// made it to the ledger.
    pub async fn apply_write(&self, write: &LedgerWrite, source: UpdateSource) -> Result<(), ReconciliationError> {
        match write {
            LedgerWrite::RecordPayment(payment) => {
                self.record_payment(payment.clone()).await?;
            },
            LedgerWrite::PaymentStatus { external_ref, status } => {
                self.apply_payment_status(external_ref, *status, source).await?;
            },
            LedgerWrite::RecordRefund { payment_ref, refund_ref, amount, status } => {
                self.record_refund(payment_ref, refund_ref.clone(), *amount, *status, source).await?;
            },
            LedgerWrite::RecordSubscription(subscription) => {
                self.record_subscription(subscription.clone(), source).await?;
            },
            LedgerWrite::SubscriptionStatus { external_ref, status } => {
                self.apply_subscription_status(external_ref, *status, source).await?;
            },
        }
        Ok(())
    }

    /// Replays up to `limit` live journal entries, least-attempted first.
    ///
    /// An entry is resolved when it applies cleanly or when the ledger has moved past it (an illegal transition means
    /// a later status has already been written). An entry that can never apply, because it is malformed or breaks the
    /// refund bound, is abandoned straight away. Anything else is counted as a failed attempt and retried on a later
    /// pass, until it has failed [`MAX_REPLAY_ATTEMPTS`] times and is abandoned too.
    pub async fn replay_pending_writes(&self, limit: i64) -> Result<ReplaySummary, ReconciliationError> {
        let entries = self.db.unresolved_pending_writes(limit).await?;
        let mut summary = ReplaySummary::default();
        for entry in entries {
            let result = match entry.write() {
                Ok(write) => self.apply_write(&write, UpdateSource::Replay).await,
                Err(e) => Err(LedgerError::from(e).into()),
            };
            match result {
                Ok(()) => {
                    self.db.resolve_pending_write(entry.id).await?;
                    info!("🔄️📒️ Journal entry #{} ({} for [{}]) replayed", entry.id, entry.kind, entry.external_ref);
                    summary.resolved += 1;
                },
                Err(e @ ReconciliationError::IllegalTransition { .. }) => {
                    warn!("🔄️📒️ Journal entry #{} is superseded by the ledger ({e}). Marking it resolved.", entry.id);
                    self.db.resolve_pending_write(entry.id).await?;
                    summary.resolved += 1;
                },
                Err(e) if is_permanent(&e) || entry.attempts + 1 >= MAX_REPLAY_ATTEMPTS => {
                    error!(
                        "🔄️📒️ Journal entry #{} ({} for [{}]) cannot be replayed and needs manual attention: {e}",
                        entry.id, entry.kind, entry.external_ref
                    );
                    self.db.abandon_pending_write(entry.id, &e.to_string()).await?;
                    summary.abandoned += 1;
                },
                Err(e) => {
                    warn!("🔄️📒️ Journal entry #{} could not be replayed (attempt {}): {e}", entry.id, entry.attempts + 1);
                    self.db.record_pending_write_failure(entry.id, &e.to_string()).await?;
                    summary.failed += 1;
                },
            }
        }
        Ok(summary)
    }

    /// Journal entries that replay gave up on.
    pub async fn abandoned_pending_writes(&self, limit: i64) -> Result<Vec<PendingWrite>, ReconciliationError> {
        Ok(self.db.abandoned_pending_writes(limit).await?)
    }

    //------------------------------------------ Internals  -----------------------------------------------------------

    /// Proposes `proposed` as the new status of the row with reference `external_ref`.
    ///
    /// * Unknown row: [`ReconciliationError::UnknownReference`].
    /// * Row already terminal: no-op, [`StatusChange::AlreadyTerminal`].
    /// * Row already in `proposed`: no-op, [`StatusChange::Unchanged`].
    /// * `proposed` is not a legal successor: [`ReconciliationError::IllegalTransition`], row unchanged.
    /// * Otherwise the row is compare-and-swapped. If another writer got there first, the row is re-read and the
    ///   proposal evaluated again against the new status.
    async fn apply_status<T>(
        &self,
        external_ref: &ExternalRef,
        proposed: T::Status,
        source: UpdateSource,
    ) -> Result<(StatusChange<T::Status>, T), ReconciliationError>
    where
        T: StatusRow,
        B: StatusStore<T>,
    {
        let entity = <T::Status as Lifecycle>::ENTITY;
        for attempt in 1..=MAX_SWAP_ATTEMPTS {
            let row = <B as StatusStore<T>>::fetch_row(&self.db, external_ref)
                .await?
                .ok_or_else(|| ReconciliationError::unknown(entity, external_ref))?;
            let current = row.current_status();
            match evaluate(current, proposed) {
                Ok(Some(no_op)) => {
                    debug!("🔄️ {entity} [{external_ref}] is {current}. Ignoring {proposed} from {source}.");
                    return Ok((no_op, row));
                },
                Ok(None) => {},
                Err(()) => {
                    warn!("🔄️ {entity} [{external_ref}] cannot move from {current} to {proposed} ({source})");
                    return Err(ReconciliationError::IllegalTransition {
                        entity,
                        external_ref: external_ref.clone(),
                        from: current.to_string(),
                        to: proposed.to_string(),
                    });
                },
            }
            match <B as StatusStore<T>>::swap_status(&self.db, external_ref, current, proposed).await? {
                Some(updated) => {
                    info!("🔄️ {entity} [{external_ref}] moved from {current} to {proposed} ({source})");
                    return Ok((StatusChange::Applied { from: current, to: proposed }, updated));
                },
                None => {
                    debug!("🔄️ {entity} [{external_ref}] changed while applying {proposed} (attempt {attempt}). Retrying.");
                },
            }
        }
        Err(ReconciliationError::Contention { entity, external_ref: external_ref.clone(), attempts: MAX_SWAP_ATTEMPTS })
    }

    async fn notify_payment_status_changed(&self, payment: Payment, old_status: PaymentStatus, source: UpdateSource) {
        for emitter in &self.producers.payment_status_changed_producer {
            debug!("🔄️📬️ Notifying payment status change subscribers");
            let event = PaymentStatusChangedEvent::new(payment.clone(), old_status, source);
            emitter.publish_event(event).await;
        }
    }

    async fn notify_refund_recorded(&self, refund: Refund, payment: Payment) {
        for emitter in &self.producers.refund_recorded_producer {
            debug!("🔄️📬️ Notifying refund subscribers");
            emitter.publish_event(RefundRecordedEvent::new(refund.clone(), payment.clone())).await;
        }
    }
}

/// Errors that replaying the same write again can never fix.
fn is_permanent(e: &ReconciliationError) -> bool {
    matches!(
        e,
        ReconciliationError::Ledger(LedgerError::JournalFormatError(_) | LedgerError::RefundExceedsPayment { .. })
    )
}
