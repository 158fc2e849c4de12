//! Glue that lets the reconciliation loop treat payments, refunds and subscriptions uniformly.
use crate::{
    db_types::{ExternalRef, Payment, PaymentStatus, Refund, RefundStatus, Subscription, SubscriptionStatus},
    lifecycle::Lifecycle,
    traits::{LedgerError, LedgerStore},
};

pub(crate) trait StatusRow: Clone {
    type Status: Lifecycle;
    fn current_status(&self) -> Self::Status;
}

impl StatusRow for Payment {
    type Status = PaymentStatus;

    fn current_status(&self) -> PaymentStatus {
        self.status
    }
}

impl StatusRow for Refund {
    type Status = RefundStatus;

    fn current_status(&self) -> RefundStatus {
        self.status
    }
}

impl StatusRow for Subscription {
    type Status = SubscriptionStatus;

    fn current_status(&self) -> SubscriptionStatus {
        self.status
    }
}

#[allow(async_fn_in_trait)]
pub(crate) trait StatusStore<T: StatusRow> {
    async fn fetch_row(&self, external_ref: &ExternalRef) -> Result<Option<T>, LedgerError>;

    async fn swap_status(
        &self,
        external_ref: &ExternalRef,
        expected: T::Status,
        new_status: T::Status,
    ) -> Result<Option<T>, LedgerError>;
}

impl<B: LedgerStore> StatusStore<Payment> for B {
    async fn fetch_row(&self, external_ref: &ExternalRef) -> Result<Option<Payment>, LedgerError> {
        self.payment_by_external_ref(external_ref).await
    }

    async fn swap_status(
        &self,
        external_ref: &ExternalRef,
        expected: PaymentStatus,
        new_status: PaymentStatus,
    ) -> Result<Option<Payment>, LedgerError> {
        self.set_payment_status(external_ref, expected, new_status).await
    }
}

impl<B: LedgerStore> StatusStore<Refund> for B {
    async fn fetch_row(&self, external_ref: &ExternalRef) -> Result<Option<Refund>, LedgerError> {
        self.refund_by_external_ref(external_ref).await
    }

    async fn swap_status(
        &self,
        external_ref: &ExternalRef,
        expected: RefundStatus,
        new_status: RefundStatus,
    ) -> Result<Option<Refund>, LedgerError> {
        self.set_refund_status(external_ref, expected, new_status).await
    }
}

impl<B: LedgerStore> StatusStore<Subscription> for B {
    async fn fetch_row(&self, external_ref: &ExternalRef) -> Result<Option<Subscription>, LedgerError> {
        self.subscription_by_external_ref(external_ref).await
    }

    async fn swap_status(
        &self,
        external_ref: &ExternalRef,
        expected: SubscriptionStatus,
        new_status: SubscriptionStatus,
    ) -> Result<Option<Subscription>, LedgerError> {
        self.set_subscription_status(external_ref, expected, new_status).await
    }
}
