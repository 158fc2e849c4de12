use ledger_common::MinorUnits;

use crate::{Customer, PaymentIntent, Refund, StripeApiError, Subscription};

/// The gateway operations the ledger depends on.
///
/// Every status in a returned object is advisory. Callers pass it to the reconciliation engine, which decides whether
/// it can be written. Mutating calls take an idempotency key so that a retried request cannot act twice.
#[allow(async_fn_in_trait)]
pub trait PaymentGateway {
    async fn create_customer(&self, name: &str, email: &str) -> Result<Customer, StripeApiError>;

    async fn create_payment_intent(
        &self,
        amount: MinorUnits,
        currency: &str,
        payment_method: &str,
        customer: Option<String>,
        idempotency_key: &str,
    ) -> Result<PaymentIntent, StripeApiError>;

    async fn get_payment_intent(&self, id: &str) -> Result<PaymentIntent, StripeApiError>;

    async fn cancel_payment_intent(&self, id: &str) -> Result<PaymentIntent, StripeApiError>;

    /// Refunds `amount` of the payment intent, or whatever is left of it if `amount` is `None`.
    async fn create_refund(
        &self,
        payment_intent: &str,
        amount: Option<MinorUnits>,
        idempotency_key: &str,
    ) -> Result<Refund, StripeApiError>;

    async fn create_subscription(
        &self,
        customer: &str,
        price: &str,
        idempotency_key: &str,
    ) -> Result<Subscription, StripeApiError>;

    async fn cancel_subscription(&self, id: &str) -> Result<Subscription, StripeApiError>;
}
