use ledger_common::MinorUnits;
use mockall::mock;
use stripe_tools::{Customer, PaymentGateway, PaymentIntent, Refund, StripeApiError, Subscription};

mock! {
    pub Stripe {}
    impl PaymentGateway for Stripe {
        async fn create_customer(&self, name: &str, email: &str) -> Result<Customer, StripeApiError>;
        async fn create_payment_intent(&self, amount: MinorUnits, currency: &str, payment_method: &str, customer: Option<String>, idempotency_key: &str) -> Result<PaymentIntent, StripeApiError>;
        async fn get_payment_intent(&self, id: &str) -> Result<PaymentIntent, StripeApiError>;
        async fn cancel_payment_intent(&self, id: &str) -> Result<PaymentIntent, StripeApiError>;
        async fn create_refund(&self, payment_intent: &str, amount: Option<MinorUnits>, idempotency_key: &str) -> Result<Refund, StripeApiError>;
        async fn create_subscription(&self, customer: &str, price: &str, idempotency_key: &str) -> Result<Subscription, StripeApiError>;
        async fn cancel_subscription(&self, id: &str) -> Result<Subscription, StripeApiError>;
    }
}
