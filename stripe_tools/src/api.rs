use std::sync::Arc;

use ledger_common::MinorUnits;
use log::*;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;

use crate::{
    config::StripeConfig,
    data_objects::ErrorResponse,
    Customer,
    PaymentGateway,
    PaymentIntent,
    Refund,
    StripeApiError,
    Subscription,
};

#[derive(Clone)]
pub struct StripeApi {
    config: StripeConfig,
    client: Arc<Client>,
}

impl StripeApi {
    pub fn new(config: StripeConfig) -> Result<Self, StripeApiError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| StripeApiError::Initialization(e.to_string()))?;
        Ok(Self { config, client: Arc::new(client) })
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.api_base)
    }

    /// Sends a form-encoded request to Stripe.
    ///
    /// Mutating requests should always pass an idempotency key. Stripe replays the original response for a repeated
    /// key instead of performing the operation again.
    pub async fn rest_query<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        idempotency_key: Option<&str>,
    ) -> Result<T, StripeApiError> {
        let url = self.url(path);
        trace!("💳️ Sending {method} {url}");
        let mut req = self.client.request(method.clone(), url).bearer_auth(self.config.secret_key.reveal());
        if let Some(key) = idempotency_key {
            req = req.header("Idempotency-Key", key);
        }
        if !params.is_empty() {
            req = if method == Method::GET { req.query(params) } else { req.form(params) };
        }
        let response = req.send().await.map_err(|e| {
            warn!("💳️ {method} {path} failed: {e}");
            StripeApiError::from(e)
        })?;
        let status = response.status();
        let body = response.text().await.map_err(StripeApiError::from)?;
        if status.is_success() {
            trace!("💳️ {method} {path} successful. {status}");
            serde_json::from_str::<T>(&body).map_err(|e| {
                error!("💳️ Could not parse the response to {method} {path}: {e}");
                StripeApiError::JsonError(e.to_string())
            })
        } else {
            let (code, message) = match serde_json::from_str::<ErrorResponse>(&body) {
                Ok(ErrorResponse { error }) => {
                    let message = error.message.or(error.error_type).unwrap_or_else(|| status.to_string());
                    (error.code, message)
                },
                Err(_) => (None, body),
            };
            warn!("💳️ Stripe rejected {method} {path}. {status}: {message}");
            Err(StripeApiError::QueryError { status: status.as_u16(), code, message })
        }
    }
}

impl PaymentGateway for StripeApi {
    async fn create_customer(&self, name: &str, email: &str) -> Result<Customer, StripeApiError> {
        let params = [("name", name.to_string()), ("email", email.to_string())];
        let key = format!("customer-{email}-{name}");
        let customer: Customer = self.rest_query(Method::POST, "/customers", &params, Some(&key)).await?;
        info!("💳️ Created Stripe customer {} for {email}", customer.id);
        Ok(customer)
    }

    async fn create_payment_intent(
        &self,
        amount: MinorUnits,
        currency: &str,
        payment_method: &str,
        customer: Option<String>,
        idempotency_key: &str,
    ) -> Result<PaymentIntent, StripeApiError> {
        let mut params = vec![
            ("amount", amount.value().to_string()),
            ("currency", currency.to_string()),
            ("payment_method_types[]", payment_method.to_string()),
        ];
        if let Some(customer) = customer {
            params.push(("customer", customer));
        }
        let intent: PaymentIntent =
            self.rest_query(Method::POST, "/payment_intents", &params, Some(idempotency_key)).await?;
        info!("💳️ Created payment intent {} for {amount} {currency} ({})", intent.id, intent.status);
        Ok(intent)
    }

    async fn get_payment_intent(&self, id: &str) -> Result<PaymentIntent, StripeApiError> {
        let path = format!("/payment_intents/{id}");
        let intent: PaymentIntent = self.rest_query(Method::GET, &path, &[], None).await?;
        debug!("💳️ Payment intent {id} is {}", intent.status);
        Ok(intent)
    }

    async fn cancel_payment_intent(&self, id: &str) -> Result<PaymentIntent, StripeApiError> {
        let path = format!("/payment_intents/{id}/cancel");
        let key = format!("cancel-{id}");
        let intent: PaymentIntent = self.rest_query(Method::POST, &path, &[], Some(&key)).await?;
        info!("💳️ Cancelled payment intent {id}. Stripe reports {}", intent.status);
        Ok(intent)
    }

    async fn create_refund(
        &self,
        payment_intent: &str,
        amount: Option<MinorUnits>,
        idempotency_key: &str,
    ) -> Result<Refund, StripeApiError> {
        let mut params = vec![("payment_intent", payment_intent.to_string())];
        if let Some(amount) = amount {
            params.push(("amount", amount.value().to_string()));
        }
        let refund: Refund = self.rest_query(Method::POST, "/refunds", &params, Some(idempotency_key)).await?;
        info!("💳️ Created refund {} of {} on {payment_intent} ({})", refund.id, refund.amount, refund.status);
        Ok(refund)
    }

    async fn create_subscription(
        &self,
        customer: &str,
        price: &str,
        idempotency_key: &str,
    ) -> Result<Subscription, StripeApiError> {
        let params = [("customer", customer.to_string()), ("items[0][price]", price.to_string())];
        let subscription: Subscription =
            self.rest_query(Method::POST, "/subscriptions", &params, Some(idempotency_key)).await?;
        info!("💳️ Created subscription {} for {customer} on {price} ({})", subscription.id, subscription.status);
        Ok(subscription)
    }

    async fn cancel_subscription(&self, id: &str) -> Result<Subscription, StripeApiError> {
        let path = format!("/subscriptions/{id}");
        let key = format!("cancel-{id}");
        let subscription: Subscription = self.rest_query(Method::DELETE, &path, &[], Some(&key)).await?;
        info!("💳️ Cancelled subscription {id}. Stripe reports {}", subscription.status);
        Ok(subscription)
    }
}
