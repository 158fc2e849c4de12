use std::fmt::Display;

use ledger_engine::db_types::{MinorUnits, PaymentStatus, RefundStatus, SubscriptionStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonResponse {
    pub success: bool,
    pub message: String,
}

impl JsonResponse {
    pub fn success<S: Display>(message: S) -> Self {
        Self { success: true, message: message.to_string() }
    }

    pub fn failure<S: Display>(message: S) -> Self {
        Self { success: false, message: message.to_string() }
    }
}

/// The identity a caller is known by. A user is created for an identity the first time it is seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

//--------------------------------------       Payments        ---------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntentRequest {
    pub name: String,
    pub email: String,
    pub amount: MinorUnits,
    pub currency: String,
    pub payment_method: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntentResponse {
    pub message: String,
    pub payment_intent: String,
    pub client_secret: Option<String>,
    pub status: PaymentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    #[serde(rename = "paymentIntentID", alias = "payment_intent_id")]
    pub payment_intent_id: String,
    /// Defaults to whatever has not been refunded yet
    #[serde(default)]
    pub amount: Option<MinorUnits>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundResponse {
    pub message: String,
    pub refund_id: String,
    pub amount: MinorUnits,
    pub status: RefundStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelPaymentRequest {
    #[serde(rename = "paymentIntentID", alias = "payment_intent_id")]
    pub payment_intent_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelPaymentResponse {
    pub message: String,
    pub payment_intent: String,
    pub status: PaymentStatus,
}

//--------------------------------------     Subscriptions     ---------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    pub name: String,
    pub email: String,
    pub price_id: String,
    pub amount: MinorUnits,
    pub currency: String,
    /// The payment that started the subscription, if any
    #[serde(default)]
    pub payment_intent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelSubscriptionRequest {
    pub subscription_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionResponse {
    pub message: String,
    pub subscription_id: String,
    pub status: SubscriptionStatus,
}
