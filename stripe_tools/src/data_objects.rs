//! The subset of Stripe's objects that the ledger reads. Unknown fields are ignored and unknown status strings map
//! to an `Unknown` variant, so a new Stripe API version cannot break deserialization.
use std::fmt::Display;

use ledger_common::MinorUnits;
use serde::{Deserialize, Serialize};

macro_rules! stripe_status {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant,)+
            #[serde(other)]
            Unknown,
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(Self::$variant => f.write_str($text),)+
                    Self::Unknown => f.write_str("unknown"),
                }
            }
        }
    };
}

stripe_status!(PaymentIntentStatus {
    RequiresPaymentMethod => "requires_payment_method",
    RequiresConfirmation => "requires_confirmation",
    RequiresAction => "requires_action",
    Processing => "processing",
    RequiresCapture => "requires_capture",
    Canceled => "canceled",
    Succeeded => "succeeded",
});

stripe_status!(RefundStatus {
    Pending => "pending",
    RequiresAction => "requires_action",
    Succeeded => "succeeded",
    Failed => "failed",
    Canceled => "canceled",
});

stripe_status!(SubscriptionStatus {
    Incomplete => "incomplete",
    IncompleteExpired => "incomplete_expired",
    Trialing => "trialing",
    Active => "active",
    PastDue => "past_due",
    Unpaid => "unpaid",
    Paused => "paused",
    Canceled => "canceled",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub amount: MinorUnits,
    pub currency: String,
    pub status: PaymentIntentStatus,
    /// Only present on responses to the merchant's own API key. Never logged.
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub customer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refund {
    pub id: String,
    pub amount: MinorUnits,
    #[serde(default)]
    pub currency: Option<String>,
    /// The payment intent being refunded
    #[serde(default)]
    pub payment_intent: Option<String>,
    pub status: RefundStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub customer: String,
    pub status: SubscriptionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// The body Stripe sends with a non-2xx response.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorDetail {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
}
