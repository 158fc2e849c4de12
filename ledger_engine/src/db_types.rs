use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
pub use ledger_common::MinorUnits;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ConversionError(String);

/// Generates `Display` and `FromStr` for a status enum using the same strings as its sqlx encoding.
macro_rules! status_names {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let s = match self {
                    $(Self::$variant => $text,)+
                };
                f.write_str(s)
            }
        }

        impl FromStr for $name {
            type Err = ConversionError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(ConversionError(format!("Invalid {} value: {other}", stringify!($name)))),
                }
            }
        }
    };
}

//--------------------------------------     ExternalRef       ---------------------------------------------------------
/// An identifier assigned by the payment gateway (payment intent, refund, subscription or customer id).
///
/// This is the idempotency key that joins gateway events to ledger rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct ExternalRef(pub String);

impl ExternalRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ExternalRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ExternalRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ExternalRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

//--------------------------------------     PaymentStatus     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// The payment intent exists, but the charge has not completed.
    Pending,
    /// The charge completed. Refunds are tracked separately and do not change this status.
    Succeeded,
    Failed,
    Canceled,
}

status_names!(PaymentStatus {
    Pending => "pending",
    Succeeded => "succeeded",
    Failed => "failed",
    Canceled => "canceled",
});

//--------------------------------------     RefundStatus      ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Pending,
    Succeeded,
    Failed,
    /// The money has been returned to the customer and the refund is fully accounted for.
    Refunded,
}

status_names!(RefundStatus {
    Pending => "pending",
    Succeeded => "succeeded",
    Failed => "failed",
    Refunded => "refunded",
});

//--------------------------------------  SubscriptionStatus   ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Incomplete,
    IncompleteExpired,
    Trialing,
    Active,
    PastDue,
    Unpaid,
    Paused,
    Canceled,
}

status_names!(SubscriptionStatus {
    Incomplete => "incomplete",
    IncompleteExpired => "incomplete_expired",
    Trialing => "trialing",
    Active => "active",
    PastDue => "past_due",
    Unpaid => "unpaid",
    Paused => "paused",
    Canceled => "canceled",
});

//--------------------------------------    TransactionKind    ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Payment,
    Refund,
}

status_names!(TransactionKind {
    Payment => "payment",
    Refund => "refund",
});

//--------------------------------------     UpdateSource      ---------------------------------------------------------
/// Where a proposed status change came from. Only used for logging and event hooks; every source is subject to the
/// same transition rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateSource {
    /// A synchronous API command (cancel, refund, ...)
    Command,
    /// An inbound gateway webhook
    Webhook,
    /// The reconciliation worker polling the gateway
    Poll,
    /// Replay of a journaled ledger write
    Replay,
}

status_names!(UpdateSource {
    Command => "command",
    Webhook => "webhook",
    Poll => "poll",
    Replay => "replay",
});

//--------------------------------------         User          ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    /// The customer id assigned by the payment gateway, if one has been created.
    pub gateway_customer_id: Option<ExternalRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub gateway_customer_id: Option<ExternalRef>,
}

impl NewUser {
    pub fn new<S: Into<String>>(name: S, email: S) -> Self {
        Self { name: name.into(), email: email.into(), gateway_customer_id: None }
    }

    pub fn with_gateway_customer_id(mut self, customer_id: ExternalRef) -> Self {
        self.gateway_customer_id = Some(customer_id);
        self
    }
}

//--------------------------------------        Payment        ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub user_id: i64,
    /// The payment intent id assigned by the gateway
    pub external_ref: ExternalRef,
    pub amount: MinorUnits,
    pub currency: String,
    pub method: String,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// When the reconciliation worker last asked the gateway about this payment
    pub polled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPayment {
    pub user_id: i64,
    pub external_ref: ExternalRef,
    pub amount: MinorUnits,
    pub currency: String,
    pub method: String,
}

impl NewPayment {
    pub fn new<R: Into<ExternalRef>>(user_id: i64, external_ref: R, amount: MinorUnits, currency: &str) -> Self {
        Self {
            user_id,
            external_ref: external_ref.into(),
            amount,
            currency: currency.to_string(),
            method: "card".to_string(),
        }
    }

    pub fn with_method<S: Into<String>>(mut self, method: S) -> Self {
        self.method = method.into();
        self
    }
}

//--------------------------------------        Refund         ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Refund {
    pub id: i64,
    pub payment_id: i64,
    /// The refund id assigned by the gateway
    pub external_ref: ExternalRef,
    pub amount: MinorUnits,
    pub status: RefundStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRefund {
    pub payment_id: i64,
    pub external_ref: ExternalRef,
    pub amount: MinorUnits,
}

//--------------------------------------      Subscription     ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub user_id: i64,
    /// The payment that started this subscription, if there was one
    pub payment_id: Option<i64>,
    pub external_ref: ExternalRef,
    pub price_ref: String,
    pub amount: MinorUnits,
    pub currency: String,
    pub status: SubscriptionStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSubscription {
    pub user_id: i64,
    pub payment_id: Option<i64>,
    pub external_ref: ExternalRef,
    pub price_ref: String,
    pub amount: MinorUnits,
    pub currency: String,
    /// Subscriptions are stored in whatever status the gateway reported at creation time.
    pub status: SubscriptionStatus,
}

//--------------------------------------      Transaction      ---------------------------------------------------------
/// An immutable entry in a user's transaction history. Exactly one is written per payment and per refund.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub user_id: i64,
    pub kind: TransactionKind,
    pub amount: MinorUnits,
    pub currency: String,
    /// The id of the payment or refund row, depending on `kind`
    pub related_id: i64,
    pub external_ref: ExternalRef,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTransaction {
    pub user_id: i64,
    pub kind: TransactionKind,
    pub amount: MinorUnits,
    pub currency: String,
    pub related_id: i64,
    pub external_ref: ExternalRef,
}

impl NewTransaction {
    pub fn for_payment(payment: &Payment) -> Self {
        Self {
            user_id: payment.user_id,
            kind: TransactionKind::Payment,
            amount: payment.amount,
            currency: payment.currency.clone(),
            related_id: payment.id,
            external_ref: payment.external_ref.clone(),
        }
    }

    pub fn for_refund(payment: &Payment, refund: &Refund) -> Self {
        Self {
            user_id: payment.user_id,
            kind: TransactionKind::Refund,
            amount: refund.amount,
            currency: payment.currency.clone(),
            related_id: refund.id,
            external_ref: refund.external_ref.clone(),
        }
    }
}

//--------------------------------------      LedgerWrite      ---------------------------------------------------------
/// A ledger mutation that can be journaled and replayed later.
///
/// When the gateway accepted a request but the ledger write that should follow it failed, the intended write is
/// stored as one of these so that nothing the gateway did is forgotten. Every variant is idempotent when replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LedgerWrite {
    RecordPayment(NewPayment),
    PaymentStatus { external_ref: ExternalRef, status: PaymentStatus },
    RecordRefund { payment_ref: ExternalRef, refund_ref: ExternalRef, amount: MinorUnits, status: RefundStatus },
    RecordSubscription(NewSubscription),
    SubscriptionStatus { external_ref: ExternalRef, status: SubscriptionStatus },
}

impl LedgerWrite {
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerWrite::RecordPayment(_) => "record_payment",
            LedgerWrite::PaymentStatus { .. } => "payment_status",
            LedgerWrite::RecordRefund { .. } => "record_refund",
            LedgerWrite::RecordSubscription(_) => "record_subscription",
            LedgerWrite::SubscriptionStatus { .. } => "subscription_status",
        }
    }

    /// The gateway reference that the write concerns.
    pub fn external_ref(&self) -> &ExternalRef {
        match self {
            LedgerWrite::RecordPayment(p) => &p.external_ref,
            LedgerWrite::PaymentStatus { external_ref, .. } => external_ref,
            LedgerWrite::RecordRefund { refund_ref, .. } => refund_ref,
            LedgerWrite::RecordSubscription(s) => &s.external_ref,
            LedgerWrite::SubscriptionStatus { external_ref, .. } => external_ref,
        }
    }
}

//--------------------------------------      PendingWrite     ---------------------------------------------------------
/// A journaled [`LedgerWrite`] as it is stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct PendingWrite {
    pub id: i64,
    pub kind: String,
    pub external_ref: ExternalRef,
    pub payload: String,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Set when replay was given up on. Abandoned entries are never replayed automatically.
    pub abandoned_at: Option<DateTime<Utc>>,
}

impl PendingWrite {
    pub fn write(&self) -> Result<LedgerWrite, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }
}
