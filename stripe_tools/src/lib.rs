//! Stripe integration for the payment ledger
//!
//! * [`StripeApi`] is a thin REST client over the handful of Stripe endpoints the ledger needs. It implements
//!   [`PaymentGateway`], which is what the rest of the system codes against.
//! * [`webhook`] verifies the `Stripe-Signature` header on inbound events and parses them into [`GatewayEvent`]s.
//!
//! Nothing in here writes to the ledger. Every status returned by Stripe is handed to the reconciliation engine as a
//! proposal.
mod api;
mod config;
mod data_objects;
mod error;
mod gateway;
pub mod webhook;

pub use api::StripeApi;
pub use config::StripeConfig;
pub use data_objects::{
    Customer,
    PaymentIntent,
    PaymentIntentStatus,
    Refund,
    RefundStatus,
    Subscription,
    SubscriptionStatus,
};
pub use error::{SignatureError, StripeApiError, WebhookError};
pub use gateway::PaymentGateway;
pub use webhook::{EventKind, GatewayEvent};
