//! # Payment ledger server
//! This crate hosts the HTTP front end of the payment ledger. It is responsible for:
//! * Accepting payment, refund and subscription commands, passing them to Stripe, and recording the outcome in the
//!   ledger.
//! * Receiving Stripe webhooks, verifying their signatures, and reconciling the ledger with them.
//! * Running the reconciliation worker, which replays journaled ledger writes and polls Stripe for payments whose
//!   webhook never arrived.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) and
//! [`stripe_tools::StripeConfig`] for more information.
//!
//! ## Routes
//! * `/health`: A health check route that returns a 200 OK response.
//! * `/payment/intent`, `/payment/refund`, `/payment/cancel`: payment commands.
//! * `/payment/webhook`: Stripe events.
//! * `/subscription/create`, `/subscription/cancel`: subscription commands.
//! * `/transactions`: a user's transaction history.
pub mod cli;
pub mod config;
pub mod data_objects;
pub mod errors;
pub mod event_hooks;
pub mod helpers;
pub mod ingestor;
pub mod orchestrator;
pub mod reconciliation_worker;
pub mod routes;
pub mod server;

#[cfg(test)]
mod endpoint_tests;
