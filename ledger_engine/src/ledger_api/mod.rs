//! The public face of the ledger.
//!
//! [`ReconciliationApi`] is the only component that decides whether a status reported by the gateway may be written.
//! HTTP handlers, webhook ingestion and the background worker all go through it.
pub mod errors;
mod reconciliation_api;
mod status_store;

pub use errors::ReconciliationError;
pub use reconciliation_api::{ReconciliationApi, ReplaySummary, MAX_REPLAY_ATTEMPTS};
