//! Payment Ledger Engine
//!
//! The ledger engine keeps a local, trustworthy record of payments, refunds and subscriptions whose authoritative
//! state lives with an external payment gateway. It is gateway-agnostic: it only ever sees gateway *references* and
//! the statuses the gateway reports for them.
//!
//! The library is divided into three main sections:
//! 1. Persistence ([`mod@traits`] and [`mod@sqlite`]). [`LedgerStore`] is the contract a backend has to fulfil; SQLite
//!    is the supported backend. The row types used by the store are defined in [`mod@db_types`] and are public.
//! 2. The state machines ([`mod@lifecycle`]). Every status reported by the gateway is a proposal which is only accepted
//!    if it is a legal successor of the current status. Terminal statuses are never left.
//! 3. The public API ([`ReconciliationApi`]). Everything that writes to the ledger goes through it, so that duplicated
//!    or out-of-order gateway events cannot corrupt the record.
//!
//! The engine also emits events when a payment changes status or a refund is recorded. See [`mod@events`] for how to
//! hook into them.
pub mod db_types;
pub mod events;
pub mod ledger_api;
pub mod lifecycle;
pub mod traits;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use ledger_api::{ReconciliationApi, ReconciliationError, ReplaySummary, MAX_REPLAY_ATTEMPTS};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
pub use traits::{LedgerError, LedgerStore, WriteJournal};
