//! # Ledger backend contracts
//!
//! This module defines the behaviour that database backends need to expose in order to store the payment ledger.
//!
//! * [`LedgerStore`] is the repository for users, payments, refunds, subscriptions and the transaction log.
//! * [`WriteJournal`] stores ledger writes that failed after the gateway already acted, so that they can be replayed.
//!
//! Backends hold no business rules. Status transitions are decided by the reconciliation API and handed to the store
//! as compare-and-swap updates.
mod ledger_store;
mod write_journal;

pub use ledger_store::{LedgerError, LedgerStore};
pub use write_journal::WriteJournal;
