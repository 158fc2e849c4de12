//! SQLite backend for the payment ledger.
mod sqlite_impl;

pub mod db;
pub use sqlite_impl::SqliteDatabase;
