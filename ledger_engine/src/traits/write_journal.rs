use crate::{
    db_types::{LedgerWrite, PendingWrite},
    traits::LedgerError,
};

/// Durable storage for ledger writes that could not be completed after the gateway had already acted.
///
/// Entries are created by [`crate::ReconciliationApi::record_pending_write`] and replayed by
/// [`crate::ReconciliationApi::replay_pending_writes`]. Backends should store the journal in a different table from
/// the ledger itself, so that a constraint failure on a ledger table does not also prevent journaling.
#[allow(async_fn_in_trait)]
pub trait WriteJournal {
    /// Stores the write and returns the journal entry.
    async fn insert_pending_write(&self, write: &LedgerWrite, error: &str) -> Result<PendingWrite, LedgerError>;

    /// Fetches up to `limit` entries that are neither resolved nor abandoned, fewest attempts first, then oldest.
    async fn unresolved_pending_writes(&self, limit: i64) -> Result<Vec<PendingWrite>, LedgerError>;

    /// Fetches up to `limit` abandoned entries, oldest first. These need an operator.
    async fn abandoned_pending_writes(&self, limit: i64) -> Result<Vec<PendingWrite>, LedgerError>;

    /// Marks the entry as resolved. Resolved entries are kept for auditing.
    async fn resolve_pending_write(&self, id: i64) -> Result<PendingWrite, LedgerError>;

    /// Records a failed replay attempt.
    async fn record_pending_write_failure(&self, id: i64, error: &str) -> Result<PendingWrite, LedgerError>;

    /// Records a final failed attempt and takes the entry out of the replay queue.
    async fn abandon_pending_write(&self, id: i64, error: &str) -> Result<PendingWrite, LedgerError>;
}
