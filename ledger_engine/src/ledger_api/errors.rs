use thiserror::Error;

use crate::{db_types::ExternalRef, traits::LedgerError};

#[derive(Debug, Clone, Error)]
pub enum ReconciliationError {
    /// The gateway referred to something the ledger has not recorded (yet). Events can arrive before the command
    /// that created the row has committed, so callers should ask the gateway to re-deliver.
    #[error("No {entity} with reference {external_ref} is known to the ledger")]
    UnknownReference { entity: &'static str, external_ref: ExternalRef },
    #[error("Cannot move {entity} {external_ref} from {from} to {to}")]
    IllegalTransition { entity: &'static str, external_ref: ExternalRef, from: String, to: String },
    #[error("Gave up updating {entity} {external_ref} after {attempts} conflicting concurrent updates")]
    Contention { entity: &'static str, external_ref: ExternalRef, attempts: usize },
    #[error("{0}")]
    Ledger(#[from] LedgerError),
}

impl ReconciliationError {
    pub fn unknown(entity: &'static str, external_ref: &ExternalRef) -> Self {
        Self::UnknownReference { entity, external_ref: external_ref.clone() }
    }

    /// Whether the error came from the store rather than from the ledger rules.
    pub fn is_persistence_failure(&self) -> bool {
        matches!(self, Self::Ledger(_) | Self::Contention { .. })
    }
}
