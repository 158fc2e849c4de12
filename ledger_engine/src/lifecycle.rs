//! Status state machines for payments, refunds and subscriptions.
//!
//! Every status the gateway reports is treated as a *proposal*. The ledger only moves a row forward if
//! [`Lifecycle::can_transition_to`] allows it, and never moves a row out of a terminal status. This is what makes
//! webhook re-delivery, out-of-order delivery and the race between synchronous commands and webhooks safe.
use std::fmt::{Debug, Display};

use serde::{Deserialize, Serialize};

use crate::db_types::{PaymentStatus, RefundStatus, SubscriptionStatus};

pub trait Lifecycle: Copy + Eq + Debug + Display + Send + Sync + 'static {
    /// Human-readable name of the entity the status belongs to, used in logs and errors.
    const ENTITY: &'static str;

    /// Terminal statuses are sinks. No further transition is accepted once a row reaches one.
    fn is_terminal(&self) -> bool;

    /// Whether `next` is a legal successor of `self`. Staying in the same status is not a transition.
    fn can_transition_to(&self, next: Self) -> bool;
}

impl Lifecycle for PaymentStatus {
    const ENTITY: &'static str = "payment";

    fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    fn can_transition_to(&self, next: Self) -> bool {
        use PaymentStatus::*;
        matches!((self, next), (Pending, Succeeded) | (Pending, Failed) | (Pending, Canceled))
    }
}

impl Lifecycle for RefundStatus {
    const ENTITY: &'static str = "refund";

    fn is_terminal(&self) -> bool {
        !matches!(self, RefundStatus::Pending)
    }

    fn can_transition_to(&self, next: Self) -> bool {
        use RefundStatus::*;
        matches!((self, next), (Pending, Succeeded) | (Pending, Failed) | (Pending, Refunded))
    }
}

impl Lifecycle for SubscriptionStatus {
    const ENTITY: &'static str = "subscription";

    fn is_terminal(&self) -> bool {
        matches!(self, SubscriptionStatus::Canceled | SubscriptionStatus::IncompleteExpired)
    }

    fn can_transition_to(&self, next: Self) -> bool {
        use SubscriptionStatus::*;
        match self {
            Incomplete => matches!(next, Active | Trialing | IncompleteExpired | Canceled),
            Trialing => matches!(next, Active | PastDue | Unpaid | Paused | Canceled),
            Active => matches!(next, PastDue | Unpaid | Paused | Canceled),
            PastDue => matches!(next, Active | Unpaid | Canceled),
            Unpaid => matches!(next, Active | Canceled),
            Paused => matches!(next, Active | Canceled),
            Canceled | IncompleteExpired => false,
        }
    }
}

/// The outcome of applying a proposed status to a ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StatusChange<S> {
    /// The row moved from `from` to `to`.
    Applied { from: S, to: S },
    /// The row was already in the proposed (non-terminal) status.
    Unchanged { status: S },
    /// The row was already terminal, so the proposal was discarded.
    AlreadyTerminal { status: S },
}

impl<S: Lifecycle> StatusChange<S> {
    /// The status of the row after the change was evaluated.
    pub fn status(&self) -> S {
        match self {
            StatusChange::Applied { to, .. } => *to,
            StatusChange::Unchanged { status } => *status,
            StatusChange::AlreadyTerminal { status } => *status,
        }
    }

    pub fn was_applied(&self) -> bool {
        matches!(self, StatusChange::Applied { .. })
    }
}

/// Decides what should happen to a row currently in `current` when `proposed` arrives.
///
/// Returns `Ok(None)` when the row should be updated, `Ok(Some(change))` when the proposal is an idempotent no-op, and
/// `Err(())` when the transition is illegal.
pub(crate) fn evaluate<S: Lifecycle>(current: S, proposed: S) -> Result<Option<StatusChange<S>>, ()> {
    if current.is_terminal() {
        return Ok(Some(StatusChange::AlreadyTerminal { status: current }));
    }
    if current == proposed {
        return Ok(Some(StatusChange::Unchanged { status: current }));
    }
    if current.can_transition_to(proposed) {
        Ok(None)
    } else {
        Err(())
    }
}
