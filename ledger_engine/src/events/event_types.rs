use serde::{Deserialize, Serialize};

use crate::db_types::{Payment, PaymentStatus, Refund, UpdateSource};

/// Emitted whenever a payment row actually moves to a new status. Idempotent no-ops do not produce events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentStatusChangedEvent {
    /// The payment as it stands after the change
    pub payment: Payment,
    pub old_status: PaymentStatus,
    pub source: UpdateSource,
}

impl PaymentStatusChangedEvent {
    pub fn new(payment: Payment, old_status: PaymentStatus, source: UpdateSource) -> Self {
        Self { payment, old_status, source }
    }

    pub fn new_status(&self) -> PaymentStatus {
        self.payment.status
    }
}

/// Emitted once per refund row, when it is first written to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRecordedEvent {
    pub refund: Refund,
    pub payment: Payment,
}

impl RefundRecordedEvent {
    pub fn new(refund: Refund, payment: Payment) -> Self {
        Self { refund, payment }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    PaymentStatusChanged(PaymentStatusChangedEvent),
    RefundRecorded(RefundRecordedEvent),
}
