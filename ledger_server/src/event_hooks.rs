//! Subscribers to ledger events.
//!
//! The reconciliation engine emits an event whenever a payment actually changes status and whenever a refund is first
//! written. The handlers here turn those into an audit trail under the `ledger::audit` log target, independent of the
//! debug logging in the engine itself.
use futures::future::BoxFuture;
use ledger_engine::{
    db_types::PaymentStatus,
    events::{EventHandlers, EventHooks, PaymentStatusChangedEvent, RefundRecordedEvent},
};
use log::*;

pub const LEDGER_EVENT_BUFFER_SIZE: usize = 25;
const AUDIT_TARGET: &str = "ledger::audit";

pub fn create_audit_event_handlers() -> EventHandlers {
    let mut hooks = EventHooks::default();
    hooks.on_payment_status_changed(audit_payment_status_change);
    hooks.on_refund_recorded(audit_refund);
    EventHandlers::new(LEDGER_EVENT_BUFFER_SIZE, hooks)
}

fn audit_payment_status_change(ev: PaymentStatusChangedEvent) -> BoxFuture<'static, ()> {
    let payment = &ev.payment;
    let line = format!(
        "📬️ Payment [{}] of {} {} for user #{} moved from {} to {} ({})",
        payment.external_ref,
        payment.amount,
        payment.currency,
        payment.user_id,
        ev.old_status,
        ev.new_status(),
        ev.source
    );
    if matches!(ev.new_status(), PaymentStatus::Failed | PaymentStatus::Canceled) {
        warn!(target: AUDIT_TARGET, "{line}");
    } else {
        info!(target: AUDIT_TARGET, "{line}");
    }
    Box::pin(async {})
}

fn audit_refund(ev: RefundRecordedEvent) -> BoxFuture<'static, ()> {
    let RefundRecordedEvent { refund, payment } = ev;
    info!(
        target: AUDIT_TARGET,
        "📬️ Refund [{}] of {} {} recorded against payment [{}] for user #{}",
        refund.external_ref,
        refund.amount,
        payment.currency,
        payment.external_ref,
        payment.user_id
    );
    Box::pin(async {})
}
