use ledger_common::helpers::normalize_currency;
use ledger_engine::db_types::{MinorUnits, PaymentStatus, RefundStatus, SubscriptionStatus};
use log::trace;
use regex::Regex;
use stripe_tools::{PaymentIntentStatus, RefundStatus as GatewayRefundStatus, SubscriptionStatus as GatewaySubStatus};

use crate::errors::ServerError;

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";

pub fn validate_identity(name: &str, email: &str) -> Result<(), ServerError> {
    if name.trim().is_empty() {
        return Err(ServerError::ValidationError("A name is required".into()));
    }
    let re = Regex::new(EMAIL_PATTERN).map_err(|e| ServerError::BackendError(e.to_string()))?;
    if !re.is_match(email.trim()) {
        trace!("💻️ Rejecting email address '{email}'");
        return Err(ServerError::ValidationError(format!("'{email}' is not a valid email address")));
    }
    Ok(())
}

pub fn validate_amount(amount: MinorUnits) -> Result<(), ServerError> {
    if amount.is_positive() {
        Ok(())
    } else {
        Err(ServerError::ValidationError(format!("The amount must be greater than zero, but was {amount}")))
    }
}

/// Checks that `currency` is a three-letter code, and returns it in lower case.
pub fn validate_currency(currency: &str) -> Result<String, ServerError> {
    normalize_currency(currency)
        .ok_or_else(|| ServerError::ValidationError(format!("'{currency}' is not a three-letter currency code")))
}

pub fn validate_reference<'a>(field: &str, value: &'a str) -> Result<&'a str, ServerError> {
    let value = value.trim();
    if value.is_empty() {
        Err(ServerError::ValidationError(format!("{field} is required")))
    } else {
        Ok(value)
    }
}

/// The ledger status implied by a payment intent's status. Everything short of a final outcome is `pending`.
pub fn payment_status_for(status: PaymentIntentStatus) -> PaymentStatus {
    match status {
        PaymentIntentStatus::Succeeded => PaymentStatus::Succeeded,
        PaymentIntentStatus::Canceled => PaymentStatus::Canceled,
        PaymentIntentStatus::RequiresPaymentMethod |
        PaymentIntentStatus::RequiresConfirmation |
        PaymentIntentStatus::RequiresAction |
        PaymentIntentStatus::Processing |
        PaymentIntentStatus::RequiresCapture |
        PaymentIntentStatus::Unknown => PaymentStatus::Pending,
    }
}

/// Stripe accepts a refund request immediately and settles it later. Only a succeeded refund is `refunded`; one that
/// is still in flight stays `pending` until a `refund.updated` or `refund.failed` event settles it.
pub fn refund_status_for(status: GatewayRefundStatus) -> RefundStatus {
    match status {
        GatewayRefundStatus::Succeeded => RefundStatus::Refunded,
        GatewayRefundStatus::Failed | GatewayRefundStatus::Canceled => RefundStatus::Failed,
        GatewayRefundStatus::Pending | GatewayRefundStatus::RequiresAction | GatewayRefundStatus::Unknown => {
            RefundStatus::Pending
        },
    }
}

/// `None` for a status this version of the ledger does not know about.
pub fn subscription_status_for(status: GatewaySubStatus) -> Option<SubscriptionStatus> {
    match status {
        GatewaySubStatus::Incomplete => Some(SubscriptionStatus::Incomplete),
        GatewaySubStatus::IncompleteExpired => Some(SubscriptionStatus::IncompleteExpired),
        GatewaySubStatus::Trialing => Some(SubscriptionStatus::Trialing),
        GatewaySubStatus::Active => Some(SubscriptionStatus::Active),
        GatewaySubStatus::PastDue => Some(SubscriptionStatus::PastDue),
        GatewaySubStatus::Unpaid => Some(SubscriptionStatus::Unpaid),
        GatewaySubStatus::Paused => Some(SubscriptionStatus::Paused),
        GatewaySubStatus::Canceled => Some(SubscriptionStatus::Canceled),
        GatewaySubStatus::Unknown => None,
    }
}

/// The idempotency key for a refund command. `refund_count` is the number of refunds the ledger holds for the payment,
/// failed ones included.
///
/// A retry of the same command against the same refund history maps to the same key, so the gateway will not refund
/// twice. Once any refund has been recorded, including one that later failed, the next request gets a fresh key.
pub fn refund_idempotency_key(payment_ref: &str, refund_count: usize, amount: MinorUnits) -> String {
    format!("refund-{payment_ref}-{refund_count}-{amount}")
}
