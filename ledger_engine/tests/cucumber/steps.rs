use cucumber::{then, when};
use ledger_engine::{
    db_types::{
        ExternalRef,
        MinorUnits,
        NewPayment,
        NewSubscription,
        PaymentStatus,
        RefundStatus,
        SubscriptionStatus,
        TransactionKind,
        UpdateSource,
    },
    LedgerError,
    ReconciliationError,
};

use crate::cucumber::LedgerWorld;

fn error_code(e: &ReconciliationError) -> &'static str {
    match e {
        ReconciliationError::UnknownReference { .. } => "unknown_reference",
        ReconciliationError::IllegalTransition { .. } => "illegal_transition",
        ReconciliationError::Ledger(LedgerError::RefundExceedsPayment { .. }) => "refund_exceeds_payment",
        _ => "backend_error",
    }
}

#[when(expr = "{word} pays {int} {word} by {word} with reference {word}")]
async fn record_payment(world: &mut LedgerWorld, name: String, amount: i64, currency: String, method: String, pi: String) {
    let user_id = world.user(&name).id;
    let payment = NewPayment::new(user_id, pi.as_str(), MinorUnits::from(amount), &currency).with_method(method);
    let payment = world.api().record_payment(payment).await.expect("Error recording payment");
    world.last_payment = Some(payment.external_ref);
}

#[when(expr = "the gateway reports payment {word} as {word}")]
async fn report_payment_status(world: &mut LedgerWorld, pi: String, status: String) {
    let status = status.parse::<PaymentStatus>().expect("Not a payment status");
    let result = world.api().apply_payment_status(&ExternalRef::from(pi), status, UpdateSource::Webhook).await;
    world.last_error = result.err();
}

#[when(expr = "payment {word} is refunded {int} with reference {word}")]
async fn refund_payment(world: &mut LedgerWorld, pi: String, amount: i64, re: String) {
    let result = world
        .api()
        .record_refund(&pi.into(), re.into(), MinorUnits::from(amount), RefundStatus::Refunded, UpdateSource::Command)
        .await;
    world.last_error = result.err();
}

#[when(expr = "subscription {word} for {word} to price {word} is created with status {word}")]
async fn create_subscription(world: &mut LedgerWorld, sub: String, name: String, price: String, status: String) {
    let user_id = world.user(&name).id;
    let status = status.parse::<SubscriptionStatus>().expect("Not a subscription status");
    let subscription = NewSubscription {
        user_id,
        payment_id: None,
        external_ref: sub.into(),
        price_ref: price,
        amount: MinorUnits::from(1500),
        currency: "usd".into(),
        status,
    };
    let result = world.api().record_subscription(subscription, UpdateSource::Command).await;
    world.last_error = result.err();
}

#[when(expr = "the gateway reports subscription {word} as {word}")]
async fn report_subscription_status(world: &mut LedgerWorld, sub: String, status: String) {
    let status = status.parse::<SubscriptionStatus>().expect("Not a subscription status");
    let result = world.api().apply_subscription_status(&sub.into(), status, UpdateSource::Webhook).await;
    world.last_error = result.err();
}

#[then(expr = "payment {word} has status {word}")]
async fn check_payment_status(world: &mut LedgerWorld, pi: String, status: String) {
    let payment = world.api().payment(&pi.into()).await.expect("Payment not found");
    assert_eq!(payment.status.to_string(), status);
}

#[then(expr = "refund {word} has status {word}")]
async fn check_refund_status(world: &mut LedgerWorld, re: String, status: String) {
    let refund = world.api().refund(&re.into()).await.expect("Refund not found");
    assert_eq!(refund.status.to_string(), status);
}

#[then(expr = "subscription {word} has status {word}")]
async fn check_subscription_status(world: &mut LedgerWorld, sub: String, status: String) {
    let subscription = world.api().subscription(&sub.into()).await.expect("Subscription not found");
    assert_eq!(subscription.status.to_string(), status);
}

#[then(expr = "subscription {word} has ended")]
async fn check_subscription_ended(world: &mut LedgerWorld, sub: String) {
    let subscription = world.api().subscription(&sub.into()).await.expect("Subscription not found");
    assert!(subscription.end_date.is_some(), "Subscription has no end date");
}

#[then(expr = "payment {word} has {int} left to refund")]
async fn check_refundable(world: &mut LedgerWorld, pi: String, amount: i64) {
    let payment = world.api().payment(&pi.into()).await.expect("Payment not found");
    let remaining = world.api().refundable_amount(&payment).await.expect("Error fetching refund total");
    assert_eq!(remaining, MinorUnits::from(amount));
}

#[then(expr = "{word} has {int} {word} transaction(s)")]
async fn check_transaction_count(world: &mut LedgerWorld, name: String, count: usize, kind: String) {
    let kind = kind.parse::<TransactionKind>().expect("Not a transaction kind");
    let email = world.user(&name).email.clone();
    let history = world.api().transactions_for_identity(&name, &email).await.expect("Error fetching transactions");
    let n = history.iter().filter(|t| t.kind == kind).count();
    assert_eq!(n, count, "Expected {count} {kind} transactions for {name}, found {n}");
}

#[then("the last operation succeeded")]
async fn check_success(world: &mut LedgerWorld) {
    assert!(world.last_error.is_none(), "Expected success, got {:?}", world.last_error);
}

#[then(expr = "the last operation failed with {word}")]
async fn check_failure(world: &mut LedgerWorld, code: String) {
    let err = world.last_error.as_ref().expect("Expected the last operation to fail");
    assert_eq!(error_code(err), code, "Unexpected error: {err}");
}
