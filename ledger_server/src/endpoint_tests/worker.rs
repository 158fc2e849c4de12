use ledger_engine::{
    db_types::{ExternalRef, LedgerWrite, PaymentStatus},
    ReplaySummary,
};
use mockall::predicate::eq;
use stripe_tools::{PaymentIntentStatus, StripeApiError};

use super::{
    helpers::{intent, ledger, payment_status, seed_payment, tear_down, test_db},
    mocks::MockStripe,
};
use crate::reconciliation_worker::{run_reconciliation_pass, BATCH_SIZE};

async fn backdate(db: &ledger_engine::SqliteDatabase, payment_ref: &str) {
    backdate_by(db, payment_ref, "-2 hours").await;
}

async fn backdate_by(db: &ledger_engine::SqliteDatabase, payment_ref: &str, modifier: &str) {
    sqlx::query("UPDATE payments SET updated_at = datetime('now', $1) WHERE external_ref = $2")
        .bind(modifier)
        .bind(payment_ref)
        .execute(db.pool())
        .await
        .unwrap();
}

#[actix_web::test]
async fn a_pass_replays_the_journal_and_polls_stale_payments() {
    let db = test_db().await;
    seed_payment(&db, "pi_lost_webhook", 1000, PaymentStatus::Pending).await;
    seed_payment(&db, "pi_gateway_down", 1000, PaymentStatus::Pending).await;
    seed_payment(&db, "pi_journaled", 1000, PaymentStatus::Pending).await;
    backdate(&db, "pi_lost_webhook").await;
    backdate(&db, "pi_gateway_down").await;

    let api = ledger(&db);
    let write = LedgerWrite::PaymentStatus { external_ref: ExternalRef::from("pi_journaled"), status: PaymentStatus::Canceled };
    api.record_pending_write(&write, "database is locked").await.unwrap();

    let mut gateway = MockStripe::new();
    gateway
        .expect_get_payment_intent()
        .with(eq("pi_lost_webhook"))
        .times(1)
        .returning(|id| Ok(intent(id, 1000, PaymentIntentStatus::Succeeded)));
    gateway
        .expect_get_payment_intent()
        .with(eq("pi_gateway_down"))
        .times(1)
        .returning(|_| Err(StripeApiError::Timeout("no response after 10s".into())));

    run_reconciliation_pass(&api, &gateway, chrono::Duration::hours(1)).await;

    assert_eq!(payment_status(&db, "pi_lost_webhook").await, PaymentStatus::Succeeded);
    assert_eq!(payment_status(&db, "pi_gateway_down").await, PaymentStatus::Pending);
    assert_eq!(payment_status(&db, "pi_journaled").await, PaymentStatus::Canceled);
    let summary = api.replay_pending_writes(10).await.unwrap();
    assert_eq!(summary, ReplaySummary::default(), "the journal entry should have been resolved");
    // Both polled payments were stamped, including the one the gateway did not answer for
    assert!(api.payment(&"pi_gateway_down".into()).await.unwrap().polled_at.is_some());
    assert!(api.payment(&"pi_journaled".into()).await.unwrap().polled_at.is_none());
    tear_down(db).await;
}

#[actix_web::test]
async fn payments_that_stay_pending_do_not_starve_the_rest() {
    let db = test_db().await;
    let abandoned = (0..BATCH_SIZE).map(|i| format!("pi_abandoned_{i:02}")).collect::<Vec<_>>();
    for payment_ref in &abandoned {
        seed_payment(&db, payment_ref, 500, PaymentStatus::Pending).await;
        backdate(&db, payment_ref).await;
    }
    seed_payment(&db, "pi_lost", 1000, PaymentStatus::Pending).await;
    backdate_by(&db, "pi_lost", "-90 minutes").await;

    let mut gateway = MockStripe::new();
    gateway
        .expect_get_payment_intent()
        .withf(|id: &str| id.starts_with("pi_abandoned_"))
        .times(BATCH_SIZE as usize)
        .returning(|id| Ok(intent(id, 500, PaymentIntentStatus::RequiresPaymentMethod)));
    gateway
        .expect_get_payment_intent()
        .with(eq("pi_lost"))
        .times(1)
        .returning(|id| Ok(intent(id, 1000, PaymentIntentStatus::Succeeded)));
    let api = ledger(&db);

    // The first pass is filled by the older payments, which the gateway still reports as unpaid
    run_reconciliation_pass(&api, &gateway, chrono::Duration::hours(1)).await;
    assert_eq!(payment_status(&db, "pi_lost").await, PaymentStatus::Pending);
    assert_eq!(payment_status(&db, &abandoned[0]).await, PaymentStatus::Pending);

    // They were just polled, so the next pass gets to the newer one
    run_reconciliation_pass(&api, &gateway, chrono::Duration::hours(1)).await;
    assert_eq!(payment_status(&db, "pi_lost").await, PaymentStatus::Succeeded);
    tear_down(db).await;
}
