use actix_web::{http::StatusCode, test, test::TestRequest, App};
use ledger_common::MinorUnits;
use ledger_engine::db_types::{ExternalRef, PaymentStatus, RefundStatus};
use serde_json::{json, Value};

use super::{
    helpers::{configure, event_payload, ledger, payment_status, seed_payment, signed_webhook, tear_down, test_db},
    mocks::MockStripe,
};

fn payment_intent_object(id: &str, status: &str) -> Value {
    json!({"id": id, "object": "payment_intent", "amount": 1000, "currency": "usd", "status": status})
}

async fn transaction_count(db: &ledger_engine::SqliteDatabase) -> usize {
    ledger(db).transactions_for_identity("alice", "alice@example.com").await.unwrap().len()
}

#[actix_web::test]
async fn succeeded_event_is_applied_once() {
    let db = test_db().await;
    seed_payment(&db, "pi_1", 1000, PaymentStatus::Pending).await;
    let app = test::init_service(App::new().configure(configure(db.clone(), MockStripe::new()))).await;

    let payload =
        event_payload("evt_1", "payment_intent.succeeded", payment_intent_object("pi_1", "succeeded"));
    for _ in 0..2 {
        let res = test::call_service(&app, signed_webhook(&payload).to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = test::read_body_json(res).await;
        assert_eq!(body["success"], true);
        assert_eq!(payment_status(&db, "pi_1").await, PaymentStatus::Succeeded);
    }
    assert_eq!(transaction_count(&db).await, 1);
    tear_down(db).await;
}

#[actix_web::test]
async fn stale_events_do_not_undo_a_terminal_status() {
    let db = test_db().await;
    seed_payment(&db, "pi_1", 1000, PaymentStatus::Succeeded).await;
    let app = test::init_service(App::new().configure(configure(db.clone(), MockStripe::new()))).await;

    let processing =
        event_payload("evt_1", "payment_intent.processing", payment_intent_object("pi_1", "processing"));
    let canceled = event_payload("evt_2", "payment_intent.canceled", payment_intent_object("pi_1", "canceled"));
    for payload in [processing, canceled] {
        let res = test::call_service(&app, signed_webhook(&payload).to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);
    }
    assert_eq!(payment_status(&db, "pi_1").await, PaymentStatus::Succeeded);
    tear_down(db).await;
}

#[actix_web::test]
async fn forged_events_are_rejected_without_touching_the_ledger() {
    let db = test_db().await;
    seed_payment(&db, "pi_1", 1000, PaymentStatus::Pending).await;
    let app = test::init_service(App::new().configure(configure(db.clone(), MockStripe::new()))).await;

    let payload = event_payload("evt_1", "payment_intent.succeeded", payment_intent_object("pi_1", "succeeded"));
    // Signed, then tampered with
    let tampered = payload.replace("\"amount\":1000", "\"amount\":1");
    assert_ne!(tampered, payload);
    let req = signed_webhook(&payload).set_payload(tampered).to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let err: Value = test::read_body_json(res).await;
    assert_eq!(err["code"], "invalid_signature");

    // Not signed at all
    let req = TestRequest::post().uri("/payment/webhook").set_payload(payload.clone()).to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    // Signed with the wrong secret
    let header = stripe_tools::webhook::signature_header(payload.as_bytes(), "whsec_wrong", chrono::Utc::now().timestamp())
        .unwrap();
    let req = TestRequest::post()
        .uri("/payment/webhook")
        .insert_header((stripe_tools::webhook::SIGNATURE_HEADER, header))
        .set_payload(payload)
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    assert_eq!(payment_status(&db, "pi_1").await, PaymentStatus::Pending);
    tear_down(db).await;
}

#[actix_web::test]
async fn events_for_unknown_payments_ask_for_redelivery() {
    let db = test_db().await;
    let app = test::init_service(App::new().configure(configure(db.clone(), MockStripe::new()))).await;
    let payload = event_payload("evt_1", "payment_intent.succeeded", payment_intent_object("pi_later", "succeeded"));
    let res = test::call_service(&app, signed_webhook(&payload).to_request()).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let err: Value = test::read_body_json(res).await;
    assert_eq!(err["code"], "unknown_reference");
    tear_down(db).await;
}

#[actix_web::test]
async fn unrecognised_events_are_acknowledged() {
    let db = test_db().await;
    let app = test::init_service(App::new().configure(configure(db.clone(), MockStripe::new()))).await;
    let payload = event_payload("evt_1", "invoice.paid", json!({"id": "in_1"}));
    let res = test::call_service(&app, signed_webhook(&payload).to_request()).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["success"], true);
    tear_down(db).await;
}

#[actix_web::test]
async fn malformed_event_objects_are_rejected() {
    let db = test_db().await;
    let app = test::init_service(App::new().configure(configure(db.clone(), MockStripe::new()))).await;
    let payload = event_payload("evt_1", "payment_intent.succeeded", json!({"id": "pi_1"}));
    let res = test::call_service(&app, signed_webhook(&payload).to_request()).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let err: Value = test::read_body_json(res).await;
    assert_eq!(err["code"], "malformed_event");

    let res = test::call_service(&app, signed_webhook("not json").to_request()).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    tear_down(db).await;
}

#[actix_web::test]
async fn refund_events_record_refunds_made_elsewhere() {
    let db = test_db().await;
    seed_payment(&db, "pi_1", 1000, PaymentStatus::Succeeded).await;
    let app = test::init_service(App::new().configure(configure(db.clone(), MockStripe::new()))).await;

    let refund = json!({"id": "re_9", "object": "refund", "amount": 300, "currency": "usd", "payment_intent": "pi_1", "status": "succeeded"});
    let payload = event_payload("evt_1", "refund.updated", refund);
    for _ in 0..2 {
        let res = test::call_service(&app, signed_webhook(&payload).to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);
    }
    let api = ledger(&db);
    let refund = api.refund(&ExternalRef::from("re_9")).await.unwrap();
    assert_eq!(refund.status, RefundStatus::Refunded);
    assert_eq!(refund.amount, MinorUnits::from(300));
    assert_eq!(transaction_count(&db).await, 2);

    // A refund event with no payment to attach it to is re-delivered later
    let orphan = json!({"id": "re_10", "object": "refund", "amount": 300, "status": "succeeded"});
    let payload = event_payload("evt_2", "refund.updated", orphan);
    let res = test::call_service(&app, signed_webhook(&payload).to_request()).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    tear_down(db).await;
}
