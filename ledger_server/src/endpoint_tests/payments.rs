use actix_web::{http::StatusCode, test, test::TestRequest, App};
use ledger_common::MinorUnits;
use ledger_engine::{
    db_types::{ExternalRef, PaymentStatus},
    ReplaySummary,
    WriteJournal,
};
use mockall::predicate::eq;
use serde_json::{json, Value};
use stripe_tools::{PaymentIntentStatus, StripeApiError};

use super::{
    helpers::{configure, customer, intent, ledger, payment_status, seed_payment, tear_down, test_db},
    mocks::MockStripe,
};

#[actix_web::test]
async fn create_payment_records_a_pending_payment() {
    let db = test_db().await;
    let mut gateway = MockStripe::new();
    gateway
        .expect_create_customer()
        .with(eq("alice"), eq("alice@example.com"))
        .times(1)
        .returning(|_, _| Ok(customer("cus_alice")));
    gateway
        .expect_create_payment_intent()
        .withf(|amount, currency, method, customer, _key| {
            *amount == MinorUnits::from(1000) && currency == "usd" && method == "card" && customer.as_deref() == Some("cus_alice")
        })
        .times(1)
        .returning(|_, _, _, _, _| Ok(intent("pi_1", 1000, PaymentIntentStatus::RequiresPaymentMethod)));
    let app = test::init_service(App::new().configure(configure(db.clone(), gateway))).await;

    let req = TestRequest::post()
        .uri("/payment/intent")
        .set_json(json!({
            "name": "alice",
            "email": "alice@example.com",
            "amount": 1000,
            "currency": "USD",
            "payment_method": "card"
        }))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["payment_intent"], "pi_1");
    assert_eq!(body["client_secret"], "pi_1_secret_abc");
    assert_eq!(body["status"], "pending");
    assert_eq!(payment_status(&db, "pi_1").await, PaymentStatus::Pending);

    let req = TestRequest::get().uri("/transactions?name=alice&email=alice@example.com").to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::OK);
    let history: Value = test::read_body_json(res).await;
    let history = history.as_array().expect("an array of transactions");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["kind"], "payment");
    assert_eq!(history[0]["amount"], 1000);
    tear_down(db).await;
}

#[actix_web::test]
async fn invalid_payment_requests_never_reach_the_gateway() {
    let db = test_db().await;
    let mut gateway = MockStripe::new();
    gateway.expect_create_customer().never();
    gateway.expect_create_payment_intent().never();
    let app = test::init_service(App::new().configure(configure(db.clone(), gateway))).await;

    let bodies = [
        json!({"name": "alice", "email": "alice@example.com", "amount": 0, "currency": "usd", "payment_method": "card"}),
        json!({"name": "alice", "email": "alice@example.com", "amount": -10, "currency": "usd", "payment_method": "card"}),
        json!({"name": "alice", "email": "not-an-email", "amount": 100, "currency": "usd", "payment_method": "card"}),
        json!({"name": "alice", "email": "alice@example.com", "amount": 100, "currency": "dollars", "payment_method": "card"}),
        json!({"name": "alice", "email": "alice@example.com", "amount": 100, "currency": "usd", "payment_method": ""}),
        json!({"name": "alice", "email": "alice@example.com", "currency": "usd", "payment_method": "card"}),
    ];
    for body in bodies {
        let req = TestRequest::post().uri("/payment/intent").set_json(&body).to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "{body} should be rejected");
        let err: Value = test::read_body_json(res).await;
        assert_eq!(err["code"], "validation_error");
    }
    tear_down(db).await;
}

#[actix_web::test]
async fn gateway_timeout_fails_closed() {
    let db = test_db().await;
    let mut gateway = MockStripe::new();
    gateway.expect_create_customer().returning(|_, _| Ok(customer("cus_alice")));
    gateway
        .expect_create_payment_intent()
        .returning(|_, _, _, _, _| Err(StripeApiError::Timeout("operation timed out".into())));
    let app = test::init_service(App::new().configure(configure(db.clone(), gateway))).await;

    let req = TestRequest::post()
        .uri("/payment/intent")
        .set_json(json!({"name": "alice", "email": "alice@example.com", "amount": 500, "currency": "usd", "payment_method": "card"}))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);
    let err: Value = test::read_body_json(res).await;
    assert_eq!(err["code"], "gateway_timeout");

    let req = TestRequest::get().uri("/transactions?name=alice&email=alice@example.com").to_request();
    let history: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(history, json!([]));
    tear_down(db).await;
}

#[actix_web::test]
async fn cancel_pending_payment() {
    let db = test_db().await;
    seed_payment(&db, "pi_1", 1000, PaymentStatus::Pending).await;
    let mut gateway = MockStripe::new();
    gateway
        .expect_cancel_payment_intent()
        .with(eq("pi_1"))
        .times(1)
        .returning(|id| Ok(intent(id, 1000, PaymentIntentStatus::Canceled)));
    let app = test::init_service(App::new().configure(configure(db.clone(), gateway))).await;

    let req = TestRequest::post().uri("/payment/cancel").set_json(json!({"paymentIntentID": "pi_1"})).to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["payment_intent"], "pi_1");
    assert_eq!(body["status"], "canceled");
    assert_eq!(payment_status(&db, "pi_1").await, PaymentStatus::Canceled);

    // The payment is terminal now, so the gateway is not asked again
    let req = TestRequest::post().uri("/payment/cancel").set_json(json!({"payment_intent_id": "pi_1"})).to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["status"], "canceled");
    tear_down(db).await;
}

#[actix_web::test]
async fn cancel_settled_payment_reports_the_settled_status() {
    let db = test_db().await;
    seed_payment(&db, "pi_1", 1000, PaymentStatus::Succeeded).await;
    let mut gateway = MockStripe::new();
    gateway.expect_cancel_payment_intent().never();
    let app = test::init_service(App::new().configure(configure(db.clone(), gateway))).await;

    let req = TestRequest::post().uri("/payment/cancel").set_json(json!({"paymentIntentID": "pi_1"})).to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "succeeded");
    assert_eq!(payment_status(&db, "pi_1").await, PaymentStatus::Succeeded);
    tear_down(db).await;
}

#[actix_web::test]
async fn cancel_reports_what_the_gateway_returned() {
    let db = test_db().await;
    seed_payment(&db, "pi_settled", 1000, PaymentStatus::Pending).await;
    seed_payment(&db, "pi_processing", 1000, PaymentStatus::Pending).await;
    let mut gateway = MockStripe::new();
    gateway
        .expect_cancel_payment_intent()
        .with(eq("pi_settled"))
        .times(1)
        .returning(|id| Ok(intent(id, 1000, PaymentIntentStatus::Succeeded)));
    gateway
        .expect_cancel_payment_intent()
        .with(eq("pi_processing"))
        .times(1)
        .returning(|id| Ok(intent(id, 1000, PaymentIntentStatus::Processing)));
    let app = test::init_service(App::new().configure(configure(db.clone(), gateway))).await;

    // The charge went through before the cancel reached the gateway
    let req = TestRequest::post().uri("/payment/cancel").set_json(json!({"paymentIntentID": "pi_settled"})).to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "succeeded");
    assert_eq!(body["message"], "Payment was succeeded before it could be canceled");
    assert_eq!(payment_status(&db, "pi_settled").await, PaymentStatus::Succeeded);

    let req =
        TestRequest::post().uri("/payment/cancel").set_json(json!({"paymentIntentID": "pi_processing"})).to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "pending");
    assert_eq!(payment_status(&db, "pi_processing").await, PaymentStatus::Pending);
    tear_down(db).await;
}

#[actix_web::test]
async fn ledger_failure_after_the_gateway_acted_is_journaled() {
    let db = test_db().await;
    sqlx::query("CREATE TRIGGER reject_payments BEFORE INSERT ON payments BEGIN SELECT RAISE(ABORT, 'disk full'); END;")
        .execute(db.pool())
        .await
        .unwrap();
    let mut gateway = MockStripe::new();
    gateway.expect_create_customer().times(1).returning(|_, _| Ok(customer("cus_alice")));
    gateway
        .expect_create_payment_intent()
        .times(1)
        .returning(|_, _, _, _, _| Ok(intent("pi_1", 700, PaymentIntentStatus::RequiresPaymentMethod)));
    let app = test::init_service(App::new().configure(configure(db.clone(), gateway))).await;

    let req = TestRequest::post()
        .uri("/payment/intent")
        .set_json(json!({"name": "alice", "email": "alice@example.com", "amount": 700, "currency": "usd", "payment_method": "card"}))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let err: Value = test::read_body_json(res).await;
    assert_eq!(err["code"], "reconciliation_pending");
    assert_eq!(err["external_ref"], "pi_1");

    let api = ledger(&db);
    assert!(api.payment(&ExternalRef::from("pi_1")).await.is_err());
    let journal = db.unresolved_pending_writes(10).await.unwrap();
    assert_eq!(journal.len(), 1);
    assert_eq!(journal[0].kind, "record_payment");
    assert_eq!(journal[0].external_ref, ExternalRef::from("pi_1"));
    assert!(journal[0].last_error.as_deref().unwrap_or_default().contains("disk full"));

    // Once the store recovers, replay writes the payment the gateway already knows about
    sqlx::query("DROP TRIGGER reject_payments").execute(db.pool()).await.unwrap();
    let summary = api.replay_pending_writes(10).await.unwrap();
    assert_eq!(summary, ReplaySummary { resolved: 1, ..Default::default() });
    assert_eq!(payment_status(&db, "pi_1").await, PaymentStatus::Pending);
    let req = TestRequest::get().uri("/transactions?name=alice&email=alice@example.com").to_request();
    let history: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(history.as_array().map(Vec::len), Some(1));
    tear_down(db).await;
}

#[actix_web::test]
async fn cancel_unknown_payment() {
    let db = test_db().await;
    let mut gateway = MockStripe::new();
    gateway.expect_cancel_payment_intent().never();
    let app = test::init_service(App::new().configure(configure(db.clone(), gateway))).await;

    let req = TestRequest::post().uri("/payment/cancel").set_json(json!({"paymentIntentID": "pi_404"})).to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let err: Value = test::read_body_json(res).await;
    assert_eq!(err["code"], "unknown_reference");
    tear_down(db).await;
}

#[actix_web::test]
async fn unknown_identity_has_no_transactions() {
    let db = test_db().await;
    let app = test::init_service(App::new().configure(configure(db.clone(), MockStripe::new()))).await;
    let req = TestRequest::get().uri("/transactions?name=bob&email=bob@example.com").to_request();
    let history: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(history, json!([]));
    tear_down(db).await;
}
