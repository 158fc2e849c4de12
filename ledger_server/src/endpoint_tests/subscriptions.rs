use actix_web::{http::StatusCode, test, test::TestRequest, App};
use ledger_engine::db_types::{ExternalRef, PaymentStatus, SubscriptionStatus};
use mockall::predicate::eq;
use serde_json::{json, Value};
use stripe_tools::{Subscription, SubscriptionStatus as GatewaySubStatus};

use super::{
    helpers::{configure, customer, event_payload, ledger, seed_payment, signed_webhook, tear_down, test_db},
    mocks::MockStripe,
};

fn gateway_subscription(id: &str, status: GatewaySubStatus) -> Subscription {
    Subscription { id: id.to_string(), customer: "cus_alice".to_string(), status }
}

fn subscription_request(payment_intent: Option<&str>) -> Value {
    json!({
        "name": "alice",
        "email": "alice@example.com",
        "price_id": "price_gold",
        "amount": 1500,
        "currency": "usd",
        "payment_intent": payment_intent
    })
}

#[actix_web::test]
async fn subscribe_then_cancel() {
    let db = test_db().await;
    seed_payment(&db, "pi_1", 1500, PaymentStatus::Succeeded).await;
    let mut gateway = MockStripe::new();
    gateway.expect_create_customer().never();
    gateway
        .expect_create_subscription()
        .withf(|customer, price, _key| customer == "cus_alice" && price == "price_gold")
        .times(1)
        .returning(|_, _, _| Ok(gateway_subscription("sub_1", GatewaySubStatus::Active)));
    gateway
        .expect_cancel_subscription()
        .with(eq("sub_1"))
        .times(1)
        .returning(|id| Ok(gateway_subscription(id, GatewaySubStatus::Canceled)));
    let app = test::init_service(App::new().configure(configure(db.clone(), gateway))).await;

    let req = TestRequest::post().uri("/subscription/create").set_json(subscription_request(Some("pi_1"))).to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["subscription_id"], "sub_1");
    assert_eq!(body["status"], "active");
    let api = ledger(&db);
    let payment = api.payment(&ExternalRef::from("pi_1")).await.unwrap();
    let subscription = api.subscription(&ExternalRef::from("sub_1")).await.unwrap();
    assert_eq!(subscription.payment_id, Some(payment.id));
    assert_eq!(subscription.price_ref, "price_gold");

    for _ in 0..2 {
        let req = TestRequest::post().uri("/subscription/cancel").set_json(json!({"subscription_id": "sub_1"})).to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = test::read_body_json(res).await;
        assert_eq!(body["status"], "canceled");
    }
    let subscription = api.subscription(&ExternalRef::from("sub_1")).await.unwrap();
    assert_eq!(subscription.status, SubscriptionStatus::Canceled);
    tear_down(db).await;
}

#[actix_web::test]
async fn cancel_keeps_the_status_the_gateway_returned() {
    let db = test_db().await;
    let mut gateway = MockStripe::new();
    gateway.expect_create_customer().returning(|_, _| Ok(customer("cus_alice")));
    gateway
        .expect_create_subscription()
        .returning(|_, _, _| Ok(gateway_subscription("sub_1", GatewaySubStatus::Active)));
    // Stripe keeps the subscription active until the end of the billing period
    gateway
        .expect_cancel_subscription()
        .with(eq("sub_1"))
        .times(1)
        .returning(|id| Ok(gateway_subscription(id, GatewaySubStatus::Active)));
    let app = test::init_service(App::new().configure(configure(db.clone(), gateway))).await;
    let req = TestRequest::post().uri("/subscription/create").set_json(subscription_request(None)).to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::OK);

    let req = TestRequest::post().uri("/subscription/cancel").set_json(json!({"subscription_id": "sub_1"})).to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "active");
    assert_eq!(body["message"], "Subscription is active at the gateway");
    let subscription = ledger(&db).subscription(&ExternalRef::from("sub_1")).await.unwrap();
    assert_eq!(subscription.status, SubscriptionStatus::Active);
    assert!(subscription.end_date.is_none());
    tear_down(db).await;
}

#[actix_web::test]
async fn new_subscriber_gets_a_gateway_customer() {
    let db = test_db().await;
    let mut gateway = MockStripe::new();
    gateway.expect_create_customer().times(1).returning(|_, _| Ok(customer("cus_alice")));
    gateway
        .expect_create_subscription()
        .returning(|_, _, _| Ok(gateway_subscription("sub_1", GatewaySubStatus::Incomplete)));
    let app = test::init_service(App::new().configure(configure(db.clone(), gateway))).await;

    let req = TestRequest::post().uri("/subscription/create").set_json(subscription_request(None)).to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "incomplete");
    let user = ledger(&db).find_user("alice", "alice@example.com").await.unwrap().expect("user was created");
    assert_eq!(user.gateway_customer_id, Some(ExternalRef::from("cus_alice")));
    tear_down(db).await;
}

#[actix_web::test]
async fn unknown_references_are_not_found() {
    let db = test_db().await;
    let mut gateway = MockStripe::new();
    gateway.expect_create_subscription().never();
    gateway.expect_cancel_subscription().never();
    let app = test::init_service(App::new().configure(configure(db.clone(), gateway))).await;

    let req =
        TestRequest::post().uri("/subscription/create").set_json(subscription_request(Some("pi_404"))).to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let req = TestRequest::post().uri("/subscription/cancel").set_json(json!({"subscription_id": "sub_404"})).to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let err: Value = test::read_body_json(res).await;
    assert_eq!(err["code"], "unknown_reference");
    tear_down(db).await;
}

#[actix_web::test]
async fn subscription_webhooks_follow_the_lifecycle() {
    let db = test_db().await;
    let mut gateway = MockStripe::new();
    gateway.expect_create_customer().returning(|_, _| Ok(customer("cus_alice")));
    gateway
        .expect_create_subscription()
        .returning(|_, _, _| Ok(gateway_subscription("sub_1", GatewaySubStatus::Active)));
    let app = test::init_service(App::new().configure(configure(db.clone(), gateway))).await;
    let req = TestRequest::post().uri("/subscription/create").set_json(subscription_request(None)).to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::OK);

    let object = |status: &str| json!({"id": "sub_1", "object": "subscription", "customer": "cus_alice", "status": status});
    let past_due = event_payload("evt_1", "customer.subscription.updated", object("past_due"));
    let res = test::call_service(&app, signed_webhook(&past_due).to_request()).await;
    assert_eq!(res.status(), StatusCode::OK);

    // past_due cannot go back to incomplete. Stripe is told not to retry.
    let backwards = event_payload("evt_2", "customer.subscription.updated", object("incomplete"));
    let res = test::call_service(&app, signed_webhook(&backwards).to_request()).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["success"], false);

    let deleted = event_payload("evt_3", "customer.subscription.deleted", object("canceled"));
    let res = test::call_service(&app, signed_webhook(&deleted).to_request()).await;
    assert_eq!(res.status(), StatusCode::OK);
    let subscription = ledger(&db).subscription(&ExternalRef::from("sub_1")).await.unwrap();
    assert_eq!(subscription.status, SubscriptionStatus::Canceled);

    // Created events for subscriptions the ledger has not stored are left to the subscription command
    let early = json!({"id": "sub_2", "object": "subscription", "customer": "cus_alice", "status": "active"});
    let created = event_payload("evt_4", "customer.subscription.created", early);
    let res = test::call_service(&app, signed_webhook(&created).to_request()).await;
    assert_eq!(res.status(), StatusCode::OK);
    tear_down(db).await;
}
