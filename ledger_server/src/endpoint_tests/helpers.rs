use actix_web::{test::TestRequest, web, web::ServiceConfig};
use chrono::Utc;
use ledger_common::MinorUnits;
use ledger_engine::{
    db_types::{ExternalRef, NewPayment, NewUser, PaymentStatus, UpdateSource},
    events::EventProducers,
    test_utils::prepare_env::{prepare_test_env, random_db_path},
    LedgerStore,
    ReconciliationApi,
    SqliteDatabase,
};
use log::error;
use serde_json::{json, Value};
use sqlx::{migrate::MigrateDatabase, Sqlite};
use stripe_tools::{
    webhook::{signature_header, SIGNATURE_HEADER},
    Customer,
    PaymentIntent,
    PaymentIntentStatus,
    StripeConfig,
};

use super::mocks::MockStripe;
use crate::{
    ingestor::EventIngestor,
    orchestrator::RequestOrchestrator,
    routes::{
        CancelPaymentRoute,
        CancelSubscriptionRoute,
        CreateSubscriptionRoute,
        PaymentIntentRoute,
        RefundRoute,
        TransactionsRoute,
        WebhookRoute,
    },
    server::json_config,
};

pub const WEBHOOK_SECRET: &str = "whsec_endpoint_tests";

pub async fn test_db() -> SqliteDatabase {
    let url = random_db_path();
    prepare_test_env(&url).await;
    SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database")
}

pub async fn tear_down(mut db: SqliteDatabase) {
    let url = db.url().to_string();
    if let Err(e) = db.close().await {
        error!("🚀️ Failed to close database: {e}");
    }
    Sqlite::drop_database(&url).await.unwrap();
}

/// A reconciliation API for setting up and inspecting the ledger behind the server.
pub fn ledger(db: &SqliteDatabase) -> ReconciliationApi<SqliteDatabase> {
    ReconciliationApi::new(db.clone(), EventProducers::default())
}

/// Registers every route against a real ledger and the given mock gateway.
pub fn configure(db: SqliteDatabase, gateway: MockStripe) -> impl FnOnce(&mut ServiceConfig) {
    move |cfg: &mut ServiceConfig| {
        let stripe_config = StripeConfig::new("sk_test_endpoint_tests", WEBHOOK_SECRET);
        let orchestrator = RequestOrchestrator::new(ledger(&db), gateway);
        let ingestor = EventIngestor::new(ledger(&db), &stripe_config);
        cfg.app_data(json_config())
            .app_data(web::Data::new(orchestrator))
            .app_data(web::Data::new(ingestor))
            .service(PaymentIntentRoute::<SqliteDatabase, MockStripe>::new())
            .service(RefundRoute::<SqliteDatabase, MockStripe>::new())
            .service(CancelPaymentRoute::<SqliteDatabase, MockStripe>::new())
            .service(WebhookRoute::<SqliteDatabase>::new())
            .service(CreateSubscriptionRoute::<SqliteDatabase, MockStripe>::new())
            .service(CancelSubscriptionRoute::<SqliteDatabase, MockStripe>::new())
            .service(TransactionsRoute::<SqliteDatabase, MockStripe>::new());
    }
}

/// Writes a user and a payment straight to the ledger, and moves the payment to `status`.
pub async fn seed_payment(db: &SqliteDatabase, payment_ref: &str, amount: i64, status: PaymentStatus) -> ExternalRef {
    let api = ledger(db);
    let user = api
        .register_user(NewUser::new("alice", "alice@example.com").with_gateway_customer_id("cus_alice".into()))
        .await
        .unwrap();
    let payment = api.record_payment(NewPayment::new(user.id, payment_ref, MinorUnits::from(amount), "usd")).await.unwrap();
    if status != PaymentStatus::Pending {
        api.apply_payment_status(&payment.external_ref, status, UpdateSource::Webhook).await.unwrap();
    }
    payment.external_ref
}

pub async fn payment_status(db: &SqliteDatabase, payment_ref: &str) -> PaymentStatus {
    db.payment_by_external_ref(&ExternalRef::from(payment_ref)).await.unwrap().expect("payment should exist").status
}

pub fn customer(id: &str) -> Customer {
    Customer { id: id.to_string(), name: None, email: None }
}

pub fn intent(id: &str, amount: i64, status: PaymentIntentStatus) -> PaymentIntent {
    PaymentIntent {
        id: id.to_string(),
        amount: MinorUnits::from(amount),
        currency: "usd".to_string(),
        status,
        client_secret: Some(format!("{id}_secret_abc")),
        customer: Some("cus_alice".to_string()),
    }
}

pub fn event_payload(event_id: &str, kind: &str, object: Value) -> String {
    json!({
        "id": event_id,
        "type": kind,
        "created": Utc::now().timestamp(),
        "data": { "object": object }
    })
    .to_string()
}

/// A webhook delivery signed the way Stripe signs it.
pub fn signed_webhook(payload: &str) -> TestRequest {
    let header = signature_header(payload.as_bytes(), WEBHOOK_SECRET, Utc::now().timestamp()).unwrap();
    TestRequest::post()
        .uri("/payment/webhook")
        .insert_header((SIGNATURE_HEADER, header))
        .set_payload(payload.to_string())
}
