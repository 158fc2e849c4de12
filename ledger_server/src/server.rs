use std::time::Duration;

use actix_web::{dev::Server, error::JsonPayloadError, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use ledger_engine::{events::EventProducers, ReconciliationApi, SqliteDatabase};
use log::*;
use stripe_tools::{StripeApi, StripeConfig};

use crate::{
    config::ServerConfig,
    errors::ServerError,
    event_hooks::create_audit_event_handlers,
    ingestor::EventIngestor,
    orchestrator::RequestOrchestrator,
    reconciliation_worker::start_reconciliation_worker,
    routes::{
        health,
        CancelPaymentRoute,
        CancelSubscriptionRoute,
        CreateSubscriptionRoute,
        PaymentIntentRoute,
        RefundRoute,
        TransactionsRoute,
        WebhookRoute,
    },
};

const MAX_DB_CONNECTIONS: u32 = 25;

pub async fn run_server(config: ServerConfig, stripe_config: StripeConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, MAX_DB_CONNECTIONS)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    db.migrate().await.map_err(|e| ServerError::InitializeError(format!("Database migration failed. {e}")))?;
    info!("🚀️ Ledger database ready at {}", config.database_url);
    let gateway = StripeApi::new(stripe_config.clone()).map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let handlers = create_audit_event_handlers();
    let producers = handlers.producers();
    handlers.start_handlers().await;
    if config.reconcile_enabled {
        let worker_api = ReconciliationApi::new(db.clone(), producers.clone());
        let _worker = start_reconciliation_worker(
            worker_api,
            gateway.clone(),
            config.reconcile_interval,
            config.stale_payment_age,
        );
    } else {
        warn!("🚀️ The reconciliation worker is disabled. Pending writes will not be replayed by this instance.");
    }
    let srv = create_server_instance(config, stripe_config, db, gateway, producers)?;
    srv.await.map_err(ServerError::from)
}

pub fn create_server_instance(
    config: ServerConfig,
    stripe_config: StripeConfig,
    db: SqliteDatabase,
    gateway: StripeApi,
    producers: EventProducers,
) -> Result<Server, ServerError> {
    let srv = HttpServer::new(move || {
        let orchestrator =
            RequestOrchestrator::new(ReconciliationApi::new(db.clone(), producers.clone()), gateway.clone());
        let ingestor = EventIngestor::new(ReconciliationApi::new(db.clone(), producers.clone()), &stripe_config);
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("ledger::access_log"))
            .app_data(json_config())
            .app_data(web::Data::new(orchestrator))
            .app_data(web::Data::new(ingestor))
            .service(health)
            .service(PaymentIntentRoute::<SqliteDatabase, StripeApi>::new())
            .service(RefundRoute::<SqliteDatabase, StripeApi>::new())
            .service(CancelPaymentRoute::<SqliteDatabase, StripeApi>::new())
            .service(WebhookRoute::<SqliteDatabase>::new())
            .service(CreateSubscriptionRoute::<SqliteDatabase, StripeApi>::new())
            .service(CancelSubscriptionRoute::<SqliteDatabase, StripeApi>::new())
            .service(TransactionsRoute::<SqliteDatabase, StripeApi>::new())
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((config.host.as_str(), config.port))?
    .run();
    Ok(srv)
}

/// Malformed JSON bodies are reported as validation errors, with the same JSON error body as every other error.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err: JsonPayloadError, _req| {
        debug!("💻️ Rejecting request body. {err}");
        ServerError::ValidationError(err.to_string()).into()
    })
}
