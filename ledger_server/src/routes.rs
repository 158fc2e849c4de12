//! Request handler definitions
//!
//! Handlers stay thin: they unpack the request, log it, and hand over to the [`RequestOrchestrator`] or the
//! [`EventIngestor`]. Anything longer than a few lines belongs in one of those.
//!
//! Every handler is async and must not block its worker thread. Ledger and gateway calls are awaited, so a slow
//! Stripe response only holds up the request that is waiting on it.
use actix_web::{get, web, HttpRequest, HttpResponse, Responder};
use ledger_engine::traits::LedgerStore;
use log::*;
use stripe_tools::{webhook::SIGNATURE_HEADER, PaymentGateway};

use crate::{
    data_objects::{
        CancelPaymentRequest,
        CancelSubscriptionRequest,
        Identity,
        JsonResponse,
        PaymentIntentRequest,
        RefundRequest,
        SubscriptionRequest,
    },
    errors::ServerError,
    ingestor::EventIngestor,
    orchestrator::RequestOrchestrator,
};

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro
#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal impl $($bounds:ty),+) => {
        paste::paste! { pub struct [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ >( $( core::marker::PhantomData<fn() -> [< T $bounds:camel> ] >,)+ );}
        paste::paste! { impl< $( [< T $bounds:camel> ],)+ > [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ > {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self($( core::marker::PhantomData::<fn() -> [< T $bounds:camel> ] >,)+)
            }
        }}
        paste::paste! { impl<$( [< T $bounds:camel >] , )+> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<$([<T $bounds:camel>],)+>
        where
            $([<T $bounds:camel>]: $bounds + 'static,)+
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::< $( [< T $bounds:camel >], )+>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

//----------------------------------------------   Payments  ----------------------------------------------------
route!(payment_intent => Post "/payment/intent" impl LedgerStore, PaymentGateway);
/// Creates a payment intent at the gateway and records the payment as `pending`.
///
/// The response carries the intent's client secret, which the caller's front end needs to confirm the payment.
pub async fn payment_intent<B, G>(
    body: web::Json<PaymentIntentRequest>,
    api: web::Data<RequestOrchestrator<B, G>>,
) -> Result<HttpResponse, ServerError>
where
    B: LedgerStore,
    G: PaymentGateway,
{
    let req = body.into_inner();
    debug!("💻️ POST payment intent for {} {} from {}", req.amount, req.currency, req.email);
    let response = api.create_payment(req).await?;
    Ok(HttpResponse::Ok().json(response))
}

route!(refund => Post "/payment/refund" impl LedgerStore, PaymentGateway);
pub async fn refund<B, G>(
    body: web::Json<RefundRequest>,
    api: web::Data<RequestOrchestrator<B, G>>,
) -> Result<HttpResponse, ServerError>
where
    B: LedgerStore,
    G: PaymentGateway,
{
    let req = body.into_inner();
    debug!("💻️ POST refund for {}", req.payment_intent_id);
    let response = api.refund(req).await?;
    Ok(HttpResponse::Ok().json(response))
}

route!(cancel_payment => Post "/payment/cancel" impl LedgerStore, PaymentGateway);
pub async fn cancel_payment<B, G>(
    body: web::Json<CancelPaymentRequest>,
    api: web::Data<RequestOrchestrator<B, G>>,
) -> Result<HttpResponse, ServerError>
where
    B: LedgerStore,
    G: PaymentGateway,
{
    let req = body.into_inner();
    debug!("💻️ POST cancel payment {}", req.payment_intent_id);
    let response = api.cancel_payment(req).await?;
    Ok(HttpResponse::Ok().json(response))
}

//----------------------------------------------   Webhook  ----------------------------------------------------
route!(webhook => Post "/payment/webhook" impl LedgerStore);
/// Receives Stripe events. The body is taken as raw bytes, since the signature covers the exact payload.
pub async fn webhook<B: LedgerStore>(
    req: HttpRequest,
    body: web::Bytes,
    ingestor: web::Data<EventIngestor<B>>,
) -> Result<HttpResponse, ServerError> {
    trace!("💻️ Received webhook delivery ({} bytes)", body.len());
    let signature = req.headers().get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    let outcome = ingestor.ingest(&body, signature).await?;
    Ok(HttpResponse::Ok().json(JsonResponse::from(outcome)))
}

//----------------------------------------------  Subscriptions  ------------------------------------------------
route!(create_subscription => Post "/subscription/create" impl LedgerStore, PaymentGateway);
pub async fn create_subscription<B, G>(
    body: web::Json<SubscriptionRequest>,
    api: web::Data<RequestOrchestrator<B, G>>,
) -> Result<HttpResponse, ServerError>
where
    B: LedgerStore,
    G: PaymentGateway,
{
    let req = body.into_inner();
    debug!("💻️ POST subscription to {} for {}", req.price_id, req.email);
    let response = api.create_subscription(req).await?;
    Ok(HttpResponse::Ok().json(response))
}

route!(cancel_subscription => Post "/subscription/cancel" impl LedgerStore, PaymentGateway);
pub async fn cancel_subscription<B, G>(
    body: web::Json<CancelSubscriptionRequest>,
    api: web::Data<RequestOrchestrator<B, G>>,
) -> Result<HttpResponse, ServerError>
where
    B: LedgerStore,
    G: PaymentGateway,
{
    let req = body.into_inner();
    debug!("💻️ POST cancel subscription {}", req.subscription_id);
    let response = api.cancel_subscription(req).await?;
    Ok(HttpResponse::Ok().json(response))
}

//----------------------------------------------  Transactions  -------------------------------------------------
route!(transactions => Get "/transactions" impl LedgerStore, PaymentGateway);
/// The transaction history for `?name=..&email=..`, oldest first.
pub async fn transactions<B, G>(
    query: web::Query<Identity>,
    api: web::Data<RequestOrchestrator<B, G>>,
) -> Result<HttpResponse, ServerError>
where
    B: LedgerStore,
    G: PaymentGateway,
{
    let Identity { name, email } = query.into_inner();
    debug!("💻️ GET transactions for {email}");
    let history = api.transactions(&name, &email).await?;
    Ok(HttpResponse::Ok().json(history))
}
