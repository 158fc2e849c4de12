//! Stripe webhook ingestion
//!
//! Events are verified against the endpoint's signing secret before anything else happens. A genuine event is turned
//! into a status proposal for the ledger. Stripe delivers at least once and in no particular order, so the same event
//! can arrive twice, and a `pending` report can arrive after the `succeeded` one. The reconciliation engine makes both
//! harmless.
//!
//! The response tells Stripe whether to try again:
//! * 2xx: done. This includes events the ledger ignores, and events that conflict with the ledger (a retry would
//!   conflict just the same).
//! * 404: the event refers to something the ledger has not recorded yet. A re-delivery will probably succeed.
//! * 5xx: the ledger could not be written. Try again.
use std::fmt::Display;

use ledger_common::Secret;
use ledger_engine::{
    db_types::{ExternalRef, PaymentStatus, RefundStatus, SubscriptionStatus, UpdateSource},
    traits::LedgerStore,
    ReconciliationApi,
    ReconciliationError,
};
use log::*;
use stripe_tools::{webhook::verify_event, EventKind, GatewayEvent, PaymentIntent, Refund, StripeConfig, Subscription};

use crate::{
    data_objects::JsonResponse,
    errors::ServerError,
    helpers::{refund_status_for, subscription_status_for},
};

/// What became of a verified event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The event was applied to the ledger, or was already reflected in it.
    Applied(String),
    /// The event is of no interest to the ledger.
    Ignored(String),
    /// The event contradicts the ledger and was discarded.
    Conflict(String),
}

impl From<IngestOutcome> for JsonResponse {
    fn from(outcome: IngestOutcome) -> Self {
        match outcome {
            IngestOutcome::Applied(msg) | IngestOutcome::Ignored(msg) => JsonResponse::success(msg),
            IngestOutcome::Conflict(msg) => JsonResponse::failure(msg),
        }
    }
}

pub struct EventIngestor<B> {
    api: ReconciliationApi<B>,
    webhook_secret: Secret<String>,
    tolerance_secs: i64,
}

impl<B> EventIngestor<B> {
    pub fn new(api: ReconciliationApi<B>, config: &StripeConfig) -> Self {
        Self { api, webhook_secret: config.webhook_secret.clone(), tolerance_secs: config.signature_tolerance_secs }
    }
}

impl<B: LedgerStore> EventIngestor<B> {
    /// Verifies and applies one webhook delivery. `payload` must be the raw request body, byte for byte.
    pub async fn ingest(&self, payload: &[u8], signature: Option<&str>) -> Result<IngestOutcome, ServerError> {
        let signature = signature
            .ok_or_else(|| ServerError::InvalidSignature("The Stripe-Signature header is missing".to_string()))?;
        let event = verify_event(payload, signature, self.webhook_secret.reveal(), self.tolerance_secs).map_err(|e| {
            warn!("🪝️ Rejecting webhook delivery: {e}");
            ServerError::from(e)
        })?;
        info!("🪝️ Received {} event {}", event.kind, event.id);
        self.dispatch(&event).await
    }

    async fn dispatch(&self, event: &GatewayEvent) -> Result<IngestOutcome, ServerError> {
        let result = match &event.kind {
            EventKind::PaymentIntentSucceeded => self.on_payment(event, PaymentStatus::Succeeded).await?,
            EventKind::PaymentIntentFailed => self.on_payment(event, PaymentStatus::Failed).await?,
            EventKind::PaymentIntentCanceled => self.on_payment(event, PaymentStatus::Canceled).await?,
            EventKind::PaymentIntentProcessing => self.on_payment(event, PaymentStatus::Pending).await?,
            EventKind::RefundUpdated | EventKind::ChargeRefundUpdated | EventKind::RefundFailed => {
                self.on_refund(event).await?
            },
            EventKind::SubscriptionCreated | EventKind::SubscriptionUpdated | EventKind::SubscriptionDeleted => {
                self.on_subscription(event).await?
            },
            EventKind::Unrecognized(kind) => {
                debug!("🪝️ Ignoring {kind} event {}", event.id);
                return Ok(IngestOutcome::Ignored(format!("{kind} events are not handled")));
            },
        };
        settle(&event.id, result)
    }

    async fn on_payment(
        &self,
        event: &GatewayEvent,
        status: PaymentStatus,
    ) -> Result<Result<IngestOutcome, ReconciliationError>, ServerError> {
        let intent: PaymentIntent = event.object()?;
        let payment_ref = ExternalRef::from(intent.id);
        let result = self
            .api
            .apply_payment_status(&payment_ref, status, UpdateSource::Webhook)
            .await
            .map(|change| applied("Payment", &payment_ref, change.status()));
        Ok(result)
    }

    /// Refund events update a refund the ledger already knows. A refund the ledger has not seen (one made from the
    /// Stripe dashboard, or one whose command has not committed yet) is recorded against its payment.
    async fn on_refund(&self, event: &GatewayEvent) -> Result<Result<IngestOutcome, ReconciliationError>, ServerError> {
        let refund: Refund = event.object()?;
        let status = match event.kind {
            EventKind::RefundFailed => RefundStatus::Failed,
            _ => refund_status_for(refund.status),
        };
        let refund_ref = ExternalRef::from(refund.id.as_str());
        let result = match self.api.refund(&refund_ref).await {
            Ok(_) => self
                .api
                .apply_refund_status(&refund_ref, status, UpdateSource::Webhook)
                .await
                .map(|change| applied("Refund", &refund_ref, change.status())),
            Err(ReconciliationError::UnknownReference { .. }) => match refund.payment_intent.as_deref() {
                Some(payment_ref) => {
                    debug!("🪝️ Refund {refund_ref} is new to the ledger. Recording it against {payment_ref}.");
                    let payment_ref = ExternalRef::from(payment_ref);
                    self.api
                        .record_refund(&payment_ref, refund_ref.clone(), refund.amount, status, UpdateSource::Webhook)
                        .await
                        .map(|r| applied("Refund", &refund_ref, r.status))
                },
                None => Err(ReconciliationError::unknown("refund", &refund_ref)),
            },
            Err(e) => Err(e),
        };
        Ok(result)
    }

    /// Subscriptions are created by the subscription command, in the status Stripe reports at the time. A `created`
    /// event for a subscription the ledger has not stored yet carries nothing the command will not write, so it is
    /// acknowledged without a retry.
    async fn on_subscription(
        &self,
        event: &GatewayEvent,
    ) -> Result<Result<IngestOutcome, ReconciliationError>, ServerError> {
        let subscription: Subscription = event.object()?;
        let sub_ref = ExternalRef::from(subscription.id.as_str());
        let status = match event.kind {
            EventKind::SubscriptionDeleted => SubscriptionStatus::Canceled,
            _ => match subscription_status_for(subscription.status) {
                Some(status) => status,
                None => {
                    let msg = format!("Subscription {sub_ref} has unrecognised status {}", subscription.status);
                    warn!("🪝️ {msg}");
                    return Ok(Ok(IngestOutcome::Ignored(msg)));
                },
            },
        };
        let result = match self.api.apply_subscription_status(&sub_ref, status, UpdateSource::Webhook).await {
            Ok(change) => Ok(applied("Subscription", &sub_ref, change.status())),
            Err(ReconciliationError::UnknownReference { .. }) if event.kind == EventKind::SubscriptionCreated => {
                debug!("🪝️ Subscription {sub_ref} is not stored yet. Leaving it to the subscription command.");
                Ok(IngestOutcome::Ignored(format!("Subscription {sub_ref} is not known yet")))
            },
            Err(e) => Err(e),
        };
        Ok(result)
    }
}

fn applied<S: Display>(entity: &str, external_ref: &ExternalRef, status: S) -> IngestOutcome {
    IngestOutcome::Applied(format!("{entity} {external_ref} is {status}"))
}

fn settle(event_id: &str, result: Result<IngestOutcome, ReconciliationError>) -> Result<IngestOutcome, ServerError> {
    match result {
        Ok(outcome) => Ok(outcome),
        Err(e @ ReconciliationError::IllegalTransition { .. }) => {
            warn!("🪝️ Event {event_id} conflicts with the ledger and is discarded. {e}");
            Ok(IngestOutcome::Conflict(e.to_string()))
        },
        Err(e @ ReconciliationError::UnknownReference { .. }) => {
            info!("🪝️ Event {event_id} cannot be applied yet. {e}. Stripe will re-deliver it.");
            Err(e.into())
        },
        Err(e) => {
            error!("🪝️ Event {event_id} could not be written to the ledger. {e}");
            Err(e.into())
        },
    }
}
