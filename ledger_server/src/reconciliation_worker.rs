use std::time::Duration;

use actix_web::rt::task::JoinHandle;
use ledger_engine::{db_types::UpdateSource, ReconciliationApi, ReconciliationError, SqliteDatabase};
use log::*;
use stripe_tools::PaymentGateway;

use crate::helpers::payment_status_for;

/// How many journal entries and stale payments are handled in one pass.
pub const BATCH_SIZE: i64 = 50;

/// Starts the reconciliation worker on the current actix runtime. Do not await the returned JoinHandle, as it will run
/// indefinitely.
///
/// On every tick the worker
/// 1. replays journaled ledger writes that failed after the gateway had acted, and
/// 2. asks the gateway about payments that have been pending for longer than `stale_after`, in case a webhook was
///    lost.
pub fn start_reconciliation_worker<G>(
    api: ReconciliationApi<SqliteDatabase>,
    gateway: G,
    interval: Duration,
    stale_after: Duration,
) -> JoinHandle<()>
where
    G: PaymentGateway + 'static,
{
    actix_web::rt::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        let stale_after = chrono::Duration::from_std(stale_after).unwrap_or_else(|e| {
            warn!("🕰️ Stale payment age is out of range ({e}). Using one hour.");
            chrono::Duration::hours(1)
        });
        info!("🕰️ Reconciliation worker started");
        loop {
            timer.tick().await;
            run_reconciliation_pass(&api, &gateway, stale_after).await;
        }
    })
}

pub async fn run_reconciliation_pass<G: PaymentGateway>(
    api: &ReconciliationApi<SqliteDatabase>,
    gateway: &G,
    stale_after: chrono::Duration,
) {
    trace!("🕰️ Running reconciliation pass");
    match api.replay_pending_writes(BATCH_SIZE).await {
        Ok(summary) if summary.resolved + summary.failed + summary.abandoned > 0 => {
            info!(
                "🕰️ Journal replay: {} resolved, {} still pending, {} abandoned",
                summary.resolved, summary.failed, summary.abandoned
            );
        },
        Ok(_) => {},
        Err(e) => error!("🕰️ Error replaying the pending-write journal: {e}"),
    }
    match poll_stale_payments(api, gateway, stale_after).await {
        Ok(0) => {},
        Ok(n) => info!("🕰️ {n} stale payments updated from the gateway"),
        Err(e) => error!("🕰️ Error polling stale payments: {e}"),
    }
}

async fn poll_stale_payments<G: PaymentGateway>(
    api: &ReconciliationApi<SqliteDatabase>,
    gateway: &G,
    stale_after: chrono::Duration,
) -> Result<usize, ReconciliationError> {
    let stale = api.stale_pending_payments(stale_after, BATCH_SIZE).await?;
    let mut updated = 0;
    for payment in stale {
        let result = gateway.get_payment_intent(payment.external_ref.as_str()).await;
        // Stamped whatever the outcome, so the next pass moves on to payments that have waited longer
        if let Err(e) = api.mark_payment_polled(&payment.external_ref).await {
            warn!("🕰️ Could not mark payment {} as polled. {e}", payment.external_ref);
        }
        let intent = match result {
            Ok(intent) => intent,
            Err(e) => {
                warn!("🕰️ Could not fetch payment intent {} from the gateway. {e}", payment.external_ref);
                continue;
            },
        };
        let status = payment_status_for(intent.status);
        match api.apply_payment_status(&payment.external_ref, status, UpdateSource::Poll).await {
            Ok(change) if change.was_applied() => updated += 1,
            Ok(_) => trace!("🕰️ The gateway still reports payment {} as {}", payment.external_ref, intent.status),
            Err(e) => warn!("🕰️ Could not update payment {}. {e}", payment.external_ref),
        }
    }
    Ok(updated)
}
