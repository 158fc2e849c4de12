//! Payment commands
//!
//! Every command follows the same shape: validate the request, resolve the caller's user record, call the gateway, and
//! then write the outcome to the ledger through the reconciliation engine. The gateway's answer is only ever a
//! proposal for the ledger state.
//!
//! Once the gateway has acted, a failure to write the ledger cannot simply be reported and forgotten, because the
//! money has already moved. Those writes are journaled, and the caller gets a `reconciliation_pending` error that
//! carries the gateway reference. The reconciliation worker replays the journal until the ledger catches up.
use ledger_engine::{
    db_types::{
        ExternalRef,
        LedgerWrite,
        NewPayment,
        NewSubscription,
        NewUser,
        PaymentStatus,
        RefundStatus,
        SubscriptionStatus,
        Transaction,
        UpdateSource,
        User,
    },
    lifecycle::Lifecycle,
    traits::LedgerStore,
    ReconciliationApi,
    ReconciliationError,
};
use log::*;
use rand::Rng;
use stripe_tools::{PaymentGateway, PaymentIntentStatus};

use crate::{
    data_objects::{
        CancelPaymentRequest,
        CancelPaymentResponse,
        CancelSubscriptionRequest,
        PaymentIntentRequest,
        PaymentIntentResponse,
        RefundRequest,
        RefundResponse,
        SubscriptionRequest,
        SubscriptionResponse,
    },
    errors::ServerError,
    helpers::{
        payment_status_for,
        refund_idempotency_key,
        refund_status_for,
        subscription_status_for,
        validate_amount,
        validate_currency,
        validate_identity,
        validate_reference,
    },
};

pub struct RequestOrchestrator<B, G> {
    api: ReconciliationApi<B>,
    gateway: G,
}

impl<B, G> RequestOrchestrator<B, G> {
    pub fn new(api: ReconciliationApi<B>, gateway: G) -> Self {
        Self { api, gateway }
    }

    pub fn api(&self) -> &ReconciliationApi<B> {
        &self.api
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }
}

impl<B, G> RequestOrchestrator<B, G>
where
    B: LedgerStore,
    G: PaymentGateway,
{
    /// Finds the user for an identity, creating the user (and their gateway customer) on first sight.
    pub async fn resolve_user(&self, name: &str, email: &str) -> Result<User, ServerError> {
        if let Some(user) = self.api.find_user(name, email).await? {
            if user.gateway_customer_id.is_some() {
                return Ok(user);
            }
            debug!("💻️ User #{} has no gateway customer yet", user.id);
            let customer = self.gateway.create_customer(name, email).await?;
            return Ok(self.api.link_gateway_customer(user.id, &ExternalRef::from(customer.id)).await?);
        }
        let customer = self.gateway.create_customer(name, email).await?;
        let user = NewUser::new(name, email).with_gateway_customer_id(ExternalRef::from(customer.id));
        Ok(self.api.register_user(user).await?)
    }

    pub async fn create_payment(&self, req: PaymentIntentRequest) -> Result<PaymentIntentResponse, ServerError> {
        validate_identity(&req.name, &req.email)?;
        validate_amount(req.amount)?;
        let currency = validate_currency(&req.currency)?;
        let method = validate_reference("payment_method", &req.payment_method)?;
        let user = self.resolve_user(&req.name, &req.email).await?;
        let customer = user.gateway_customer_id.as_ref().map(|c| c.to_string());
        let key = format!("pi-{}-{}", user.id, random_suffix());
        let intent = self.gateway.create_payment_intent(req.amount, &currency, method, customer, &key).await?;
        info!("💻️ Payment intent {} created for {} {currency} ({})", intent.id, req.amount, intent.status);

        let payment = NewPayment::new(user.id, intent.id.as_str(), req.amount, &currency).with_method(method);
        let payment = match self.api.record_payment(payment.clone()).await {
            Ok(p) => p,
            Err(e) => return Err(self.journal(LedgerWrite::RecordPayment(payment), e).await),
        };
        let reported = payment_status_for(intent.status);
        let status = if reported == PaymentStatus::Pending {
            payment.status
        } else {
            self.apply_payment_status(&payment.external_ref, reported).await?
        };
        Ok(PaymentIntentResponse {
            message: "Payment intent created".to_string(),
            payment_intent: intent.id,
            client_secret: intent.client_secret,
            status,
        })
    }

    /// Refunds all or part of a payment.
    ///
    /// Everything that can be checked locally is checked before the gateway is called: the payment must be known,
    /// not failed or canceled, and have enough left to refund. The gateway must then confirm that the charge
    /// succeeded.
    pub async fn refund(&self, req: RefundRequest) -> Result<RefundResponse, ServerError> {
        let payment_ref = ExternalRef::from(validate_reference("paymentIntentID", &req.payment_intent_id)?);
        if let Some(amount) = req.amount {
            validate_amount(amount)?;
        }
        let payment = self.api.payment(&payment_ref).await?;
        if matches!(payment.status, PaymentStatus::Failed | PaymentStatus::Canceled) {
            return Err(ServerError::PaymentNotRefundable(format!("Payment {payment_ref} is {}", payment.status)));
        }
        let remaining = self.api.refundable_amount(&payment).await?;
        let amount = req.amount.unwrap_or(remaining);
        if !remaining.is_positive() || amount > remaining {
            return Err(ServerError::RefundExceedsPayment { requested: amount, remaining });
        }

        let intent = self.gateway.get_payment_intent(payment_ref.as_str()).await?;
        if intent.status != PaymentIntentStatus::Succeeded {
            return Err(ServerError::PaymentNotRefundable(format!(
                "The gateway reports payment {payment_ref} as {}",
                intent.status
            )));
        }
        self.api.apply_payment_status(&payment_ref, PaymentStatus::Succeeded, UpdateSource::Command).await?;

        let refund_count = self.api.refunds_for_payment(&payment).await?.len();
        let key = refund_idempotency_key(payment_ref.as_str(), refund_count, amount);
        let gateway_refund = self.gateway.create_refund(payment_ref.as_str(), Some(amount), &key).await?;
        let status = refund_status_for(gateway_refund.status);
        info!("💻️ Refund {} of {amount} on {payment_ref} is {}", gateway_refund.id, gateway_refund.status);

        let refund_ref = ExternalRef::from(gateway_refund.id.as_str());
        let result =
            self.api.record_refund(&payment_ref, refund_ref.clone(), amount, status, UpdateSource::Command).await;
        let refund = match result {
            Ok(r) => r,
            Err(e) => {
                let write = LedgerWrite::RecordRefund { payment_ref, refund_ref, amount, status };
                return Err(self.journal(write, e).await);
            },
        };
        let message = match refund.status {
            RefundStatus::Pending => "Refund submitted. It will be settled by the gateway",
            RefundStatus::Failed => "Refund failed at the gateway",
            RefundStatus::Succeeded | RefundStatus::Refunded => "Refund processed",
        };
        Ok(RefundResponse {
            message: message.to_string(),
            refund_id: gateway_refund.id,
            amount: refund.amount,
            status: refund.status,
        })
    }

    /// Cancels a payment that has not reached a final status yet.
    ///
    /// The status the gateway returns from the cancel call is what gets applied, since the intent may have settled
    /// before the cancel reached it. If a webhook settles the payment while the cancellation is in flight, whichever
    /// status landed first wins and is reported.
    pub async fn cancel_payment(&self, req: CancelPaymentRequest) -> Result<CancelPaymentResponse, ServerError> {
        let payment_ref = ExternalRef::from(validate_reference("paymentIntentID", &req.payment_intent_id)?);
        let payment = self.api.payment(&payment_ref).await?;
        if payment.status.is_terminal() {
            debug!("💻️ Payment {payment_ref} is already {}. Not calling the gateway.", payment.status);
            return Ok(CancelPaymentResponse {
                message: format!("Payment is already {}", payment.status),
                payment_intent: payment_ref.to_string(),
                status: payment.status,
            });
        }
        let intent = self.gateway.cancel_payment_intent(payment_ref.as_str()).await?;
        info!("💻️ Payment intent {} cancel requested at the gateway. It is now {}", intent.id, intent.status);
        let reported = payment_status_for(intent.status);
        if reported == PaymentStatus::Pending {
            return Ok(CancelPaymentResponse {
                message: format!("Cancellation requested. The gateway reports the payment as {}", intent.status),
                payment_intent: payment_ref.to_string(),
                status: payment.status,
            });
        }
        let status = self.apply_payment_status(&payment_ref, reported).await?;
        let message = if status == PaymentStatus::Canceled {
            "Payment canceled".to_string()
        } else {
            format!("Payment was {status} before it could be canceled")
        };
        Ok(CancelPaymentResponse { message, payment_intent: payment_ref.to_string(), status })
    }

    pub async fn create_subscription(&self, req: SubscriptionRequest) -> Result<SubscriptionResponse, ServerError> {
        validate_identity(&req.name, &req.email)?;
        validate_amount(req.amount)?;
        let currency = validate_currency(&req.currency)?;
        let price = validate_reference("price_id", &req.price_id)?;
        let payment_id = match req.payment_intent.as_deref().map(str::trim) {
            Some(r) if !r.is_empty() => Some(self.api.payment(&ExternalRef::from(r)).await?.id),
            _ => None,
        };
        let user = self.resolve_user(&req.name, &req.email).await?;
        let customer = user.gateway_customer_id.as_ref().ok_or_else(|| {
            ServerError::BackendError(format!("User #{} could not be linked to a gateway customer", user.id))
        })?;
        let key = format!("sub-{}-{price}-{}", user.id, random_suffix());
        let gateway_sub = self.gateway.create_subscription(customer.as_str(), price, &key).await?;
        let status = subscription_status_for(gateway_sub.status).unwrap_or_else(|| {
            warn!("💻️ Subscription {} has unknown status {}. Storing it as incomplete.", gateway_sub.id, gateway_sub.status);
            SubscriptionStatus::Incomplete
        });
        let subscription = NewSubscription {
            user_id: user.id,
            payment_id,
            external_ref: ExternalRef::from(gateway_sub.id.as_str()),
            price_ref: price.to_string(),
            amount: req.amount,
            currency,
            status,
        };
        let subscription = match self.api.record_subscription(subscription.clone(), UpdateSource::Command).await {
            Ok(s) => s,
            Err(e) => return Err(self.journal(LedgerWrite::RecordSubscription(subscription), e).await),
        };
        Ok(SubscriptionResponse {
            message: "Subscription created".to_string(),
            subscription_id: gateway_sub.id,
            status: subscription.status,
        })
    }

    pub async fn cancel_subscription(
        &self,
        req: CancelSubscriptionRequest,
    ) -> Result<SubscriptionResponse, ServerError> {
        let sub_ref = ExternalRef::from(validate_reference("subscription_id", &req.subscription_id)?);
        let subscription = self.api.subscription(&sub_ref).await?;
        if subscription.status.is_terminal() {
            return Ok(SubscriptionResponse {
                message: format!("Subscription is already {}", subscription.status),
                subscription_id: sub_ref.to_string(),
                status: subscription.status,
            });
        }
        let gateway_sub = self.gateway.cancel_subscription(sub_ref.as_str()).await?;
        let status = subscription_status_for(gateway_sub.status).unwrap_or_else(|| {
            warn!("💻️ Subscription {sub_ref} has unknown status {} after canceling. Assuming canceled.", gateway_sub.status);
            SubscriptionStatus::Canceled
        });
        let change = match self.api.apply_subscription_status(&sub_ref, status, UpdateSource::Command).await {
            Ok(change) => change,
            Err(e) => {
                let write = LedgerWrite::SubscriptionStatus { external_ref: sub_ref, status };
                return Err(self.journal(write, e).await);
            },
        };
        let status = change.status();
        let message = if status == SubscriptionStatus::Canceled {
            "Subscription canceled".to_string()
        } else {
            format!("Subscription is {status} at the gateway")
        };
        Ok(SubscriptionResponse { message, subscription_id: sub_ref.to_string(), status })
    }

    pub async fn transactions(&self, name: &str, email: &str) -> Result<Vec<Transaction>, ServerError> {
        Ok(self.api.transactions_for_identity(name, email).await?)
    }

    /// Applies a payment status that the gateway has already committed to, journaling it if the ledger write fails.
    async fn apply_payment_status(
        &self,
        external_ref: &ExternalRef,
        status: PaymentStatus,
    ) -> Result<PaymentStatus, ServerError> {
        match self.api.apply_payment_status(external_ref, status, UpdateSource::Command).await {
            Ok(change) => Ok(change.status()),
            Err(e) => {
                let write = LedgerWrite::PaymentStatus { external_ref: external_ref.clone(), status };
                Err(self.journal(write, e).await)
            },
        }
    }

    /// Converts a ledger failure that happened after the gateway acted into a server error, journaling the write
    /// first when the store itself failed.
    async fn journal(&self, write: LedgerWrite, e: ReconciliationError) -> ServerError {
        if !e.is_persistence_failure() {
            return e.into();
        }
        let message = e.to_string();
        if let Err(journal_err) = self.api.record_pending_write(&write, &message).await {
            error!(
                "💻️📒️ Could not journal {} for [{}] either: {journal_err}. Intended write: {write:?}",
                write.kind(),
                write.external_ref()
            );
        }
        ServerError::ReconciliationPending { external_ref: write.external_ref().to_string(), message }
    }
}

fn random_suffix() -> String {
    format!("{:016x}", rand::thread_rng().gen::<u64>())
}
