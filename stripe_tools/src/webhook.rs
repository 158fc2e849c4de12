//! Inbound Stripe events
//!
//! Stripe signs every webhook delivery with the endpoint's signing secret. The `Stripe-Signature` header looks like
//! `t=1492774577,v1=5257a869e7...,v1=...`. The signature is the hex-encoded HMAC-SHA256 of `"{t}.{raw body}"`. There
//! can be more than one `v1` entry while a secret is being rolled.
use std::{fmt::Display, str::FromStr};

use hmac::{Hmac, Mac};
use log::*;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;

use crate::{SignatureError, WebhookError};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// The event types the ledger reacts to. Anything else is kept verbatim in [`EventKind::Unrecognized`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    PaymentIntentSucceeded,
    PaymentIntentFailed,
    PaymentIntentCanceled,
    PaymentIntentProcessing,
    RefundUpdated,
    ChargeRefundUpdated,
    RefundFailed,
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionDeleted,
    Unrecognized(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::PaymentIntentSucceeded => "payment_intent.succeeded",
            EventKind::PaymentIntentFailed => "payment_intent.payment_failed",
            EventKind::PaymentIntentCanceled => "payment_intent.canceled",
            EventKind::PaymentIntentProcessing => "payment_intent.processing",
            EventKind::RefundUpdated => "refund.updated",
            EventKind::ChargeRefundUpdated => "charge.refund.updated",
            EventKind::RefundFailed => "refund.failed",
            EventKind::SubscriptionCreated => "customer.subscription.created",
            EventKind::SubscriptionUpdated => "customer.subscription.updated",
            EventKind::SubscriptionDeleted => "customer.subscription.deleted",
            EventKind::Unrecognized(s) => s.as_str(),
        }
    }
}

impl From<String> for EventKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "payment_intent.succeeded" => EventKind::PaymentIntentSucceeded,
            "payment_intent.payment_failed" => EventKind::PaymentIntentFailed,
            "payment_intent.canceled" => EventKind::PaymentIntentCanceled,
            "payment_intent.processing" => EventKind::PaymentIntentProcessing,
            "refund.updated" => EventKind::RefundUpdated,
            "charge.refund.updated" => EventKind::ChargeRefundUpdated,
            "refund.failed" => EventKind::RefundFailed,
            "customer.subscription.created" => EventKind::SubscriptionCreated,
            "customer.subscription.updated" => EventKind::SubscriptionUpdated,
            "customer.subscription.deleted" => EventKind::SubscriptionDeleted,
            _ => EventKind::Unrecognized(s),
        }
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().to_string()
    }
}

impl FromStr for EventKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(EventKind::from(s.to_string()))
    }
}

impl Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    pub object: Value,
}

/// A verified Stripe event envelope. The payload object is kept as raw JSON until the kind is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub created: i64,
    pub data: EventData,
}

impl GatewayEvent {
    /// Deserializes the event's object as `T`.
    pub fn object<T: DeserializeOwned>(&self) -> Result<T, WebhookError> {
        serde_json::from_value(self.data.object.clone())
            .map_err(|e| WebhookError::Malformed(format!("{} object in event {}: {e}", self.kind, self.id)))
    }
}

/// Verifies the signature header against the raw payload, and parses the event if it is genuine.
pub fn verify_event(
    payload: &[u8],
    signature_header: &str,
    secret: &str,
    tolerance_secs: i64,
) -> Result<GatewayEvent, WebhookError> {
    verify_signature(payload, signature_header, secret, tolerance_secs)?;
    parse_event(payload)
}

pub fn parse_event(payload: &[u8]) -> Result<GatewayEvent, WebhookError> {
    serde_json::from_slice(payload).map_err(|e| WebhookError::Malformed(e.to_string()))
}

pub fn verify_signature(
    payload: &[u8],
    signature_header: &str,
    secret: &str,
    tolerance_secs: i64,
) -> Result<(), SignatureError> {
    verify_signature_at(payload, signature_header, secret, tolerance_secs, chrono::Utc::now().timestamp())
}

/// As [`verify_signature`], with the current time supplied by the caller.
pub fn verify_signature_at(
    payload: &[u8],
    signature_header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in signature_header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", t)) => timestamp = Some(t),
            Some(("v1", sig)) => signatures.push(sig),
            _ => {},
        }
    }
    let timestamp = timestamp.ok_or(SignatureError::MissingTimestamp)?;
    let signed_at = timestamp.parse::<i64>().map_err(|_| SignatureError::InvalidTimestamp)?;
    if signatures.is_empty() {
        return Err(SignatureError::MissingSignature);
    }
    let mac = signing_mac(payload, timestamp, secret)?;
    // verify_slice does a constant-time comparison
    let matched = signatures
        .iter()
        .filter_map(|sig| hex::decode(sig).ok())
        .any(|sig| mac.clone().verify_slice(&sig).is_ok());
    if !matched {
        debug!("🪝️ None of the {} signature(s) match the payload", signatures.len());
        return Err(SignatureError::Mismatch);
    }
    let age = now - signed_at;
    if age.abs() > tolerance_secs {
        debug!("🪝️ Event signature is {age}s old");
        return Err(SignatureError::Expired { age });
    }
    Ok(())
}

/// Produces a `Stripe-Signature` header value for `payload`, as Stripe would.
pub fn signature_header(payload: &[u8], secret: &str, timestamp: i64) -> Result<String, SignatureError> {
    let mac = signing_mac(payload, &timestamp.to_string(), secret)?;
    Ok(format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes())))
}

fn signing_mac(payload: &[u8], timestamp: &str, secret: &str) -> Result<HmacSha256, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidSecret)?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}
