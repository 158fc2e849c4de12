use std::time::Duration;

use ledger_common::Secret;
use log::*;

use crate::StripeApiError;

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com/v1";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Stripe's own libraries reject events signed more than five minutes ago.
pub const DEFAULT_SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub api_base: String,
    pub secret_key: Secret<String>,
    pub webhook_secret: Secret<String>,
    /// Upper bound on every request to Stripe, including connection setup.
    pub timeout: Duration,
    pub signature_tolerance_secs: i64,
}

impl StripeConfig {
    pub fn new<S: Into<String>>(secret_key: S, webhook_secret: S) -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            secret_key: Secret::new(secret_key.into()),
            webhook_secret: Secret::new(webhook_secret.into()),
            timeout: DEFAULT_TIMEOUT,
            signature_tolerance_secs: DEFAULT_SIGNATURE_TOLERANCE_SECS,
        }
    }

    /// Reads the Stripe configuration from the environment.
    ///
    /// `STRIPE_SECRET_KEY` and `STRIPE_WEBHOOK_SECRET` are required. Without the webhook secret there is no way to
    /// tell genuine events from forged ones, so there is no default for either.
    pub fn try_from_env() -> Result<Self, StripeApiError> {
        let secret_key = required_var("STRIPE_SECRET_KEY")?;
        let webhook_secret = required_var("STRIPE_WEBHOOK_SECRET")?;
        let mut config = Self::new(secret_key, webhook_secret);
        if let Ok(base) = std::env::var("STRIPE_API_BASE") {
            info!("🪛️ Using Stripe API at {base}");
            config.api_base = base.trim_end_matches('/').to_string();
        }
        config.timeout = std::env::var("STRIPE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| match s.parse::<u64>() {
                Ok(secs) if secs > 0 => Some(Duration::from_secs(secs)),
                _ => {
                    warn!("🪛️ Invalid STRIPE_TIMEOUT_SECS ({s}). Using the default of {}s", DEFAULT_TIMEOUT.as_secs());
                    None
                },
            })
            .unwrap_or(DEFAULT_TIMEOUT);
        config.signature_tolerance_secs = std::env::var("STRIPE_SIGNATURE_TOLERANCE_SECS")
            .ok()
            .and_then(|s| match s.parse::<i64>() {
                Ok(secs) if secs > 0 => Some(secs),
                _ => {
                    warn!(
                        "🪛️ Invalid STRIPE_SIGNATURE_TOLERANCE_SECS ({s}). Using the default of \
                         {DEFAULT_SIGNATURE_TOLERANCE_SECS}s"
                    );
                    None
                },
            })
            .unwrap_or(DEFAULT_SIGNATURE_TOLERANCE_SECS);
        Ok(config)
    }
}

fn required_var(name: &str) -> Result<String, StripeApiError> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => {
            error!("🪛️ {name} is not set. The server cannot talk to Stripe without it.");
            Err(StripeApiError::Configuration(format!("{name} is not set")))
        },
    }
}
