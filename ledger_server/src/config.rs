use std::{env, time::Duration};

use ledger_common::helpers::parse_boolean_flag;
use log::*;

const DEFAULT_LEDGER_HOST: &str = "127.0.0.1";
const DEFAULT_LEDGER_PORT: u16 = 3000;
const DEFAULT_DATABASE_URL: &str = "sqlite://data/ledger.db";
const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_STALE_PAYMENT_AGE: Duration = Duration::from_secs(3600);

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// How often the reconciliation worker replays the pending-write journal and polls the gateway for stale
    /// payments.
    pub reconcile_interval: Duration,
    /// A payment that has been pending for longer than this is polled at the gateway by the reconciliation worker.
    pub stale_payment_age: Duration,
    /// When false, the server does not start the reconciliation worker. Useful when several instances share a
    /// database and only one of them should poll the gateway.
    pub reconcile_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_LEDGER_HOST.to_string(),
            port: DEFAULT_LEDGER_PORT,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
            stale_payment_age: DEFAULT_STALE_PAYMENT_AGE,
            reconcile_enabled: true,
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("LEDGER_HOST").ok().unwrap_or_else(|| DEFAULT_LEDGER_HOST.into());
        let port = env::var("LEDGER_PORT")
            .map(|s| {
                s.parse::<u16>().unwrap_or_else(|e| {
                    error!(
                        "🪛️ {s} is not a valid port for LEDGER_PORT. {e} Using the default, {DEFAULT_LEDGER_PORT}, \
                         instead."
                    );
                    DEFAULT_LEDGER_PORT
                })
            })
            .ok()
            .unwrap_or(DEFAULT_LEDGER_PORT);
        let database_url = env::var("LEDGER_DATABASE_URL").ok().unwrap_or_else(|| {
            warn!("🪛️ LEDGER_DATABASE_URL is not set. Using the default, {DEFAULT_DATABASE_URL}.");
            DEFAULT_DATABASE_URL.to_string()
        });
        let reconcile_interval = duration_from_env("LEDGER_RECONCILE_INTERVAL_SECS", DEFAULT_RECONCILE_INTERVAL);
        let stale_payment_age = duration_from_env("LEDGER_STALE_PAYMENT_SECS", DEFAULT_STALE_PAYMENT_AGE);
        let reconcile_enabled = parse_boolean_flag(env::var("LEDGER_RECONCILE_ENABLED").ok(), true);
        Self { host, port, database_url, reconcile_interval, stale_payment_age, reconcile_enabled }
    }
}

fn duration_from_env(key: &str, default: Duration) -> Duration {
    env::var(key)
        .map_err(|_| info!("🪛️ {key} is not set. Using the default value of {}s.", default.as_secs()))
        .and_then(|s| match s.parse::<u64>() {
            Ok(0) => {
                warn!("🪛️ {key} must be greater than zero. Using the default value of {}s.", default.as_secs());
                Err(())
            },
            Ok(secs) => Ok(Duration::from_secs(secs)),
            Err(e) => {
                warn!("🪛️ Invalid configuration value for {key}. {e}");
                Err(())
            },
        })
        .ok()
        .unwrap_or(default)
}
