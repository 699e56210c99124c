//! Gateway configuration: env-var driven, typed, with sensible defaults.
//! Mirrors the shape of the teacher's `Config::from_env` — every setting
//! has a `SATURN_*` env var and a constant default so the gateway boots
//! cleanly in dev with zero configuration.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8900";
const DEFAULT_LOG_FILTER: &str = "info";
const DEFAULT_BTC_USD: f64 = 65_000.0;
const DEFAULT_LIGHTNING_WEBHOOK_SECRET: &str = "dev-lightning-webhook-secret";
const DEFAULT_STRIPE_WEBHOOK_SECRET: &str = "dev-stripe-webhook-secret";
const DEFAULT_SESSION_SIGNING_KEY: &str = "dev-session-signing-key";
const DEFAULT_SESSION_TTL_SECONDS: i64 = 86_400;
const DEFAULT_INVOICE_TTL_SECONDS: i64 = 3_600;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub log_filter: String,
    pub store_dir: Option<PathBuf>,
    pub default_btc_usd: f64,
    pub lightning_webhook_secret: String,
    pub stripe_webhook_secret: String,
    pub session_signing_key: String,
    pub session_ttl_seconds: i64,
    pub invoice_ttl_seconds: i64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid SATURN_BIND_ADDR value '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("invalid SATURN_DEFAULT_BTC_USD value '{value}': {source}")]
    InvalidBtcUsd {
        value: String,
        source: std::num::ParseFloatError,
    },
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr_raw = env_string("SATURN_BIND_ADDR", DEFAULT_BIND_ADDR);
        let bind_addr =
            bind_addr_raw
                .parse()
                .map_err(|source| ConfigError::InvalidBindAddr {
                    value: bind_addr_raw,
                    source,
                })?;

        let log_filter = env_string("SATURN_LOG_FILTER", DEFAULT_LOG_FILTER);

        let store_dir = env::var("SATURN_STORE_DIR")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        let btc_usd_raw = env_string("SATURN_DEFAULT_BTC_USD", &DEFAULT_BTC_USD.to_string());
        let default_btc_usd =
            btc_usd_raw
                .parse()
                .map_err(|source| ConfigError::InvalidBtcUsd {
                    value: btc_usd_raw,
                    source,
                })?;

        let lightning_webhook_secret = env_string(
            "SATURN_LIGHTNING_WEBHOOK_SECRET",
            DEFAULT_LIGHTNING_WEBHOOK_SECRET,
        );
        let stripe_webhook_secret = env_string(
            "SATURN_STRIPE_WEBHOOK_SECRET",
            DEFAULT_STRIPE_WEBHOOK_SECRET,
        );
        let session_signing_key =
            env_string("SATURN_SESSION_SIGNING_KEY", DEFAULT_SESSION_SIGNING_KEY);

        Ok(Self {
            bind_addr,
            log_filter,
            store_dir,
            default_btc_usd,
            lightning_webhook_secret,
            stripe_webhook_secret,
            session_signing_key,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            invoice_ttl_seconds: DEFAULT_INVOICE_TTL_SECONDS,
        })
    }

    /// A config built entirely from defaults, for tests.
    #[must_use]
    pub fn for_tests() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8900)),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            store_dir: None,
            default_btc_usd: DEFAULT_BTC_USD,
            lightning_webhook_secret: DEFAULT_LIGHTNING_WEBHOOK_SECRET.to_string(),
            stripe_webhook_secret: DEFAULT_STRIPE_WEBHOOK_SECRET.to_string(),
            session_signing_key: DEFAULT_SESSION_SIGNING_KEY.to_string(),
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            invoice_ttl_seconds: DEFAULT_INVOICE_TTL_SECONDS,
        }
    }

    fn sub_store_path(&self, name: &str) -> Option<PathBuf> {
        self.store_dir.as_ref().map(|dir| dir.join(name))
    }

    #[must_use]
    pub fn ledger_store_path(&self) -> Option<PathBuf> {
        self.sub_store_path("ledger.json")
    }

    #[must_use]
    pub fn audit_store_path(&self) -> Option<PathBuf> {
        self.sub_store_path("audit.json")
    }

    #[must_use]
    pub fn pricing_store_path(&self) -> Option<PathBuf> {
        self.sub_store_path("pricing.json")
    }

    #[must_use]
    pub fn policy_store_path(&self) -> Option<PathBuf> {
        self.sub_store_path("policy.json")
    }

    #[must_use]
    pub fn capability_store_path(&self) -> Option<PathBuf> {
        self.sub_store_path("capabilities.json")
    }

    #[must_use]
    pub fn domain_store_path(&self) -> Option<PathBuf> {
        self.sub_store_path("domain.json")
    }

    #[must_use]
    pub fn invoice_store_path(&self) -> Option<PathBuf> {
        self.sub_store_path("invoices.json")
    }

    #[must_use]
    pub fn checkout_store_path(&self) -> Option<PathBuf> {
        self.sub_store_path("checkout.json")
    }
}
