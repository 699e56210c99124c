//! Pricing Oracle: a cached BTC/USD rate plus the USD<->sats conversions
//! every quote and hold in the system is built from.
//!
//! The rate itself comes from an external poller (a median of one or more
//! price feeds) that this crate only names as the [`RateSource`] contract
//! — Saturn's core does not implement a price-feed client.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use saturn_core::{ServiceId, ServicePricing};
use saturn_store::{SnapshotStore, StoreError};
use serde::{Deserialize, Serialize};

/// A default rate used only until the first poll succeeds. Arbitrary but
/// plausible, so a freshly booted gateway can still quote calls.
pub const DEFAULT_BTC_USD: f64 = 65_000.0;

#[derive(Debug, thiserror::Error)]
pub enum RateSourceError {
    #[error("rate source unavailable: {0}")]
    Unavailable(String),
}

/// Contract satisfied by whatever price-feed poller backs a deployment.
/// Saturn reads the rate through this trait; it never dials a specific
/// exchange API itself.
#[async_trait]
pub trait RateSource: Send + Sync {
    async fn fetch_btc_usd(&self) -> Result<f64, RateSourceError>;
}

/// Fixed-rate source for tests and local development.
#[derive(Debug, Clone, Copy)]
pub struct StaticRateSource(pub f64);

#[async_trait]
impl RateSource for StaticRateSource {
    async fn fetch_btc_usd(&self) -> Result<f64, RateSourceError> {
        Ok(self.0)
    }
}

/// Ceiling-divide `m` micro-dollars into sats at rate `r` (USD per BTC).
#[must_use]
pub fn usd_micros_to_sats(micros: u64, btc_usd: f64) -> u64 {
    ((micros as f64 * 100.0) / btc_usd).ceil() as u64
}

/// Floor-divide `c` cents into sats. Conservative: never over-credit.
#[must_use]
pub fn usd_cents_to_sats(cents: u64, btc_usd: f64) -> u64 {
    ((cents as f64 * 1_000_000.0) / btc_usd).floor() as u64
}

/// Ceiling-convert `s` sats into cents. Conservative: never under-hold.
#[must_use]
pub fn sats_to_usd_cents(sats: u64, btc_usd: f64) -> u64 {
    ((sats as f64 * btc_usd) / 1_000_000.0).ceil() as u64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateSnapshot {
    pub btc_usd: f64,
    pub fetched_at: DateTime<Utc>,
}

impl Default for RateSnapshot {
    fn default() -> Self {
        Self {
            btc_usd: DEFAULT_BTC_USD,
            fetched_at: Utc::now(),
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct PricingState {
    rate: RateSnapshot,
    /// Keyed by `"{service_id}::{operation}"` — JSON object keys must be
    /// strings, so the logical `(service_id, operation)` pair is flattened.
    pricing: HashMap<String, ServicePricing>,
}

fn pricing_key(service_id: &ServiceId, operation: &str) -> String {
    format!("{service_id}::{operation}")
}

#[derive(Debug, thiserror::Error)]
pub enum PricingError {
    #[error("no pricing row for service {service_id} operation {operation}")]
    PriceNotFound {
        service_id: ServiceId,
        operation: String,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct PricingOracle {
    store: SnapshotStore<PricingState>,
}

impl PricingOracle {
    #[must_use]
    pub fn new(store: SnapshotStore<PricingState>) -> Self {
        Self { store }
    }

    pub async fn current_rate(&self) -> RateSnapshot {
        self.store.view(|state| state.rate.clone()).await
    }

    pub async fn upsert_pricing(&self, pricing: ServicePricing) -> Result<(), PricingError> {
        self.store
            .mutate(move |state| -> Result<(), PricingError> {
                let rate = state.rate.btc_usd;
                let mut row = pricing;
                row.price_sats = usd_micros_to_sats(row.price_usd_micros, rate);
                let key = pricing_key(&row.service_id, &row.operation);
                state.pricing.insert(key, row);
                Ok(())
            })
            .await
    }

    pub async fn get_price(
        &self,
        service_id: &ServiceId,
        operation: &str,
    ) -> Result<ServicePricing, PricingError> {
        let key = pricing_key(service_id, operation);
        self.store
            .view(move |state| state.pricing.get(&key).cloned())
            .await
            .ok_or_else(|| PricingError::PriceNotFound {
                service_id: service_id.clone(),
                operation: operation.to_string(),
            })
    }

    /// Apply a freshly polled rate. Every `price_sats` is recomputed and
    /// persisted only if it actually changed (idle refreshes with an
    /// unchanged rate do not churn the pricing rows).
    pub async fn refresh_rate(&self, btc_usd: f64) -> Result<usize, PricingError> {
        self.store
            .mutate(move |state| -> Result<usize, PricingError> {
                if (state.rate.btc_usd - btc_usd).abs() < f64::EPSILON {
                    return Ok(0);
                }
                state.rate = RateSnapshot {
                    btc_usd,
                    fetched_at: Utc::now(),
                };

                let mut changed = 0;
                for row in state.pricing.values_mut() {
                    let new_price = usd_micros_to_sats(row.price_usd_micros, btc_usd);
                    if new_price != row.price_sats {
                        row.price_sats = new_price;
                        changed += 1;
                    }
                }
                Ok(changed)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::{
        PricingOracle, PricingState, sats_to_usd_cents, usd_cents_to_sats, usd_micros_to_sats,
    };
    use saturn_core::{PricingUnit, ServiceId, ServicePricing};
    use saturn_store::SnapshotStore;

    #[test]
    fn conversions_round_in_saturn_favor() {
        assert_eq!(usd_micros_to_sats(1, 65_000.0), 1);
        assert_eq!(usd_cents_to_sats(1, 65_000.0), 15);
        assert_eq!(sats_to_usd_cents(15, 65_000.0), 1);
    }

    #[tokio::test]
    async fn refresh_rate_recomputes_changed_prices_only() -> anyhow::Result<()> {
        let store: SnapshotStore<PricingState> = SnapshotStore::new(None);
        let oracle = PricingOracle::new(store);
        let service_id = ServiceId::generate();

        oracle
            .upsert_pricing(ServicePricing {
                service_id: service_id.clone(),
                operation: "chat".to_string(),
                cost_usd_micros: 500,
                price_usd_micros: 1_000,
                price_sats: 0,
                unit: PricingUnit::PerRequest,
            })
            .await?;

        let changed = oracle.refresh_rate(65_000.0).await?;
        assert_eq!(changed, 0, "same rate as default should not churn anything");

        let changed = oracle.refresh_rate(50_000.0).await?;
        assert_eq!(changed, 1);

        let price = oracle.get_price(&service_id, "chat").await?;
        assert_eq!(price.price_sats, usd_micros_to_sats(1_000, 50_000.0));
        Ok(())
    }

    #[tokio::test]
    async fn get_price_is_fatal_for_unknown_operation() {
        let store: SnapshotStore<PricingState> = SnapshotStore::new(None);
        let oracle = PricingOracle::new(store);
        let result = oracle.get_price(&ServiceId::generate(), "missing").await;
        assert!(result.is_err());
    }
}
