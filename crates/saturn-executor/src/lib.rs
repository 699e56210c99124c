//! Proxy Executor (C8) — the heart of the system. Drives a single proxy
//! call through quote → policy → hold → upstream execute → finalize, with
//! the exact branch-on-response behavior the contract requires.

use std::collections::HashMap;
use std::time::Instant;

use saturn_adapters::{AdapterError, AdapterRegistry, AdapterRequest};
use saturn_audit::{AuditLogEntry, AuditTrail};
use saturn_core::{AgentId, AgentStatus, Currency, Policy, PolicyResult, Wallet, WalletId};
use saturn_ledger::Ledger;
use saturn_policy::{DenialReason, PolicyDecision, PolicyEngine};
use saturn_pricing::PricingOracle;
use serde_json::Value;

/// Figures known at the point an error is raised, carried along so the
/// HTTP boundary can still emit `X-Saturn-Quoted-*`/`X-Saturn-Balance-After`
/// headers on an error response — spec §6 requires these headers "even on
/// error", not only on a 2xx/passthrough response.
#[derive(Debug, Clone, Copy, Default)]
pub struct PartialQuote {
    pub quoted_sats: u64,
    pub quoted_usd_cents: u64,
    pub balance_after_sats: u64,
    pub balance_after_usd_cents: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("no adapter registered for service {0}")]
    AdapterNotFound(String),
    #[error("policy denied the call: {}", .reason.code())]
    PolicyDenied {
        reason: DenialReason,
        audit_id: String,
        quote: PartialQuote,
    },
    #[error("insufficient balance in {currency:?}: required {required}, available {available}")]
    InsufficientBalance {
        currency: Currency,
        required: u64,
        available: u64,
        quote: PartialQuote,
    },
    #[error("upstream call to {service_slug} failed: {message}")]
    UpstreamError {
        service_slug: String,
        message: String,
        audit_id: String,
        quote: PartialQuote,
    },
    #[error(transparent)]
    Ledger(#[from] saturn_ledger::LedgerError),
    #[error(transparent)]
    Audit(#[from] saturn_audit::AuditError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

pub struct ExecuteRequest {
    pub agent_id: AgentId,
    pub agent_status: AgentStatus,
    pub wallet_id: WalletId,
    pub default_currency: Currency,
    pub policy: Policy,
    pub service_slug: String,
    pub capability: Option<String>,
    pub adapter_request: AdapterRequest,
}

#[derive(Debug, Clone)]
pub struct ExecuteMetadata {
    pub audit_id: String,
    pub quoted_sats: u64,
    pub charged_sats: u64,
    pub quoted_usd_cents: u64,
    pub charged_usd_cents: u64,
    pub balance_after_sats: u64,
    pub balance_after_usd_cents: u64,
}

#[derive(Debug, Clone)]
pub struct ExecuteResponse {
    pub status: u16,
    pub data: Value,
    pub headers: HashMap<String, String>,
    pub metadata: ExecuteMetadata,
}

/// Drives every proxy call through quote, policy, ledger hold, upstream
/// execute and settle in the fixed order the contract requires. Holds
/// one handle to each collaborator crate; cheap to clone, like they are.
#[derive(Clone)]
pub struct ProxyExecutor {
    registry: AdapterRegistry,
    ledger: Ledger,
    pricing: PricingOracle,
    policy: PolicyEngine,
    audit: AuditTrail,
}

impl ProxyExecutor {
    #[must_use]
    pub fn new(
        registry: AdapterRegistry,
        ledger: Ledger,
        pricing: PricingOracle,
        policy: PolicyEngine,
        audit: AuditTrail,
    ) -> Self {
        Self {
            registry,
            ledger,
            pricing,
            policy,
            audit,
        }
    }

    pub async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteResponse, ExecutorError> {
        let ExecuteRequest {
            agent_id,
            agent_status,
            wallet_id,
            default_currency,
            policy,
            service_slug,
            capability,
            adapter_request,
        } = request;

        let adapter = self
            .registry
            .resolve(&service_slug)
            .ok_or_else(|| ExecutorError::AdapterNotFound(service_slug.clone()))?;

        let rate = self.pricing.current_rate().await.btc_usd;

        let quote = adapter.quote(&adapter_request).await?;
        let quoted_sats = quote.quoted_sats;
        let quoted_usd_cents = saturn_pricing::sats_to_usd_cents(quoted_sats, rate);

        let decision = self
            .policy
            .evaluate_quote(
                agent_status,
                &policy,
                &service_slug,
                capability.as_deref(),
                quoted_sats,
                &self.audit,
                chrono::Utc::now(),
            )
            .await;

        if let PolicyDecision::Denied(reason) = decision {
            let audit_row = self
                .audit
                .record(AuditLogEntry {
                    agent_id: agent_id.clone(),
                    service_slug: service_slug.clone(),
                    capability: capability.clone(),
                    operation: Some(quote.operation.clone()),
                    request_body: adapter_request.body.clone(),
                    policy_result: PolicyResult::Denied,
                    policy_reason: Some(reason.code().to_string()),
                    quoted_sats,
                    charged_sats: None,
                    quoted_usd_cents,
                    charged_usd_cents: None,
                    upstream_status: None,
                    upstream_latency_ms: None,
                    error: None,
                })
                .await?;
            let wallet = self.ledger.wallet(&wallet_id).await?;
            return Err(ExecutorError::PolicyDenied {
                reason,
                audit_id: audit_row.id.to_string(),
                quote: PartialQuote {
                    quoted_sats,
                    quoted_usd_cents,
                    balance_after_sats: wallet.balance_sats,
                    balance_after_usd_cents: wallet.balance_usd_cents,
                },
            });
        }

        let hold = self
            .ledger
            .hold(&wallet_id, default_currency, quoted_usd_cents, quoted_sats)
            .await?;

        if !hold.success {
            let wallet = self.ledger.wallet(&wallet_id).await?;
            let (required, available) = match default_currency {
                Currency::Sats => (quoted_sats, wallet.balance_sats),
                Currency::UsdCents => (quoted_usd_cents, wallet.balance_usd_cents),
            };
            return Err(ExecutorError::InsufficientBalance {
                currency: default_currency,
                required,
                available,
                quote: PartialQuote {
                    quoted_sats,
                    quoted_usd_cents,
                    balance_after_sats: wallet.balance_sats,
                    balance_after_usd_cents: wallet.balance_usd_cents,
                },
            });
        }

        let currency_held = hold.currency_held.unwrap_or(default_currency);
        let amount_held = hold.amount_held;

        let started_at = Instant::now();
        let outcome = adapter.execute(&adapter_request).await;
        let upstream_latency_ms = u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX);

        match outcome {
            Err(adapter_error) => {
                let release_result = self
                    .ledger
                    .release(&wallet_id, currency_held, amount_held, Some(agent_id.clone()))
                    .await;

                let audit_row = self
                    .audit
                    .record(AuditLogEntry {
                        agent_id: agent_id.clone(),
                        service_slug: service_slug.clone(),
                        capability: capability.clone(),
                        operation: Some(quote.operation.clone()),
                        request_body: adapter_request.body.clone(),
                        policy_result: PolicyResult::Allowed,
                        policy_reason: None,
                        quoted_sats,
                        charged_sats: None,
                        quoted_usd_cents,
                        charged_usd_cents: None,
                        upstream_status: None,
                        upstream_latency_ms: Some(upstream_latency_ms),
                        error: Some(adapter_error.to_string()),
                    })
                    .await?;

                if let Err(release_error) = release_result {
                    let secondary = self
                        .audit
                        .record(AuditLogEntry {
                            agent_id: agent_id.clone(),
                            service_slug: service_slug.clone(),
                            capability: capability.clone(),
                            operation: Some(quote.operation.clone()),
                            request_body: Value::Null,
                            policy_result: PolicyResult::Allowed,
                            policy_reason: None,
                            quoted_sats,
                            charged_sats: None,
                            quoted_usd_cents,
                            charged_usd_cents: None,
                            upstream_status: None,
                            upstream_latency_ms: Some(upstream_latency_ms),
                            error: Some(format!("release failed: {release_error}")),
                        })
                        .await;
                    if let Err(write_error) = secondary {
                        tracing::warn!(
                            target: "saturn.executor",
                            error = %write_error,
                            "failed to record the release-failure audit row",
                        );
                    }
                }

                let wallet = self.ledger.wallet(&wallet_id).await?;
                Err(ExecutorError::UpstreamError {
                    service_slug,
                    message: adapter_error.to_string(),
                    audit_id: audit_row.id.to_string(),
                    quote: PartialQuote {
                        quoted_sats,
                        quoted_usd_cents,
                        balance_after_sats: wallet.balance_sats,
                        balance_after_usd_cents: wallet.balance_usd_cents,
                    },
                })
            }
            Ok(response) if response.status >= 400 => {
                self.ledger
                    .release(&wallet_id, currency_held, amount_held, Some(agent_id.clone()))
                    .await?;

                let audit_row = self
                    .audit
                    .record(AuditLogEntry {
                        agent_id: agent_id.clone(),
                        service_slug: service_slug.clone(),
                        capability: capability.clone(),
                        operation: Some(quote.operation.clone()),
                        request_body: adapter_request.body.clone(),
                        policy_result: PolicyResult::Allowed,
                        policy_reason: None,
                        quoted_sats,
                        charged_sats: Some(0),
                        quoted_usd_cents,
                        charged_usd_cents: Some(0),
                        upstream_status: Some(response.status),
                        upstream_latency_ms: Some(upstream_latency_ms),
                        error: Some(format!("upstream returned {}", response.status)),
                    })
                    .await?;

                let wallet = self.ledger.wallet(&wallet_id).await?;
                Ok(ExecuteResponse {
                    status: response.status,
                    data: response.data,
                    headers: response.headers,
                    metadata: ExecuteMetadata {
                        audit_id: audit_row.id.to_string(),
                        quoted_sats,
                        charged_sats: 0,
                        quoted_usd_cents,
                        charged_usd_cents: 0,
                        balance_after_sats: wallet.balance_sats,
                        balance_after_usd_cents: wallet.balance_usd_cents,
                    },
                })
            }
            Ok(response) => {
                let final_sats = adapter.finalize(&response, quoted_sats).await?;
                let final_usd_cents = saturn_pricing::sats_to_usd_cents(final_sats, rate);
                let final_amount_in_held_currency = match currency_held {
                    Currency::Sats => final_sats,
                    Currency::UsdCents => final_usd_cents,
                };

                self.ledger
                    .settle(
                        &wallet_id,
                        currency_held,
                        amount_held,
                        final_amount_in_held_currency,
                        Some(agent_id.clone()),
                    )
                    .await?;

                let audit_row = self
                    .audit
                    .record(AuditLogEntry {
                        agent_id: agent_id.clone(),
                        service_slug: service_slug.clone(),
                        capability: capability.clone(),
                        operation: Some(quote.operation.clone()),
                        request_body: adapter_request.body.clone(),
                        policy_result: PolicyResult::Allowed,
                        policy_reason: None,
                        quoted_sats,
                        charged_sats: Some(final_sats),
                        quoted_usd_cents,
                        charged_usd_cents: Some(final_usd_cents),
                        upstream_status: Some(response.status),
                        upstream_latency_ms: Some(upstream_latency_ms),
                        error: None,
                    })
                    .await?;

                let wallet: Wallet = self.ledger.wallet(&wallet_id).await?;
                Ok(ExecuteResponse {
                    status: response.status,
                    data: response.data,
                    headers: response.headers,
                    metadata: ExecuteMetadata {
                        audit_id: audit_row.id.to_string(),
                        quoted_sats,
                        charged_sats: final_sats,
                        quoted_usd_cents,
                        charged_usd_cents: final_usd_cents,
                        balance_after_sats: wallet.balance_sats,
                        balance_after_usd_cents: wallet.balance_usd_cents,
                    },
                })
            }
        }
    }
}
