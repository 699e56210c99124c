//! Shared scaffolding for the gateway's HTTP-level tests: builds a full
//! `AppState` against in-memory stores and a registered `FixedAdapter`,
//! mirroring the teacher's `test_config`/`test_app_state` helpers.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use http_body_util::BodyExt;
use saturn_adapters::{
    AdapterContract, AdapterError, AdapterQuote, AdapterRegistry, AdapterRequest, AdapterResponse,
};
use saturn_audit::AuditTrail;
use saturn_auth::AuthCache;
use saturn_bolt11::{LightningNode, StaticLightningNode};
use saturn_capabilities::{CapabilityRegistry, ProviderEntry};
use saturn_checkout::{CheckoutStore, CheckoutWebhookHandler};
use saturn_executor::ProxyExecutor;
use saturn_gateway::config::Config;
use saturn_gateway::domain::{DomainStore, SessionTokens};
use saturn_gateway::state::AppState;
use saturn_gateway::throttle::ThrottleState;
use saturn_invoices::{InvoiceStore, InvoiceWatcher};
use saturn_ledger::Ledger;
use saturn_policy::{DailySpendCache, PolicyEngine};
use saturn_pricing::PricingOracle;
use saturn_store::SnapshotStore;
use serde_json::{Value, json};
use tower::ServiceExt;

/// Test adapter for the "echo" service, registered under the "reason"
/// capability. Quotes a fixed price and settles for a configurable final
/// amount, letting tests exercise both the hold and the settle-vs-refund
/// paths without a real upstream.
pub struct FixedAdapter {
    pub quoted_sats: u64,
    pub final_sats: u64,
}

#[async_trait]
impl AdapterContract for FixedAdapter {
    async fn quote(&self, request: &AdapterRequest) -> Result<AdapterQuote, AdapterError> {
        Ok(AdapterQuote {
            operation: request.operation.clone(),
            quoted_sats: self.quoted_sats,
        })
    }

    async fn execute(&self, _request: &AdapterRequest) -> Result<AdapterResponse, AdapterError> {
        Ok(AdapterResponse {
            status: 200,
            data: json!({
                "content": "hello from echo",
                "model": "echo-1",
                "usage": { "prompt_tokens": 3, "completion_tokens": 5, "total_tokens": 8 },
            }),
            headers: HashMap::new(),
        })
    }

    async fn finalize(
        &self,
        _response: &AdapterResponse,
        _quoted_sats: u64,
    ) -> Result<u64, AdapterError> {
        Ok(self.final_sats)
    }
}

pub async fn test_state() -> Result<AppState> {
    let config = Config::for_tests();

    let ledger_store: SnapshotStore<saturn_ledger::LedgerState> = SnapshotStore::new(None);
    let ledger = Ledger::new(ledger_store);

    let audit_store: SnapshotStore<saturn_audit::AuditState> = SnapshotStore::new(None);
    let daily_spend_cache = Arc::new(DailySpendCache::new());
    let audit = AuditTrail::new(audit_store, daily_spend_cache.clone());

    let pricing_store: SnapshotStore<saturn_pricing::PricingState> = SnapshotStore::new(None);
    let pricing = PricingOracle::new(pricing_store);
    pricing.refresh_rate(config.default_btc_usd).await?;

    let policy_store: SnapshotStore<saturn_policy::PolicyState> = SnapshotStore::new(None);
    let policy = PolicyEngine::new(policy_store, daily_spend_cache);

    let capability_store: SnapshotStore<saturn_capabilities::CapabilityState> =
        SnapshotStore::new(None);
    let capabilities = CapabilityRegistry::new(capability_store);
    capabilities
        .register(
            "reason",
            ProviderEntry {
                service_slug: "echo".to_string(),
                priority: 0,
                active: true,
            },
        )
        .await?;

    let domain_store: SnapshotStore<saturn_gateway::domain::DomainState> = SnapshotStore::new(None);
    let domain = DomainStore::new(domain_store);

    let mut adapters = AdapterRegistry::new();
    adapters.register(
        "echo",
        Arc::new(FixedAdapter {
            quoted_sats: 1_000,
            final_sats: 300,
        }),
    );

    let auth = Arc::new(AuthCache::new());
    let sessions = SessionTokens::new(config.session_signing_key.as_bytes().to_vec());

    let executor = ProxyExecutor::new(
        adapters.clone(),
        ledger.clone(),
        pricing.clone(),
        policy.clone(),
        audit.clone(),
    );

    let invoice_store: SnapshotStore<saturn_invoices::InvoiceState> = SnapshotStore::new(None);
    let invoices = InvoiceStore::new(invoice_store);
    let lightning_node: Arc<dyn LightningNode> = Arc::new(StaticLightningNode::new());
    let invoice_watcher = Arc::new(InvoiceWatcher::new(
        lightning_node.clone(),
        invoices.clone(),
        ledger.clone(),
        Arc::new(domain.clone()),
    ));

    let checkout_store: SnapshotStore<saturn_checkout::CheckoutState> = SnapshotStore::new(None);
    let checkout = CheckoutStore::new(checkout_store);
    let checkout_webhooks = Arc::new(CheckoutWebhookHandler::new(
        config.stripe_webhook_secret.as_bytes().to_vec(),
        checkout.clone(),
        ledger.clone(),
    ));

    Ok(AppState {
        config: Arc::new(config),
        domain,
        ledger,
        pricing,
        policy,
        audit,
        capabilities,
        adapters,
        auth,
        sessions,
        executor,
        invoices,
        invoice_watcher,
        checkout,
        checkout_webhooks,
        throttle: ThrottleState::default(),
        lightning_node,
    })
}

pub async fn test_app() -> Result<Router> {
    Ok(saturn_gateway::build_router(test_state().await?))
}

pub async fn read_json(response: Response<Body>) -> Result<Value> {
    let bytes = response.into_body().collect().await?.to_bytes();
    Ok(serde_json::from_slice(&bytes)?)
}

/// Pulls a required string field out of a JSON response body, failing the
/// test with a readable message instead of panicking via `unwrap`/`expect`.
pub fn str_field(value: &Value, key: &str) -> Result<String> {
    value[key]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("expected string field '{key}' in {value}"))
}

pub async fn signup(app: &Router, email: &str, password: &str) -> Result<Value> {
    let body = json!({ "email": email, "password": password }).to_string();
    let request = Request::builder()
        .method("POST")
        .uri("/v1/signup")
        .header("content-type", "application/json")
        .body(Body::from(body))?;
    let response = app.clone().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    read_json(response).await
}

pub async fn credit_wallet(state: &AppState, wallet_id: &str, amount_sats: u64) -> Result<()> {
    let wallet_id = saturn_core::WalletId::from(wallet_id);
    state
        .ledger
        .credit(
            &wallet_id,
            saturn_core::Currency::Sats,
            amount_sats,
            "test_credit",
            &saturn_core::generate_id("testcredit"),
            None,
            None,
        )
        .await?;
    Ok(())
}
