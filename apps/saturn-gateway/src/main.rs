use std::sync::Arc;

use anyhow::{Context, Result};
use saturn_adapters::AdapterRegistry;
use saturn_audit::AuditTrail;
use saturn_auth::AuthCache;
use saturn_bolt11::StaticLightningNode;
use saturn_capabilities::CapabilityRegistry;
use saturn_checkout::{CheckoutStore, CheckoutWebhookHandler};
use saturn_executor::ProxyExecutor;
use saturn_gateway::config::Config;
use saturn_gateway::domain::{DomainStore, SessionTokens};
use saturn_gateway::state::AppState;
use saturn_gateway::throttle::ThrottleState;
use saturn_gateway::build_router;
use saturn_invoices::{InvoiceStore, InvoiceWatcher};
use saturn_ledger::Ledger;
use saturn_policy::{DailySpendCache, PolicyEngine};
use saturn_pricing::PricingOracle;
use saturn_store::SnapshotStore;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.log_filter)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let state = build_state(config).await?;
    let bind_addr = state.config.bind_addr;

    let watcher = state.invoice_watcher.clone();
    tokio::spawn(async move { watcher.run().await });

    let app = build_router(state);
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!(target: "saturn.gateway", %bind_addr, "listening");
    axum::serve(listener, app).await.context("server exited with an error")?;
    Ok(())
}

/// Construct every engine from `Config`'s store paths and assemble
/// `AppState`. Split out of `main` so integration tests can build the
/// same state against a temp directory.
pub async fn build_state(config: Config) -> Result<AppState> {
    let ledger_store: SnapshotStore<saturn_ledger::LedgerState> =
        SnapshotStore::new(config.ledger_store_path());
    let ledger = Ledger::new(ledger_store);

    let audit_store: SnapshotStore<saturn_audit::AuditState> =
        SnapshotStore::new(config.audit_store_path());
    let daily_spend_cache = Arc::new(DailySpendCache::new());
    let audit = AuditTrail::new(audit_store, daily_spend_cache.clone());

    let pricing_store: SnapshotStore<saturn_pricing::PricingState> =
        SnapshotStore::new(config.pricing_store_path());
    let pricing = PricingOracle::new(pricing_store);
    pricing
        .refresh_rate(config.default_btc_usd)
        .await
        .context("failed to seed the initial btc/usd rate")?;

    let policy_store: SnapshotStore<saturn_policy::PolicyState> =
        SnapshotStore::new(config.policy_store_path());
    let policy = PolicyEngine::new(policy_store, daily_spend_cache);

    let capability_store: SnapshotStore<saturn_capabilities::CapabilityState> =
        SnapshotStore::new(config.capability_store_path());
    let capabilities = CapabilityRegistry::new(capability_store);

    let domain_store: SnapshotStore<saturn_gateway::domain::DomainState> =
        SnapshotStore::new(config.domain_store_path());
    let domain = DomainStore::new(domain_store);

    let adapters = AdapterRegistry::new();
    let auth = Arc::new(AuthCache::new());
    let sessions = SessionTokens::new(config.session_signing_key.as_bytes().to_vec());

    let executor = ProxyExecutor::new(
        adapters.clone(),
        ledger.clone(),
        pricing.clone(),
        policy.clone(),
        audit.clone(),
    );

    let invoice_store: SnapshotStore<saturn_invoices::InvoiceState> =
        SnapshotStore::new(config.invoice_store_path());
    let invoices = InvoiceStore::new(invoice_store);
    let lightning_node: Arc<dyn saturn_bolt11::LightningNode> = Arc::new(StaticLightningNode::new());
    let invoice_watcher = Arc::new(InvoiceWatcher::new(
        lightning_node.clone(),
        invoices.clone(),
        ledger.clone(),
        Arc::new(domain.clone()),
    ));

    let checkout_store: SnapshotStore<saturn_checkout::CheckoutState> =
        SnapshotStore::new(config.checkout_store_path());
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
