//! `AppState`: the one object every route handler receives, aggregating
//! every already-built Saturn engine plus the gateway's own domain store.

use std::sync::Arc;

use saturn_adapters::AdapterRegistry;
use saturn_audit::AuditTrail;
use saturn_auth::AuthCache;
use saturn_bolt11::LightningNode;
use saturn_capabilities::CapabilityRegistry;
use saturn_checkout::CheckoutStore;
use saturn_checkout::CheckoutWebhookHandler;
use saturn_executor::ProxyExecutor;
use saturn_invoices::{InvoiceStore, InvoiceWatcher};
use saturn_ledger::Ledger;
use saturn_policy::PolicyEngine;
use saturn_pricing::PricingOracle;

use crate::config::Config;
use crate::domain::{DomainStore, SessionTokens};
use crate::throttle::ThrottleState;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub domain: DomainStore,
    pub ledger: Ledger,
    pub pricing: PricingOracle,
    pub policy: PolicyEngine,
    pub audit: AuditTrail,
    pub capabilities: CapabilityRegistry,
    pub adapters: AdapterRegistry,
    pub auth: Arc<AuthCache>,
    pub sessions: SessionTokens,
    pub executor: ProxyExecutor,
    pub invoices: InvoiceStore,
    pub invoice_watcher: Arc<InvoiceWatcher>,
    pub checkout: CheckoutStore,
    pub checkout_webhooks: Arc<CheckoutWebhookHandler>,
    pub throttle: ThrottleState,
    pub lightning_node: Arc<dyn LightningNode>,
}
