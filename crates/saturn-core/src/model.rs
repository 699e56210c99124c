//! Saturn's data model: Account, Agent, Wallet, Policy, Service, pricing,
//! Invoice, CheckoutSession, Transaction, AuditLog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{
    AccountId, AgentId, AuditLogId, CheckoutSessionId, InvoiceId, PolicyId, ServiceId,
    TransactionId, WalletId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Currency {
    Sats,
    UsdCents,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub default_currency: Currency,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Primary,
    Worker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Suspended,
    Killed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub account_id: AccountId,
    pub name: String,
    pub role: AgentRole,
    pub status: AgentStatus,
    pub api_key_hash: String,
    pub api_key_prefix: String,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Wallet {
    pub balance_sats: u64,
    pub held_sats: u64,
    pub balance_usd_cents: u64,
    pub held_usd_cents: u64,
    pub lifetime_in_sats: u64,
    pub lifetime_out_sats: u64,
    pub lifetime_in_usd_cents: u64,
    pub lifetime_out_usd_cents: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletRecord {
    pub id: WalletId,
    pub account_id: AccountId,
    pub wallet: Wallet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: PolicyId,
    pub agent_id: AgentId,
    pub max_per_call_sats: Option<u64>,
    pub max_per_day_sats: Option<u64>,
    pub max_balance_sats: Option<u64>,
    pub allowed_services: Option<Vec<String>>,
    pub denied_services: Option<Vec<String>>,
    pub allowed_capabilities: Option<Vec<String>>,
    pub denied_capabilities: Option<Vec<String>>,
    pub kill_switch: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceTier {
    Curated,
    Community,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Active,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    Bearer,
    ApiKeyHeader,
    Basic,
    QueryParam,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    pub slug: String,
    pub name: String,
    pub tier: ServiceTier,
    pub status: ServiceStatus,
    pub base_url: String,
    pub auth_type: AuthType,
    pub auth_credential_env: String,
    pub pricing: Vec<ServicePricing>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingUnit {
    PerRequest,
    Per1kTokens,
    PerMinute,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicePricing {
    pub service_id: ServiceId,
    pub operation: String,
    pub cost_usd_micros: u64,
    pub price_usd_micros: u64,
    pub price_sats: u64,
    pub unit: PricingUnit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Settled,
    Expired,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub wallet_id: WalletId,
    pub amount_sats: u64,
    pub payment_request: String,
    pub r_hash: String,
    pub status: InvoiceStatus,
    pub expires_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStatus {
    Pending,
    Completed,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: CheckoutSessionId,
    pub wallet_id: WalletId,
    pub amount_usd_cents: u64,
    pub btc_usd_rate: f64,
    pub amount_sats: u64,
    pub status: CheckoutStatus,
    pub provider_session_id: String,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    CreditLightning,
    CreditCard,
    DebitProxyCall,
    Refund,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub wallet_id: WalletId,
    pub agent_id: Option<AgentId>,
    pub transaction_type: TransactionType,
    pub currency: Currency,
    pub amount_sats: u64,
    pub amount_usd_cents: u64,
    pub balance_after_sats: u64,
    pub balance_after_usd_cents: u64,
    pub reference_type: String,
    pub reference_id: String,
    pub description: String,
    /// Amount that would have exceeded `max_balance_sats` and was not
    /// applied to the wallet balance (see DESIGN.md, open question 3).
    pub capped_sats: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyResult {
    Allowed,
    Denied,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: AuditLogId,
    pub agent_id: AgentId,
    pub service_slug: String,
    pub capability: Option<String>,
    pub operation: Option<String>,
    pub request_body: Value,
    pub policy_result: PolicyResult,
    pub policy_reason: Option<String>,
    pub quoted_sats: u64,
    pub charged_sats: Option<u64>,
    pub quoted_usd_cents: u64,
    pub charged_usd_cents: Option<u64>,
    pub upstream_status: Option<u16>,
    pub upstream_latency_ms: Option<u64>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}
