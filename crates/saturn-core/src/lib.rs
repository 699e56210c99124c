pub mod ids;
pub mod model;

pub use ids::{
    AccountId, AgentId, AuditLogId, CheckoutSessionId, InvoiceId, PolicyId, ServiceId,
    TransactionId, WalletId, generate_api_key, generate_id,
};
pub use model::{
    Account, Agent, AgentRole, AgentStatus, AuditLog, AuthType, CheckoutSession, CheckoutStatus,
    Currency, Invoice, InvoiceStatus, Policy, PolicyResult, PricingUnit, Service, ServicePricing,
    ServiceStatus, ServiceTier, Transaction, TransactionType, Wallet, WalletRecord,
};
