//! Gateway-owned aggregates: accounts (with signup credentials), agents,
//! and the service catalog. None of these belong inside a `saturn-*`
//! library crate — they are the gateway's own bookkeeping, composed on
//! top of `saturn-core`'s types the same way the teacher's
//! `domain_store.rs` composes its own records on top of shared types.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use saturn_auth::AgentDirectory;
use saturn_auth::AuthError;
use saturn_auth::SessionTokenVerifier;
use saturn_core::{
    Account, AccountId, Agent, AgentId, AgentRole, AgentStatus, Currency, Service, ServiceId,
    WalletId,
};
use saturn_invoices::AccountDirectory as InvoiceAccountDirectory;
use saturn_store::{SnapshotStore, StoreError};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
pub enum DomainStoreError {
    #[error("record not found")]
    NotFound,
    #[error("{field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },
    #[error("an account already exists for that email")]
    EmailTaken,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    pub account: Account,
    pub email: String,
    pub password_hash: String,
    pub wallet_id: WalletId,
    /// Capped balance ceiling applied at Lightning-credit time; absent
    /// means uncapped. Set per-account, not per-wallet.
    pub max_balance_sats: Option<u64>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct DomainState {
    accounts: HashMap<AccountId, AccountRecord>,
    email_index: HashMap<String, AccountId>,
    agents: HashMap<AgentId, Agent>,
    agents_by_prefix: HashMap<String, Vec<AgentId>>,
    services: HashMap<ServiceId, Service>,
    services_by_slug: HashMap<String, ServiceId>,
}

#[derive(Clone)]
pub struct DomainStore {
    store: SnapshotStore<DomainState>,
}

impl DomainStore {
    #[must_use]
    pub fn new(store: SnapshotStore<DomainState>) -> Self {
        Self { store }
    }

    /// `account_id`/`wallet_id` are minted by the caller so the wallet can
    /// be created (via `Ledger::create_wallet`) before this record exists.
    pub async fn create_account(
        &self,
        account_id: AccountId,
        email: String,
        password_hash: String,
        default_currency: Currency,
        wallet_id: WalletId,
    ) -> Result<AccountRecord, DomainStoreError> {
        let email_key = email.trim().to_ascii_lowercase();
        if email_key.is_empty() {
            return Err(DomainStoreError::Validation {
                field: "email",
                message: "must not be empty".to_string(),
            });
        }

        let record = AccountRecord {
            account: Account {
                id: account_id,
                default_currency,
                created_at: Utc::now(),
            },
            email: email_key.clone(),
            password_hash,
            wallet_id,
            max_balance_sats: None,
        };

        self.store
            .mutate(move |state| -> Result<AccountRecord, DomainStoreError> {
                if state.email_index.contains_key(&email_key) {
                    return Err(DomainStoreError::EmailTaken);
                }
                state
                    .email_index
                    .insert(email_key.clone(), record.account.id.clone());
                state
                    .accounts
                    .insert(record.account.id.clone(), record.clone());
                Ok(record.clone())
            })
            .await
    }

    pub async fn account_by_email(&self, email: &str) -> Option<AccountRecord> {
        let email_key = email.trim().to_ascii_lowercase();
        self.store
            .view(move |state| {
                state
                    .email_index
                    .get(&email_key)
                    .and_then(|id| state.accounts.get(id).cloned())
            })
            .await
    }

    pub async fn account(&self, account_id: &AccountId) -> Result<AccountRecord, DomainStoreError> {
        let account_id = account_id.clone();
        self.store
            .view(move |state| state.accounts.get(&account_id).cloned())
            .await
            .ok_or(DomainStoreError::NotFound)
    }

    pub async fn set_max_balance_sats(
        &self,
        account_id: &AccountId,
        max_balance_sats: Option<u64>,
    ) -> Result<(), DomainStoreError> {
        let account_id = account_id.clone();
        self.store
            .mutate(move |state| -> Result<(), DomainStoreError> {
                let record = state
                    .accounts
                    .get_mut(&account_id)
                    .ok_or(DomainStoreError::NotFound)?;
                record.max_balance_sats = max_balance_sats;
                Ok(())
            })
            .await
    }

    pub async fn create_agent(
        &self,
        account_id: AccountId,
        name: String,
        role: AgentRole,
        api_key_hash: String,
        api_key_prefix: String,
    ) -> Result<Agent, DomainStoreError> {
        let agent = Agent {
            id: AgentId::generate(),
            account_id,
            name,
            role,
            status: AgentStatus::Active,
            api_key_hash,
            api_key_prefix: api_key_prefix.clone(),
            metadata: None,
            created_at: Utc::now(),
        };

        self.store
            .mutate(move |state| -> Result<Agent, DomainStoreError> {
                state
                    .agents_by_prefix
                    .entry(api_key_prefix.clone())
                    .or_default()
                    .push(agent.id.clone());
                state.agents.insert(agent.id.clone(), agent.clone());
                Ok(agent.clone())
            })
            .await
    }

    pub async fn agent(&self, agent_id: &AgentId) -> Result<Agent, DomainStoreError> {
        let agent_id = agent_id.clone();
        self.store
            .view(move |state| state.agents.get(&agent_id).cloned())
            .await
            .ok_or(DomainStoreError::NotFound)
    }

    pub async fn agents_for_account(&self, account_id: &AccountId) -> Vec<Agent> {
        let account_id = account_id.clone();
        self.store
            .view(move |state| {
                state
                    .agents
                    .values()
                    .filter(|agent| agent.account_id == account_id)
                    .cloned()
                    .collect()
            })
            .await
    }

    pub async fn set_agent_status(
        &self,
        agent_id: &AgentId,
        status: AgentStatus,
    ) -> Result<Agent, DomainStoreError> {
        let agent_id = agent_id.clone();
        self.store
            .mutate(move |state| -> Result<Agent, DomainStoreError> {
                let agent = state
                    .agents
                    .get_mut(&agent_id)
                    .ok_or(DomainStoreError::NotFound)?;
                agent.status = status;
                Ok(agent.clone())
            })
            .await
    }

    /// Removes a worker agent's record and its prefix-bucket index entry.
    /// Callers must check `AgentRole` themselves — the primary agent
    /// cannot be deleted (spec: "may manage other agents and cannot be
    /// deleted").
    pub async fn delete_agent(&self, agent_id: &AgentId) -> Result<(), DomainStoreError> {
        let agent_id = agent_id.clone();
        self.store
            .mutate(move |state| -> Result<(), DomainStoreError> {
                let Some(agent) = state.agents.remove(&agent_id) else {
                    return Err(DomainStoreError::NotFound);
                };
                if let Some(bucket) = state.agents_by_prefix.get_mut(&agent.api_key_prefix) {
                    bucket.retain(|id| *id != agent_id);
                }
                Ok(())
            })
            .await
    }

    pub async fn register_service(&self, service: Service) -> Result<Service, DomainStoreError> {
        self.store
            .mutate(move |state| -> Result<Service, DomainStoreError> {
                state
                    .services_by_slug
                    .insert(service.slug.clone(), service.id.clone());
                state.services.insert(service.id.clone(), service.clone());
                Ok(service.clone())
            })
            .await
    }

    pub async fn service_by_slug(&self, slug: &str) -> Result<Service, DomainStoreError> {
        let slug = slug.to_string();
        self.store
            .view(move |state| {
                state
                    .services_by_slug
                    .get(&slug)
                    .and_then(|id| state.services.get(id).cloned())
            })
            .await
            .ok_or(DomainStoreError::NotFound)
    }

    pub async fn services(&self) -> Vec<Service> {
        self.store.view(|state| state.services.values().cloned().collect()).await
    }
}

#[async_trait]
impl AgentDirectory for DomainStore {
    async fn agents_with_api_key_prefix(&self, prefix: &str) -> Vec<Agent> {
        let prefix = prefix.to_string();
        self.store
            .view(move |state| {
                state
                    .agents_by_prefix
                    .get(&prefix)
                    .into_iter()
                    .flatten()
                    .filter_map(|id| state.agents.get(id).cloned())
                    .collect()
            })
            .await
    }

    async fn agent_by_id(&self, agent_id: &AgentId) -> Option<Agent> {
        let agent_id = agent_id.clone();
        self.store.view(move |state| state.agents.get(&agent_id).cloned()).await
    }
}

#[async_trait]
impl InvoiceAccountDirectory for DomainStore {
    async fn default_currency(&self, account_id: &AccountId) -> Option<Currency> {
        self.account(account_id).await.ok().map(|record| record.account.default_currency)
    }

    async fn promote_to_sats(&self, account_id: &AccountId) {
        let account_id = account_id.clone();
        let _ = self
            .store
            .mutate(move |state| -> Result<(), DomainStoreError> {
                if let Some(record) = state.accounts.get_mut(&account_id) {
                    record.account.default_currency = Currency::Sats;
                }
                Ok(())
            })
            .await;
    }

    async fn max_balance_sats(&self, account_id: &AccountId) -> Option<u64> {
        self.account(account_id).await.ok().and_then(|record| record.max_balance_sats)
    }
}

/// Resolves a `Service`'s configured credential environment variable at
/// adapter-construction time — kept separate from `DomainStore` so the
/// process environment never ends up serialized into a snapshot.
pub fn resolve_service_credential(service: &Service) -> Result<String, DomainStoreError> {
    std::env::var(&service.auth_credential_env).map_err(|_| DomainStoreError::Validation {
        field: "auth_credential_env",
        message: format!(
            "environment variable {} is not set",
            service.auth_credential_env
        ),
    })
}

/// Issues and verifies HMAC-signed session tokens of the form
/// `{agent_id}.{expires_at_unix}.{hex_signature}`, the gateway's stand-in
/// for a signed cookie/JWT session — grounded in the same `hmac::Hmac`
/// construction the checkout webhook handler uses to verify signatures.
#[derive(Clone)]
pub struct SessionTokens {
    signing_key: Vec<u8>,
}

impl SessionTokens {
    #[must_use]
    pub fn new(signing_key: Vec<u8>) -> Self {
        Self { signing_key }
    }

    fn sign(&self, payload: &str) -> Result<String, AuthError> {
        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .map_err(|_| AuthError::SessionToken("signing key rejected by hmac".to_string()))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    #[must_use]
    pub fn issue(&self, agent_id: &AgentId, ttl_seconds: i64) -> String {
        let expires_at = (Utc::now() + Duration::seconds(ttl_seconds)).timestamp();
        let payload = format!("{agent_id}.{expires_at}");
        let signature = self.sign(&payload).unwrap_or_default();
        format!("{payload}.{signature}")
    }
}

#[async_trait]
impl SessionTokenVerifier for SessionTokens {
    async fn verify(&self, token: &str) -> Result<AgentId, AuthError> {
        let mut parts = token.splitn(3, '.');
        let (Some(agent_raw), Some(expires_raw), Some(signature)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::SessionToken("malformed session token".to_string()));
        };

        let payload = format!("{agent_raw}.{expires_raw}");
        let signature_bytes = hex::decode(signature)
            .map_err(|_| AuthError::SessionToken("signature mismatch".to_string()))?;
        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .map_err(|_| AuthError::SessionToken("signing key rejected by hmac".to_string()))?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature_bytes)
            .map_err(|_| AuthError::SessionToken("signature mismatch".to_string()))?;

        let expires_at: i64 = expires_raw
            .parse()
            .map_err(|_| AuthError::SessionToken("malformed expiry".to_string()))?;
        let expires_at: DateTime<Utc> = DateTime::from_timestamp(expires_at, 0)
            .ok_or_else(|| AuthError::SessionToken("malformed expiry".to_string()))?;
        if expires_at < Utc::now() {
            return Err(AuthError::SessionToken("session token expired".to_string()));
        }

        Ok(AgentId::from(agent_raw))
    }
}
