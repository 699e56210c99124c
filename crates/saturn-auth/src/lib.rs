//! Auth Cache (C7): resolves a bearer token from the `Authorization`
//! header down to the [`Agent`] it authenticates, with a small bounded
//! cache in front of the expensive (adaptive-hash) comparison path.
//!
//! Agent storage is an external collaborator: this crate only needs to
//! look candidates up by `api_key_prefix` bucket or by id, via
//! [`AgentDirectory`]. Session tokens (the non-`sk_agt_` branch) are
//! likewise verified through [`SessionTokenVerifier`], left as a trait
//! because the signing scheme belongs to the HTTP surface, not this crate.

use std::collections::VecDeque;
use std::sync::Mutex;

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use saturn_core::{Agent, AgentId, AgentStatus};
use sha2::{Digest, Sha256};

/// Prefix every agent API key carries; anything else is a session token.
pub const AGENT_KEY_PREFIX: &str = "sk_agt_";

const CACHE_CAPACITY: usize = 1000;
const CACHE_TTL_SECONDS: i64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no bearer token presented")]
    MissingToken,
    #[error("token is malformed")]
    MalformedToken,
    #[error("no agent matches the presented credential")]
    NoMatch,
    #[error("agent is suspended or killed")]
    AgentNotActive,
    #[error("session token verification failed: {0}")]
    SessionToken(String),
}

/// Looked up by `api_key_prefix` bucket on a cache miss, and by id to
/// re-check status on a cache hit.
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn agents_with_api_key_prefix(&self, prefix: &str) -> Vec<Agent>;
    async fn agent_by_id(&self, agent_id: &AgentId) -> Option<Agent>;
}

/// Verifies a non-`sk_agt_` bearer token as a signed session, returning
/// the agent it was issued for.
#[async_trait]
pub trait SessionTokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<AgentId, AuthError>;
}

/// Hashes the full `sha256(token)` hex for the cache key, and the first
/// 16 hex chars for the `api_key_prefix` bucket lookup.
#[must_use]
pub fn token_cache_key(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[must_use]
pub fn api_key_prefix_bucket(token: &str) -> String {
    token_cache_key(token)[..16].to_string()
}

#[must_use]
pub fn hash_api_key(raw_key: &str) -> Result<String, AuthError> {
    use argon2::password_hash::{PasswordHasher, SaltString, rand_core::OsRng};
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(raw_key.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|error| AuthError::SessionToken(error.to_string()))
}

fn verify_api_key(raw_key: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(raw_key.as_bytes(), &parsed)
        .is_ok()
}

struct CacheEntry {
    agent_id: AgentId,
    cached_at: DateTime<Utc>,
}

/// Bounded, oldest-insertion-eviction cache mapping `sha256(token)` to the
/// agent it resolved to. Expiry is lazy, checked at lookup time.
#[derive(Default)]
struct TokenCache {
    order: VecDeque<String>,
    entries: std::collections::HashMap<String, CacheEntry>,
}

impl TokenCache {
    fn get(&self, key: &str, now: DateTime<Utc>) -> Option<AgentId> {
        let entry = self.entries.get(key)?;
        if now - entry.cached_at > Duration::seconds(CACHE_TTL_SECONDS) {
            return None;
        }
        Some(entry.agent_id.clone())
    }

    fn put(&mut self, key: String, agent_id: AgentId, now: DateTime<Utc>) {
        if !self.entries.contains_key(&key) {
            self.order.push_back(key.clone());
        }
        self.entries.insert(
            key,
            CacheEntry {
                agent_id,
                cached_at: now,
            },
        );
        while self.entries.len() > CACHE_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            } else {
                break;
            }
        }
    }

    fn invalidate_agent(&mut self, agent_id: &AgentId) {
        self.entries.retain(|_, entry| &entry.agent_id != agent_id);
    }
}

/// The request-context resolved by a successful [`AuthCache::authenticate`]
/// call. Account, wallet, and policy are derived by the caller from
/// `agent.account_id` / `agent.id` through their own stores — this crate's
/// job ends at producing a trustworthy, active [`Agent`].
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub agent: Agent,
}

pub struct AuthCache {
    cache: Mutex<TokenCache>,
}

impl Default for AuthCache {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(TokenCache::default()),
        }
    }

    pub async fn authenticate(
        &self,
        token: &str,
        directory: &dyn AgentDirectory,
        session_verifier: &dyn SessionTokenVerifier,
    ) -> Result<AuthContext, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let now = Utc::now();
        let key = token_cache_key(token);

        let cached_agent_id = {
            let cache = self
                .cache
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            cache.get(&key, now)
        };

        if let Some(agent_id) = cached_agent_id {
            let agent = directory
                .agent_by_id(&agent_id)
                .await
                .ok_or(AuthError::NoMatch)?;
            if agent.status != AgentStatus::Active {
                return Err(AuthError::AgentNotActive);
            }
            return Ok(AuthContext { agent });
        }

        let agent = if token.starts_with(AGENT_KEY_PREFIX) {
            let prefix = api_key_prefix_bucket(token);
            let candidates = directory.agents_with_api_key_prefix(&prefix).await;
            candidates
                .into_iter()
                .find(|candidate| verify_api_key(token, &candidate.api_key_hash))
                .ok_or(AuthError::NoMatch)?
        } else {
            let agent_id = session_verifier.verify(token).await?;
            directory
                .agent_by_id(&agent_id)
                .await
                .ok_or(AuthError::NoMatch)?
        };

        if agent.status != AgentStatus::Active {
            return Err(AuthError::AgentNotActive);
        }

        {
            let mut cache = self
                .cache
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            cache.put(key, agent.id.clone(), now);
        }

        Ok(AuthContext { agent })
    }

    pub fn invalidate(&self, agent_id: &AgentId) {
        let mut cache = self
            .cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        cache.invalidate_agent(agent_id);
    }
}

#[cfg(test)]
mod tests {
    use super::{
        AgentDirectory, AuthCache, AuthError, SessionTokenVerifier, hash_api_key,
    };
    use async_trait::async_trait;
    use saturn_core::{Agent, AgentId, AgentRole, AgentStatus};

    struct FakeDirectory {
        agents: Vec<Agent>,
    }

    #[async_trait]
    impl AgentDirectory for FakeDirectory {
        async fn agents_with_api_key_prefix(&self, prefix: &str) -> Vec<Agent> {
            self.agents
                .iter()
                .filter(|agent| agent.api_key_prefix == prefix)
                .cloned()
                .collect()
        }

        async fn agent_by_id(&self, agent_id: &AgentId) -> Option<Agent> {
            self.agents.iter().find(|agent| &agent.id == agent_id).cloned()
        }
    }

    struct RejectAllSessions;

    #[async_trait]
    impl SessionTokenVerifier for RejectAllSessions {
        async fn verify(&self, _token: &str) -> Result<AgentId, AuthError> {
            Err(AuthError::SessionToken("no session tokens in this test".to_string()))
        }
    }

    fn build_agent(raw_key: &str) -> anyhow::Result<Agent> {
        let hash = hash_api_key(raw_key)?;
        Ok(Agent {
            id: AgentId::generate(),
            account_id: saturn_core::AccountId::generate(),
            name: "test-agent".to_string(),
            role: AgentRole::Worker,
            status: AgentStatus::Active,
            api_key_hash: hash,
            api_key_prefix: super::api_key_prefix_bucket(raw_key),
            metadata: None,
            created_at: chrono::Utc::now(),
        })
    }

    #[tokio::test]
    async fn authenticates_via_prefix_bucket_and_then_caches() -> anyhow::Result<()> {
        let raw_key = format!("{}{}", super::AGENT_KEY_PREFIX, "a".repeat(64));
        let agent = build_agent(&raw_key)?;
        let expected_id = agent.id.clone();
        let directory = FakeDirectory { agents: vec![agent] };
        let cache = AuthCache::new();

        let ctx = cache
            .authenticate(&raw_key, &directory, &RejectAllSessions)
            .await?;
        assert_eq!(ctx.agent.id, expected_id);

        let ctx_again = cache
            .authenticate(&raw_key, &directory, &RejectAllSessions)
            .await?;
        assert_eq!(ctx_again.agent.id, expected_id);
        Ok(())
    }

    #[tokio::test]
    async fn rejects_suspended_agent_even_on_cache_hit() -> anyhow::Result<()> {
        let raw_key = format!("{}{}", super::AGENT_KEY_PREFIX, "b".repeat(64));
        let mut agent = build_agent(&raw_key)?;
        let directory_active = FakeDirectory {
            agents: vec![agent.clone()],
        };
        let cache = AuthCache::new();
        cache
            .authenticate(&raw_key, &directory_active, &RejectAllSessions)
            .await?;

        agent.status = AgentStatus::Suspended;
        let directory_suspended = FakeDirectory { agents: vec![agent] };
        let result = cache
            .authenticate(&raw_key, &directory_suspended, &RejectAllSessions)
            .await;
        assert!(matches!(result, Err(AuthError::AgentNotActive)));
        Ok(())
    }

    #[tokio::test]
    async fn wrong_key_never_matches() -> anyhow::Result<()> {
        let raw_key = format!("{}{}", super::AGENT_KEY_PREFIX, "c".repeat(64));
        let agent = build_agent(&raw_key)?;
        let directory = FakeDirectory { agents: vec![agent] };
        let cache = AuthCache::new();

        let wrong_key = format!("{}{}", super::AGENT_KEY_PREFIX, "d".repeat(64));
        let result = cache
            .authenticate(&wrong_key, &directory, &RejectAllSessions)
            .await;
        assert!(matches!(result, Err(AuthError::NoMatch)));
        Ok(())
    }

    #[tokio::test]
    async fn invalidate_forces_a_fresh_lookup() -> anyhow::Result<()> {
        let raw_key = format!("{}{}", super::AGENT_KEY_PREFIX, "e".repeat(64));
        let agent = build_agent(&raw_key)?;
        let agent_id = agent.id.clone();
        let directory = FakeDirectory { agents: vec![agent] };
        let cache = AuthCache::new();

        cache
            .authenticate(&raw_key, &directory, &RejectAllSessions)
            .await?;
        cache.invalidate(&agent_id);

        let empty_directory = FakeDirectory { agents: vec![] };
        let result = cache
            .authenticate(&raw_key, &empty_directory, &RejectAllSessions)
            .await;
        assert!(matches!(result, Err(AuthError::NoMatch)));
        Ok(())
    }
}
