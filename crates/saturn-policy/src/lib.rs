//! Policy Engine: evaluates a quoted call against an agent's policy in a
//! fixed, short-circuiting order, and maintains the per-agent daily-spend
//! cache that rule 8 reads.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use saturn_audit::{AuditTrail, SpendCacheInvalidation};
use saturn_core::{AgentId, AgentStatus, Policy, PolicyId};
use saturn_store::{SnapshotStore, StoreError};
use serde::{Deserialize, Serialize};

const DAILY_SPEND_CACHE_TTL_SECONDS: i64 = 60;

/// The machine-readable reason a call was denied. Order here mirrors the
/// evaluation order, not any semantic grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    AgentNotActive,
    KillSwitchActive,
    ServiceDenied,
    ServiceNotAllowed,
    CapabilityDenied,
    CapabilityNotAllowed,
    PerCallLimitExceeded,
    DailyLimitExceeded,
}

impl DenialReason {
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::AgentNotActive => "agent_not_active",
            Self::KillSwitchActive => "kill_switch_active",
            Self::ServiceDenied => "service_denied",
            Self::ServiceNotAllowed => "service_not_allowed",
            Self::CapabilityDenied => "capability_denied",
            Self::CapabilityNotAllowed => "capability_not_allowed",
            Self::PerCallLimitExceeded => "per_call_limit_exceeded",
            Self::DailyLimitExceeded => "daily_limit_exceeded",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    Allowed,
    Denied(DenialReason),
}

/// Everything rule evaluation needs about the call being quoted.
pub struct EvaluationContext<'a> {
    pub agent_status: AgentStatus,
    pub policy: &'a Policy,
    pub service_slug: &'a str,
    pub capability: Option<&'a str>,
    pub quoted_sats: u64,
}

/// Rules 1-7: every check that does not need the daily-spend aggregate.
/// Kept separate from rule 8 so a caller can avoid the daily-spend query
/// entirely when an earlier rule already denies the call (property 4).
#[must_use]
fn evaluate_before_daily_limit(ctx: &EvaluationContext<'_>) -> Option<DenialReason> {
    if ctx.agent_status != AgentStatus::Active {
        return Some(DenialReason::AgentNotActive);
    }
    if ctx.policy.kill_switch {
        return Some(DenialReason::KillSwitchActive);
    }
    if let Some(denied) = &ctx.policy.denied_services {
        if denied.iter().any(|slug| slug == ctx.service_slug) {
            return Some(DenialReason::ServiceDenied);
        }
    }
    if let Some(allowed) = &ctx.policy.allowed_services {
        if !allowed.iter().any(|slug| slug == ctx.service_slug) {
            return Some(DenialReason::ServiceNotAllowed);
        }
    }
    if let Some(capability) = ctx.capability {
        if let Some(denied) = &ctx.policy.denied_capabilities {
            if denied.iter().any(|verb| verb == capability) {
                return Some(DenialReason::CapabilityDenied);
            }
        }
        if let Some(allowed) = &ctx.policy.allowed_capabilities {
            if !allowed.iter().any(|verb| verb == capability) {
                return Some(DenialReason::CapabilityNotAllowed);
            }
        }
    }
    if let Some(max_per_call) = ctx.policy.max_per_call_sats {
        if ctx.quoted_sats > max_per_call {
            return Some(DenialReason::PerCallLimitExceeded);
        }
    }
    None
}

/// Evaluate a quote against policy in the fixed, short-circuiting order.
/// `daily_spend_sats` is only consulted by rule 8, and only if rules 1-7
/// all pass — callers that can avoid computing it until needed should
/// prefer [`evaluate_before_daily_limit`] directly (see `evaluate_quote`).
#[must_use]
pub fn evaluate(ctx: &EvaluationContext<'_>, daily_spend_sats: u64) -> PolicyDecision {
    if let Some(reason) = evaluate_before_daily_limit(ctx) {
        return PolicyDecision::Denied(reason);
    }
    if let Some(max_per_day) = ctx.policy.max_per_day_sats {
        if daily_spend_sats + ctx.quoted_sats > max_per_day {
            return PolicyDecision::Denied(DenialReason::DailyLimitExceeded);
        }
    }

    PolicyDecision::Allowed
}

struct CacheEntry {
    amount_sats: u64,
    cached_at: DateTime<Utc>,
}

/// Bounded, per-agent cache of `daily_spend_sats`. Backed by a plain
/// `Mutex<HashMap>` (no persistence): losing this cache on restart only
/// costs one recompute per agent, never correctness.
#[derive(Default)]
pub struct DailySpendCache {
    entries: Mutex<HashMap<AgentId, CacheEntry>>,
}

impl DailySpendCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, agent_id: &AgentId, now: DateTime<Utc>) -> Option<u64> {
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = entries.get(agent_id)?;
        if now - entry.cached_at > Duration::seconds(DAILY_SPEND_CACHE_TTL_SECONDS) {
            return None;
        }
        Some(entry.amount_sats)
    }

    fn put(&self, agent_id: AgentId, amount_sats: u64, now: DateTime<Utc>) {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.insert(
            agent_id,
            CacheEntry {
                amount_sats,
                cached_at: now,
            },
        );
    }
}

impl SpendCacheInvalidation for DailySpendCache {
    fn invalidate(&self, agent_id: &AgentId) {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.remove(agent_id);
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct PolicyState {
    policies: HashMap<AgentId, Policy>,
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyStoreError {
    #[error("no policy found for agent {0}")]
    NotFound(AgentId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Owns the policy records and the daily-spend cache, and is the thing
/// the proxy executor calls to evaluate a quote end to end.
#[derive(Clone)]
pub struct PolicyEngine {
    store: SnapshotStore<PolicyState>,
    cache: std::sync::Arc<DailySpendCache>,
}

impl PolicyEngine {
    #[must_use]
    pub fn new(store: SnapshotStore<PolicyState>, cache: std::sync::Arc<DailySpendCache>) -> Self {
        Self { store, cache }
    }

    pub async fn create_policy(&self, agent_id: AgentId) -> Result<Policy, PolicyStoreError> {
        let policy = Policy {
            id: PolicyId::generate(),
            agent_id: agent_id.clone(),
            max_per_call_sats: None,
            max_per_day_sats: None,
            max_balance_sats: None,
            allowed_services: None,
            denied_services: None,
            allowed_capabilities: None,
            denied_capabilities: None,
            kill_switch: false,
        };
        self.store
            .mutate(move |state| -> Result<Policy, PolicyStoreError> {
                state.policies.insert(agent_id.clone(), policy.clone());
                Ok(policy.clone())
            })
            .await
    }

    pub async fn get_policy(&self, agent_id: &AgentId) -> Result<Policy, PolicyStoreError> {
        let agent_id_key = agent_id.clone();
        self.store
            .view(move |state| state.policies.get(&agent_id_key).cloned())
            .await
            .ok_or_else(|| PolicyStoreError::NotFound(agent_id.clone()))
    }

    /// Replace a policy wholesale (PUT semantics) and invalidate its cache.
    pub async fn replace_policy(
        &self,
        agent_id: &AgentId,
        mut policy: Policy,
    ) -> Result<Policy, PolicyStoreError> {
        policy.agent_id = agent_id.clone();
        let agent_id = agent_id.clone();
        let result = self
            .store
            .mutate(move |state| -> Result<Policy, PolicyStoreError> {
                state.policies.insert(agent_id.clone(), policy.clone());
                Ok(policy.clone())
            })
            .await?;
        self.cache.invalidate(&result.agent_id);
        Ok(result)
    }

    /// Merge-patch select fields (PATCH semantics) and invalidate its cache.
    pub async fn patch_policy(
        &self,
        agent_id: &AgentId,
        patch: impl FnOnce(&mut Policy) + Send + 'static,
    ) -> Result<Policy, PolicyStoreError> {
        let agent_id_key = agent_id.clone();
        let result = self
            .store
            .mutate(move |state| -> Result<Policy, PolicyStoreError> {
                let policy = state
                    .policies
                    .get_mut(&agent_id_key)
                    .ok_or_else(|| PolicyStoreError::NotFound(agent_id_key.clone()))?;
                patch(policy);
                Ok(policy.clone())
            })
            .await?;
        self.cache.invalidate(agent_id);
        Ok(result)
    }

    pub async fn set_kill_switch(
        &self,
        agent_id: &AgentId,
        kill_switch: bool,
    ) -> Result<Policy, PolicyStoreError> {
        self.patch_policy(agent_id, move |policy| policy.kill_switch = kill_switch)
            .await
    }

    /// Drop a deleted agent's policy and any cached daily-spend figure for
    /// it. Idempotent: deleting twice is not an error.
    pub async fn delete_policy(&self, agent_id: &AgentId) -> Result<(), PolicyStoreError> {
        let agent_id_key = agent_id.clone();
        self.store
            .mutate(move |state| -> Result<(), PolicyStoreError> {
                state.policies.remove(&agent_id_key);
                Ok(())
            })
            .await?;
        self.cache.invalidate(agent_id);
        Ok(())
    }

    /// Evaluate a quote, consulting the daily-spend cache (and the audit
    /// trail on a cache miss) only when rules 1-7 all pass *and* the
    /// policy has a daily cap. An earlier denial (e.g. `kill_switch`)
    /// short-circuits before any daily-spend lookup is attempted.
    pub async fn evaluate_quote(
        &self,
        agent_status: AgentStatus,
        policy: &Policy,
        service_slug: &str,
        capability: Option<&str>,
        quoted_sats: u64,
        audit: &AuditTrail,
        now: DateTime<Utc>,
    ) -> PolicyDecision {
        let ctx = EvaluationContext {
            agent_status,
            policy,
            service_slug,
            capability,
            quoted_sats,
        };

        if let Some(reason) = evaluate_before_daily_limit(&ctx) {
            return PolicyDecision::Denied(reason);
        }

        let Some(max_per_day) = policy.max_per_day_sats else {
            return PolicyDecision::Allowed;
        };

        let daily_spend_sats = match self.cache.get(&policy.agent_id, now) {
            Some(cached) => cached,
            None => {
                let fresh = audit.daily_spend_sats(&policy.agent_id, now).await;
                self.cache.put(policy.agent_id.clone(), fresh, now);
                fresh
            }
        };

        if daily_spend_sats + quoted_sats > max_per_day {
            return PolicyDecision::Denied(DenialReason::DailyLimitExceeded);
        }

        PolicyDecision::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::{AgentStatus, DenialReason, EvaluationContext, PolicyDecision, evaluate};
    use saturn_core::{AgentId, Policy, PolicyId};

    fn base_policy() -> Policy {
        Policy {
            id: PolicyId::generate(),
            agent_id: AgentId::generate(),
            max_per_call_sats: None,
            max_per_day_sats: None,
            max_balance_sats: None,
            allowed_services: None,
            denied_services: None,
            allowed_capabilities: None,
            denied_capabilities: None,
            kill_switch: false,
        }
    }

    #[test]
    fn kill_switch_short_circuits_before_service_checks() {
        let mut policy = base_policy();
        policy.kill_switch = true;
        policy.denied_services = Some(vec!["openai".to_string()]);
        let ctx = EvaluationContext {
            agent_status: AgentStatus::Active,
            policy: &policy,
            service_slug: "anthropic",
            capability: None,
            quoted_sats: 10,
        };
        assert_eq!(
            evaluate(&ctx, 0),
            PolicyDecision::Denied(DenialReason::KillSwitchActive)
        );
    }

    #[test]
    fn deny_list_wins_over_allow_list() {
        let mut policy = base_policy();
        policy.allowed_services = Some(vec!["openai".to_string()]);
        policy.denied_services = Some(vec!["openai".to_string()]);
        let ctx = EvaluationContext {
            agent_status: AgentStatus::Active,
            policy: &policy,
            service_slug: "openai",
            capability: None,
            quoted_sats: 10,
        };
        assert_eq!(
            evaluate(&ctx, 0),
            PolicyDecision::Denied(DenialReason::ServiceDenied)
        );
    }

    #[test]
    fn capability_checks_are_skipped_for_legacy_provider_routes() {
        let mut policy = base_policy();
        policy.allowed_capabilities = Some(vec!["search".to_string()]);
        let ctx = EvaluationContext {
            agent_status: AgentStatus::Active,
            policy: &policy,
            service_slug: "openai",
            capability: None,
            quoted_sats: 10,
        };
        assert_eq!(evaluate(&ctx, 0), PolicyDecision::Allowed);
    }

    #[test]
    fn daily_limit_counts_existing_spend_plus_quote() {
        let mut policy = base_policy();
        policy.max_per_day_sats = Some(1_000);
        let ctx = EvaluationContext {
            agent_status: AgentStatus::Active,
            policy: &policy,
            service_slug: "openai",
            capability: None,
            quoted_sats: 200,
        };
        assert_eq!(
            evaluate(&ctx, 900),
            PolicyDecision::Denied(DenialReason::DailyLimitExceeded)
        );
        assert_eq!(evaluate(&ctx, 700), PolicyDecision::Allowed);
    }

    #[tokio::test]
    async fn kill_switch_short_circuits_before_any_daily_spend_query() -> anyhow::Result<()> {
        use super::{DailySpendCache, PolicyEngine, PolicyState};
        use saturn_audit::{AuditState, AuditTrail, NoopInvalidation};
        use saturn_store::SnapshotStore;
        use std::sync::Arc;

        let mut policy = base_policy();
        policy.kill_switch = true;
        policy.max_per_day_sats = Some(1_000);
        let agent_id = policy.agent_id.clone();

        let cache = Arc::new(DailySpendCache::new());
        let policy_store: SnapshotStore<PolicyState> = SnapshotStore::new(None);
        let engine = PolicyEngine::new(policy_store, cache.clone());
        let audit_store: SnapshotStore<AuditState> = SnapshotStore::new(None);
        let audit = AuditTrail::new(audit_store, Arc::new(NoopInvalidation));

        let decision = engine
            .evaluate_quote(
                AgentStatus::Active,
                &policy,
                "openai",
                None,
                10,
                &audit,
                chrono::Utc::now(),
            )
            .await;
        assert_eq!(decision, PolicyDecision::Denied(DenialReason::KillSwitchActive));

        // If the daily-spend query had run, evaluate_quote would have
        // populated this cache entry on the way past rule 8.
        assert!(
            cache.get(&agent_id, chrono::Utc::now()).is_none(),
            "kill_switch denial must short-circuit before the daily-spend cache is ever touched"
        );
        Ok(())
    }
}
