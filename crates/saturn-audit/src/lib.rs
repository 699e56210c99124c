//! Append-only audit trail of every attempted proxy call.
//!
//! Rows are never mutated after insert. Before a row is written, its
//! `request_body` is walked recursively and any object key that looks like
//! a credential is redacted — agents can and do put API keys inside the
//! bodies they proxy.

use std::sync::Arc;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use saturn_core::{AgentId, AuditLog, AuditLogId, PolicyResult};
use saturn_store::{SnapshotStore, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const SENSITIVE_KEYS: &[&str] = &[
    "authorization",
    "x-api-key",
    "api_key",
    "apikey",
    "api-key",
    "token",
    "secret",
    "password",
    "credential",
    "credentials",
    "access_token",
    "refresh_token",
];

const REDACTED_PLACEHOLDER: &str = "[REDACTED]";

/// Recursively redact any object key whose lowercased name matches the
/// sensitive-key set. Arrays and nested objects are walked; scalars pass
/// through unchanged.
#[must_use]
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = serde_json::Map::with_capacity(map.len());
            for (key, inner) in map {
                if SENSITIVE_KEYS.contains(&key.to_ascii_lowercase().as_str()) {
                    redacted.insert(key.clone(), Value::String(REDACTED_PLACEHOLDER.to_string()));
                } else {
                    redacted.insert(key.clone(), redact(inner));
                }
            }
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

/// Implemented by the policy engine's daily-spend cache. The audit trail
/// invalidates an agent's cached daily spend the moment it logs a new
/// allowed call, so the next policy evaluation recomputes against the
/// freshly-written row.
pub trait SpendCacheInvalidation: Send + Sync {
    fn invalidate(&self, agent_id: &AgentId);
}

pub struct NoopInvalidation;

impl SpendCacheInvalidation for NoopInvalidation {
    fn invalidate(&self, _agent_id: &AgentId) {}
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AuditState {
    rows: Vec<AuditLog>,
}

/// Fields the caller supplies; `id` and `created_at` are assigned here.
pub struct AuditLogEntry {
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
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct AuditTrail {
    store: SnapshotStore<AuditState>,
    invalidation: Arc<dyn SpendCacheInvalidation>,
}

impl AuditTrail {
    #[must_use]
    pub fn new(store: SnapshotStore<AuditState>, invalidation: Arc<dyn SpendCacheInvalidation>) -> Self {
        Self { store, invalidation }
    }

    /// Write exactly one row for this attempt, regardless of outcome.
    pub async fn record(&self, entry: AuditLogEntry) -> Result<AuditLog, AuditError> {
        let row = AuditLog {
            id: AuditLogId::generate(),
            agent_id: entry.agent_id.clone(),
            service_slug: entry.service_slug,
            capability: entry.capability,
            operation: entry.operation,
            request_body: redact(&entry.request_body),
            policy_result: entry.policy_result,
            policy_reason: entry.policy_reason,
            quoted_sats: entry.quoted_sats,
            charged_sats: entry.charged_sats,
            quoted_usd_cents: entry.quoted_usd_cents,
            charged_usd_cents: entry.charged_usd_cents,
            upstream_status: entry.upstream_status,
            upstream_latency_ms: entry.upstream_latency_ms,
            error: entry.error,
            created_at: Utc::now(),
        };

        let stored = self
            .store
            .mutate(|state| -> Result<AuditLog, AuditError> {
                state.rows.push(row.clone());
                Ok(row.clone())
            })
            .await?;

        if stored.policy_result == PolicyResult::Allowed {
            self.invalidation.invalidate(&stored.agent_id);
        }

        Ok(stored)
    }

    /// Sum of `charged_sats` across allowed calls since UTC midnight.
    pub async fn daily_spend_sats(&self, agent_id: &AgentId, now: DateTime<Utc>) -> u64 {
        let midnight = Utc
            .with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0)
            .single()
            .unwrap_or(now);
        let agent_id = agent_id.clone();

        self.store
            .view(move |state| {
                state
                    .rows
                    .iter()
                    .filter(|row| {
                        row.agent_id == agent_id
                            && row.policy_result == PolicyResult::Allowed
                            && row.created_at >= midnight
                    })
                    .filter_map(|row| row.charged_sats)
                    .sum()
            })
            .await
    }

    pub async fn rows_for_agent(&self, agent_id: &AgentId, limit: usize) -> Vec<AuditLog> {
        let agent_id = agent_id.clone();
        self.store
            .view(move |state| {
                state
                    .rows
                    .iter()
                    .rev()
                    .filter(|row| row.agent_id == agent_id)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::{AuditLogEntry, AuditState, AuditTrail, NoopInvalidation, redact};
    use saturn_core::{AgentId, PolicyResult};
    use saturn_store::SnapshotStore;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn redact_walks_nested_objects_and_arrays() {
        let input = json!({
            "prompt": "hello",
            "headers": { "Authorization": "Bearer xyz", "Content-Type": "json" },
            "batch": [{ "api_key": "sk_live_123" }, { "prompt": "again" }],
        });
        let redacted = redact(&input);
        assert_eq!(redacted["headers"]["Authorization"].clone(), json!("[REDACTED]"));
        assert_eq!(redacted["headers"]["Content-Type"].clone(), json!("json"));
        assert_eq!(redacted["batch"][0]["api_key"].clone(), json!("[REDACTED]"));
        assert_eq!(redacted["batch"][1]["prompt"].clone(), json!("again"));
        assert_eq!(redacted["prompt"].clone(), json!("hello"));
    }

    #[tokio::test]
    async fn daily_spend_sums_only_allowed_charged_rows() -> anyhow::Result<()> {
        let store: SnapshotStore<AuditState> = SnapshotStore::new(None);
        let trail = AuditTrail::new(store, Arc::new(NoopInvalidation));
        let agent_id = AgentId::generate();

        trail
            .record(AuditLogEntry {
                agent_id: agent_id.clone(),
                service_slug: "openai".to_string(),
                capability: Some("reason".to_string()),
                operation: Some("chat".to_string()),
                request_body: json!({}),
                policy_result: PolicyResult::Allowed,
                policy_reason: None,
                quoted_sats: 100,
                charged_sats: Some(90),
                quoted_usd_cents: 0,
                charged_usd_cents: None,
                upstream_status: Some(200),
                upstream_latency_ms: Some(120),
                error: None,
            })
            .await?;

        trail
            .record(AuditLogEntry {
                agent_id: agent_id.clone(),
                service_slug: "openai".to_string(),
                capability: Some("reason".to_string()),
                operation: Some("chat".to_string()),
                request_body: json!({}),
                policy_result: PolicyResult::Denied,
                policy_reason: Some("kill_switch_active".to_string()),
                quoted_sats: 100,
                charged_sats: None,
                quoted_usd_cents: 0,
                charged_usd_cents: None,
                upstream_status: None,
                upstream_latency_ms: None,
                error: None,
            })
            .await?;

        let spend = trail.daily_spend_sats(&agent_id, chrono::Utc::now()).await;
        assert_eq!(spend, 90);
        Ok(())
    }
}
