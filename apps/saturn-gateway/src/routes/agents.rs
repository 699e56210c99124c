//! `/v1/agents` CRUD and `/v1/agents/:id/policy` management — both
//! restricted to the account's primary agent.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use saturn_core::{AccountId, Agent, AgentId, AgentRole, AgentStatus, Policy, generate_api_key};
use serde::{Deserialize, Serialize};

use crate::errors::{ApiError, ApiResult};
use crate::extract::authenticate_primary;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct AgentView {
    pub id: String,
    pub name: String,
    pub role: &'static str,
    pub status: &'static str,
}

impl From<Agent> for AgentView {
    fn from(agent: Agent) -> Self {
        Self {
            id: agent.id.to_string(),
            name: agent.name,
            role: match agent.role {
                AgentRole::Primary => "primary",
                AgentRole::Worker => "worker",
            },
            status: match agent.status {
                AgentStatus::Active => "active",
                AgentStatus::Suspended => "suspended",
                AgentStatus::Killed => "killed",
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateAgentRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct CreateAgentResponse {
    #[serde(flatten)]
    pub agent: AgentView,
    pub api_key: String,
}

pub async fn create_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateAgentRequest>,
) -> ApiResult<Json<CreateAgentResponse>> {
    let primary = authenticate_primary(&state, &headers).await?;

    if body.name.trim().is_empty() {
        return Err(ApiError::validation("name must not be empty"));
    }

    let raw_key = generate_api_key();
    let api_key_hash = saturn_auth::hash_api_key(&raw_key)?;
    let api_key_prefix = saturn_auth::api_key_prefix_bucket(&raw_key);

    let agent = state
        .domain
        .create_agent(
            primary.account_id,
            body.name,
            AgentRole::Worker,
            api_key_hash,
            api_key_prefix,
        )
        .await
        .map_err(|error| ApiError::internal(error.to_string()))?;

    state
        .policy
        .create_policy(agent.id.clone())
        .await
        .map_err(ApiError::from)?;

    Ok(Json(CreateAgentResponse {
        agent: agent.into(),
        api_key: raw_key,
    }))
}

pub async fn list_agents(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<AgentView>>> {
    let primary = authenticate_primary(&state, &headers).await?;
    let agents = state.domain.agents_for_account(&primary.account_id).await;
    Ok(Json(agents.into_iter().map(AgentView::from).collect()))
}

/// Recomputes the account-level `max_balance_sats` credit cap as the max
/// across the account's surviving agents' policies — a wallet is
/// per-account but policies are per-agent, so this is the bridge between
/// the two. An agent with no cap set contributes nothing to the max; an
/// account with no agent cap at all ends up uncapped. Called after any
/// policy mutation that could change `max_balance_sats` and after agent
/// deletion, so `Ledger::credit`'s cap never drifts from what the
/// account's policies currently say.
async fn recompute_account_max_balance_sats(state: &AppState, account_id: &AccountId) {
    let agents = state.domain.agents_for_account(account_id).await;
    let mut cap: Option<u64> = None;
    for agent in agents {
        if let Ok(policy) = state.policy.get_policy(&agent.id).await {
            if let Some(value) = policy.max_balance_sats {
                cap = Some(cap.map_or(value, |current| current.max(value)));
            }
        }
    }
    let _ = state.domain.set_max_balance_sats(account_id, cap).await;
}

async fn owned_agent(state: &AppState, primary: &Agent, agent_id: &str) -> ApiResult<Agent> {
    let agent_id = AgentId::from(agent_id);
    let agent = state
        .domain
        .agent(&agent_id)
        .await
        .map_err(|_| ApiError::not_found("no such agent"))?;
    if agent.account_id != primary.account_id {
        return Err(ApiError::not_found("no such agent"));
    }
    Ok(agent)
}

pub async fn get_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<AgentView>> {
    let primary = authenticate_primary(&state, &headers).await?;
    let agent = owned_agent(&state, &primary, &agent_id).await?;
    Ok(Json(agent.into()))
}

#[derive(Debug, Deserialize)]
pub struct SetAgentStatusRequest {
    pub status: String,
}

pub async fn set_agent_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(agent_id): Path<String>,
    Json(body): Json<SetAgentStatusRequest>,
) -> ApiResult<Json<AgentView>> {
    let primary = authenticate_primary(&state, &headers).await?;
    let agent = owned_agent(&state, &primary, &agent_id).await?;

    let status = match body.status.as_str() {
        "active" => AgentStatus::Active,
        "suspended" => AgentStatus::Suspended,
        "killed" => AgentStatus::Killed,
        other => {
            return Err(ApiError::validation(format!(
                "unknown status '{other}'; expected active, suspended, or killed"
            )));
        }
    };

    let updated = state
        .domain
        .set_agent_status(&agent.id, status)
        .await
        .map_err(|error| ApiError::internal(error.to_string()))?;
    state.auth.invalidate(&updated.id);

    Ok(Json(updated.into()))
}

/// Deletes a worker agent. The primary agent (the one created at signup)
/// can never be deleted — spec: "may manage other agents and cannot be
/// deleted" — so attempting this against `primary.id` itself, or against
/// any agent with `role == primary`, is a validation error rather than a
/// no-op.
pub async fn delete_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let primary = authenticate_primary(&state, &headers).await?;
    let agent = owned_agent(&state, &primary, &agent_id).await?;

    if agent.role == AgentRole::Primary {
        return Err(ApiError::validation("the primary agent cannot be deleted"));
    }

    state
        .domain
        .delete_agent(&agent.id)
        .await
        .map_err(|error| ApiError::internal(error.to_string()))?;
    state.policy.delete_policy(&agent.id).await?;
    state.auth.invalidate(&agent.id);
    recompute_account_max_balance_sats(&state, &agent.account_id).await;

    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[derive(Debug, Serialize)]
pub struct PolicyView {
    pub agent_id: String,
    pub max_per_call_sats: Option<u64>,
    pub max_per_day_sats: Option<u64>,
    pub max_balance_sats: Option<u64>,
    pub allowed_services: Option<Vec<String>>,
    pub denied_services: Option<Vec<String>>,
    pub allowed_capabilities: Option<Vec<String>>,
    pub denied_capabilities: Option<Vec<String>>,
    pub kill_switch: bool,
}

impl From<Policy> for PolicyView {
    fn from(policy: Policy) -> Self {
        Self {
            agent_id: policy.agent_id.to_string(),
            max_per_call_sats: policy.max_per_call_sats,
            max_per_day_sats: policy.max_per_day_sats,
            max_balance_sats: policy.max_balance_sats,
            allowed_services: policy.allowed_services,
            denied_services: policy.denied_services,
            allowed_capabilities: policy.allowed_capabilities,
            denied_capabilities: policy.denied_capabilities,
            kill_switch: policy.kill_switch,
        }
    }
}

pub async fn get_policy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<PolicyView>> {
    let primary = authenticate_primary(&state, &headers).await?;
    let agent = owned_agent(&state, &primary, &agent_id).await?;
    let policy = state.policy.get_policy(&agent.id).await?;
    Ok(Json(policy.into()))
}

#[derive(Debug, Deserialize)]
pub struct ReplacePolicyRequest {
    pub max_per_call_sats: Option<u64>,
    pub max_per_day_sats: Option<u64>,
    pub max_balance_sats: Option<u64>,
    pub allowed_services: Option<Vec<String>>,
    pub denied_services: Option<Vec<String>>,
    pub allowed_capabilities: Option<Vec<String>>,
    pub denied_capabilities: Option<Vec<String>>,
    #[serde(default)]
    pub kill_switch: bool,
}

pub async fn replace_policy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(agent_id): Path<String>,
    Json(body): Json<ReplacePolicyRequest>,
) -> ApiResult<Json<PolicyView>> {
    let primary = authenticate_primary(&state, &headers).await?;
    let agent = owned_agent(&state, &primary, &agent_id).await?;

    let policy = Policy {
        id: saturn_core::PolicyId::generate(),
        agent_id: agent.id.clone(),
        max_per_call_sats: body.max_per_call_sats,
        max_per_day_sats: body.max_per_day_sats,
        max_balance_sats: body.max_balance_sats,
        allowed_services: body.allowed_services,
        denied_services: body.denied_services,
        allowed_capabilities: body.allowed_capabilities,
        denied_capabilities: body.denied_capabilities,
        kill_switch: body.kill_switch,
    };

    let updated = state.policy.replace_policy(&agent.id, policy).await?;
    recompute_account_max_balance_sats(&state, &agent.account_id).await;
    Ok(Json(updated.into()))
}

/// Merge-patch: every field is "set to this value if present, leave
/// unchanged if absent". Clearing a field back to `null` goes through
/// `PUT` (`replace_policy`) instead, which always takes the full policy.
#[derive(Debug, Deserialize, Default)]
pub struct PatchPolicyRequest {
    #[serde(default)]
    pub max_per_call_sats: Option<u64>,
    #[serde(default)]
    pub max_per_day_sats: Option<u64>,
    #[serde(default)]
    pub max_balance_sats: Option<u64>,
    #[serde(default)]
    pub allowed_services: Option<Vec<String>>,
    #[serde(default)]
    pub denied_services: Option<Vec<String>>,
    #[serde(default)]
    pub allowed_capabilities: Option<Vec<String>>,
    #[serde(default)]
    pub denied_capabilities: Option<Vec<String>>,
    #[serde(default)]
    pub kill_switch: Option<bool>,
}

pub async fn patch_policy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(agent_id): Path<String>,
    Json(body): Json<PatchPolicyRequest>,
) -> ApiResult<Json<PolicyView>> {
    let primary = authenticate_primary(&state, &headers).await?;
    let agent = owned_agent(&state, &primary, &agent_id).await?;

    let updated = state
        .policy
        .patch_policy(&agent.id, move |policy| {
            if let Some(value) = body.max_per_call_sats {
                policy.max_per_call_sats = Some(value);
            }
            if let Some(value) = body.max_per_day_sats {
                policy.max_per_day_sats = Some(value);
            }
            if let Some(value) = body.max_balance_sats {
                policy.max_balance_sats = Some(value);
            }
            if let Some(value) = body.allowed_services {
                policy.allowed_services = Some(value);
            }
            if let Some(value) = body.denied_services {
                policy.denied_services = Some(value);
            }
            if let Some(value) = body.allowed_capabilities {
                policy.allowed_capabilities = Some(value);
            }
            if let Some(value) = body.denied_capabilities {
                policy.denied_capabilities = Some(value);
            }
            if let Some(value) = body.kill_switch {
                policy.kill_switch = value;
            }
        })
        .await?;
    recompute_account_max_balance_sats(&state, &agent.account_id).await;

    Ok(Json(updated.into()))
}

pub async fn kill_switch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<PolicyView>> {
    let primary = authenticate_primary(&state, &headers).await?;
    let agent = owned_agent(&state, &primary, &agent_id).await?;
    let updated = state.policy.set_kill_switch(&agent.id, true).await?;
    recompute_account_max_balance_sats(&state, &agent.account_id).await;
    Ok(Json(updated.into()))
}

pub async fn unkill_switch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<PolicyView>> {
    let primary = authenticate_primary(&state, &headers).await?;
    let agent = owned_agent(&state, &primary, &agent_id).await?;
    let updated = state.policy.set_kill_switch(&agent.id, false).await?;
    recompute_account_max_balance_sats(&state, &agent.account_id).await;
    Ok(Json(updated.into()))
}
