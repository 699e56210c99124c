//! Shared bearer-token extraction for every agent-authenticated route.

use axum::http::HeaderMap;
use saturn_core::Agent;

use crate::errors::{ApiError, ApiResult};
use crate::state::AppState;

#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Authenticates the caller and returns their resolved, active `Agent`.
pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> ApiResult<Agent> {
    let token = bearer_token(headers).ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;
    let context = state
        .auth
        .authenticate(&token, &state.domain, &state.sessions)
        .await?;
    Ok(context.agent)
}

/// Authenticates the caller and requires `AgentRole::Primary`, the role
/// allowed to manage worker agents and policy.
pub async fn authenticate_primary(state: &AppState, headers: &HeaderMap) -> ApiResult<Agent> {
    let agent = authenticate(state, headers).await?;
    if agent.role != saturn_core::AgentRole::Primary {
        return Err(ApiError::unauthorized(
            "only a primary agent may perform this action",
        ));
    }
    Ok(agent)
}
