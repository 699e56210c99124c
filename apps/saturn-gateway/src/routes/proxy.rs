//! `/v1/capabilities/:capability` and `/v1/proxy/:service_slug` — the two
//! routes that actually drive a metered upstream call through the
//! `ProxyExecutor`.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use saturn_adapters::AdapterRequest;
use saturn_executor::{ExecuteRequest, ExecuteResponse};
use serde_json::Value;

use crate::errors::{ApiError, ApiResult};
use crate::extract::authenticate;
use crate::state::AppState;

/// Body every proxy call accepts: the downstream operation name, the
/// request Saturn relays verbatim, and (for `GenericHttp`) the upstream
/// path/method to call through.
#[derive(Debug, serde::Deserialize)]
pub struct ProxyCallRequest {
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub body: Value,
}

fn default_method() -> String {
    "POST".to_string()
}

fn response_headers(response: &ExecuteResponse, capability: Option<&str>, service_slug: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let entries: &[(&str, String)] = &[
        ("x-saturn-audit-id", response.metadata.audit_id.clone()),
        ("x-saturn-quoted-sats", response.metadata.quoted_sats.to_string()),
        ("x-saturn-charged-sats", response.metadata.charged_sats.to_string()),
        (
            "x-saturn-quoted-usd-cents",
            response.metadata.quoted_usd_cents.to_string(),
        ),
        (
            "x-saturn-charged-usd-cents",
            response.metadata.charged_usd_cents.to_string(),
        ),
        (
            "x-saturn-balance-after",
            response.metadata.balance_after_sats.to_string(),
        ),
        ("x-saturn-provider", service_slug.to_string()),
    ];
    for (name, value) in entries {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(*name),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }
    if let Some(capability) = capability {
        if let Ok(value) = HeaderValue::from_str(capability) {
            headers.insert(HeaderName::from_static("x-saturn-capability"), value);
        }
    }
    headers
}

async fn run_proxy_call(
    state: &AppState,
    headers: &HeaderMap,
    service_slug: String,
    capability: Option<String>,
    body: ProxyCallRequest,
) -> ApiResult<Response> {
    let agent = authenticate(state, headers).await?;
    let policy = state.policy.get_policy(&agent.id).await?;
    let account = state
        .domain
        .account(&agent.account_id)
        .await
        .map_err(|error| ApiError::internal(format!("account lookup failed: {error}")))?;

    let operation = body.operation.clone().unwrap_or_else(|| service_slug.clone());
    let adapter_request = AdapterRequest {
        operation,
        method: body.method,
        path: body.path,
        headers: forwardable_headers(headers),
        body: body.body,
    };

    let request = ExecuteRequest {
        agent_id: agent.id.clone(),
        agent_status: agent.status,
        wallet_id: account.wallet_id,
        default_currency: account.account.default_currency,
        policy,
        service_slug: service_slug.clone(),
        capability: capability.clone(),
        adapter_request,
    };

    let response = state.executor.execute(request).await?;
    let response_headers = response_headers(&response, capability.as_deref(), &service_slug);
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK);
    let normalized = saturn_normalizer::normalize(
        capability.as_deref().unwrap_or(""),
        &service_slug,
        &response.data,
    );

    Ok((status, response_headers, Json(normalized)).into_response())
}

/// Strips the bearer token used to authenticate against Saturn itself;
/// everything else passes through for the adapter's own auth injection
/// and body shaping to work with.
fn forwardable_headers(headers: &HeaderMap) -> std::collections::HashMap<String, String> {
    headers
        .iter()
        .filter(|(name, _)| *name != axum::http::header::AUTHORIZATION)
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

pub async fn proxy_via_capability(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(capability): Path<String>,
    Json(body): Json<ProxyCallRequest>,
) -> ApiResult<Response> {
    let service_slug = state
        .capabilities
        .resolve(&capability)
        .await
        .map_err(|error| ApiError::not_found(error.to_string()))?;
    run_proxy_call(&state, &headers, service_slug, Some(capability), body).await
}

pub async fn proxy_via_service(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(service_slug): Path<String>,
    Json(body): Json<ProxyCallRequest>,
) -> ApiResult<Response> {
    run_proxy_call(&state, &headers, service_slug, None, body).await
}
