//! `/v1/services` and `/v1/capabilities` — read-only catalog listings.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use saturn_core::{ServiceStatus, ServiceTier};
use serde::Serialize;

use crate::errors::ApiResult;
use crate::extract::authenticate;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ServiceView {
    pub slug: String,
    pub name: String,
    pub tier: &'static str,
    pub status: &'static str,
}

pub async fn list_services(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<ServiceView>>> {
    authenticate(&state, &headers).await?;

    let services = state
        .domain
        .services()
        .await
        .into_iter()
        .map(|service| ServiceView {
            slug: service.slug,
            name: service.name,
            tier: match service.tier {
                ServiceTier::Curated => "curated",
                ServiceTier::Community => "community",
            },
            status: match service.status {
                ServiceStatus::Active => "active",
                ServiceStatus::Disabled => "disabled",
            },
        })
        .collect();

    Ok(Json(services))
}

#[derive(Debug, Serialize)]
pub struct CapabilityProviderView {
    pub service_slug: String,
    pub priority: u32,
    pub active: bool,
}

#[derive(Debug, Serialize)]
pub struct CapabilityView {
    pub capability: String,
    pub providers: Vec<CapabilityProviderView>,
}

pub async fn list_capabilities(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<CapabilityView>>> {
    authenticate(&state, &headers).await?;

    let mut views = Vec::new();
    for capability in state.capabilities.capabilities().await {
        let providers = state.capabilities.providers_for(&capability).await;
        views.push(CapabilityView {
            capability,
            providers: providers
                .into_iter()
                .map(|entry| CapabilityProviderView {
                    service_slug: entry.service_slug,
                    priority: entry.priority,
                    active: entry.active,
                })
                .collect(),
        });
    }

    Ok(Json(views))
}
