//! Wires every Saturn engine into one axum `Router`.

pub mod config;
pub mod domain;
pub mod errors;
pub mod extract;
pub mod routes;
pub mod state;
pub mod throttle;

use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

const SERVICE_NAME: &str = "saturn-gateway";

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn readiness() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ready",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[must_use]
pub fn build_router(state: AppState) -> Router {
    use routes::{agents, auth, proxy, services, wallet, webhooks};

    Router::new()
        .route("/healthz", get(health))
        .route("/readyz", get(readiness))
        .route("/v1/signup", post(auth::signup))
        .route("/v1/auth/login", post(auth::login))
        .route("/v1/agents", post(agents::create_agent).get(agents::list_agents))
        .route(
            "/v1/agents/:agent_id",
            get(agents::get_agent).delete(agents::delete_agent),
        )
        .route("/v1/agents/:agent_id/status", put(agents::set_agent_status))
        .route(
            "/v1/agents/:agent_id/policy",
            get(agents::get_policy)
                .put(agents::replace_policy)
                .patch(agents::patch_policy),
        )
        .route("/v1/agents/:agent_id/policy/kill", post(agents::kill_switch))
        .route("/v1/agents/:agent_id/policy/unkill", post(agents::unkill_switch))
        .route("/v1/services", get(services::list_services))
        .route("/v1/capabilities", get(services::list_capabilities))
        .route("/v1/capabilities/:capability", post(proxy::proxy_via_capability))
        .route("/v1/proxy/:service_slug", post(proxy::proxy_via_service))
        .route("/v1/wallet", get(wallet::get_wallet))
        .route("/v1/wallet/fund", post(wallet::fund))
        .route("/v1/wallet/fund-card", post(wallet::fund_card))
        .route("/v1/wallet/transactions", get(wallet::list_transactions))
        .route("/internal/webhooks/lightning", post(webhooks::lightning_webhook))
        .route("/internal/webhooks/stripe", post(webhooks::stripe_webhook))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http()),
        )
}

