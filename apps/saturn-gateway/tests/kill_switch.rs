//! A killed agent's policy must deny every proxy call, regardless of
//! wallet balance.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

#[tokio::test]
async fn kill_switch_denies_proxy_calls() -> anyhow::Result<()> {
    let state = common::test_state().await?;
    let app = saturn_gateway::build_router(state.clone());

    let signup = common::signup(&app, "killed@example.com", "correct horse battery").await?;
    let api_key = common::str_field(&signup, "api_key")?;
    let agent_id = common::str_field(&signup, "agent_id")?;

    let account = state
        .domain
        .account(&saturn_core::AccountId::from(
            common::str_field(&signup, "account_id")?.as_str(),
        ))
        .await?;
    common::credit_wallet(&state, account.wallet_id.as_str(), 10_000).await?;

    state
        .policy
        .set_kill_switch(&saturn_core::AgentId::from(agent_id.as_str()), true)
        .await?;

    let proxy_body = json!({ "operation": "chat", "path": "/v1/chat", "body": { "prompt": "hi" } });
    let proxy_request = Request::builder()
        .method("POST")
        .uri("/v1/capabilities/reason")
        .header("authorization", format!("Bearer {api_key}"))
        .header("content-type", "application/json")
        .body(Body::from(proxy_body.to_string()))?;
    let proxy_response = app.clone().oneshot(proxy_request).await?;
    assert_eq!(proxy_response.status(), StatusCode::FORBIDDEN);
    let headers = proxy_response.headers().clone();
    let header = |name: &str| -> anyhow::Result<&str> {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| anyhow::anyhow!("missing response header '{name}'"))
    };
    assert_eq!(header("x-saturn-quoted-sats")?, "1000");
    assert_eq!(header("x-saturn-charged-sats")?, "0");
    assert_eq!(header("x-saturn-balance-after")?, "10000");
    assert!(headers.get("x-saturn-audit-id").is_some());

    let body = common::read_json(proxy_response).await?;
    assert_eq!(body["error"]["code"], "POLICY_DENIED");

    let wallet_request = Request::builder()
        .method("GET")
        .uri("/v1/wallet")
        .header("authorization", format!("Bearer {api_key}"))
        .body(Body::empty())?;
    let wallet_response = app.clone().oneshot(wallet_request).await?;
    let wallet = common::read_json(wallet_response).await?;
    assert_eq!(wallet["balance_sats"], 10_000);

    Ok(())
}
