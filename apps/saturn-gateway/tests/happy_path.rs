//! End-to-end happy path: signup, fund the wallet directly via the
//! ledger (standing in for a settled Lightning invoice), call a metered
//! capability, and check the charge lands on the wallet and the response
//! comes back normalized.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

#[tokio::test]
async fn signup_fund_and_proxy_call_charges_the_wallet() -> anyhow::Result<()> {
    let state = common::test_state().await?;
    let app = saturn_gateway::build_router(state.clone());

    let signup = common::signup(&app, "agent@example.com", "correct horse battery").await?;
    let api_key = common::str_field(&signup, "api_key")?;
    let agent_id = common::str_field(&signup, "agent_id")?;

    let account = state
        .domain
        .account(&saturn_core::AccountId::from(
            common::str_field(&signup, "account_id")?.as_str(),
        ))
        .await?;
    common::credit_wallet(&state, account.wallet_id.as_str(), 10_000).await?;

    let wallet_request = Request::builder()
        .method("GET")
        .uri("/v1/wallet")
        .header("authorization", format!("Bearer {api_key}"))
        .body(Body::empty())?;
    let wallet_response = app.clone().oneshot(wallet_request).await?;
    assert_eq!(wallet_response.status(), StatusCode::OK);
    let wallet = common::read_json(wallet_response).await?;
    assert_eq!(wallet["balance_sats"], 10_000);

    let proxy_body = json!({ "operation": "chat", "path": "/v1/chat", "body": { "prompt": "hi" } });
    let proxy_request = Request::builder()
        .method("POST")
        .uri("/v1/capabilities/reason")
        .header("authorization", format!("Bearer {api_key}"))
        .header("content-type", "application/json")
        .body(Body::from(proxy_body.to_string()))?;
    let proxy_response = app.clone().oneshot(proxy_request).await?;
    assert_eq!(proxy_response.status(), StatusCode::OK);

    let charged_sats = proxy_response
        .headers()
        .get("x-saturn-charged-sats")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .ok_or_else(|| anyhow::anyhow!("charged sats header present"))?;
    assert_eq!(charged_sats, 300);

    let body = common::read_json(proxy_response).await?;
    assert_eq!(body["content"], "hello from echo");
    assert_eq!(body["model"], "echo-1");
    assert_eq!(body["usage"]["total_tokens"], 8);

    let after_request = Request::builder()
        .method("GET")
        .uri("/v1/wallet")
        .header("authorization", format!("Bearer {api_key}"))
        .body(Body::empty())?;
    let after_response = app.clone().oneshot(after_request).await?;
    let after = common::read_json(after_response).await?;
    assert_eq!(after["balance_sats"], 10_000 - 300);

    let transactions_request = Request::builder()
        .method("GET")
        .uri("/v1/wallet/transactions")
        .header("authorization", format!("Bearer {api_key}"))
        .body(Body::empty())?;
    let transactions_response = app.clone().oneshot(transactions_request).await?;
    let transactions = common::read_json(transactions_response).await?;
    let transactions = transactions["transactions"]
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("expected a transactions array"))?;
    assert_eq!(transactions.len(), 2);

    assert!(!agent_id.is_empty());
    Ok(())
}
