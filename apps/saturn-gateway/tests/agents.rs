//! Worker-agent lifecycle: create, delete, and the guard against deleting
//! the primary agent.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

#[tokio::test]
async fn primary_can_create_and_delete_a_worker_agent() -> anyhow::Result<()> {
    let state = common::test_state().await?;
    let app = saturn_gateway::build_router(state.clone());

    let signup = common::signup(&app, "owner@example.com", "correct horse battery").await?;
    let api_key = common::str_field(&signup, "api_key")?;

    let create_request = Request::builder()
        .method("POST")
        .uri("/v1/agents")
        .header("authorization", format!("Bearer {api_key}"))
        .header("content-type", "application/json")
        .body(Body::from(json!({ "name": "worker-1" }).to_string()))?;
    let create_response = app.clone().oneshot(create_request).await?;
    assert_eq!(create_response.status(), StatusCode::OK);
    let worker = common::read_json(create_response).await?;
    let worker_id = common::str_field(&worker, "id")?;
    assert_eq!(worker["role"], "worker");

    let list_request = Request::builder()
        .method("GET")
        .uri("/v1/agents")
        .header("authorization", format!("Bearer {api_key}"))
        .body(Body::empty())?;
    let list_response = app.clone().oneshot(list_request).await?;
    let agents = common::read_json(list_response).await?;
    let agents = agents
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("expected an array response"))?;
    assert_eq!(agents.len(), 1);

    let delete_request = Request::builder()
        .method("DELETE")
        .uri(format!("/v1/agents/{worker_id}"))
        .header("authorization", format!("Bearer {api_key}"))
        .body(Body::empty())?;
    let delete_response = app.clone().oneshot(delete_request).await?;
    assert_eq!(delete_response.status(), StatusCode::OK);

    let get_request = Request::builder()
        .method("GET")
        .uri(format!("/v1/agents/{worker_id}"))
        .header("authorization", format!("Bearer {api_key}"))
        .body(Body::empty())?;
    let get_response = app.clone().oneshot(get_request).await?;
    assert_eq!(get_response.status(), StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn primary_agent_cannot_be_deleted() -> anyhow::Result<()> {
    let state = common::test_state().await?;
    let app = saturn_gateway::build_router(state.clone());

    let signup = common::signup(&app, "solo@example.com", "correct horse battery").await?;
    let api_key = common::str_field(&signup, "api_key")?;
    let agent_id = common::str_field(&signup, "agent_id")?;

    let delete_request = Request::builder()
        .method("DELETE")
        .uri(format!("/v1/agents/{agent_id}"))
        .header("authorization", format!("Bearer {api_key}"))
        .body(Body::empty())?;
    let delete_response = app.clone().oneshot(delete_request).await?;
    assert_eq!(delete_response.status(), StatusCode::BAD_REQUEST);
    let body = common::read_json(delete_response).await?;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let get_request = Request::builder()
        .method("GET")
        .uri(format!("/v1/agents/{agent_id}"))
        .header("authorization", format!("Bearer {api_key}"))
        .body(Body::empty())?;
    let get_response = app.clone().oneshot(get_request).await?;
    assert_eq!(get_response.status(), StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn replacing_policy_max_balance_propagates_to_the_account_credit_cap() -> anyhow::Result<()> {
    let state = common::test_state().await?;
    let app = saturn_gateway::build_router(state.clone());

    let signup = common::signup(&app, "capped@example.com", "correct horse battery").await?;
    let api_key = common::str_field(&signup, "api_key")?;
    let agent_id = common::str_field(&signup, "agent_id")?;
    let account_id = saturn_core::AccountId::from(common::str_field(&signup, "account_id")?.as_str());

    let put_request = Request::builder()
        .method("PUT")
        .uri(format!("/v1/agents/{agent_id}/policy"))
        .header("authorization", format!("Bearer {api_key}"))
        .header("content-type", "application/json")
        .body(Body::from(json!({ "max_balance_sats": 5_000 }).to_string()))?;
    let put_response = app.clone().oneshot(put_request).await?;
    assert_eq!(put_response.status(), StatusCode::OK);

    let account = state.domain.account(&account_id).await?;
    assert_eq!(account.max_balance_sats, Some(5_000));

    // A credit that respects the cap the way `InvoiceWatcher` reads it:
    // look up the account's cap and pass it through to `Ledger::credit`.
    state
        .ledger
        .credit(
            &account.wallet_id,
            saturn_core::Currency::Sats,
            9_000,
            "invoice",
            "inv_capped_1",
            None,
            account.max_balance_sats,
        )
        .await?;
    let wallet = state.ledger.wallet(&account.wallet_id).await?;
    assert_eq!(wallet.balance_sats, 5_000);

    Ok(())
}
