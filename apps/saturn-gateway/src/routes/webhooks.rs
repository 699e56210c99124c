//! `/internal/webhooks/lightning` and `/internal/webhooks/stripe`.
//!
//! Both endpoints verify a signature and then apply an idempotent credit.
//! Per the contract, a webhook provider should never be retry-stormed by
//! an internal failure: anything past signature verification that goes
//! wrong is logged and still answered with 200.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use saturn_bolt11::InvoiceSettledEvent;
use saturn_checkout::{WebhookEvent, WebhookEventKind};
use saturn_core::CheckoutSessionId;
use serde::Deserialize;

use crate::errors::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct LightningWebhookBody {
    r_hash: String,
    amount_sats: u64,
    #[serde(default)]
    confirmed: bool,
}

pub async fn lightning_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let signature = headers
        .get("x-saturn-signature")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("missing webhook signature"))?;

    saturn_checkout::verify_signature(
        state.config.lightning_webhook_secret.as_bytes(),
        &body,
        signature,
    )
    .map_err(|_| ApiError::unauthorized("invalid webhook signature"))?;

    let payload: LightningWebhookBody = serde_json::from_slice(&body)
        .map_err(|error| ApiError::validation(format!("invalid webhook body: {error}")))?;

    let event = InvoiceSettledEvent {
        r_hash: payload.r_hash,
        amount_sats: payload.amount_sats,
        is_confirmed: payload.confirmed,
    };

    if let Err(error) = state.invoice_watcher.handle_event(&event).await {
        tracing::warn!(
            target: "saturn.gateway.webhooks",
            error = %error,
            "failed to apply lightning webhook event",
        );
    }

    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
struct StripeWebhookBody {
    checkout_session_id: String,
    kind: String,
    #[serde(default)]
    reason: Option<String>,
}

pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let signature = headers
        .get("x-saturn-signature")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("missing webhook signature"))?;

    let payload: StripeWebhookBody = serde_json::from_slice(&body)
        .map_err(|error| ApiError::validation(format!("invalid webhook body: {error}")))?;

    let kind = match payload.kind.as_str() {
        "paid" | "completed" => WebhookEventKind::Paid,
        "refunded" => WebhookEventKind::Refunded,
        other => {
            return Err(ApiError::validation(format!("unknown webhook kind '{other}'")));
        }
    };

    let event = WebhookEvent {
        kind,
        session_id: CheckoutSessionId::from(payload.checkout_session_id.as_str()),
        reason: payload.reason,
    };

    if let Err(error) = state.checkout_webhooks.handle(&body, signature, event).await {
        tracing::warn!(
            target: "saturn.gateway.webhooks",
            error = %error,
            "failed to apply stripe webhook event",
        );
    }

    Ok(StatusCode::OK)
}
