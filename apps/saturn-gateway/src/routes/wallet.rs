//! `/v1/wallet`, `/v1/wallet/fund`, `/v1/wallet/fund-card`,
//! `/v1/wallet/transactions`.

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{Duration, Utc};
use saturn_core::{Currency, Transaction, TransactionType, Wallet};
use serde::{Deserialize, Serialize};

use crate::errors::{ApiError, ApiResult};
use crate::extract::authenticate;
use crate::state::AppState;

const DEFAULT_TRANSACTIONS_PAGE_SIZE: usize = 50;

#[derive(Debug, Serialize)]
pub struct WalletView {
    pub wallet_id: String,
    pub balance_sats: u64,
    pub held_sats: u64,
    pub balance_usd_cents: u64,
    pub held_usd_cents: u64,
    pub lifetime_in_sats: u64,
    pub lifetime_out_sats: u64,
    pub lifetime_in_usd_cents: u64,
    pub lifetime_out_usd_cents: u64,
}

impl WalletView {
    fn new(wallet_id: &str, wallet: Wallet) -> Self {
        Self {
            wallet_id: wallet_id.to_string(),
            balance_sats: wallet.balance_sats,
            held_sats: wallet.held_sats,
            balance_usd_cents: wallet.balance_usd_cents,
            held_usd_cents: wallet.held_usd_cents,
            lifetime_in_sats: wallet.lifetime_in_sats,
            lifetime_out_sats: wallet.lifetime_out_sats,
            lifetime_in_usd_cents: wallet.lifetime_in_usd_cents,
            lifetime_out_usd_cents: wallet.lifetime_out_usd_cents,
        }
    }
}

pub async fn get_wallet(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<WalletView>> {
    let agent = authenticate(&state, &headers).await?;
    let account = state.domain.account(&agent.account_id).await.map_err(|error| {
        ApiError::internal(format!("account lookup failed for active agent: {error}"))
    })?;
    let wallet = state.ledger.wallet(&account.wallet_id).await?;
    Ok(Json(WalletView::new(account.wallet_id.as_str(), wallet)))
}

#[derive(Debug, Deserialize)]
pub struct FundRequest {
    pub amount_sats: u64,
}

#[derive(Debug, Serialize)]
pub struct FundResponse {
    pub invoice_id: String,
    pub payment_request: String,
    pub r_hash: String,
    pub amount_sats: u64,
    pub expires_at: chrono::DateTime<Utc>,
}

pub async fn fund(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<FundRequest>,
) -> ApiResult<Json<FundResponse>> {
    let agent = authenticate(&state, &headers).await?;
    if body.amount_sats == 0 {
        return Err(ApiError::validation("amount_sats must be greater than zero"));
    }
    let account = state.domain.account(&agent.account_id).await.map_err(|error| {
        ApiError::internal(format!("account lookup failed for active agent: {error}"))
    })?;

    let created = state
        .lightning_node
        .create_invoice(body.amount_sats, &format!("saturn wallet fund {}", account.account.id))
        .await
        .map_err(|error| ApiError::upstream_error(error.to_string()))?;

    let expires_at = Utc::now() + Duration::seconds(state.config.invoice_ttl_seconds);
    let invoice = state
        .invoices
        .create_invoice(
            account.wallet_id,
            created.amount_sats,
            created.payment_request,
            created.r_hash,
            expires_at,
        )
        .await
        .map_err(|error| ApiError::internal(error.to_string()))?;

    Ok(Json(FundResponse {
        invoice_id: invoice.id.to_string(),
        payment_request: invoice.payment_request,
        r_hash: invoice.r_hash,
        amount_sats: invoice.amount_sats,
        expires_at: invoice.expires_at,
    }))
}

#[derive(Debug, Deserialize)]
pub struct FundCardRequest {
    pub amount_usd_cents: u64,
}

#[derive(Debug, Serialize)]
pub struct FundCardResponse {
    pub checkout_session_id: String,
    pub provider_session_id: String,
    pub amount_usd_cents: u64,
    pub amount_sats: u64,
}

pub async fn fund_card(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<FundCardRequest>,
) -> ApiResult<Json<FundCardResponse>> {
    let agent = authenticate(&state, &headers).await?;
    if body.amount_usd_cents == 0 {
        return Err(ApiError::validation(
            "amount_usd_cents must be greater than zero",
        ));
    }
    let account = state.domain.account(&agent.account_id).await.map_err(|error| {
        ApiError::internal(format!("account lookup failed for active agent: {error}"))
    })?;

    let rate = state.pricing.current_rate().await.btc_usd;
    let amount_sats = saturn_pricing::usd_cents_to_sats(body.amount_usd_cents, rate);
    let provider_session_id = saturn_core::generate_id("pcs");

    let session = state
        .checkout
        .create_session(
            account.wallet_id,
            body.amount_usd_cents,
            rate,
            amount_sats,
            provider_session_id.clone(),
        )
        .await
        .map_err(|error| ApiError::internal(error.to_string()))?;

    Ok(Json(FundCardResponse {
        checkout_session_id: session.id.to_string(),
        provider_session_id,
        amount_usd_cents: session.amount_usd_cents,
        amount_sats: session.amount_sats,
    }))
}

#[derive(Debug, Deserialize)]
pub struct TransactionsQuery {
    pub cursor: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct TransactionView {
    pub id: String,
    pub transaction_type: &'static str,
    pub currency: &'static str,
    pub amount_sats: u64,
    pub amount_usd_cents: u64,
    pub balance_after_sats: u64,
    pub balance_after_usd_cents: u64,
    pub reference_type: String,
    pub reference_id: String,
    pub description: String,
    pub created_at: chrono::DateTime<Utc>,
}

impl From<Transaction> for TransactionView {
    fn from(txn: Transaction) -> Self {
        Self {
            id: txn.id.to_string(),
            transaction_type: match txn.transaction_type {
                TransactionType::CreditLightning => "credit_lightning",
                TransactionType::CreditCard => "credit_card",
                TransactionType::DebitProxyCall => "debit_proxy_call",
                TransactionType::Refund => "refund",
            },
            currency: match txn.currency {
                Currency::Sats => "sats",
                Currency::UsdCents => "usd_cents",
            },
            amount_sats: txn.amount_sats,
            amount_usd_cents: txn.amount_usd_cents,
            balance_after_sats: txn.balance_after_sats,
            balance_after_usd_cents: txn.balance_after_usd_cents,
            reference_type: txn.reference_type,
            reference_id: txn.reference_id,
            description: txn.description,
            created_at: txn.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TransactionsPage {
    pub transactions: Vec<TransactionView>,
    pub next_cursor: Option<usize>,
}

pub async fn list_transactions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TransactionsQuery>,
) -> ApiResult<Json<TransactionsPage>> {
    let agent = authenticate(&state, &headers).await?;
    let account = state.domain.account(&agent.account_id).await.map_err(|error| {
        ApiError::internal(format!("account lookup failed for active agent: {error}"))
    })?;

    let mut transactions = state.ledger.transactions_for_wallet(&account.wallet_id).await;
    transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let cursor = query.cursor.unwrap_or(0);
    let limit = query.limit.unwrap_or(DEFAULT_TRANSACTIONS_PAGE_SIZE).min(200);
    let page: Vec<Transaction> = transactions.iter().skip(cursor).take(limit).cloned().collect();
    let next_cursor = if cursor + page.len() < transactions.len() {
        Some(cursor + page.len())
    } else {
        None
    };

    Ok(Json(TransactionsPage {
        transactions: page.into_iter().map(TransactionView::from).collect(),
        next_cursor,
    }))
}
