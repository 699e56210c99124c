//! `/v1/signup` and `/v1/auth/login` — the only two unauthenticated
//! routes on the gateway.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::password_hash::rand_core::OsRng;
use argon2::Argon2;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use saturn_core::{AgentRole, Currency, generate_api_key};
use serde::{Deserialize, Serialize};

use crate::errors::{ApiError, ApiResult};
use crate::state::AppState;
use crate::throttle::{
    LOGIN_LIMIT, LOGIN_WINDOW_SECONDS, SIGNUP_LIMIT, SIGNUP_WINDOW_SECONDS, consume_throttle_token,
    request_identity_key,
};

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub default_currency: Option<Currency>,
}

#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub account_id: String,
    pub agent_id: String,
    pub api_key: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub session_token: String,
    pub agent_id: String,
}

fn hash_password(password: &str) -> ApiResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|error| ApiError::internal(format!("failed to hash password: {error}")))
}

fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

pub async fn signup(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SignupRequest>,
) -> ApiResult<Json<SignupResponse>> {
    let key = format!("signup:{}", request_identity_key(&headers));
    consume_throttle_token(&state.throttle, &key, SIGNUP_LIMIT, SIGNUP_WINDOW_SECONDS)
        .await
        .map_err(|retry_after| {
            ApiError::rate_limited(format!("too many signups, retry in {retry_after}s"))
        })?;

    if body.password.len() < 8 {
        return Err(ApiError::validation("password must be at least 8 characters"));
    }

    let password_hash = hash_password(&body.password)?;
    let default_currency = body.default_currency.unwrap_or(Currency::UsdCents);

    let account_id = saturn_core::AccountId::generate();
    let wallet = state.ledger.create_wallet(account_id.clone()).await?;

    let account = state
        .domain
        .create_account(
            account_id,
            body.email,
            password_hash,
            default_currency,
            wallet.id,
        )
        .await
        .map_err(|error| match error {
            crate::domain::DomainStoreError::EmailTaken => {
                ApiError::validation("an account already exists for that email")
            }
            crate::domain::DomainStoreError::Validation { message, .. } => {
                ApiError::validation(message)
            }
            other => ApiError::internal(other.to_string()),
        })?;

    let raw_key = generate_api_key();
    let api_key_hash = saturn_auth::hash_api_key(&raw_key)?;
    let api_key_prefix = saturn_auth::api_key_prefix_bucket(&raw_key);

    let agent = state
        .domain
        .create_agent(
            account.account.id.clone(),
            "primary".to_string(),
            AgentRole::Primary,
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

    Ok(Json(SignupResponse {
        account_id: account.account.id.to_string(),
        agent_id: agent.id.to_string(),
        api_key: raw_key,
    }))
}

pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let key = format!("login:{}", request_identity_key(&headers));
    consume_throttle_token(&state.throttle, &key, LOGIN_LIMIT, LOGIN_WINDOW_SECONDS)
        .await
        .map_err(|retry_after| {
            ApiError::rate_limited(format!("too many login attempts, retry in {retry_after}s"))
        })?;

    let account = state
        .domain
        .account_by_email(&body.email)
        .await
        .ok_or_else(|| ApiError::unauthorized("invalid email or password"))?;

    if !verify_password(&body.password, &account.password_hash) {
        return Err(ApiError::unauthorized("invalid email or password"));
    }

    let agents = state.domain.agents_for_account(&account.account.id).await;
    let primary = agents
        .into_iter()
        .find(|agent| agent.role == AgentRole::Primary)
        .ok_or_else(|| ApiError::internal("account has no primary agent"))?;

    let session_token = state
        .sessions
        .issue(&primary.id, state.config.session_ttl_seconds);

    Ok(Json(LoginResponse {
        session_token,
        agent_id: primary.id.to_string(),
    }))
}
