//! JSON error envelope shared by every route handler.
//!
//! Grounded in the teacher's `api_envelope.rs`: every failure response is
//! `{"error": {"code": "...", "message": "..."}}` with a status code picked
//! from a fixed, machine-readable taxonomy (spec §7) rather than leaking
//! internal error `Display` text for anything except VALIDATION_ERROR.

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use saturn_adapters::AdapterError;
use saturn_auth::AuthError;
use saturn_executor::{ExecutorError, PartialQuote};
use saturn_ledger::LedgerError;
use saturn_policy::PolicyStoreError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    /// `X-Saturn-*` headers known at the point the error was raised. Spec
    /// §6 requires these on every proxy response, including errors — not
    /// just the 2xx/passthrough path.
    pub proxy_headers: Vec<(&'static str, String)>,
}

impl ApiError {
    #[must_use]
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            proxy_headers: Vec::new(),
        }
    }

    /// Attach the quote/audit figures known when a proxy call failed so
    /// the response still carries `X-Saturn-Quoted-Sats` etc.
    #[must_use]
    pub fn with_proxy_headers(mut self, audit_id: Option<&str>, quote: PartialQuote) -> Self {
        self.proxy_headers.push(("x-saturn-quoted-sats", quote.quoted_sats.to_string()));
        self.proxy_headers.push((
            "x-saturn-quoted-usd-cents",
            quote.quoted_usd_cents.to_string(),
        ));
        self.proxy_headers.push(("x-saturn-charged-sats", "0".to_string()));
        self.proxy_headers
            .push(("x-saturn-charged-usd-cents", "0".to_string()));
        self.proxy_headers.push((
            "x-saturn-balance-after",
            quote.balance_after_sats.to_string(),
        ));
        if let Some(audit_id) = audit_id {
            self.proxy_headers.push(("x-saturn-audit-id", audit_id.to_string()));
        }
        self
    }

    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    #[must_use]
    pub fn policy_denied(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "POLICY_DENIED", message)
    }

    #[must_use]
    pub fn insufficient_balance(message: impl Into<String>) -> Self {
        Self::new(StatusCode::PAYMENT_REQUIRED, "INSUFFICIENT_BALANCE", message)
    }

    #[must_use]
    pub fn upstream_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", message)
    }

    #[must_use]
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, "RATE_LIMIT", message)
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!(target: "saturn.gateway", %message, "internal error at the HTTP boundary");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.proxy_headers {
            if let (Ok(name), Ok(value)) = (HeaderName::try_from(*name), HeaderValue::from_str(value)) {
                headers.insert(name, value);
            }
        }
        let body = Json(json!({
            "error": ErrorBody {
                code: self.code,
                message: self.message,
            }
        }));
        (self.status, headers, body).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingToken
            | AuthError::MalformedToken
            | AuthError::NoMatch
            | AuthError::AgentNotActive
            | AuthError::SessionToken(_) => Self::unauthorized(err.to_string()),
        }
    }
}

impl From<PolicyStoreError> for ApiError {
    fn from(err: PolicyStoreError) -> Self {
        match err {
            PolicyStoreError::NotFound(_) => Self::not_found(err.to_string()),
            PolicyStoreError::Store(_) => Self::internal(err.to_string()),
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientBalance(_) => Self::insufficient_balance(err.to_string()),
            LedgerError::WalletNotFound(_) => Self::not_found(err.to_string()),
            // A zero-row settle/release or an adapter handing back
            // final_sats above the held ceiling are both fatal accounting
            // errors, not bad client input — spec §7 calls these out as
            // INTERNAL_ERROR explicitly.
            LedgerError::FinalAmountExceedsHold { .. }
            | LedgerError::AccountingInvariantViolated(_) => Self::internal(err.to_string()),
            LedgerError::Store(_) => Self::internal(err.to_string()),
        }
    }
}

impl From<AdapterError> for ApiError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::UnknownOperation(_) => Self::not_found(err.to_string()),
            AdapterError::InvalidRequest(_) | AdapterError::Misconfigured(_) => {
                Self::validation(err.to_string())
            }
            AdapterError::Transport(_) => Self::upstream_error(err.to_string()),
        }
    }
}

impl From<ExecutorError> for ApiError {
    fn from(err: ExecutorError) -> Self {
        let message = err.to_string();
        match err {
            ExecutorError::AdapterNotFound(_) => Self::not_found(message),
            ExecutorError::PolicyDenied {
                reason,
                audit_id,
                quote,
            } => Self::policy_denied(reason.code()).with_proxy_headers(Some(&audit_id), quote),
            ExecutorError::InsufficientBalance { quote, .. } => {
                Self::insufficient_balance(message).with_proxy_headers(None, quote)
            }
            ExecutorError::UpstreamError {
                audit_id, quote, ..
            } => Self::upstream_error(message).with_proxy_headers(Some(&audit_id), quote),
            ExecutorError::Ledger(inner) => inner.into(),
            ExecutorError::Audit(_) => Self::internal(message),
            ExecutorError::Adapter(inner) => inner.into(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
