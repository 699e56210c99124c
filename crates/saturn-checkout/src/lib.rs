//! Checkout Webhook Handler (C11): verifies a card-provider webhook
//! signature and turns a `paid`/`completed` event into an idempotent
//! ledger credit.
//!
//! The always-200-response rule from the contract belongs to the HTTP
//! boundary, not this crate: the caller maps any [`CheckoutError`] here to
//! a logged-but-200 response so the provider never retry-storms on an
//! internal error.

use std::collections::HashMap;

use chrono::Utc;
use hex::FromHexError;
use hmac::{Hmac, Mac};
use saturn_core::{CheckoutSession, CheckoutSessionId, CheckoutStatus, Currency, Transaction, WalletId};
use saturn_ledger::{Ledger, LedgerError};
use saturn_store::{SnapshotStore, StoreError};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("webhook signature is malformed: {0}")]
    MalformedSignature(#[from] FromHexError),
    #[error("webhook signature does not match the configured secret")]
    InvalidSignature,
    #[error("checkout secret could not be used as an hmac key")]
    Misconfigured,
    #[error("unknown checkout session {0}")]
    UnknownSession(CheckoutSessionId),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Verify `signature_hex` (a hex-encoded HMAC-SHA256 digest) over the raw
/// request body using the shared webhook secret, with a constant-time
/// comparison.
pub fn verify_signature(secret: &[u8], raw_body: &[u8], signature_hex: &str) -> Result<(), CheckoutError> {
    let signature_bytes = hex::decode(signature_hex)?;
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| CheckoutError::Misconfigured)?;
    mac.update(raw_body);
    mac.verify_slice(&signature_bytes)
        .map_err(|_| CheckoutError::InvalidSignature)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookEventKind {
    Paid,
    Refunded,
}

pub struct WebhookEvent {
    pub kind: WebhookEventKind,
    pub session_id: CheckoutSessionId,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutOutcome {
    Credited,
    Ignored,
    RefundLogged,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct CheckoutState {
    sessions: HashMap<CheckoutSessionId, CheckoutSession>,
}

#[derive(Clone)]
pub struct CheckoutStore {
    store: SnapshotStore<CheckoutState>,
}

impl CheckoutStore {
    #[must_use]
    pub fn new(store: SnapshotStore<CheckoutState>) -> Self {
        Self { store }
    }

    pub async fn create_session(
        &self,
        wallet_id: WalletId,
        amount_usd_cents: u64,
        btc_usd_rate: f64,
        amount_sats: u64,
        provider_session_id: String,
    ) -> Result<CheckoutSession, StoreError> {
        let session = CheckoutSession {
            id: CheckoutSessionId::generate(),
            wallet_id,
            amount_usd_cents,
            btc_usd_rate,
            amount_sats,
            status: CheckoutStatus::Pending,
            provider_session_id,
            completed_at: None,
        };
        self.store
            .mutate(move |state| -> Result<CheckoutSession, StoreError> {
                state.sessions.insert(session.id.clone(), session.clone());
                Ok(session.clone())
            })
            .await
    }

    /// `UPDATE checkout_sessions SET status='completed', completed_at=now
    /// WHERE id=? AND status='pending'`.
    async fn claim_completion(&self, session_id: &CheckoutSessionId) -> Option<CheckoutSession> {
        let session_id = session_id.clone();
        self.store
            .mutate(move |state| -> Result<Option<CheckoutSession>, StoreError> {
                let Some(session) = state.sessions.get_mut(&session_id) else {
                    return Ok(None);
                };
                if session.status != CheckoutStatus::Pending {
                    return Ok(None);
                }
                session.status = CheckoutStatus::Completed;
                session.completed_at = Some(Utc::now());
                Ok(Some(session.clone()))
            })
            .await
            .ok()
            .flatten()
    }

    pub async fn session(&self, session_id: &CheckoutSessionId) -> Option<CheckoutSession> {
        let session_id = session_id.clone();
        self.store
            .view(move |state| state.sessions.get(&session_id).cloned())
            .await
    }
}

pub struct CheckoutWebhookHandler {
    secret: Vec<u8>,
    sessions: CheckoutStore,
    ledger: Ledger,
}

impl CheckoutWebhookHandler {
    #[must_use]
    pub fn new(secret: Vec<u8>, sessions: CheckoutStore, ledger: Ledger) -> Self {
        Self {
            secret,
            sessions,
            ledger,
        }
    }

    /// Verify the signature and dispatch the event. `Paid`/`Completed`
    /// claims the session and issues an idempotent credit; `Refunded` is
    /// logged for manual review only and never auto-reverses.
    pub async fn handle(
        &self,
        raw_body: &[u8],
        signature_hex: &str,
        event: WebhookEvent,
    ) -> Result<CheckoutOutcome, CheckoutError> {
        verify_signature(&self.secret, raw_body, signature_hex)?;

        match event.kind {
            WebhookEventKind::Paid => {
                let Some(session) = self.sessions.claim_completion(&event.session_id).await else {
                    return Ok(CheckoutOutcome::Ignored);
                };

                self.ledger
                    .credit(
                        &session.wallet_id,
                        Currency::UsdCents,
                        session.amount_usd_cents,
                        "checkout_session",
                        session.id.as_str(),
                        None,
                        None,
                    )
                    .await?;

                Ok(CheckoutOutcome::Credited)
            }
            WebhookEventKind::Refunded => {
                let reason = event.reason.unwrap_or_default();
                tracing::warn!(
                    target: "saturn.checkout",
                    session_id = %event.session_id,
                    reason,
                    "refund event received; logged for manual review, not auto-reversed",
                );
                Ok(CheckoutOutcome::RefundLogged)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CheckoutError, CheckoutState, CheckoutStore, CheckoutWebhookHandler, WebhookEvent,
        WebhookEventKind, verify_signature,
    };
    use hmac::{Hmac, Mac};
    use saturn_core::AccountId;
    use saturn_ledger::{Ledger, LedgerState};
    use saturn_store::SnapshotStore;
    use sha2::Sha256;

    fn sign(secret: &[u8], body: &[u8]) -> anyhow::Result<String> {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret)?;
        mac.update(body);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn signature_roundtrips() -> anyhow::Result<()> {
        let secret = b"whsec_test";
        let body = b"{\"type\":\"paid\"}";
        let signature = sign(secret, body)?;
        assert!(verify_signature(secret, body, &signature).is_ok());
        Ok(())
    }

    #[test]
    fn tampered_body_fails_verification() -> anyhow::Result<()> {
        let secret = b"whsec_test";
        let signature = sign(secret, b"{\"type\":\"paid\"}")?;
        let result = verify_signature(secret, b"{\"type\":\"refunded\"}", &signature);
        assert!(matches!(result, Err(CheckoutError::InvalidSignature)));
        Ok(())
    }

    async fn handler() -> anyhow::Result<(CheckoutWebhookHandler, saturn_core::CheckoutSessionId)> {
        let ledger_store: SnapshotStore<LedgerState> = SnapshotStore::new(None);
        let ledger = Ledger::new(ledger_store);
        let record = ledger.create_wallet(AccountId::generate()).await?;

        let session_store: SnapshotStore<CheckoutState> = SnapshotStore::new(None);
        let sessions = CheckoutStore::new(session_store);
        let session = sessions
            .create_session(record.id, 1_000, 65_000.0, 15_384, "cs_test_1".to_string())
            .await?;

        let handler = CheckoutWebhookHandler::new(b"whsec_test".to_vec(), sessions, ledger);
        Ok((handler, session.id))
    }

    #[tokio::test]
    async fn paid_event_credits_the_wallet_once() -> anyhow::Result<()> {
        let (handler, session_id) = handler().await?;
        let body = b"{\"type\":\"paid\"}";
        let signature = sign(b"whsec_test", body)?;

        let first = handler
            .handle(
                body,
                &signature,
                WebhookEvent {
                    kind: WebhookEventKind::Paid,
                    session_id: session_id.clone(),
                    reason: None,
                },
            )
            .await?;
        assert_eq!(first, super::CheckoutOutcome::Credited);

        let second = handler
            .handle(
                body,
                &signature,
                WebhookEvent {
                    kind: WebhookEventKind::Paid,
                    session_id,
                    reason: None,
                },
            )
            .await?;
        assert_eq!(second, super::CheckoutOutcome::Ignored);
        Ok(())
    }

    #[tokio::test]
    async fn refund_event_is_logged_and_does_not_touch_ledger() -> anyhow::Result<()> {
        let (handler, session_id) = handler().await?;
        let body = b"{\"type\":\"refunded\"}";
        let signature = sign(b"whsec_test", body)?;

        let outcome = handler
            .handle(
                body,
                &signature,
                WebhookEvent {
                    kind: WebhookEventKind::Refunded,
                    session_id,
                    reason: Some("customer dispute".to_string()),
                },
            )
            .await?;
        assert_eq!(outcome, super::CheckoutOutcome::RefundLogged);
        Ok(())
    }
}
