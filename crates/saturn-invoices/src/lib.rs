//! Invoice Watcher (C10): subscribes to the Lightning node's settlement
//! stream and turns confirmed settlements into idempotent ledger credits.
//!
//! Account storage is an external collaborator (see [`AccountDirectory`]):
//! this crate only needs to read an account's `default_currency` and
//! perform the one-shot promotion to `sats` on the first Lightning credit.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use saturn_bolt11::{InvoiceSettledEvent, LightningNode, LightningNodeError};
use saturn_core::{AccountId, Currency, Invoice, InvoiceId, InvoiceStatus, Transaction, WalletId};
use saturn_ledger::{Ledger, LedgerError};
use saturn_store::{SnapshotStore, StoreError};
use serde::{Deserialize, Serialize};

pub const RECONNECT_BASE_BACKOFF_MS: u64 = 1_000;
pub const RECONNECT_MAX_BACKOFF_MS: u64 = 60_000;

/// `base * 2^attempt`, capped at [`RECONNECT_MAX_BACKOFF_MS`]. `attempt`
/// resets to `0` on the caller's next successful subscribe.
#[must_use]
pub fn reconnect_backoff_ms(attempt: u32) -> u64 {
    let capped_attempt = attempt.min(6);
    RECONNECT_BASE_BACKOFF_MS
        .saturating_mul(1_u64 << capped_attempt)
        .min(RECONNECT_MAX_BACKOFF_MS)
}

#[derive(Debug, thiserror::Error)]
pub enum InvoiceWatcherError {
    #[error("invoice not found for r_hash {0}")]
    NotFound(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Node(#[from] LightningNodeError),
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct InvoiceState {
    invoices: HashMap<InvoiceId, Invoice>,
    r_hash_index: HashMap<String, InvoiceId>,
}

/// Account-level facts the watcher needs but does not own the storage
/// for. `promote_to_sats` is a one-shot, conditional promotion: it must
/// be a no-op if the account's `default_currency` is already `sats`.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn default_currency(&self, account_id: &AccountId) -> Option<Currency>;
    async fn promote_to_sats(&self, account_id: &AccountId);
    async fn max_balance_sats(&self, account_id: &AccountId) -> Option<u64>;
}

#[derive(Clone)]
pub struct InvoiceStore {
    store: SnapshotStore<InvoiceState>,
}

impl InvoiceStore {
    #[must_use]
    pub fn new(store: SnapshotStore<InvoiceState>) -> Self {
        Self { store }
    }

    pub async fn create_invoice(
        &self,
        wallet_id: WalletId,
        amount_sats: u64,
        payment_request: String,
        r_hash: String,
        expires_at: DateTime<Utc>,
    ) -> Result<Invoice, StoreError> {
        let invoice = Invoice {
            id: InvoiceId::generate(),
            wallet_id,
            amount_sats,
            payment_request,
            r_hash: r_hash.clone(),
            status: InvoiceStatus::Pending,
            expires_at,
            settled_at: None,
        };
        self.store
            .mutate(move |state| -> Result<Invoice, StoreError> {
                state.invoices.insert(invoice.id.clone(), invoice.clone());
                state.r_hash_index.insert(r_hash.clone(), invoice.id.clone());
                Ok(invoice.clone())
            })
            .await
    }

    /// `UPDATE invoices SET status='settled', settled_at=now WHERE
    /// r_hash=? AND status='pending'`, returning the claimed row. `None`
    /// means a duplicate or foreign-invoice event: ignore it.
    async fn claim_settlement(&self, r_hash: &str) -> Option<Invoice> {
        let r_hash = r_hash.to_string();
        self.store
            .mutate(move |state| -> Result<Option<Invoice>, StoreError> {
                let Some(invoice_id) = state.r_hash_index.get(&r_hash).cloned() else {
                    return Ok(None);
                };
                let Some(invoice) = state.invoices.get_mut(&invoice_id) else {
                    return Ok(None);
                };
                if invoice.status != InvoiceStatus::Pending {
                    return Ok(None);
                }
                invoice.status = InvoiceStatus::Settled;
                invoice.settled_at = Some(Utc::now());
                Ok(Some(invoice.clone()))
            })
            .await
            .ok()
            .flatten()
    }
}

pub struct InvoiceWatcher {
    node: Arc<dyn LightningNode>,
    invoices: InvoiceStore,
    ledger: Ledger,
    accounts: Arc<dyn AccountDirectory>,
}

impl InvoiceWatcher {
    #[must_use]
    pub fn new(
        node: Arc<dyn LightningNode>,
        invoices: InvoiceStore,
        ledger: Ledger,
        accounts: Arc<dyn AccountDirectory>,
    ) -> Self {
        Self {
            node,
            invoices,
            ledger,
            accounts,
        }
    }

    /// Apply one settlement event. Returns `Ok(None)` for a duplicate or
    /// foreign invoice (not an error — silently ignored per the contract).
    pub async fn handle_event(
        &self,
        event: &InvoiceSettledEvent,
    ) -> Result<Option<Transaction>, InvoiceWatcherError> {
        if !event.is_confirmed {
            return Ok(None);
        }

        let Some(invoice) = self.invoices.claim_settlement(&event.r_hash).await else {
            return Ok(None);
        };

        let account_id = self
            .ledger
            .account_for_wallet(&invoice.wallet_id)
            .await
            .ok_or_else(|| InvoiceWatcherError::NotFound(event.r_hash.clone()))?;

        let max_balance_sats = self.accounts.max_balance_sats(&account_id).await;
        let transaction = self
            .ledger
            .credit(
                &invoice.wallet_id,
                Currency::Sats,
                invoice.amount_sats,
                "invoice",
                invoice.id.as_str(),
                None,
                max_balance_sats,
            )
            .await?;

        if self.accounts.default_currency(&account_id).await == Some(Currency::UsdCents) {
            self.accounts.promote_to_sats(&account_id).await;
        }

        Ok(Some(transaction))
    }

    /// Subscribe-and-handle loop, reconnecting with exponential backoff on
    /// transport error. Runs until cancelled by the caller (e.g. dropping
    /// the task the caller spawned this inside).
    pub async fn run(&self) {
        let mut attempt = 0u32;
        loop {
            match self.node.next_settlement().await {
                Ok(event) => {
                    attempt = 0;
                    if let Err(error) = self.handle_event(&event).await {
                        tracing::warn!(
                            target: "saturn.invoices",
                            error = %error,
                            "failed to apply invoice settlement event",
                        );
                    }
                }
                Err(error) => {
                    let backoff_ms = reconnect_backoff_ms(attempt);
                    attempt = attempt.saturating_add(1);
                    tracing::warn!(
                        target: "saturn.invoices",
                        error = %error,
                        backoff_ms,
                        "lightning node stream disconnected; reconnecting",
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AccountDirectory, InvoiceStore, InvoiceWatcher, reconnect_backoff_ms};
    use async_trait::async_trait;
    use saturn_bolt11::InvoiceSettledEvent;
    use saturn_core::{AccountId, Currency};
    use saturn_ledger::{Ledger, LedgerState};
    use saturn_store::SnapshotStore;
    use std::sync::Arc;
    use std::sync::Mutex;

    struct FakeAccounts {
        default_currency: Mutex<Currency>,
        promotions: Mutex<u32>,
    }

    #[async_trait]
    impl AccountDirectory for FakeAccounts {
        async fn default_currency(&self, _account_id: &AccountId) -> Option<Currency> {
            Some(*self.default_currency.lock().unwrap_or_else(std::sync::PoisonError::into_inner))
        }

        async fn promote_to_sats(&self, _account_id: &AccountId) {
            let mut currency = self
                .default_currency
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if *currency == Currency::UsdCents {
                *currency = Currency::Sats;
                *self
                    .promotions
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner) += 1;
            }
        }

        async fn max_balance_sats(&self, _account_id: &AccountId) -> Option<u64> {
            None
        }
    }

    async fn watcher() -> anyhow::Result<(InvoiceWatcher, saturn_core::WalletId, Arc<FakeAccounts>)>
    {
        let ledger_store: SnapshotStore<LedgerState> = SnapshotStore::new(None);
        let ledger = Ledger::new(ledger_store);
        let record = ledger.create_wallet(AccountId::generate()).await?;

        let invoice_store: SnapshotStore<super::InvoiceState> = SnapshotStore::new(None);
        let invoices = InvoiceStore::new(invoice_store);
        invoices
            .create_invoice(
                record.id.clone(),
                5_000,
                "lnbc50u1...".to_string(),
                "r_hash_1".to_string(),
                chrono::Utc::now() + chrono::Duration::hours(1),
            )
            .await?;

        let accounts = Arc::new(FakeAccounts {
            default_currency: Mutex::new(Currency::UsdCents),
            promotions: Mutex::new(0),
        });
        let node = Arc::new(saturn_bolt11::StaticLightningNode::new());
        let watcher = InvoiceWatcher::new(node, invoices, ledger, accounts.clone());
        Ok((watcher, record.id, accounts))
    }

    #[tokio::test]
    async fn confirmed_settlement_credits_and_promotes_currency() -> anyhow::Result<()> {
        let (watcher, wallet_id, accounts) = watcher().await?;
        let event = InvoiceSettledEvent {
            r_hash: "r_hash_1".to_string(),
            amount_sats: 5_000,
            is_confirmed: true,
        };

        let transaction = watcher.handle_event(&event).await?;
        assert!(transaction.is_some());

        let wallet = watcher.ledger.wallet(&wallet_id).await?;
        assert_eq!(wallet.balance_sats, 5_000);
        assert_eq!(
            *accounts
                .default_currency
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
            Currency::Sats
        );
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_settlement_is_silently_ignored() -> anyhow::Result<()> {
        let (watcher, wallet_id, _accounts) = watcher().await?;
        let event = InvoiceSettledEvent {
            r_hash: "r_hash_1".to_string(),
            amount_sats: 5_000,
            is_confirmed: true,
        };

        watcher.handle_event(&event).await?;
        let second = watcher.handle_event(&event).await?;
        assert!(second.is_none());

        let wallet = watcher.ledger.wallet(&wallet_id).await?;
        assert_eq!(wallet.balance_sats, 5_000, "replay must not double-credit");
        Ok(())
    }

    #[tokio::test]
    async fn foreign_r_hash_is_silently_ignored() -> anyhow::Result<()> {
        let (watcher, _wallet_id, _accounts) = watcher().await?;
        let event = InvoiceSettledEvent {
            r_hash: "not-a-known-invoice".to_string(),
            amount_sats: 1,
            is_confirmed: true,
        };
        let result = watcher.handle_event(&event).await?;
        assert!(result.is_none());
        Ok(())
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(reconnect_backoff_ms(0), 1_000);
        assert_eq!(reconnect_backoff_ms(1), 2_000);
        assert_eq!(reconnect_backoff_ms(6), 60_000);
        assert_eq!(reconnect_backoff_ms(10), 60_000);
    }
}
