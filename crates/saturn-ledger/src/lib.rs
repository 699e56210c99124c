//! The Ledger: single authoritative source of truth for wallet balances.
//!
//! Every mutation here runs inside [`saturn_store::SnapshotStore::mutate`],
//! which gives each `hold`/`settle`/`release`/`credit` call the same
//! linearizable "conditional update" semantics a `WHERE balance >= n` SQL
//! statement would: the balance check and the write happen under one lock,
//! so two concurrent proxy calls can never both observe sufficient balance
//! and both succeed.

use std::collections::HashMap;

use chrono::Utc;
use saturn_core::{AccountId, AgentId, Currency, Transaction, TransactionId, TransactionType, Wallet, WalletId, WalletRecord};
use saturn_store::{SnapshotStore, StoreError};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("wallet not found: {0}")]
    WalletNotFound(WalletId),
    #[error("insufficient balance in wallet {0}")]
    InsufficientBalance(WalletId),
    #[error("accounting error: conditional update claimed zero rows for wallet {0}")]
    AccountingInvariantViolated(WalletId),
    #[error("settle requested final_amount {final_amount} above held ceiling {held_amount}")]
    FinalAmountExceedsHold { held_amount: u64, final_amount: u64 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoldOutcome {
    pub success: bool,
    pub currency_held: Option<Currency>,
    pub amount_held: u64,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct LedgerState {
    wallets: HashMap<WalletId, Wallet>,
    wallet_accounts: HashMap<WalletId, AccountId>,
    transactions: Vec<Transaction>,
    /// `"{reference_type}::{reference_id}"` -> transaction id, the
    /// unique-constraint substitute that makes `credit` idempotent. JSON
    /// object keys must be strings, so the logical pair is flattened.
    credit_reference_to_transaction: HashMap<String, TransactionId>,
}

impl LedgerState {
    fn wallet(&self, wallet_id: &WalletId) -> Result<&Wallet, LedgerError> {
        self.wallets
            .get(wallet_id)
            .ok_or_else(|| LedgerError::WalletNotFound(wallet_id.clone()))
    }

    fn wallet_mut(&mut self, wallet_id: &WalletId) -> Result<&mut Wallet, LedgerError> {
        self.wallets
            .get_mut(wallet_id)
            .ok_or_else(|| LedgerError::WalletNotFound(wallet_id.clone()))
    }
}

/// Clone of a `Ledger`'s state handle. Cheap: it is an `Arc` underneath.
#[derive(Clone)]
pub struct Ledger {
    store: SnapshotStore<LedgerState>,
}

impl Ledger {
    #[must_use]
    pub fn new(store: SnapshotStore<LedgerState>) -> Self {
        Self { store }
    }

    pub async fn create_wallet(&self, account_id: AccountId) -> Result<WalletRecord, LedgerError> {
        let wallet_id = WalletId::generate();
        let record = self
            .store
            .mutate(|state| -> Result<WalletRecord, LedgerError> {
                state.wallets.insert(wallet_id.clone(), Wallet::default());
                state
                    .wallet_accounts
                    .insert(wallet_id.clone(), account_id.clone());
                Ok(WalletRecord {
                    id: wallet_id.clone(),
                    account_id: account_id.clone(),
                    wallet: Wallet::default(),
                })
            })
            .await?;
        Ok(record)
    }

    pub async fn wallet(&self, wallet_id: &WalletId) -> Result<Wallet, LedgerError> {
        let wallet_id = wallet_id.clone();
        self.store
            .mutate(|state| -> Result<Wallet, LedgerError> { Ok(*state.wallet(&wallet_id)?) })
            .await
    }

    pub async fn account_for_wallet(&self, wallet_id: &WalletId) -> Option<AccountId> {
        let wallet_id = wallet_id.clone();
        self.store
            .view(move |state| state.wallet_accounts.get(&wallet_id).cloned())
            .await
    }

    /// Reserve funds ahead of an upstream call. Tries `default_currency`
    /// first; on insufficient balance there, tries the other currency.
    /// Writes no Transaction row — a hold is not yet a spend.
    pub async fn hold(
        &self,
        wallet_id: &WalletId,
        default_currency: Currency,
        usd_cents: u64,
        sats: u64,
    ) -> Result<HoldOutcome, LedgerError> {
        let wallet_id = wallet_id.clone();
        self.store
            .mutate(move |state| -> Result<HoldOutcome, LedgerError> {
                let order = match default_currency {
                    Currency::Sats => [(Currency::Sats, sats), (Currency::UsdCents, usd_cents)],
                    Currency::UsdCents => {
                        [(Currency::UsdCents, usd_cents), (Currency::Sats, sats)]
                    }
                };

                for (currency, amount) in order {
                    let wallet = state.wallet_mut(&wallet_id)?;
                    let claimed = match currency {
                        Currency::Sats => {
                            if wallet.balance_sats >= amount {
                                wallet.balance_sats -= amount;
                                wallet.held_sats += amount;
                                true
                            } else {
                                false
                            }
                        }
                        Currency::UsdCents => {
                            if wallet.balance_usd_cents >= amount {
                                wallet.balance_usd_cents -= amount;
                                wallet.held_usd_cents += amount;
                                true
                            } else {
                                false
                            }
                        }
                    };
                    if claimed {
                        return Ok(HoldOutcome {
                            success: true,
                            currency_held: Some(currency),
                            amount_held: amount,
                        });
                    }
                }

                Ok(HoldOutcome {
                    success: false,
                    currency_held: None,
                    amount_held: 0,
                })
            })
            .await
    }

    /// Finalize a hold as a spend. `final_amount` must be `<= held_amount`;
    /// the difference is released back to balance (partial refund).
    pub async fn settle(
        &self,
        wallet_id: &WalletId,
        currency: Currency,
        held_amount: u64,
        final_amount: u64,
        agent_id: Option<AgentId>,
    ) -> Result<Transaction, LedgerError> {
        if final_amount > held_amount {
            return Err(LedgerError::FinalAmountExceedsHold {
                held_amount,
                final_amount,
            });
        }

        let wallet_id = wallet_id.clone();
        self.store
            .mutate(move |state| -> Result<Transaction, LedgerError> {
                let wallet = state.wallet_mut(&wallet_id)?;
                let refund = held_amount - final_amount;

                match currency {
                    Currency::Sats => {
                        if wallet.held_sats < held_amount {
                            return Err(LedgerError::AccountingInvariantViolated(
                                wallet_id.clone(),
                            ));
                        }
                        wallet.held_sats -= held_amount;
                        wallet.balance_sats += refund;
                        wallet.lifetime_out_sats += final_amount;
                    }
                    Currency::UsdCents => {
                        if wallet.held_usd_cents < held_amount {
                            return Err(LedgerError::AccountingInvariantViolated(
                                wallet_id.clone(),
                            ));
                        }
                        wallet.held_usd_cents -= held_amount;
                        wallet.balance_usd_cents += refund;
                        wallet.lifetime_out_usd_cents += final_amount;
                    }
                }

                let wallet_snapshot = *wallet;
                let transaction = Transaction {
                    id: TransactionId::generate(),
                    wallet_id: wallet_id.clone(),
                    agent_id,
                    transaction_type: TransactionType::DebitProxyCall,
                    currency,
                    amount_sats: if currency == Currency::Sats {
                        final_amount
                    } else {
                        0
                    },
                    amount_usd_cents: if currency == Currency::UsdCents {
                        final_amount
                    } else {
                        0
                    },
                    balance_after_sats: wallet_snapshot.balance_sats,
                    balance_after_usd_cents: wallet_snapshot.balance_usd_cents,
                    reference_type: "proxy_call".to_string(),
                    reference_id: TransactionId::generate().to_string(),
                    description: "debit for proxy call".to_string(),
                    capped_sats: 0,
                    created_at: Utc::now(),
                };
                state.transactions.push(transaction.clone());
                Ok(transaction)
            })
            .await
    }

    /// Reverse a hold in full. Used when a call fails after `hold` but
    /// before (or instead of) `settle`.
    pub async fn release(
        &self,
        wallet_id: &WalletId,
        currency: Currency,
        held_amount: u64,
        agent_id: Option<AgentId>,
    ) -> Result<Transaction, LedgerError> {
        let wallet_id = wallet_id.clone();
        self.store
            .mutate(move |state| -> Result<Transaction, LedgerError> {
                let wallet = state.wallet_mut(&wallet_id)?;

                match currency {
                    Currency::Sats => {
                        if wallet.held_sats < held_amount {
                            return Err(LedgerError::AccountingInvariantViolated(
                                wallet_id.clone(),
                            ));
                        }
                        wallet.held_sats -= held_amount;
                        wallet.balance_sats += held_amount;
                    }
                    Currency::UsdCents => {
                        if wallet.held_usd_cents < held_amount {
                            return Err(LedgerError::AccountingInvariantViolated(
                                wallet_id.clone(),
                            ));
                        }
                        wallet.held_usd_cents -= held_amount;
                        wallet.balance_usd_cents += held_amount;
                    }
                }

                let wallet_snapshot = *wallet;
                let transaction = Transaction {
                    id: TransactionId::generate(),
                    wallet_id: wallet_id.clone(),
                    agent_id,
                    transaction_type: TransactionType::Refund,
                    currency,
                    amount_sats: if currency == Currency::Sats {
                        held_amount
                    } else {
                        0
                    },
                    amount_usd_cents: if currency == Currency::UsdCents {
                        held_amount
                    } else {
                        0
                    },
                    balance_after_sats: wallet_snapshot.balance_sats,
                    balance_after_usd_cents: wallet_snapshot.balance_usd_cents,
                    reference_type: "hold_release".to_string(),
                    reference_id: TransactionId::generate().to_string(),
                    description: "release of unused hold".to_string(),
                    capped_sats: 0,
                    created_at: Utc::now(),
                };
                state.transactions.push(transaction.clone());
                Ok(transaction)
            })
            .await
    }

    /// Credit the wallet. Idempotent on `(reference_type, reference_id)`: a
    /// replayed credit returns the original Transaction unchanged.
    ///
    /// When `max_balance_sats` is set and this credit (in sats) would push
    /// `balance_sats` above it, the balance is capped at the limit; the
    /// Transaction still records the full credited amount via
    /// `amount_sats`/`amount_usd_cents`, with the portion that did not
    /// land in the balance tracked in `capped_sats` for reconciliation.
    /// Only a sats-currency credit is capped — `max_balance_sats` does not
    /// constrain the USD side of the wallet.
    pub async fn credit(
        &self,
        wallet_id: &WalletId,
        currency: Currency,
        amount: u64,
        reference_type: &str,
        reference_id: &str,
        agent_id: Option<AgentId>,
        max_balance_sats: Option<u64>,
    ) -> Result<Transaction, LedgerError> {
        let wallet_id = wallet_id.clone();
        let reference_type = reference_type.to_string();
        let reference_id = reference_id.to_string();
        let transaction_type = match currency {
            Currency::Sats => TransactionType::CreditLightning,
            Currency::UsdCents => TransactionType::CreditCard,
        };

        self.store
            .mutate(move |state| -> Result<Transaction, LedgerError> {
                let reference_key = format!("{reference_type}::{reference_id}");
                if let Some(existing_id) = state.credit_reference_to_transaction.get(&reference_key)
                {
                    if let Some(existing) =
                        state.transactions.iter().find(|txn| &txn.id == existing_id)
                    {
                        return Ok(existing.clone());
                    }
                }

                let wallet = state.wallet_mut(&wallet_id)?;
                let mut capped_sats = 0u64;

                match currency {
                    Currency::Sats => {
                        let mut applied = amount;
                        if let Some(cap) = max_balance_sats {
                            let room = cap.saturating_sub(wallet.balance_sats);
                            if amount > room {
                                capped_sats = amount - room;
                                applied = room;
                            }
                        }
                        wallet.balance_sats += applied;
                        wallet.lifetime_in_sats += amount;
                    }
                    Currency::UsdCents => {
                        wallet.balance_usd_cents += amount;
                        wallet.lifetime_in_usd_cents += amount;
                    }
                }

                let wallet_snapshot = *wallet;
                let transaction = Transaction {
                    id: TransactionId::generate(),
                    wallet_id: wallet_id.clone(),
                    agent_id,
                    transaction_type,
                    currency,
                    amount_sats: if currency == Currency::Sats { amount } else { 0 },
                    amount_usd_cents: if currency == Currency::UsdCents {
                        amount
                    } else {
                        0
                    },
                    balance_after_sats: wallet_snapshot.balance_sats,
                    balance_after_usd_cents: wallet_snapshot.balance_usd_cents,
                    reference_type: reference_type.clone(),
                    reference_id: reference_id.clone(),
                    description: "wallet credit".to_string(),
                    capped_sats,
                    created_at: Utc::now(),
                };

                if capped_sats > 0 {
                    tracing::warn!(
                        target: "saturn.ledger",
                        wallet_id = %wallet_id,
                        capped_sats,
                        "credit exceeded max_balance_sats; excess recorded for manual reconciliation",
                    );
                }

                state.transactions.push(transaction.clone());
                state
                    .credit_reference_to_transaction
                    .insert(reference_key, transaction.id.clone());
                Ok(transaction)
            })
            .await
    }

    pub async fn transactions_for_wallet(&self, wallet_id: &WalletId) -> Vec<Transaction> {
        let wallet_id = wallet_id.clone();
        self.store
            .view(move |state| {
                state
                    .transactions
                    .iter()
                    .filter(|txn| txn.wallet_id == wallet_id)
                    .cloned()
                    .collect()
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::{Currency, Ledger, LedgerState};
    use saturn_core::AccountId;
    use saturn_store::SnapshotStore;

    async fn ledger() -> anyhow::Result<(Ledger, saturn_core::WalletId)> {
        let store: SnapshotStore<LedgerState> = SnapshotStore::new(None);
        let ledger = Ledger::new(store);
        let record = ledger.create_wallet(AccountId::generate()).await?;
        Ok((ledger, record.id))
    }

    #[tokio::test]
    async fn hold_falls_back_to_other_currency() -> anyhow::Result<()> {
        let (ledger, wallet_id) = ledger().await?;
        ledger
            .credit(&wallet_id, Currency::UsdCents, 500, "seed", "seed-1", None, None)
            .await?;

        let outcome = ledger.hold(&wallet_id, Currency::Sats, 500, 1_000).await?;
        assert!(outcome.success);
        assert_eq!(outcome.currency_held, Some(Currency::UsdCents));
        assert_eq!(outcome.amount_held, 500);
        Ok(())
    }

    #[tokio::test]
    async fn hold_fails_when_neither_currency_has_balance() -> anyhow::Result<()> {
        let (ledger, wallet_id) = ledger().await?;
        let outcome = ledger.hold(&wallet_id, Currency::Sats, 100, 100).await?;
        assert!(!outcome.success);
        Ok(())
    }

    #[tokio::test]
    async fn settle_releases_unused_hold_as_partial_refund() -> anyhow::Result<()> {
        let (ledger, wallet_id) = ledger().await?;
        ledger
            .credit(&wallet_id, Currency::Sats, 1_000, "seed", "seed-1", None, None)
            .await?;
        ledger.hold(&wallet_id, Currency::Sats, 0, 1_000).await?;

        let txn = ledger
            .settle(&wallet_id, Currency::Sats, 1_000, 300, None)
            .await?;
        assert_eq!(txn.amount_sats, 300);

        let wallet = ledger.wallet(&wallet_id).await?;
        assert_eq!(wallet.balance_sats, 700);
        assert_eq!(wallet.held_sats, 0);
        assert_eq!(wallet.lifetime_out_sats, 300);
        Ok(())
    }

    #[tokio::test]
    async fn credit_is_idempotent_by_reference() -> anyhow::Result<()> {
        let (ledger, wallet_id) = ledger().await?;
        let first = ledger
            .credit(&wallet_id, Currency::Sats, 5_000, "invoice", "inv_1", None, None)
            .await?;
        let second = ledger
            .credit(&wallet_id, Currency::Sats, 5_000, "invoice", "inv_1", None, None)
            .await?;
        assert_eq!(first.id, second.id);

        let wallet = ledger.wallet(&wallet_id).await?;
        assert_eq!(wallet.balance_sats, 5_000);
        Ok(())
    }

    #[tokio::test]
    async fn credit_caps_balance_at_max_balance_sats() -> anyhow::Result<()> {
        let (ledger, wallet_id) = ledger().await?;
        let txn = ledger
            .credit(
                &wallet_id,
                Currency::Sats,
                10_000,
                "invoice",
                "inv_1",
                None,
                Some(6_000),
            )
            .await?;
        assert_eq!(txn.amount_sats, 10_000);
        assert_eq!(txn.capped_sats, 4_000);

        let wallet = ledger.wallet(&wallet_id).await?;
        assert_eq!(wallet.balance_sats, 6_000);
        assert_eq!(wallet.lifetime_in_sats, 10_000);
        Ok(())
    }
}
