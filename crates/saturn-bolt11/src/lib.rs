//! BOLT11 amount parsing and the Lightning node contract the invoice
//! watcher reads from. The node itself (LND, Core Lightning, ...) is an
//! external collaborator; this crate only names the interface and the
//! invoice-string arithmetic Saturn needs to validate what the node hands
//! back.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Minimal BOLT11 amount parser.
///
/// Supports the four standard multipliers (`m`, `u`, `n`, `p`) and the
/// amountless-invoice case (returns `None`, since Saturn always requests a
/// fixed-amount invoice and treats an amountless one as malformed).
pub struct Bolt11;

impl Bolt11 {
    /// Parse the amount encoded in a BOLT11 payment request, in millisats.
    ///
    /// Returns `None` if the invoice is amountless, malformed, carries an
    /// unsupported multiplier, or the amount overflows 64-bit arithmetic.
    #[must_use]
    pub fn amount_msats(payment_request: &str) -> Option<u64> {
        let invoice = payment_request.trim().to_ascii_lowercase();
        let bytes = invoice.as_bytes();
        if bytes.len() < 5 || !invoice.starts_with("ln") {
            return None;
        }
        if !bytes[2].is_ascii_lowercase() || !bytes[3].is_ascii_lowercase() {
            return None;
        }

        let mut idx = 4usize;
        let digits_start = idx;
        while idx < bytes.len() && bytes[idx].is_ascii_digit() {
            idx += 1;
        }
        if idx == digits_start {
            return None;
        }

        let amount = invoice[digits_start..idx].parse::<u64>().ok()?;

        let mut multiplier: Option<u8> = None;
        if idx < bytes.len() && matches!(bytes[idx], b'm' | b'u' | b'n' | b'p') {
            multiplier = Some(bytes[idx]);
            idx += 1;
        }

        if idx >= bytes.len() || bytes[idx] != b'1' {
            return None;
        }

        match multiplier {
            Some(b'p') => {
                if amount % 10 != 0 {
                    return None;
                }
                Some(amount / 10)
            }
            Some(b'm') => amount.checked_mul(100_000_000),
            Some(b'u') => amount.checked_mul(100_000),
            Some(b'n') => amount.checked_mul(100),
            None => amount.checked_mul(100_000_000_000),
            _ => None,
        }
    }

    /// Parse the amount encoded in a BOLT11 payment request, in whole sats.
    /// Invoices must encode a sat-aligned amount; a request for a
    /// sub-satoshi amount is rejected as malformed.
    #[must_use]
    pub fn amount_sats(payment_request: &str) -> Option<u64> {
        let msats = Self::amount_msats(payment_request)?;
        if msats % 1000 != 0 {
            return None;
        }
        Some(msats / 1000)
    }
}

/// A confirmed settlement event read off the node's invoice stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceSettledEvent {
    pub r_hash: String,
    pub amount_sats: u64,
    pub is_confirmed: bool,
}

/// A freshly created invoice, as handed back by the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedInvoice {
    pub payment_request: String,
    pub r_hash: String,
    pub amount_sats: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum LightningNodeError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("node rejected invoice request: {0}")]
    Rejected(String),
}

/// Contract satisfied by whatever Lightning node implementation backs a
/// deployment (LND, Core Lightning, a test double). The invoice watcher
/// only ever talks to the node through this trait.
#[async_trait]
pub trait LightningNode: Send + Sync {
    async fn create_invoice(
        &self,
        amount_sats: u64,
        memo: &str,
    ) -> Result<CreatedInvoice, LightningNodeError>;

    /// Yield the next confirmed-or-not settlement event. Implementations
    /// are expected to block until one arrives; the watcher loop calls
    /// this in a tight `loop { ... }` and reconnects on transport error.
    async fn next_settlement(&self) -> Result<InvoiceSettledEvent, LightningNodeError>;
}

/// Deterministic, dependency-free node used in tests and local
/// development. Invoices are not real BOLT11 strings beyond the amount
/// prefix Saturn itself parses; `r_hash` is a SHA-256 of the memo and a
/// monotonically increasing counter, so it is unique per call.
#[derive(Debug, Default)]
pub struct StaticLightningNode {
    counter: std::sync::atomic::AtomicU64,
}

impl StaticLightningNode {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LightningNode for StaticLightningNode {
    async fn create_invoice(
        &self,
        amount_sats: u64,
        memo: &str,
    ) -> Result<CreatedInvoice, LightningNodeError> {
        let seq = self
            .counter
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let mut hasher = Sha256::new();
        hasher.update(memo.as_bytes());
        hasher.update(seq.to_be_bytes());
        let r_hash = hex::encode(hasher.finalize());
        let payment_request = format!("lnbc{amount_sats}n1{r_hash}");
        Ok(CreatedInvoice {
            payment_request,
            r_hash,
            amount_sats,
        })
    }

    async fn next_settlement(&self) -> Result<InvoiceSettledEvent, LightningNodeError> {
        Err(LightningNodeError::Transport(
            "static node has no live settlement stream".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::Bolt11;

    #[test]
    fn parses_milli_multiplier() {
        assert_eq!(Bolt11::amount_msats("lnbc2500u1..."), Some(250_000_000));
    }

    #[test]
    fn parses_pico_multiplier_requires_divisible_by_ten() {
        assert_eq!(Bolt11::amount_msats("lnbc10p1..."), Some(1));
        assert_eq!(Bolt11::amount_msats("lnbc15p1..."), None);
    }

    #[test]
    fn amountless_invoice_is_rejected() {
        assert_eq!(Bolt11::amount_msats("lnbc1..."), None);
    }

    #[test]
    fn amount_sats_rejects_sub_satoshi_remainder() {
        assert_eq!(Bolt11::amount_sats("lnbc5n1..."), None);
        assert_eq!(Bolt11::amount_sats("lnbc10u1..."), Some(1_000));
    }
}
