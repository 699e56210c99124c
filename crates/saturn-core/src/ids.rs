//! ID generation: `prefix_` + random base62, per the external ID format.

use rand::Rng;
use rand::distributions::Uniform;

const BASE62_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const ID_RANDOM_LEN: usize = 20;

/// Generate a `prefix_` + random base62 identifier.
pub fn generate_id(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let dist = Uniform::new(0, BASE62_ALPHABET.len());
    let random_part: String = (0..ID_RANDOM_LEN)
        .map(|_| BASE62_ALPHABET[rng.sample(dist)] as char)
        .collect();
    format!("{prefix}_{random_part}")
}

/// Generate a raw API key: `sk_agt_` + 64 hex chars.
pub fn generate_api_key() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.r#gen();
    format!("sk_agt_{}", hex::encode(bytes))
}

macro_rules! typed_id {
    ($name:ident, $prefix:expr) => {
        #[derive(
            Debug,
            Clone,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            #[must_use]
            pub fn generate() -> Self {
                Self(generate_id($prefix))
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

typed_id!(AccountId, "acc");
typed_id!(AgentId, "agt");
typed_id!(WalletId, "wal");
typed_id!(PolicyId, "pol");
typed_id!(ServiceId, "svc");
typed_id!(TransactionId, "txn");
typed_id!(AuditLogId, "aud");
typed_id!(InvoiceId, "inv");
typed_id!(CheckoutSessionId, "cs");

#[cfg(test)]
mod tests {
    use super::{AccountId, generate_api_key, generate_id};

    #[test]
    fn generated_ids_carry_prefix_and_are_unique() {
        let a = generate_id("acc");
        let b = generate_id("acc");
        assert!(a.starts_with("acc_"));
        assert_ne!(a, b);
    }

    #[test]
    fn typed_id_round_trips_through_string() {
        let id = AccountId::generate();
        assert!(id.as_str().starts_with("acc_"));
        let restored = AccountId::from(id.as_str());
        assert_eq!(id, restored);
    }

    #[test]
    fn api_keys_match_expected_shape() {
        let key = generate_api_key();
        assert!(key.starts_with("sk_agt_"));
        assert_eq!(key.len(), "sk_agt_".len() + 64);
    }
}
