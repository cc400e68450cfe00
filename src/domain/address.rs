use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// `0x` followed by 40 hex characters.
pub const ADDRESS_LEN: usize = 42;

/// Derive a chain-style address from the custodian seed, the owning consumer and
/// the creation time. The hash is one-way, so the address reveals neither input.
pub fn derive_address(seed: &str, consumer_id: &str, created_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update(b":");
    hasher.update(consumer_id.as_bytes());
    hasher.update(b":");
    hasher.update(
        created_at
            .timestamp_nanos_opt()
            .unwrap_or_else(|| created_at.timestamp_micros())
            .to_be_bytes(),
    );
    let digest = hasher.finalize();
    format!("0x{}", hex::encode(&digest[..20]))
}

/// Syntactic check only: `0x` prefix and 40 hex digits in any case.
pub fn is_valid_address(address: &str) -> bool {
    address.len() == ADDRESS_LEN
        && address.starts_with("0x")
        && address[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Canonical lowercase form used for storage and comparison.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn test_derived_address_is_valid() {
        let address = derive_address("seed", "c1", Utc::now());
        assert_eq!(address.len(), ADDRESS_LEN);
        assert!(is_valid_address(&address));
        assert_eq!(address, normalize_address(&address));
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let at = Utc::now();
        assert_eq!(derive_address("seed", "c1", at), derive_address("seed", "c1", at));
    }

    #[test]
    fn test_derivation_depends_on_every_input() {
        let at = Utc::now();
        let base = derive_address("seed", "c1", at);
        assert_ne!(base, derive_address("other-seed", "c1", at));
        assert_ne!(base, derive_address("seed", "c2", at));
        assert_ne!(base, derive_address("seed", "c1", at + Duration::milliseconds(1)));
    }

    #[test]
    fn test_address_validation() {
        let padded = format!("{:0<42}", "0xAbC");
        assert!(is_valid_address(&padded));
        assert!(!is_valid_address("0x1234"));
        assert!(!is_valid_address(&format!("{:0<42}", "1xAbC")));
        assert!(!is_valid_address(&format!("{:0<42}", "0xAbC...")));
        assert!(!is_valid_address(&format!("{:0<43}", "0xAbC")));
    }
}
