//! Content hashing (P1: hash determinism).

use sha2::{Digest, Sha256};

/// Stable cryptographic digest of a document's bytes, hex-encoded.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// True if `prefix` (a `#<short-hash>` lookup per `find_document`) is a
/// case-insensitive prefix of `hash`.
pub fn matches_short_hash(hash: &str, prefix: &str) -> bool {
    !prefix.is_empty() && hash.len() >= prefix.len() && hash[..prefix.len()].eq_ignore_ascii_case(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        assert_eq!(content_hash(b"hello"), content_hash(b"hello"));
    }

    #[test]
    fn differing_bytes_differ() {
        assert_ne!(content_hash(b"hello"), content_hash(b"hellp"));
    }

    #[test]
    fn short_hash_prefix_match() {
        let h = content_hash(b"hello world");
        let prefix = h[..8].to_string();
        assert!(matches_short_hash(&h, &prefix));
        assert!(matches_short_hash(&h, &prefix.to_uppercase()));
        assert!(!matches_short_hash(&h, "zzzzzzzz"));
    }
}
