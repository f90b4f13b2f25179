//! Stable hashing helpers for cache keys and source identities.

use blake3::Hasher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub fn to_hex(&self) -> String {
        // blake3 hex(32b) is 64 hex chars
        let mut s = String::with_capacity(64);
        for b in &self.0 {
            use std::fmt::Write as _;
            let _ = write!(&mut s, "{:02x}", b);
        }
        s
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

pub fn hash_str(s: &str) -> Hash256 {
    Hash256(blake3::hash(s.as_bytes()).into())
}

/// Hash a sequence of string parts. Each part is length-prefixed so that
/// `["ab", "c"]` and `["a", "bc"]` never collide.
pub fn hash_parts<'a>(parts: impl IntoIterator<Item = &'a str>) -> Hash256 {
    let mut h = Hasher::new();
    for part in parts {
        h.update(&(part.len() as u64).to_le_bytes());
        h.update(part.as_bytes());
    }
    Hash256(h.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_are_length_prefixed() {
        assert_ne!(hash_parts(["ab", "c"]), hash_parts(["a", "bc"]));
        assert_eq!(hash_parts(["ab", "c"]), hash_parts(["ab", "c"]));
    }

    #[test]
    fn hex_is_64_chars() {
        assert_eq!(hash_str("orders").to_hex().len(), 64);
    }
}
