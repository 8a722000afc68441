//! Additive map checksum.
//!
//! A map's checksum is the sum modulo 2^128 of one term per entry, where a
//! term is the truncated SHA-256 of the length-prefixed key followed by
//! the entry's canonical JSON value. Because addition commutes, two maps
//! with the same key/value set always have the same checksum, and an edit
//! can update the checksum incrementally by subtracting the old term and
//! adding the new one.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::json;

/// 128-bit additive checksum, kept as two 64-bit halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Checksum {
    hi: u64,
    lo: u64,
}

impl Checksum {
    /// The checksum of the empty map.
    pub const EMPTY: Checksum = Checksum { hi: 0, lo: 0 };

    /// Recompute from scratch over a full entry set.
    pub fn compute<'a>(entries: impl IntoIterator<Item = (&'a String, &'a Value)>) -> Self {
        let mut sum = Self::EMPTY;
        for (k, v) in entries {
            sum.add(k, v);
        }
        sum
    }

    /// Fold one entry into the sum.
    pub fn add(&mut self, key: &str, value: &Value) {
        let (hi, lo) = term(key, value);
        let (new_lo, carry) = self.lo.overflowing_add(lo);
        self.lo = new_lo;
        self.hi = self.hi.wrapping_add(hi).wrapping_add(u64::from(carry));
    }

    /// Remove one entry from the sum. The entry must previously have been
    /// added with the same key and value.
    pub fn remove(&mut self, key: &str, value: &Value) {
        let (hi, lo) = term(key, value);
        let (new_lo, borrow) = self.lo.overflowing_sub(lo);
        self.lo = new_lo;
        self.hi = self.hi.wrapping_sub(hi).wrapping_sub(u64::from(borrow));
    }

    /// Render as the fixed 32-character lowercase hex form.
    pub fn to_hex(&self) -> String {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.hi.to_be_bytes());
        bytes[8..].copy_from_slice(&self.lo.to_be_bytes());
        hex::encode(bytes)
    }

    /// Parse the hex form.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 16 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut hi = [0u8; 8];
        let mut lo = [0u8; 8];
        hi.copy_from_slice(&bytes[..8]);
        lo.copy_from_slice(&bytes[8..]);
        Ok(Self {
            hi: u64::from_be_bytes(hi),
            lo: u64::from_be_bytes(lo),
        })
    }
}

fn term(key: &str, value: &Value) -> (u64, u64) {
    let mut hasher = Sha256::new();
    hasher.update((key.len() as u64).to_le_bytes());
    hasher.update(key.as_bytes());
    hasher.update(json::to_canonical_string(value).as_bytes());
    let digest = hasher.finalize();
    let mut hi = [0u8; 8];
    let mut lo = [0u8; 8];
    hi.copy_from_slice(&digest[..8]);
    lo.copy_from_slice(&digest[8..16]);
    (u64::from_be_bytes(hi), u64::from_be_bytes(lo))
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Checksum {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_constant() {
        assert_eq!(Checksum::EMPTY.to_hex(), "00000000000000000000000000000000");
        assert_eq!(Checksum::compute(std::iter::empty()), Checksum::EMPTY);
    }

    #[test]
    fn test_add_remove_inverse() {
        let mut sum = Checksum::EMPTY;
        let v = json!({"a": [1, 2, 3]});
        sum.add("k", &v);
        assert_ne!(sum, Checksum::EMPTY);
        sum.remove("k", &v);
        assert_eq!(sum, Checksum::EMPTY);
    }

    #[test]
    fn test_order_independent() {
        let a = json!("a");
        let b = json!({"n": 1});
        let ka = "ka".to_string();
        let kb = "kb".to_string();

        let mut fwd = Checksum::EMPTY;
        fwd.add(&ka, &a);
        fwd.add(&kb, &b);

        let mut rev = Checksum::EMPTY;
        rev.add(&kb, &b);
        rev.add(&ka, &a);

        assert_eq!(fwd, rev);
    }

    #[test]
    fn test_key_value_boundary() {
        // The length prefix keeps ("ab", "c") and ("a", "bc") distinct.
        let mut one = Checksum::EMPTY;
        one.add("ab", &json!("c"));
        let mut two = Checksum::EMPTY;
        two.add("a", &json!("bc"));
        assert_ne!(one, two);
    }

    #[test]
    fn test_hex_roundtrip() {
        let mut sum = Checksum::EMPTY;
        sum.add("foo", &json!("bar"));
        let parsed = Checksum::from_hex(&sum.to_hex()).unwrap();
        assert_eq!(parsed, sum);
        assert!(Checksum::from_hex("xyz").is_err());
    }
}
