//! Deterministic JSON encoding and checksumming for snapshot blobs.
//!
//! A version record's checksum is the SHA-256 of its snapshot bytes, so
//! those bytes must hash identically across processes: object keys are
//! sorted byte-lexically before serialization rather than relying on
//! `serde_json`'s default insertion-order map.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Recursively sort object keys so two semantically-equal values always
/// serialize to the same bytes.
fn sort_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut sorted = serde_json::Map::new();
            for (k, v) in entries {
                sorted.insert(k.clone(), sort_value(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_value).collect()),
        other => other.clone(),
    }
}

/// Serialize a value to its canonical byte representation.
pub fn canonical_bytes(value: &Value) -> Vec<u8> {
    serde_json::to_vec(&sort_value(value)).expect("Value serialization cannot fail")
}

/// SHA-256 checksum of a value's canonical bytes, as a lowercase hex string.
pub fn checksum(value: &Value) -> String {
    let bytes = canonical_bytes(value);
    let digest = Sha256::digest(&bytes);
    hex::encode(digest)
}

/// SHA-256 checksum of raw bytes (used for externalized blobs), as a
/// lowercase hex string.
pub fn checksum_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_affect_checksum() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(checksum(&a), checksum(&b));
    }

    #[test]
    fn different_values_have_different_checksums() {
        assert_ne!(checksum(&json!({"a": 1})), checksum(&json!({"a": 2})));
    }

    #[test]
    fn nested_object_key_order_is_normalized() {
        let a = json!({"outer": {"z": 1, "y": 2}});
        let b = json!({"outer": {"y": 2, "z": 1}});
        assert_eq!(canonical_bytes(&a), canonical_bytes(&b));
    }
}
