//! The 12-byte opaque item identifier.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use rand::RngCore;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

static COUNTER: AtomicU32 = AtomicU32::new(0);

/// A 12-byte opaque identifier for a logical item.
///
/// Externally rendered as 24 lowercase hex characters, the same shape as a
/// Mongo `ObjectId`, but generated independently of any document-store
/// driver: 4-byte seconds-since-epoch, 5 random bytes, 3-byte process-local
/// counter. Collisions within a process are impossible; collisions across
/// processes are astronomically unlikely and are not specified to be
/// detected (the doc-store's unique index on `_id` is the backstop).
///
/// Serializes as its 24-character hex rendering rather than the derived
/// byte-array shape, so it reads naturally as a Mongo `_id` and as JSON.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemId([u8; 12]);

impl Serialize for ItemId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

struct ItemIdVisitor;

impl<'de> Visitor<'de> for ItemIdVisitor {
    type Value = ItemId;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a 24-character lowercase hex item id")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        ItemId::parse(v).ok_or_else(|| de::Error::invalid_value(de::Unexpected::Str(v), &self))
    }
}

impl<'de> Deserialize<'de> for ItemId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(ItemIdVisitor)
    }
}

impl ItemId {
    /// Generate a new, time-ordered identifier.
    pub fn new() -> Self {
        let mut bytes = [0u8; 12];

        let secs = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as u32;
        bytes[0..4].copy_from_slice(&secs.to_be_bytes());

        let mut rng = rand::thread_rng();
        let mut random = [0u8; 5];
        rng.fill_bytes(&mut random);
        bytes[4..9].copy_from_slice(&random);

        let counter = COUNTER.fetch_add(1, Ordering::Relaxed) & 0x00FF_FFFF;
        bytes[9..12].copy_from_slice(&counter.to_be_bytes()[1..4]);

        ItemId(bytes)
    }

    /// Build an `ItemId` from raw bytes, e.g. when reading one back out of
    /// the document store.
    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        ItemId(bytes)
    }

    /// Raw bytes, for storage as a doc-store `_id`.
    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }

    /// Parse a 24-character lowercase hex string.
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() != 24 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let decoded = hex::decode(s).ok()?;
        let mut bytes = [0u8; 12];
        bytes.copy_from_slice(&decoded);
        Some(ItemId(bytes))
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemId({})", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display_and_parse() {
        let id = ItemId::new();
        let parsed = ItemId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn rejects_malformed_strings() {
        assert!(ItemId::parse("too-short").is_none());
        assert!(ItemId::parse(&"g".repeat(24)).is_none());
    }

    #[test]
    fn successive_ids_are_distinct() {
        let a = ItemId::new();
        let b = ItemId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn serializes_as_hex_string_not_byte_array() {
        let id = ItemId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: ItemId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
