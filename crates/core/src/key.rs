//! Deterministic object-store key layout.
//!
//! Pure string composition: no I/O, no backend knowledge. Every emitted key
//! must round-trip through its matching parser, which is exercised by the
//! property tests at the bottom of this module.

use crate::error::ChronosError;
use crate::ids::ItemId;

/// Builds and parses the four key shapes the core ever writes.
pub struct KeyBuilder;

fn normalize(component: &str, field: &str) -> crate::Result<String> {
    let trimmed = component.trim();
    if trimmed.is_empty() {
        return Err(ChronosError::InvalidKey(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_lowercase())
}

fn check_version(ov: i64, field: &str) -> crate::Result<u64> {
    if ov < 0 {
        return Err(ChronosError::InvalidKey(format!("{field} must not be negative")));
    }
    Ok(ov as u64)
}

impl KeyBuilder {
    /// `{collection}/{itemId}/v{ov}/item.json`
    pub fn snapshot_key(collection: &str, item_id: &ItemId, ov: i64) -> crate::Result<String> {
        let collection = normalize(collection, "collection")?;
        let ov = check_version(ov, "ov")?;
        Ok(format!("{collection}/{item_id}/v{ov}/item.json"))
    }

    /// `{collection}/{property}/{itemId}/v{ov}/blob.bin`
    pub fn blob_key(
        collection: &str,
        property: &str,
        item_id: &ItemId,
        ov: i64,
    ) -> crate::Result<String> {
        let collection = normalize(collection, "collection")?;
        let property = normalize(property, "property")?;
        let ov = check_version(ov, "ov")?;
        Ok(format!("{collection}/{property}/{item_id}/v{ov}/blob.bin"))
    }

    /// `{collection}/{property}/{itemId}/v{ov}/text.txt`
    pub fn text_key(
        collection: &str,
        property: &str,
        item_id: &ItemId,
        ov: i64,
    ) -> crate::Result<String> {
        let collection = normalize(collection, "collection")?;
        let property = normalize(property, "property")?;
        let ov = check_version(ov, "ov")?;
        Ok(format!("{collection}/{property}/{item_id}/v{ov}/text.txt"))
    }

    /// `__manifests__/{collection}/{YYYY}/{MM}/snapshot-{cv}.json.gz`
    pub fn manifest_key(collection: &str, year: u32, month: u32, cv: i64) -> crate::Result<String> {
        let collection = normalize(collection, "collection")?;
        let cv = check_version(cv, "cv")?;
        if !(1..=12).contains(&month) {
            return Err(ChronosError::InvalidKey(format!("invalid month {month}")));
        }
        Ok(format!(
            "__manifests__/{collection}/{year:04}/{month:02}/snapshot-{cv}.json.gz"
        ))
    }

    /// Parse a snapshot key back into `(collection, item_id, ov)`.
    pub fn parse_snapshot_key(key: &str) -> crate::Result<(String, ItemId, u64)> {
        let parts: Vec<&str> = key.split('/').collect();
        if parts.len() != 4 || parts[3] != "item.json" || !parts[2].starts_with('v') {
            return Err(ChronosError::InvalidKey(format!("not a snapshot key: {key}")));
        }
        let item_id = ItemId::parse(parts[1])
            .ok_or_else(|| ChronosError::InvalidKey(format!("bad item id in key: {key}")))?;
        let ov: u64 = parts[2][1..]
            .parse()
            .map_err(|_| ChronosError::InvalidKey(format!("bad ov in key: {key}")))?;
        Ok((parts[0].to_string(), item_id, ov))
    }

    /// Parse a blob/text key back into `(collection, property, item_id, ov)`.
    pub fn parse_property_key(key: &str) -> crate::Result<(String, String, ItemId, u64)> {
        let parts: Vec<&str> = key.split('/').collect();
        if parts.len() != 5 || !parts[3].starts_with('v') {
            return Err(ChronosError::InvalidKey(format!("not a property key: {key}")));
        }
        if parts[4] != "blob.bin" && parts[4] != "text.txt" {
            return Err(ChronosError::InvalidKey(format!("not a property key: {key}")));
        }
        let item_id = ItemId::parse(parts[2])
            .ok_or_else(|| ChronosError::InvalidKey(format!("bad item id in key: {key}")))?;
        let ov: u64 = parts[3][1..]
            .parse()
            .map_err(|_| ChronosError::InvalidKey(format!("bad ov in key: {key}")))?;
        Ok((parts[0].to_string(), parts[1].to_string(), item_id, ov))
    }

    /// The key prefix under which every versioned artifact for an item
    /// lives, used by administrative sweeps and hard-delete cleanup.
    pub fn item_prefix(collection: &str, item_id: &ItemId) -> crate::Result<String> {
        let collection = normalize(collection, "collection")?;
        Ok(format!("{collection}/{item_id}/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn snapshot_key_round_trips() {
        let id = ItemId::new();
        let key = KeyBuilder::snapshot_key("Users", &id, 3).unwrap();
        assert_eq!(key, format!("users/{id}/v3/item.json"));
        let (collection, parsed_id, ov) = KeyBuilder::parse_snapshot_key(&key).unwrap();
        assert_eq!(collection, "users");
        assert_eq!(parsed_id, id);
        assert_eq!(ov, 3);
    }

    #[test]
    fn blob_key_round_trips() {
        let id = ItemId::new();
        let key = KeyBuilder::blob_key("users", "avatar", &id, 0).unwrap();
        let (collection, prop, parsed_id, ov) = KeyBuilder::parse_property_key(&key).unwrap();
        assert_eq!(collection, "users");
        assert_eq!(prop, "avatar");
        assert_eq!(parsed_id, id);
        assert_eq!(ov, 0);
    }

    #[test]
    fn manifest_key_shape() {
        let key = KeyBuilder::manifest_key("users", 2026, 8, 12).unwrap();
        assert_eq!(key, "__manifests__/users/2026/08/snapshot-12.json.gz");
    }

    #[test]
    fn rejects_empty_components_and_negative_versions() {
        let id = ItemId::new();
        assert!(KeyBuilder::snapshot_key("", &id, 0).is_err());
        assert!(KeyBuilder::snapshot_key("users", &id, -1).is_err());
        assert!(KeyBuilder::manifest_key("users", 2026, 13, 0).is_err());
    }

    proptest::proptest! {
        #[test]
        fn snapshot_key_always_round_trips(ov in 0i64..1_000_000) {
            let id = ItemId::new();
            let key = KeyBuilder::snapshot_key("coll", &id, ov).unwrap();
            let (c, parsed, parsed_ov) = KeyBuilder::parse_snapshot_key(&key).unwrap();
            prop_assert_eq!(c, "coll");
            prop_assert_eq!(parsed, id);
            prop_assert_eq!(parsed_ov as i64, ov);
        }
    }
}
