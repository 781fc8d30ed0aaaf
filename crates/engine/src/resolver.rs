//! Single-item reads (latest / by-version / as-of), metadata listing, and
//! tiered (generic → domain → tenant) lookup with optional deep-merge.

use std::collections::HashMap;
use std::sync::Arc;

use chronos_blob::BlobAdapter;
use chronos_core::{merge, ChronosError, ItemId, Result};
use chronos_repo::{CursorPage, MetaFilter, Repository};
use serde_json::Value;

/// Read options accepted by [`Resolver::get_item`].
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// Return the snapshot at this exact object version. Mutually
    /// exclusive with `at`.
    pub ov: Option<u64>,
    /// Return the snapshot at or before this instant. Mutually exclusive
    /// with `ov`.
    pub at: Option<chrono::DateTime<chrono::Utc>>,
    /// Surface logically-deleted items instead of hiding them.
    pub include_deleted: bool,
    /// Attach the `{ov, cv, at, metaIndexed, deletedAt?}` envelope.
    pub include_meta: bool,
    /// Whitelist of top-level payload fields to return.
    pub projection: Option<Vec<String>>,
    /// If set, presign every reference descriptor found in the payload
    /// with this TTL in seconds.
    pub presign_ttl_seconds: Option<u64>,
}

/// The `{ov, cv, at, metaIndexed, deletedAt?}` envelope returned alongside
/// the item when `includeMeta` is set.
#[derive(Debug, Clone)]
pub struct ItemMeta {
    /// Object version of the returned snapshot.
    pub ov: u64,
    /// Collection version of the returned snapshot.
    pub cv: u64,
    /// Commit instant of the returned snapshot.
    pub at: chrono::DateTime<chrono::Utc>,
    /// Indexed metadata projection.
    pub meta_indexed: Value,
    /// Logical-delete instant, if the item is tombstoned.
    pub deleted_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// The result of a single-item read.
#[derive(Debug, Clone)]
pub struct GetResult {
    /// Item identifier.
    pub id: ItemId,
    /// The (possibly projected, possibly presigned) user payload.
    pub item: Value,
    /// Present only when `includeMeta` was requested.
    pub meta: Option<ItemMeta>,
}

fn validate_options(options: &GetOptions) -> Result<()> {
    if options.ov.is_some() && options.at.is_some() {
        return Err(ChronosError::Validation("ov and at are mutually exclusive".to_string()));
    }
    Ok(())
}

fn strip_system(mut payload: Value) -> Value {
    if let Some(obj) = payload.as_object_mut() {
        obj.remove("_system");
    }
    payload
}

fn apply_projection(payload: Value, projection: Option<&[String]>) -> Value {
    let Some(fields) = projection else { return payload };
    match payload {
        Value::Object(obj) => {
            let mut projected = serde_json::Map::new();
            for field in fields {
                if let Some(value) = obj.get(field) {
                    projected.insert(field.clone(), value.clone());
                }
            }
            Value::Object(projected)
        }
        other => other,
    }
}

fn presign_refs<'a>(
    value: Value,
    blob: &'a dyn BlobAdapter,
    ttl_seconds: u64,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Value> + 'a>> {
    Box::pin(async move {
        match value {
            Value::Object(mut obj) => {
                if let Some(Value::Object(mut reference)) = obj.remove("ref") {
                    if let (Some(bucket), Some(key)) = (
                        reference.get("contentBucket").and_then(Value::as_str).map(str::to_string),
                        reference.get("blobKey").and_then(Value::as_str).map(str::to_string),
                    ) {
                        if let Ok(url) = blob.presign_get(&bucket, &key, ttl_seconds).await {
                            reference.insert("url".to_string(), Value::String(url));
                        }
                    }
                    obj.insert("ref".to_string(), Value::Object(reference));
                }
                let mut out = serde_json::Map::new();
                for (k, v) in obj {
                    out.insert(k, presign_refs(v, blob, ttl_seconds).await);
                }
                Value::Object(out)
            }
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(presign_refs(item, blob, ttl_seconds).await);
                }
                Value::Array(out)
            }
            other => other,
        }
    })
}

/// Reads against one collection's routed backends. Blob reads use the
/// bucket recorded on each head/version row rather than a fixed bucket, so
/// historical rows written under a prior bucket configuration still read
/// correctly.
pub struct Resolver {
    repo: Repository,
    blob: Arc<dyn BlobAdapter>,
}

impl Resolver {
    /// Build a resolver bound to one collection's routed backends.
    pub fn new(repo: Repository, blob: Arc<dyn BlobAdapter>) -> Self {
        Resolver { repo, blob }
    }

    /// Read a single item per `options`. Returns `Ok(None)` when the item
    /// does not exist or is hidden by the default not-deleted filter.
    pub async fn get_item(&self, id: &ItemId, options: &GetOptions) -> Result<Option<GetResult>> {
        validate_options(options)?;

        let (blob_bucket, blob_key, ov, cv, at, meta_indexed, deleted_at) = if let Some(ov) = options.ov {
            match self.repo.get_version(id, ov).await? {
                Some(v) => (v.blob.bucket, v.blob.key, v.ov, v.cv, v.at, v.meta_indexed, None),
                None => return Ok(None),
            }
        } else if let Some(at) = options.at {
            match self.repo.get_version_as_of(id, at).await? {
                Some(v) => (v.blob.bucket, v.blob.key, v.ov, v.cv, v.at, v.meta_indexed, None),
                None => return Ok(None),
            }
        } else {
            match self.repo.get_head(id).await? {
                Some(h) => {
                    if h.is_deleted() && !options.include_deleted {
                        return Ok(None);
                    }
                    (h.blob.bucket, h.blob.key, h.ov, h.cv, h.updated_at, h.meta_indexed, h.deleted_at)
                }
                None => return Ok(None),
            }
        };

        let snapshot = self.blob.get_json(&blob_bucket, &blob_key).await?;
        let mut item = strip_system(snapshot);
        item = apply_projection(item, options.projection.as_deref());
        if let Some(ttl) = options.presign_ttl_seconds {
            item = presign_refs(item, self.blob.as_ref(), ttl).await;
        }

        let meta = options.include_meta.then(|| ItemMeta {
            ov,
            cv,
            at,
            meta_indexed,
            deleted_at,
        });

        Ok(Some(GetResult { id: *id, item, meta }))
    }

    /// List heads matching the safe metadata filter subset, paginated.
    pub async fn list_by_metadata(
        &self,
        filters: &[MetaFilter],
        page: &CursorPage,
        include_deleted: bool,
    ) -> Result<Vec<ItemId>> {
        let query = chronos_repo::filter::build_filter(filters)?;
        let heads = self.repo.find_heads(query, page, include_deleted).await?;
        Ok(heads.into_iter().map(|h| h.item_id).collect())
    }
}

/// One tier's resolver, paired with a human-readable tier label for
/// diagnostics and `per_tier` results.
pub struct TierEntry {
    /// `"generic"`, `"domain:<name>"`, or `"tenant:<id>"`.
    pub label: String,
    /// The resolver for this tier's routed backend pair.
    pub resolver: Resolver,
}

/// The result of a tiered lookup.
pub struct TieredResult {
    /// The resolved (possibly merged) payload.
    pub item: Value,
    /// Tier labels that contributed, in merge order (or a single entry for
    /// first-match mode).
    pub tiers_matched: Vec<String>,
    /// The raw per-tier payload, for tiers that had a record.
    pub per_tier: HashMap<String, Value>,
}

/// Implements `getKnowledge`/`getMetadata`: scans an ordered tier list in
/// either first-match or deep-merge mode.
pub struct TieredLookup {
    /// Tiers in priority order *generic → domain → tenant* (merge-mode
    /// fold order, so a later, more specific tier wins a conflict);
    /// first-match mode walks this list in reverse, so the most specific
    /// tier wins.
    pub tiers: Vec<TierEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ov_and_at_are_mutually_exclusive() {
        let options = GetOptions {
            ov: Some(1),
            at: Some(chrono::Utc::now()),
            ..Default::default()
        };
        assert!(validate_options(&options).is_err());
    }

    #[test]
    fn strip_system_removes_only_the_system_key() {
        let payload = json!({"name": "acme", "_system": {"state": "synched"}});
        assert_eq!(strip_system(payload), json!({"name": "acme"}));
    }

    #[test]
    fn projection_keeps_only_whitelisted_top_level_fields() {
        let payload = json!({"a": 1, "b": 2, "c": 3});
        let projected = apply_projection(payload, Some(&["a".to_string(), "c".to_string()]));
        assert_eq!(projected, json!({"a": 1, "c": 3}));
    }

    #[test]
    fn no_projection_is_a_no_op() {
        let payload = json!({"a": 1, "b": 2});
        assert_eq!(apply_projection(payload.clone(), None), payload);
    }

    fn tiered_fixture() -> Vec<(String, Value)> {
        vec![
            (
                "generic".to_string(),
                json!({"theme": "light", "features": ["a"], "settings": {"timeout": 30}}),
            ),
            (
                "domain".to_string(),
                json!({"features": ["b"], "settings": {"retries": 3}}),
            ),
            (
                "tenant".to_string(),
                json!({"theme": "dark", "features": ["c"], "settings": {"timeout": 60}}),
            ),
        ]
    }

    #[test]
    fn merge_mode_lets_tenant_win_conflicts_and_unions_arrays() {
        let result = fold_tiers(tiered_fixture(), true).expect("all three tiers matched");
        assert_eq!(
            result.item,
            json!({"theme": "dark", "features": ["a", "b", "c"], "settings": {"timeout": 60, "retries": 3}})
        );
        assert_eq!(result.tiers_matched, vec!["generic", "domain", "tenant"]);
    }

    #[test]
    fn first_match_mode_prefers_the_most_specific_tier() {
        let result = fold_tiers(tiered_fixture(), false).expect("all three tiers matched");
        assert_eq!(result.tiers_matched, vec!["tenant"]);
        assert_eq!(result.item, json!({"theme": "dark", "features": ["c"], "settings": {"timeout": 60}}));
    }

    #[test]
    fn first_match_mode_falls_back_when_the_most_specific_tier_is_absent() {
        let mut fixture = tiered_fixture();
        fixture.pop(); // drop tenant; only generic/domain remain
        let result = fold_tiers(fixture, false).expect("generic and domain matched");
        assert_eq!(result.tiers_matched, vec!["domain"]);
    }

    #[test]
    fn no_tiers_found_resolves_to_none() {
        assert!(fold_tiers(Vec::new(), true).is_none());
        assert!(fold_tiers(Vec::new(), false).is_none());
    }
}

/// Folds already-fetched per-tier payloads (in *generic → domain → tenant*
/// order) into a single [`TieredResult`]. Pulled out of [`TieredLookup::resolve`]
/// so the priority/merge rules are exercisable without a live backend.
fn fold_tiers(found: Vec<(String, Value)>, merge_mode: bool) -> Option<TieredResult> {
    if merge_mode {
        let mut merged: Option<Value> = None;
        let mut tiers_matched = Vec::new();
        let mut per_tier = HashMap::new();
        for (label, item) in found {
            per_tier.insert(label.clone(), item.clone());
            tiers_matched.push(label);
            merged = Some(match merged {
                Some(existing) => merge::deep_merge(&existing, &item),
                None => item,
            });
        }
        merged.map(|item| TieredResult {
            item,
            tiers_matched,
            per_tier,
        })
    } else {
        found.into_iter().last().map(|(label, item)| {
            let mut per_tier = HashMap::new();
            per_tier.insert(label.clone(), item.clone());
            TieredResult {
                item,
                tiers_matched: vec![label],
                per_tier,
            }
        })
    }
}

impl TieredLookup {
    /// Resolve `id` across tiers. `merge=false` returns the most specific
    /// tier (*tenant → domain → generic* priority) with a record;
    /// `merge=true` deep-merges every tier that has one, generic first so
    /// tenant values win conflicts.
    pub async fn resolve(&self, id: &ItemId, merge_mode: bool, options: &GetOptions) -> Result<Option<TieredResult>> {
        let mut found = Vec::new();
        for entry in &self.tiers {
            if let Some(result) = entry.resolver.get_item(id, options).await? {
                found.push((entry.label.clone(), result.item));
            }
        }
        Ok(fold_tiers(found, merge_mode))
    }
}
