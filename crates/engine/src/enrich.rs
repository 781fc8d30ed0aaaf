//! Incremental, provenance-aware modification: deep-merge a patch (or a
//! batch of patches) into the current snapshot and commit it as a new
//! version, exactly as an UPDATE does.

use std::sync::Arc;

use chronos_blob::BlobAdapter;
use chronos_core::config::{CollectionMap, DevShadowConfig};
use chronos_core::{merge, BlobPointer, ChronosError, HeadRecord, ItemId, KeyBuilder, Op, Result, VersionRecord};
use chronos_externalize::Externalizer;
use chronos_locks::LockManager;
use chronos_repo::{Repository, TransactionMode};
use serde_json::Value;

use crate::crud::MutationResult;

/// A single enrich request.
#[derive(Debug, Clone)]
pub struct EnrichInput {
    /// Item to enrich.
    pub id: ItemId,
    /// The patch to deep-merge into the current snapshot.
    pub patch: Value,
    /// Identifier of the function that produced this patch, recorded in
    /// `_system.functionIds` (deduplicated, insertion order preserved).
    pub function_id: Option<String>,
    /// Optional actor identifier.
    pub actor: Option<String>,
    /// Optional human-readable reason.
    pub reason: Option<String>,
}

/// A batch of patches applied in order against the evolving in-memory
/// target before a single blob write and commit.
#[derive(Debug, Clone)]
pub struct BatchEnrichInput {
    /// Item to enrich.
    pub id: ItemId,
    /// Patches applied in order.
    pub patches: Vec<Value>,
    /// Function identifiers to record, one per patch or fewer; all are
    /// recorded regardless of which patch they correspond to.
    pub function_ids: Vec<String>,
    /// Optional actor identifier.
    pub actor: Option<String>,
    /// Optional human-readable reason.
    pub reason: Option<String>,
}

/// Deep-merge enrichment against one collection's routed backends.
pub struct EnrichEngine {
    repo: Repository,
    blob: Arc<dyn BlobAdapter>,
    externalizer: Externalizer,
    locks: LockManager,
    collection: String,
    map: CollectionMap,
    snapshot_bucket: String,
    content_bucket: String,
    versioning_enabled: bool,
    dev_shadow: DevShadowConfig,
    transaction_mode: TransactionMode,
}

impl EnrichEngine {
    /// Build an enrich engine bound to one collection's routed backends.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repo: Repository,
        blob: Arc<dyn BlobAdapter>,
        locks: LockManager,
        collection: impl Into<String>,
        map: CollectionMap,
        snapshot_bucket: impl Into<String>,
        content_bucket: impl Into<String>,
        versioning_enabled: bool,
        dev_shadow: DevShadowConfig,
        transaction_mode: TransactionMode,
    ) -> Self {
        EnrichEngine {
            externalizer: Externalizer::new(blob.clone()),
            repo,
            blob,
            locks,
            collection: collection.into(),
            map,
            snapshot_bucket: snapshot_bucket.into(),
            content_bucket: content_bucket.into(),
            versioning_enabled,
            dev_shadow,
            transaction_mode,
        }
    }

    /// Apply a single patch.
    pub async fn enrich(&self, input: EnrichInput) -> Result<MutationResult> {
        let function_ids = input.function_id.into_iter().collect::<Vec<_>>();
        self.apply(input.id, vec![input.patch], function_ids, input.actor, input.reason)
            .await
    }

    /// Apply a batch of patches as a single new version.
    pub async fn batch_enrich(&self, input: BatchEnrichInput) -> Result<MutationResult> {
        self.apply(input.id, input.patches, input.function_ids, input.actor, input.reason)
            .await
    }

    async fn apply(
        &self,
        id: ItemId,
        patches: Vec<Value>,
        function_ids: Vec<String>,
        actor: Option<String>,
        reason: Option<String>,
    ) -> Result<MutationResult> {
        let handle = self.locks.acquire(id, "enrich", None).await?;
        let outcome = self.apply_locked(id, patches, function_ids, actor, reason).await;
        let _ = self.locks.release(&handle).await;
        outcome
    }

    async fn apply_locked(
        &self,
        id: ItemId,
        patches: Vec<Value>,
        function_ids: Vec<String>,
        actor: Option<String>,
        reason: Option<String>,
    ) -> Result<MutationResult> {
        let head = self
            .repo
            .get_head(&id)
            .await?
            .ok_or_else(|| ChronosError::NotFound(id.to_string()))?;

        if patches.iter().all(|p| p == &Value::Object(Default::default())) {
            return Ok(MutationResult {
                id,
                ov: head.ov,
                cv: head.cv,
                at: head.updated_at,
            });
        }

        let current = self.blob.get_json(&self.snapshot_bucket, &head.blob.key).await?;
        let mut system_value = current
            .get("_system")
            .cloned()
            .ok_or_else(|| ChronosError::Integrity(format!("snapshot {} has no _system envelope", head.blob.key)))?;
        let user_payload = {
            let mut stripped = current.clone();
            if let Some(obj) = stripped.as_object_mut() {
                obj.remove("_system");
            }
            stripped
        };

        let merged = merge::apply_patches(&user_payload, &patches);
        if merged == user_payload {
            return Ok(MutationResult {
                id,
                ov: head.ov,
                cv: head.cv,
                at: head.updated_at,
            });
        }

        let now = chrono::Utc::now();
        if let Some(updated_at) = system_value.get_mut("updatedAt") {
            *updated_at = serde_json::to_value(now).expect("DateTime<Utc> always serializes");
        }
        if let Some(function_ids_value) = system_value.get_mut("functionIds").and_then(Value::as_array_mut) {
            for function_id in &function_ids {
                if !function_ids_value.iter().any(|v| v.as_str() == Some(function_id)) {
                    function_ids_value.push(Value::String(function_id.clone()));
                }
            }
        }

        let ov = head.ov + 1;
        let externalized = self
            .externalizer
            .externalize(&self.collection, &id, ov as i64, &merged, &self.map, &self.content_bucket)
            .await?;

        let mut stored_payload = externalized.payload;
        stored_payload["_system"] = system_value;

        let snapshot_key = KeyBuilder::snapshot_key(&self.collection, &id, ov as i64)?;
        let put = match self.blob.put_json(&self.snapshot_bucket, &snapshot_key, &stored_payload).await {
            Ok(put) => put,
            Err(e) => {
                self.externalizer.compensate(&externalized.written).await;
                return Err(e.into());
            }
        };

        let blob_ptr = BlobPointer {
            bucket: self.snapshot_bucket.clone(),
            key: snapshot_key.clone(),
        };

        let commit = self
            .commit(
                id,
                ov,
                now,
                actor,
                reason,
                blob_ptr,
                externalized.meta_indexed,
                put.size,
                put.checksum,
                head.ov,
                head.created_at,
                self.full_shadow_for(&stored_payload),
            )
            .await;

        if commit.is_err() {
            let mut written = externalized.written;
            written.push(chronos_externalize::WrittenBlob {
                bucket: self.snapshot_bucket.clone(),
                key: KeyBuilder::snapshot_key(&self.collection, &id, ov as i64)?,
            });
            self.externalizer.compensate(&written).await;
        }
        commit
    }

    fn full_shadow_for(&self, payload: &Value) -> Option<Value> {
        crate::util::full_shadow_for(&self.dev_shadow, payload)
    }

    #[allow(clippy::too_many_arguments)]
    async fn commit(
        &self,
        item_id: ItemId,
        ov: u64,
        at: chrono::DateTime<chrono::Utc>,
        actor: Option<String>,
        reason: Option<String>,
        blob: BlobPointer,
        meta_indexed: Value,
        size: Option<u64>,
        checksum: Option<String>,
        prev_ov: u64,
        created_at: chrono::DateTime<chrono::Utc>,
        full_shadow: Option<Value>,
    ) -> Result<MutationResult> {
        let (cv, _) = self
            .repo
            .commit_version_and_head(self.transaction_mode, self.versioning_enabled, Some(prev_ov), |cv| {
                let version = VersionRecord {
                    item_id,
                    ov,
                    cv,
                    op: Op::Update,
                    at,
                    actor: actor.clone(),
                    reason: reason.clone(),
                    blob: blob.clone(),
                    meta_indexed: meta_indexed.clone(),
                    size,
                    checksum: checksum.clone(),
                    prev_ov: Some(prev_ov),
                };
                let head = HeadRecord {
                    item_id,
                    ov,
                    cv,
                    blob: blob.clone(),
                    meta_indexed: meta_indexed.clone(),
                    size,
                    checksum: checksum.clone(),
                    created_at,
                    updated_at: at,
                    deleted_at: None,
                    full_shadow: full_shadow.clone(),
                };
                (version, head)
            })
            .await?;

        Ok(MutationResult { id: item_id, ov, cv, at })
    }
}
