//! Create / Update / Delete state machine: lock → externalize → blob write
//! → doc-store commit → unlock, with saga-style compensation on failure.

use std::sync::Arc;

use chronos_blob::BlobAdapter;
use chronos_core::config::{CollectionMap, DevShadowConfig};
use chronos_core::{
    BlobPointer, ChronosError, HeadRecord, ItemId, KeyBuilder, Lineage, Op, Result, SystemEnvelope,
    VersionRecord,
};
use chronos_externalize::Externalizer;
use chronos_locks::LockManager;
use chronos_repo::{Repository, TransactionMode};
use serde_json::Value;

/// The mutation result shape every CRUD operation returns on success.
#[derive(Debug, Clone)]
pub struct MutationResult {
    /// Item identifier.
    pub id: ItemId,
    /// Object version produced by this mutation.
    pub ov: u64,
    /// Collection version produced by this mutation.
    pub cv: u64,
    /// Commit instant.
    pub at: chrono::DateTime<chrono::Utc>,
}

/// Inputs shared by CREATE.
#[derive(Debug, Clone, Default)]
pub struct CreateInput {
    /// Preallocated item id. When unset, a fresh one is generated.
    ///
    /// Callers that enqueue a failed CREATE onto the fallback queue must
    /// carry the id they generated into the retry, so a later successful
    /// attempt lands on the same item instead of inserting a duplicate.
    pub id: Option<ItemId>,
    /// The user payload.
    pub payload: Value,
    /// Optional actor identifier.
    pub actor: Option<String>,
    /// Optional human-readable reason.
    pub reason: Option<String>,
    /// Lineage hints.
    pub lineage: Lineage,
}

/// Inputs for UPDATE (full replacement).
#[derive(Debug, Clone)]
pub struct UpdateInput {
    /// Item to update.
    pub id: ItemId,
    /// The new payload, replacing the prior snapshot wholesale.
    pub payload: Value,
    /// If set, the commit fails with `OptimisticLock` unless it matches the
    /// head's current `ov`.
    pub expected_ov: Option<u64>,
    /// Optional actor identifier.
    pub actor: Option<String>,
    /// Optional human-readable reason.
    pub reason: Option<String>,
}

/// Inputs for DELETE.
#[derive(Debug, Clone)]
pub struct DeleteInput {
    /// Item to delete.
    pub id: ItemId,
    /// If set, the commit fails with `OptimisticLock` unless it matches the
    /// head's current `ov`.
    pub expected_ov: Option<u64>,
    /// Optional actor identifier.
    pub actor: Option<String>,
    /// Optional human-readable reason.
    pub reason: Option<String>,
}

/// Runs the CRUD state machine for one collection against one routed
/// backend pair.
pub struct CrudEngine {
    repo: Repository,
    blob: Arc<dyn BlobAdapter>,
    externalizer: Externalizer,
    locks: LockManager,
    collection: String,
    map: CollectionMap,
    snapshot_bucket: String,
    content_bucket: String,
    versioning_enabled: bool,
    logical_delete_enabled: bool,
    dev_shadow: DevShadowConfig,
    transaction_mode: TransactionMode,
}

impl CrudEngine {
    /// Build a CRUD engine bound to one collection's routed backends.
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
        logical_delete_enabled: bool,
        dev_shadow: DevShadowConfig,
        transaction_mode: TransactionMode,
    ) -> Self {
        CrudEngine {
            externalizer: Externalizer::new(blob.clone()),
            repo,
            blob,
            locks,
            collection: collection.into(),
            map,
            snapshot_bucket: snapshot_bucket.into(),
            content_bucket: content_bucket.into(),
            versioning_enabled,
            logical_delete_enabled,
            dev_shadow,
            transaction_mode,
        }
    }

    fn embed_system(payload: &Value, system: &SystemEnvelope) -> Result<Value> {
        let mut with_system = payload.clone();
        let system_value = serde_json::to_value(system)
            .map_err(|e| ChronosError::Integrity(format!("encoding _system: {e}")))?;
        with_system["_system"] = system_value;
        Ok(with_system)
    }

    fn full_shadow_for(&self, payload: &Value) -> Option<Value> {
        crate::util::full_shadow_for(&self.dev_shadow, payload)
    }

    async fn read_system_envelope(&self, head: &HeadRecord) -> Result<SystemEnvelope> {
        let snapshot = self.blob.get_json(&self.snapshot_bucket, &head.blob.key).await?;
        let system = snapshot
            .get("_system")
            .cloned()
            .ok_or_else(|| ChronosError::Integrity(format!("snapshot {} has no _system envelope", head.blob.key)))?;
        serde_json::from_value(system).map_err(|e| ChronosError::Integrity(format!("decoding _system: {e}")))
    }

    /// Create a brand-new item.
    #[tracing::instrument(skip(self, input), fields(collection = %self.collection))]
    pub async fn create(&self, input: CreateInput) -> Result<MutationResult> {
        let item_id = input.id.unwrap_or_else(ItemId::new);
        let handle = self.locks.acquire(item_id, "create", None).await?;

        let outcome = self.create_locked(item_id, input).await;
        let _ = self.locks.release(&handle).await;
        outcome
    }

    async fn create_locked(&self, item_id: ItemId, input: CreateInput) -> Result<MutationResult> {
        let now = chrono::Utc::now();
        let system = SystemEnvelope::for_create(now, input.lineage);

        let externalized = self
            .externalizer
            .externalize(&self.collection, &item_id, 0, &input.payload, &self.map, &self.content_bucket)
            .await?;

        let stored_payload = match Self::embed_system(&externalized.payload, &system) {
            Ok(p) => p,
            Err(e) => {
                self.externalizer.compensate(&externalized.written).await;
                return Err(e);
            }
        };

        let snapshot_key = KeyBuilder::snapshot_key(&self.collection, &item_id, 0)?;
        let put = match self.blob.put_json(&self.snapshot_bucket, &snapshot_key, &stored_payload).await {
            Ok(put) => put,
            Err(e) => {
                self.externalizer.compensate(&externalized.written).await;
                return Err(e.into());
            }
        };

        let blob_ptr = BlobPointer {
            bucket: self.snapshot_bucket.clone(),
            key: snapshot_key,
        };

        let commit = self
            .commit_head_and_version(
                item_id,
                0,
                Op::Create,
                now,
                input.actor,
                input.reason,
                blob_ptr,
                externalized.meta_indexed,
                put.size,
                put.checksum,
                None,
                now,
                None,
                self.full_shadow_for(&stored_payload),
            )
            .await;

        if commit.is_err() {
            let mut written = externalized.written;
            written.push(chronos_externalize::WrittenBlob {
                bucket: self.snapshot_bucket.clone(),
                key: KeyBuilder::snapshot_key(&self.collection, &item_id, 0)?,
            });
            self.externalizer.compensate(&written).await;
        }
        commit
    }

    /// Replace an item's payload wholesale.
    #[tracing::instrument(skip(self, input), fields(collection = %self.collection, item_id = %input.id))]
    pub async fn update(&self, input: UpdateInput) -> Result<MutationResult> {
        let id = input.id;
        let handle = self.locks.acquire(id, "update", None).await?;
        let outcome = self.update_locked(input).await;
        let _ = self.locks.release(&handle).await;
        outcome
    }

    async fn update_locked(&self, input: UpdateInput) -> Result<MutationResult> {
        let head = self
            .repo
            .get_head(&input.id)
            .await?
            .ok_or_else(|| ChronosError::NotFound(input.id.to_string()))?;

        if let Some(expected) = input.expected_ov {
            if expected != head.ov {
                return Err(ChronosError::OptimisticLock {
                    expected,
                    observed: head.ov,
                });
            }
        }

        let mut system = self.read_system_envelope(&head).await?;
        let now = chrono::Utc::now();
        system.updated_at = now;

        let ov = head.ov + 1;
        let externalized = self
            .externalizer
            .externalize(&self.collection, &input.id, ov as i64, &input.payload, &self.map, &self.content_bucket)
            .await?;

        let stored_payload = match Self::embed_system(&externalized.payload, &system) {
            Ok(p) => p,
            Err(e) => {
                self.externalizer.compensate(&externalized.written).await;
                return Err(e);
            }
        };

        let snapshot_key = KeyBuilder::snapshot_key(&self.collection, &input.id, ov as i64)?;
        let put = match self.blob.put_json(&self.snapshot_bucket, &snapshot_key, &stored_payload).await {
            Ok(put) => put,
            Err(e) => {
                self.externalizer.compensate(&externalized.written).await;
                return Err(e.into());
            }
        };

        let blob_ptr = BlobPointer {
            bucket: self.snapshot_bucket.clone(),
            key: snapshot_key,
        };

        let commit = self
            .commit_head_and_version(
                input.id,
                ov,
                Op::Update,
                now,
                input.actor,
                input.reason,
                blob_ptr,
                externalized.meta_indexed,
                put.size,
                put.checksum,
                None,
                head.created_at,
                Some(head.ov),
                self.full_shadow_for(&stored_payload),
            )
            .await;

        if commit.is_err() {
            let mut written = externalized.written;
            written.push(chronos_externalize::WrittenBlob {
                bucket: self.snapshot_bucket.clone(),
                key: KeyBuilder::snapshot_key(&self.collection, &input.id, ov as i64)?,
            });
            self.externalizer.compensate(&written).await;
        }
        commit
    }

    /// Delete an item. Logical delete (default) appends a tombstone VR
    /// pointing at the prior snapshot; hard delete removes all VRs/HR.
    #[tracing::instrument(skip(self, input), fields(collection = %self.collection, item_id = %input.id))]
    pub async fn delete(&self, input: DeleteInput) -> Result<MutationResult> {
        let id = input.id;
        let handle = self.locks.acquire(id, "delete", None).await?;
        let outcome = self.delete_locked(input).await;
        let _ = self.locks.release(&handle).await;
        outcome
    }

    async fn delete_locked(&self, input: DeleteInput) -> Result<MutationResult> {
        let head = self
            .repo
            .get_head(&input.id)
            .await?
            .ok_or_else(|| ChronosError::NotFound(input.id.to_string()))?;

        if let Some(expected) = input.expected_ov {
            if expected != head.ov {
                return Err(ChronosError::OptimisticLock {
                    expected,
                    observed: head.ov,
                });
            }
        }

        let now = chrono::Utc::now();

        if !self.logical_delete_enabled {
            self.repo.hard_delete(&input.id).await?;
            return Ok(MutationResult {
                id: input.id,
                ov: head.ov,
                cv: head.cv,
                at: now,
            });
        }

        let ov = head.ov + 1;
        let actor = input.actor;
        let reason = input.reason;
        let (cv, _) = self
            .repo
            .commit_version_and_head(self.transaction_mode, self.versioning_enabled, Some(head.ov), |cv| {
                let version = VersionRecord {
                    item_id: input.id,
                    ov,
                    cv,
                    op: Op::Delete,
                    at: now,
                    actor: actor.clone(),
                    reason: reason.clone(),
                    blob: head.blob.clone(),
                    meta_indexed: head.meta_indexed.clone(),
                    size: head.size,
                    checksum: head.checksum.clone(),
                    prev_ov: Some(head.ov),
                };
                let new_head = HeadRecord {
                    item_id: input.id,
                    ov,
                    cv,
                    blob: head.blob.clone(),
                    meta_indexed: head.meta_indexed.clone(),
                    size: head.size,
                    checksum: head.checksum.clone(),
                    created_at: head.created_at,
                    updated_at: now,
                    deleted_at: Some(now),
                    full_shadow: head.full_shadow.clone(),
                };
                (version, new_head)
            })
            .await?;

        Ok(MutationResult {
            id: input.id,
            ov,
            cv,
            at: now,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn commit_head_and_version(
        &self,
        item_id: ItemId,
        ov: u64,
        op: Op,
        at: chrono::DateTime<chrono::Utc>,
        actor: Option<String>,
        reason: Option<String>,
        blob: BlobPointer,
        meta_indexed: Value,
        size: Option<u64>,
        checksum: Option<String>,
        prev_ov: Option<u64>,
        created_at: chrono::DateTime<chrono::Utc>,
        expected_head_ov: Option<u64>,
        full_shadow: Option<Value>,
    ) -> Result<MutationResult> {
        let (cv, _) = self
            .repo
            .commit_version_and_head(self.transaction_mode, self.versioning_enabled, expected_head_ov, |cv| {
                let version = VersionRecord {
                    item_id,
                    ov,
                    cv,
                    op,
                    at,
                    actor: actor.clone(),
                    reason: reason.clone(),
                    blob: blob.clone(),
                    meta_indexed: meta_indexed.clone(),
                    size,
                    checksum: checksum.clone(),
                    prev_ov,
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

        Ok(MutationResult {
            id: item_id,
            ov,
            cv,
            at,
        })
    }
}
