//! The core data model entities: Item, Version Record, Head Record,
//! Collection Counter, Transaction Lock, Fallback Operation, and the
//! `_system` envelope every stored payload carries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::ItemId;

/// A pointer to an object-store blob: bucket + key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobPointer {
    /// Bucket the object lives in.
    pub bucket: String,
    /// Key within the bucket.
    pub key: String,
}

/// The operation that produced a version record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Op {
    /// First write for an item (`ov = 0`).
    Create,
    /// A full-replacement or enrich write.
    Update,
    /// A logical or hard delete.
    Delete,
    /// A version produced by the restore engine.
    Restore,
}

/// Whether the blob write behind a payload has been confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SystemState {
    /// The blob write has not yet been confirmed durable.
    NewNotSynched,
    /// The blob write is confirmed; the doc-store commit followed it.
    Synched,
}

/// The `_system` envelope embedded in every stored payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemEnvelope {
    /// UTC instant of CREATE (`ov = 0`). Immutable for the lifetime of the item.
    pub inserted_at: DateTime<Utc>,
    /// UTC instant of the latest commit.
    pub updated_at: DateTime<Utc>,
    /// UTC instant of logical DELETE, if any.
    pub deleted_at: Option<DateTime<Utc>>,
    /// Boolean tombstone.
    pub deleted: bool,
    /// Identifiers of enrichment functions that have contributed, in
    /// insertion order, duplicates suppressed.
    pub function_ids: Vec<String>,
    /// Immediate lineage edge.
    pub parent_id: Option<String>,
    /// Immediate lineage edge (collection of the parent).
    pub parent_collection: Option<String>,
    /// Root lineage edge; defaults to parent when not explicit.
    pub origin_id: Option<String>,
    /// Root lineage edge (collection of the origin); may carry a `system:`
    /// prefix when an external system of origin is recorded.
    pub origin_collection: Option<String>,
    /// Whether the blob write behind this snapshot has been confirmed.
    pub state: SystemState,
}

impl SystemEnvelope {
    /// Build the envelope for a brand-new item (`ov = 0`).
    pub fn for_create(now: DateTime<Utc>, lineage: Lineage) -> Self {
        let origin_id = lineage
            .origin_id
            .clone()
            .or(lineage.parent_id_for_origin_default());
        let origin_collection = lineage
            .origin_collection
            .clone()
            .or(lineage.parent_collection_for_origin_default());
        SystemEnvelope {
            inserted_at: now,
            updated_at: now,
            deleted_at: None,
            deleted: false,
            function_ids: Vec::new(),
            parent_id: lineage.parent_id,
            parent_collection: lineage.parent_collection,
            origin_id,
            origin_collection,
            state: SystemState::NewNotSynched,
        }
    }

    /// Append a `functionId` to the provenance list, if not already present.
    pub fn record_function_id(&mut self, function_id: &str) {
        if !self.function_ids.iter().any(|f| f == function_id) {
            self.function_ids.push(function_id.to_string());
        }
    }
}

/// Lineage hints supplied at CREATE time.
#[derive(Debug, Clone, Default)]
pub struct Lineage {
    /// Immediate parent item id.
    pub parent_id: Option<String>,
    /// Immediate parent collection.
    pub parent_collection: Option<String>,
    /// Explicit root-origin item id, if different from the parent.
    pub origin_id: Option<String>,
    /// Explicit root-origin collection, if different from the parent.
    pub origin_collection: Option<String>,
}

impl Lineage {
    fn parent_id_for_origin_default(&self) -> Option<String> {
        self.parent_id.clone()
    }
    fn parent_collection_for_origin_default(&self) -> Option<String> {
        self.parent_collection.clone()
    }
}

/// An immutable snapshot describing one committed write.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionRecord {
    /// Item this version belongs to.
    pub item_id: ItemId,
    /// Object version (0-based, monotonic per item).
    pub ov: u64,
    /// Collection version (0-based, strictly monotonic per collection).
    pub cv: u64,
    /// The operation that produced this version.
    pub op: Op,
    /// UTC commit instant.
    pub at: DateTime<Utc>,
    /// Optional actor identifier.
    pub actor: Option<String>,
    /// Optional human-readable reason.
    pub reason: Option<String>,
    /// Pointer to the snapshot blob.
    pub blob: BlobPointer,
    /// Indexed projection of the payload.
    pub meta_indexed: Value,
    /// Byte size of the snapshot, if reported by the blob backend.
    pub size: Option<u64>,
    /// SHA-256 checksum of the snapshot bytes, if reported.
    pub checksum: Option<String>,
    /// The `ov` this version was derived from, if any (restore lineage).
    pub prev_ov: Option<u64>,
}

/// A mutable pointer to the latest version of an item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadRecord {
    /// `_id = itemId`.
    pub item_id: ItemId,
    /// Latest object version.
    pub ov: u64,
    /// Latest collection version.
    pub cv: u64,
    /// Pointer to the latest snapshot blob.
    pub blob: BlobPointer,
    /// Indexed projection of the latest payload.
    pub meta_indexed: Value,
    /// Byte size of the latest snapshot, if reported.
    pub size: Option<u64>,
    /// Checksum of the latest snapshot, if reported.
    pub checksum: Option<String>,
    /// Instant the item was created.
    pub created_at: DateTime<Utc>,
    /// Instant of the latest commit.
    pub updated_at: DateTime<Utc>,
    /// Instant of logical deletion, if any.
    pub deleted_at: Option<DateTime<Utc>>,
    /// Bounded-size embedded copy of the latest snapshot, if dev-shadow is
    /// enabled and the payload fits under the configured cap.
    pub full_shadow: Option<Value>,
}

impl HeadRecord {
    /// Whether default (non-`includeDeleted`) reads should hide this item.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A single document per collection holding the current `cv` value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionCounter {
    /// `_id` is the collection name.
    #[serde(rename = "_id")]
    pub id: String,
    /// Current collection version.
    pub cv: u64,
}

/// Per-item advisory lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionLock {
    /// Item the lock protects (unique index).
    pub item_id: ItemId,
    /// The operation the lock was acquired for.
    pub operation: String,
    /// When the lock was acquired.
    pub locked_at: DateTime<Utc>,
    /// When the lock expires if not released.
    pub expires_at: DateTime<Utc>,
    /// Identifier of the server/process holding the lock.
    pub server_id: String,
    /// Optional caller-supplied request id, for diagnostics.
    pub request_id: Option<String>,
}

/// Terminal status of a persisted fallback operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackStatus {
    /// Still awaiting retry.
    Pending,
    /// Exhausted `maxAttempts`; moved to the dead-letter collection.
    DeadLettered,
}

/// A persisted failed mutation awaiting retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackOperation {
    /// Unique id of this queue entry.
    #[serde(rename = "_id")]
    pub id: String,
    /// Kind of mutation: `"create" | "update" | "delete" | "enrich" | "restore"`.
    pub operation: String,
    /// Collection the mutation targets.
    pub collection: String,
    /// Item id the mutation targets (pre-allocated for CREATE so a later
    /// successful retry lands on the same item instead of duplicating it).
    pub item_id: ItemId,
    /// Serialized routing context (opaque to the queue itself).
    pub route_context: Value,
    /// The payload (or patch) the mutation was attempting to write.
    pub payload: Value,
    /// The `ov` the original caller expected, if any.
    pub expected_ov: Option<u64>,
    /// Number of attempts made so far.
    pub attempts: u32,
    /// Instant of the first attempt.
    pub first_attempt_at: DateTime<Utc>,
    /// Instant the next attempt is due.
    pub next_attempt_at: DateTime<Utc>,
    /// Current status.
    pub status: FallbackStatus,
    /// History of failure messages, most recent last, carried into
    /// dead-letter records when an operation exhausts its retry budget.
    pub failure_history: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_ids_are_deduplicated_and_order_preserving() {
        let mut env = SystemEnvelope::for_create(Utc::now(), Lineage::default());
        env.record_function_id("scorer@v1");
        env.record_function_id("tagger@v1");
        env.record_function_id("scorer@v1");
        assert_eq!(env.function_ids, vec!["scorer@v1", "tagger@v1"]);
    }

    #[test]
    fn origin_defaults_to_parent_when_absent() {
        let lineage = Lineage {
            parent_id: Some("p1".into()),
            parent_collection: Some("users".into()),
            origin_id: None,
            origin_collection: None,
        };
        let env = SystemEnvelope::for_create(Utc::now(), lineage);
        assert_eq!(env.origin_id.as_deref(), Some("p1"));
        assert_eq!(env.origin_collection.as_deref(), Some("users"));
    }

    #[test]
    fn head_record_is_deleted_reflects_deleted_at() {
        let hr = HeadRecord {
            item_id: ItemId::new(),
            ov: 1,
            cv: 1,
            blob: BlobPointer {
                bucket: "b".into(),
                key: "k".into(),
            },
            meta_indexed: Value::Null,
            size: None,
            checksum: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
            full_shadow: None,
        };
        assert!(!hr.is_deleted());
    }
}
