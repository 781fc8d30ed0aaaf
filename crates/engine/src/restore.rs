//! Append-only restore: produces a new version whose blob pointer is a
//! prior snapshot's, without copying any bytes.

use chronos_core::{ChronosError, HeadRecord, ItemId, Op, Result, VersionRecord};
use chronos_locks::LockManager;
use chronos_repo::{CursorPage, Repository, TransactionMode};

use crate::crud::MutationResult;

/// What to restore an object (or collection) to.
#[derive(Debug, Clone, Copy)]
pub enum RestoreTarget {
    /// A specific object version.
    Ov(u64),
    /// The latest version at or before this instant.
    At(chrono::DateTime<chrono::Utc>),
}

/// Inputs for a single-object restore.
#[derive(Debug, Clone)]
pub struct RestoreObjectInput {
    /// Item to restore.
    pub id: ItemId,
    /// What to restore to.
    pub target: RestoreTarget,
    /// Optional actor identifier.
    pub actor: Option<String>,
    /// Optional human-readable reason.
    pub reason: Option<String>,
}

/// Inputs for a collection-wide restore.
#[derive(Debug, Clone)]
pub struct RestoreCollectionInput {
    /// What collection version (or instant that resolves to one) to
    /// restore every item to.
    pub target: RestoreTarget,
    /// Report `planned` changes without writing anything.
    pub dry_run: bool,
    /// Page size for the per-item sweep.
    pub page_size: i64,
}

/// Outcome of a collection-wide restore.
#[derive(Debug, Clone, Default)]
pub struct RestoreCollectionResult {
    /// Items that would change (or did change, when not a dry run).
    pub planned: Vec<ItemId>,
    /// Mutations actually applied; empty for a dry run.
    pub applied: Vec<MutationResult>,
}

/// Restores objects and collections against one collection's routed
/// backends. Restore never copies blob bytes: it only flips pointers.
pub struct RestoreEngine {
    repo: Repository,
    locks: LockManager,
    transaction_mode: TransactionMode,
}

impl RestoreEngine {
    /// Build a restore engine bound to one collection's repository and
    /// lock manager.
    pub fn new(repo: Repository, locks: LockManager, transaction_mode: TransactionMode) -> Self {
        RestoreEngine { repo, locks, transaction_mode }
    }

    /// Restore a single item to `input.target`. A no-op (no new version)
    /// if the target is already the current head.
    pub async fn restore_object(&self, input: RestoreObjectInput) -> Result<MutationResult> {
        let handle = self.locks.acquire(input.id, "restore", None).await?;
        let outcome = self.restore_object_locked(input).await;
        let _ = self.locks.release(&handle).await;
        outcome
    }

    async fn restore_object_locked(&self, input: RestoreObjectInput) -> Result<MutationResult> {
        let head = self
            .repo
            .get_head(&input.id)
            .await?
            .ok_or_else(|| ChronosError::NotFound(input.id.to_string()))?;

        let target_version = match input.target {
            RestoreTarget::Ov(ov) => self.repo.get_version(&input.id, ov).await?,
            RestoreTarget::At(at) => self.repo.get_version_as_of(&input.id, at).await?,
        }
        .ok_or_else(|| ChronosError::NotFound(format!("no version of {} matches the restore target", input.id)))?;

        if target_version.ov == head.ov {
            return Ok(MutationResult {
                id: input.id,
                ov: head.ov,
                cv: head.cv,
                at: head.updated_at,
            });
        }

        self.flip_head(input.id, &head, &target_version, input.actor, input.reason)
            .await
    }

    async fn flip_head(
        &self,
        id: ItemId,
        head: &HeadRecord,
        target_version: &VersionRecord,
        actor: Option<String>,
        reason: Option<String>,
    ) -> Result<MutationResult> {
        let now = chrono::Utc::now();
        let ov = head.ov + 1;
        let (cv, _) = self
            .repo
            .commit_version_and_head(self.transaction_mode, true, Some(head.ov), |cv| {
                let version = VersionRecord {
                    item_id: id,
                    ov,
                    cv,
                    op: Op::Restore,
                    at: now,
                    actor: actor.clone(),
                    reason: reason.clone(),
                    blob: target_version.blob.clone(),
                    meta_indexed: target_version.meta_indexed.clone(),
                    size: target_version.size,
                    checksum: target_version.checksum.clone(),
                    prev_ov: Some(head.ov),
                };
                let new_head = HeadRecord {
                    item_id: id,
                    ov,
                    cv,
                    blob: target_version.blob.clone(),
                    meta_indexed: target_version.meta_indexed.clone(),
                    size: target_version.size,
                    checksum: target_version.checksum.clone(),
                    created_at: head.created_at,
                    updated_at: now,
                    deleted_at: None,
                    full_shadow: None,
                };
                (version, new_head)
            })
            .await?;

        Ok(MutationResult { id, ov, cv, at: now })
    }

    /// Restore every item in the collection to `input.target`, paginated.
    pub async fn restore_collection(&self, input: RestoreCollectionInput) -> Result<RestoreCollectionResult> {
        let target_cv = match input.target {
            RestoreTarget::Ov(cv) => cv,
            RestoreTarget::At(at) => self
                .repo
                .max_cv_as_of(at)
                .await?
                .ok_or_else(|| ChronosError::NotFound("no version committed at or before the restore target".to_string()))?,
        };

        let mut result = RestoreCollectionResult::default();
        let mut page = CursorPage {
            after_id: None,
            limit: input.page_size,
        };

        loop {
            let heads = self.repo.list_all_heads(&page).await?;
            if heads.is_empty() {
                break;
            }
            let last_id = heads.last().map(|h| h.item_id.to_string());

            for head in &heads {
                let Some(target_version) = self.repo.get_version_as_of_cv(&head.item_id, target_cv).await? else {
                    continue;
                };
                if target_version.ov == head.ov {
                    continue;
                }

                result.planned.push(head.item_id);
                if !input.dry_run {
                    let handle = self.locks.acquire(head.item_id, "restore", None).await?;
                    let applied = self.flip_head(head.item_id, head, &target_version, None, None).await;
                    let _ = self.locks.release(&handle).await;
                    result.applied.push(applied?);
                }
            }

            page.after_id = last_id;
        }

        Ok(result)
    }
}
