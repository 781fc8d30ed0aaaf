//! Per-item advisory lock: at most one mutation in flight per `itemId`
//! across the entire deployment, enforced by a unique-key insert rather
//! than a distributed lock service.

#![warn(missing_docs)]

use std::time::Duration;

use chronos_core::{ChronosError, ItemId, TransactionLock};
use chronos_repo::Repository;

/// Lock TTL should exceed the worst-case blob write latency plus the
/// document-store commit that follows it.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// A held lock, released by dropping the guard via [`LockManager::release`].
/// Not `Drop`-based: release is async, so callers must call it explicitly
/// (typically from a `finally`-style compensation path).
#[derive(Debug, Clone)]
pub struct LockHandle {
    /// Item this handle protects.
    pub item_id: ItemId,
    /// Identity of the server/process holding it.
    pub server_id: String,
}

/// Acquires, releases, and reaps per-item advisory locks for one
/// collection.
pub struct LockManager {
    repo: Repository,
    server_id: String,
    ttl: Duration,
}

impl LockManager {
    /// Build a lock manager over `repo`'s `_locks` collection, identifying
    /// this process as `server_id` for ownership and shutdown release.
    pub fn new(repo: Repository, server_id: impl Into<String>) -> Self {
        LockManager {
            repo,
            server_id: server_id.into(),
            ttl: DEFAULT_TTL,
        }
    }

    /// Override the default TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Acquire the lock for `item_id`. On a duplicate-key conflict, checks
    /// whether the existing lock has expired; if so, reaps it and retries
    /// once. Returns `LockConflict` if a live holder remains.
    #[tracing::instrument(skip(self), fields(item_id = %item_id))]
    pub async fn acquire(
        &self,
        item_id: ItemId,
        operation: &str,
        request_id: Option<String>,
    ) -> Result<LockHandle, ChronosError> {
        match self.try_insert(item_id, operation, request_id.clone()).await {
            Ok(handle) => Ok(handle),
            Err(ChronosError::LockConflict(_)) => {
                self.reap_if_expired(item_id).await?;
                self.try_insert(item_id, operation, request_id).await
            }
            Err(other) => Err(other),
        }
    }

    async fn try_insert(
        &self,
        item_id: ItemId,
        operation: &str,
        request_id: Option<String>,
    ) -> Result<LockHandle, ChronosError> {
        let now = chrono::Utc::now();
        let lock = TransactionLock {
            item_id,
            operation: operation.to_string(),
            locked_at: now,
            expires_at: now + chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::seconds(30)),
            server_id: self.server_id.clone(),
            request_id,
        };
        self.repo.insert_lock(&lock).await?;
        Ok(LockHandle {
            item_id,
            server_id: self.server_id.clone(),
        })
    }

    async fn reap_if_expired(&self, item_id: ItemId) -> Result<(), ChronosError> {
        if let Some(existing) = self.repo.get_lock(&item_id).await? {
            if existing.expires_at <= chrono::Utc::now() {
                self.repo.delete_lock(&item_id).await?;
            }
        }
        Ok(())
    }

    /// Release a lock held by this handle. A no-op if the lock was already
    /// reaped or released.
    pub async fn release(&self, handle: &LockHandle) -> Result<(), ChronosError> {
        self.repo
            .delete_lock_owned_by(&handle.item_id, &handle.server_id)
            .await?;
        Ok(())
    }

    /// Sweep every lock row whose TTL has elapsed. Intended to run on a
    /// periodic interval; callers decide separately whether to enqueue a
    /// fallback retry for whatever mutation each reaped lock interrupted.
    pub async fn reap_expired(&self) -> Result<u64, ChronosError> {
        self.repo.reap_expired_locks(chrono::Utc::now()).await
    }

    /// Release every lock this process holds, e.g. on graceful shutdown.
    pub async fn release_all(&self) -> Result<u64, ChronosError> {
        self.repo.release_all_owned_by(&self.server_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ttl_exceeds_thirty_seconds_margin() {
        assert_eq!(DEFAULT_TTL, Duration::from_secs(30));
    }

    #[test]
    fn lock_handle_carries_item_and_server() {
        let item_id = ItemId::new();
        let handle = LockHandle {
            item_id,
            server_id: "server-1".to_string(),
        };
        assert_eq!(handle.item_id, item_id);
        assert_eq!(handle.server_id, "server-1");
    }
}
