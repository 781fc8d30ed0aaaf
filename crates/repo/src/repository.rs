//! Typed CRUD against `{collection}_head`, `{collection}_ver`,
//! `{collection}_counter`, `{collection}_locks`.

use bson::{doc, Document};
use chronos_core::config::TransactionsConfig;
use chronos_core::{ChronosError, CollectionCounter, HeadRecord, ItemId, TransactionLock, VersionRecord};
use futures::stream::TryStreamExt;
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument};
use mongodb::{ClientSession, Database};

use crate::collections::{counter_name, head_name, locks_name, ver_name};
use crate::error::{classify, is_transactions_unsupported};
use crate::filter::CursorPage;
use crate::indexes::ensure_indexes;

/// How [`Repository::commit_version_and_head`] should group the counter
/// increment, version insert, and head upsert it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Run the three writes as independent calls.
    Disabled,
    /// Always wrap the writes in a multi-statement transaction; a
    /// deployment that doesn't support one (a standalone `mongod`) fails
    /// the commit rather than silently falling back.
    Required,
    /// Try a transaction first; if the deployment doesn't support one,
    /// fall back to the independent-calls path for this commit.
    AutoDetect,
}

impl TransactionMode {
    /// Resolve `transactions.enabled`/`transactions.autoDetect` into a mode.
    pub fn from_config(cfg: &TransactionsConfig) -> Self {
        if !cfg.enabled {
            TransactionMode::Disabled
        } else if cfg.auto_detect {
            TransactionMode::AutoDetect
        } else {
            TransactionMode::Required
        }
    }
}

fn to_doc<T: serde::Serialize>(op: &str, value: &T) -> Result<Document, ChronosError> {
    bson::to_document(value).map_err(|e| ChronosError::Integrity(format!("{op}: encode {e}")))
}

fn from_doc<T: serde::de::DeserializeOwned>(op: &str, doc: Document) -> Result<T, ChronosError> {
    bson::from_document(doc).map_err(|e| ChronosError::Integrity(format!("{op}: decode {e}")))
}

/// Typed access to one collection's head/version/counter/lock documents.
///
/// Cheap to clone: `mongodb::Database` is itself a handle to shared,
/// internally-pooled connection state.
#[derive(Clone)]
pub struct Repository {
    db: Database,
    collection: String,
}

impl Repository {
    /// Bind a repository to a logical document-store database and a
    /// collection name.
    pub fn new(db: Database, collection: impl Into<String>) -> Self {
        Repository {
            db,
            collection: collection.into(),
        }
    }

    /// Ensure every index this repository depends on exists. Safe to call
    /// on every open; creating an existing index is a no-op.
    pub async fn ensure_indexes(&self, indexed_props: &[String]) -> Result<(), ChronosError> {
        ensure_indexes(&self.db, &self.collection, indexed_props).await
    }

    fn head_coll(&self) -> mongodb::Collection<Document> {
        self.db.collection(&head_name(&self.collection))
    }

    fn ver_coll(&self) -> mongodb::Collection<Document> {
        self.db.collection(&ver_name(&self.collection))
    }

    fn counter_coll(&self) -> mongodb::Collection<Document> {
        self.db.collection(&counter_name(&self.collection))
    }

    fn locks_coll(&self) -> mongodb::Collection<Document> {
        self.db.collection(&locks_name(&self.collection))
    }

    /// Fetch the head row for `item_id`, if it exists.
    pub async fn get_head(&self, item_id: &ItemId) -> Result<Option<HeadRecord>, ChronosError> {
        let found = self
            .head_coll()
            .find_one(doc! { "_id": item_id.to_string() })
            .await
            .map_err(|e| classify("get_head", e))?;
        found.map(|d| from_doc("get_head", d)).transpose()
    }

    /// Insert a brand-new head row. Fails with `LockConflict` if `item_id`
    /// already has one (unique index on `_id`).
    pub async fn insert_head(&self, head: &HeadRecord) -> Result<(), ChronosError> {
        let mut d = to_doc("insert_head", head)?;
        d.insert("_id", head.item_id.to_string());
        self.head_coll()
            .insert_one(d)
            .await
            .map_err(|e| classify("insert_head", e))?;
        Ok(())
    }

    /// Replace the head row for `item_id` with `head`, requiring the
    /// previously observed `expected_ov` to still be current (optimistic
    /// concurrency check).
    pub async fn replace_head(
        &self,
        item_id: &ItemId,
        expected_ov: u64,
        head: &HeadRecord,
    ) -> Result<(), ChronosError> {
        let mut d = to_doc("replace_head", head)?;
        d.insert("_id", item_id.to_string());
        let result = self
            .head_coll()
            .replace_one(
                doc! { "_id": item_id.to_string(), "ov": expected_ov as i64 },
                d,
            )
            .await
            .map_err(|e| classify("replace_head", e))?;
        if result.matched_count == 0 {
            let observed = self.get_head(item_id).await?.map(|h| h.ov).unwrap_or(0);
            return Err(ChronosError::OptimisticLock {
                expected: expected_ov,
                observed,
            });
        }
        Ok(())
    }

    /// Insert an immutable version row.
    pub async fn insert_version(&self, version: &VersionRecord) -> Result<(), ChronosError> {
        let d = to_doc("insert_version", version)?;
        self.ver_coll()
            .insert_one(d)
            .await
            .map_err(|e| classify("insert_version", e))?;
        Ok(())
    }

    /// Fetch a specific version of an item.
    pub async fn get_version(&self, item_id: &ItemId, ov: u64) -> Result<Option<VersionRecord>, ChronosError> {
        let found = self
            .ver_coll()
            .find_one(doc! { "itemId": item_id.to_string(), "ov": ov as i64 })
            .await
            .map_err(|e| classify("get_version", e))?;
        found.map(|d| from_doc("get_version", d)).transpose()
    }

    /// Fetch the most recent version at or before `at`.
    pub async fn get_version_as_of(
        &self,
        item_id: &ItemId,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<VersionRecord>, ChronosError> {
        let filter = doc! { "itemId": item_id.to_string(), "at": { "$lte": bson::DateTime::from_chrono(at) } };
        let options = FindOptions::builder()
            .sort(doc! { "ov": -1 })
            .limit(1)
            .build();
        let mut cursor = self
            .ver_coll()
            .find(filter)
            .with_options(options)
            .await
            .map_err(|e| classify("get_version_as_of", e))?;
        match cursor.try_next().await.map_err(|e| classify("get_version_as_of", e))? {
            Some(d) => Ok(Some(from_doc("get_version_as_of", d)?)),
            None => Ok(None),
        }
    }

    /// Fetch the latest version for an item with `cv` at or before
    /// `target_cv`, used by collection-level restore.
    pub async fn get_version_as_of_cv(
        &self,
        item_id: &ItemId,
        target_cv: u64,
    ) -> Result<Option<VersionRecord>, ChronosError> {
        let filter = doc! { "itemId": item_id.to_string(), "cv": { "$lte": target_cv as i64 } };
        let options = FindOptions::builder().sort(doc! { "cv": -1 }).limit(1).build();
        let mut cursor = self
            .ver_coll()
            .find(filter)
            .with_options(options)
            .await
            .map_err(|e| classify("get_version_as_of_cv", e))?;
        match cursor
            .try_next()
            .await
            .map_err(|e| classify("get_version_as_of_cv", e))?
        {
            Some(d) => Ok(Some(from_doc("get_version_as_of_cv", d)?)),
            None => Ok(None),
        }
    }

    /// The highest `cv` among versions committed at or before `target_at`,
    /// across the whole collection. Used to translate a collection-restore
    /// `at` timestamp into a target `cv`.
    pub async fn max_cv_as_of(&self, target_at: chrono::DateTime<chrono::Utc>) -> Result<Option<u64>, ChronosError> {
        let filter = doc! { "at": { "$lte": bson::DateTime::from_chrono(target_at) } };
        let options = FindOptions::builder().sort(doc! { "cv": -1 }).limit(1).build();
        let mut cursor = self
            .ver_coll()
            .find(filter)
            .with_options(options)
            .await
            .map_err(|e| classify("max_cv_as_of", e))?;
        match cursor.try_next().await.map_err(|e| classify("max_cv_as_of", e))? {
            Some(d) => {
                let version: VersionRecord = from_doc("max_cv_as_of", d)?;
                Ok(Some(version.cv))
            }
            None => Ok(None),
        }
    }

    /// Every distinct `itemId` with a head row in this collection, for
    /// collection-level restore's per-item sweep. Paginated by `_id`.
    pub async fn list_all_heads(&self, page: &CursorPage) -> Result<Vec<HeadRecord>, ChronosError> {
        self.find_heads(Document::new(), page, true).await
    }

    /// List versions for an item, newest first.
    pub async fn list_versions(&self, item_id: &ItemId, page: &CursorPage) -> Result<Vec<VersionRecord>, ChronosError> {
        let mut filter = doc! { "itemId": item_id.to_string() };
        filter.extend(page.id_filter());
        let options = FindOptions::builder()
            .sort(doc! { "ov": -1 })
            .limit(page.limit)
            .build();
        let cursor = self
            .ver_coll()
            .find(filter)
            .with_options(options)
            .await
            .map_err(|e| classify("list_versions", e))?;
        let docs: Vec<Document> = cursor.try_collect().await.map_err(|e| classify("list_versions", e))?;
        docs.into_iter().map(|d| from_doc("list_versions", d)).collect()
    }

    /// Atomically increment and return the post-image `cv` for this
    /// collection, creating the counter document on first use.
    pub async fn inc_cv(&self) -> Result<u64, ChronosError> {
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();
        let updated = self
            .counter_coll()
            .find_one_and_update(
                doc! { "_id": self.collection.clone() },
                doc! { "$inc": { "cv": 1i64 } },
            )
            .with_options(options)
            .await
            .map_err(|e| classify("inc_cv", e))?
            .ok_or_else(|| ChronosError::Integrity("inc_cv: upsert returned no document".to_string()))?;
        let counter: CollectionCounter = from_doc("inc_cv", updated)?;
        Ok(counter.cv)
    }

    /// Run the VR insert + HR upsert + CC increment commit sequence that
    /// every mutation ends with. `build` turns the freshly-allocated `cv`
    /// into the version/head pair to write; it may run twice under
    /// [`TransactionMode::AutoDetect`] (once inside a transaction attempt,
    /// once in the sequential fallback), so it must be side-effect free.
    pub async fn commit_version_and_head<F>(
        &self,
        mode: TransactionMode,
        versioning_enabled: bool,
        expected_head_ov: Option<u64>,
        build: F,
    ) -> Result<(u64, HeadRecord), ChronosError>
    where
        F: Fn(u64) -> (VersionRecord, HeadRecord),
    {
        if mode == TransactionMode::Disabled {
            return self.commit_sequential(versioning_enabled, expected_head_ov, &build).await;
        }
        match self.commit_in_session(versioning_enabled, expected_head_ov, &build).await {
            Ok(result) => Ok(result),
            Err((_, true)) if mode == TransactionMode::AutoDetect => {
                self.commit_sequential(versioning_enabled, expected_head_ov, &build).await
            }
            Err((e, _)) => Err(e),
        }
    }

    async fn commit_sequential<F>(
        &self,
        versioning_enabled: bool,
        expected_head_ov: Option<u64>,
        build: &F,
    ) -> Result<(u64, HeadRecord), ChronosError>
    where
        F: Fn(u64) -> (VersionRecord, HeadRecord),
    {
        let cv = self.inc_cv().await?;
        let (version, head) = build(cv);
        if versioning_enabled {
            self.insert_version(&version).await?;
        }
        match expected_head_ov {
            None => self.insert_head(&head).await?,
            Some(expected) => self.replace_head(&head.item_id, expected, &head).await?,
        }
        Ok((cv, head))
    }

    /// `Err`'s `bool` flags whether the failure looks like the deployment
    /// not supporting multi-statement transactions at all, the signal
    /// [`TransactionMode::AutoDetect`] uses to retry sequentially.
    async fn commit_in_session<F>(
        &self,
        versioning_enabled: bool,
        expected_head_ov: Option<u64>,
        build: &F,
    ) -> Result<(u64, HeadRecord), (ChronosError, bool)>
    where
        F: Fn(u64) -> (VersionRecord, HeadRecord),
    {
        let mut session = self
            .db
            .client()
            .start_session()
            .await
            .map_err(|e| (classify("start_session", e), false))?;
        session
            .start_transaction()
            .await
            .map_err(|e| {
                let unsupported = is_transactions_unsupported(&e);
                (classify("start_transaction", e), unsupported)
            })?;

        match self.commit_steps_in_session(&mut session, versioning_enabled, expected_head_ov, build).await {
            Ok(result) => {
                session
                    .commit_transaction()
                    .await
                    .map_err(|e| (classify("commit_transaction", e), false))?;
                Ok(result)
            }
            Err(failure) => {
                let _ = session.abort_transaction().await;
                Err(failure)
            }
        }
    }

    async fn commit_steps_in_session<F>(
        &self,
        session: &mut ClientSession,
        versioning_enabled: bool,
        expected_head_ov: Option<u64>,
        build: &F,
    ) -> Result<(u64, HeadRecord), (ChronosError, bool)>
    where
        F: Fn(u64) -> (VersionRecord, HeadRecord),
    {
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();
        let updated = self
            .counter_coll()
            .find_one_and_update(doc! { "_id": self.collection.clone() }, doc! { "$inc": { "cv": 1i64 } })
            .with_options(options)
            .session(&mut *session)
            .await
            .map_err(|e| {
                let unsupported = is_transactions_unsupported(&e);
                (classify("inc_cv", e), unsupported)
            })?
            .ok_or_else(|| (ChronosError::Integrity("inc_cv: upsert returned no document".to_string()), false))?;
        let counter: CollectionCounter = from_doc("inc_cv", updated).map_err(|e| (e, false))?;
        let cv = counter.cv;

        let (version, head) = build(cv);

        if versioning_enabled {
            let d = to_doc("insert_version", &version).map_err(|e| (e, false))?;
            self.ver_coll()
                .insert_one(d)
                .session(&mut *session)
                .await
                .map_err(|e| (classify("insert_version", e), false))?;
        }

        let mut head_doc = to_doc("insert_head", &head).map_err(|e| (e, false))?;
        head_doc.insert("_id", head.item_id.to_string());
        match expected_head_ov {
            None => {
                self.head_coll()
                    .insert_one(head_doc)
                    .session(&mut *session)
                    .await
                    .map_err(|e| (classify("insert_head", e), false))?;
            }
            Some(expected) => {
                let result = self
                    .head_coll()
                    .replace_one(doc! { "_id": head.item_id.to_string(), "ov": expected as i64 }, head_doc)
                    .session(&mut *session)
                    .await
                    .map_err(|e| (classify("replace_head", e), false))?;
                if result.matched_count == 0 {
                    return Err((
                        ChronosError::OptimisticLock { expected, observed: head.ov },
                        false,
                    ));
                }
            }
        }

        Ok((cv, head))
    }

    /// Query head rows by a pre-built `metaIndexed.*` filter, paginated.
    pub async fn find_heads(
        &self,
        filter: Document,
        page: &CursorPage,
        include_deleted: bool,
    ) -> Result<Vec<HeadRecord>, ChronosError> {
        let mut query = filter;
        query.extend(page.id_filter());
        if !include_deleted {
            query.insert("deletedAt", doc! { "$exists": false });
        }
        let options = FindOptions::builder().sort(doc! { "_id": 1 }).limit(page.limit).build();
        let cursor = self
            .head_coll()
            .find(query)
            .with_options(options)
            .await
            .map_err(|e| classify("find_heads", e))?;
        let docs: Vec<Document> = cursor.try_collect().await.map_err(|e| classify("find_heads", e))?;
        docs.into_iter().map(|d| from_doc("find_heads", d)).collect()
    }

    /// Remove every VR and the HR for an item. Blob cleanup under the
    /// item's versioned key prefix is the caller's responsibility (an
    /// administrative sweep, not this call).
    pub async fn hard_delete(&self, item_id: &ItemId) -> Result<(), ChronosError> {
        self.ver_coll()
            .delete_many(doc! { "itemId": item_id.to_string() })
            .await
            .map_err(|e| classify("hard_delete", e))?;
        self.head_coll()
            .delete_one(doc! { "_id": item_id.to_string() })
            .await
            .map_err(|e| classify("hard_delete", e))?;
        Ok(())
    }

    /// Insert a lock row. Fails with `LockConflict` if `item_id` is already
    /// locked (unique index on `itemId`).
    pub async fn insert_lock(&self, lock: &TransactionLock) -> Result<(), ChronosError> {
        let d = to_doc("insert_lock", lock)?;
        self.locks_coll()
            .insert_one(d)
            .await
            .map_err(|e| classify("insert_lock", e))?;
        Ok(())
    }

    /// Fetch the current lock row for `item_id`, if one exists.
    pub async fn get_lock(&self, item_id: &ItemId) -> Result<Option<TransactionLock>, ChronosError> {
        let found = self
            .locks_coll()
            .find_one(doc! { "itemId": item_id.to_string() })
            .await
            .map_err(|e| classify("get_lock", e))?;
        found.map(|d| from_doc("get_lock", d)).transpose()
    }

    /// Release the lock on `item_id` only if it is still held by
    /// `server_id`. Used during compensation so a stale release can't steal
    /// back a lock a different server has since reacquired.
    pub async fn delete_lock_owned_by(
        &self,
        item_id: &ItemId,
        server_id: &str,
    ) -> Result<bool, ChronosError> {
        let result = self
            .locks_coll()
            .delete_one(doc! { "itemId": item_id.to_string(), "serverId": server_id })
            .await
            .map_err(|e| classify("delete_lock_owned_by", e))?;
        Ok(result.deleted_count > 0)
    }

    /// Release every lock row owned by `server_id`, e.g. on process
    /// shutdown.
    pub async fn release_all_owned_by(&self, server_id: &str) -> Result<u64, ChronosError> {
        let result = self
            .locks_coll()
            .delete_many(doc! { "serverId": server_id })
            .await
            .map_err(|e| classify("release_all_owned_by", e))?;
        Ok(result.deleted_count)
    }

    /// Release a lock unconditionally.
    pub async fn delete_lock(&self, item_id: &ItemId) -> Result<(), ChronosError> {
        self.locks_coll()
            .delete_one(doc! { "itemId": item_id.to_string() })
            .await
            .map_err(|e| classify("delete_lock", e))?;
        Ok(())
    }

    /// Delete every lock row with `expiresAt` at or before `now`, returning
    /// the count reaped.
    pub async fn reap_expired_locks(&self, now: chrono::DateTime<chrono::Utc>) -> Result<u64, ChronosError> {
        let result = self
            .locks_coll()
            .delete_many(doc! { "expiresAt": { "$lte": bson::DateTime::from_chrono(now) } })
            .await
            .map_err(|e| classify("reap_expired_locks", e))?;
        Ok(result.deleted_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_config_disables_transactions_regardless_of_auto_detect() {
        let cfg = TransactionsConfig { enabled: false, auto_detect: true };
        assert_eq!(TransactionMode::from_config(&cfg), TransactionMode::Disabled);
    }

    #[test]
    fn enabled_with_auto_detect_tries_a_transaction_then_falls_back() {
        let cfg = TransactionsConfig { enabled: true, auto_detect: true };
        assert_eq!(TransactionMode::from_config(&cfg), TransactionMode::AutoDetect);
    }

    #[test]
    fn enabled_without_auto_detect_requires_a_transaction() {
        let cfg = TransactionsConfig { enabled: true, auto_detect: false };
        assert_eq!(TransactionMode::from_config(&cfg), TransactionMode::Required);
    }
}
