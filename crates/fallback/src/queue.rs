//! Durable queue of failed mutations, backed by one physical collection
//! plus a dead-letter collection.

use bson::{doc, Document};
use chronos_core::config::FallbackConfig;
use chronos_core::{ChronosError, FallbackOperation, FallbackStatus, ItemId};
use chronos_repo::error::classify;
use futures::stream::TryStreamExt;
use mongodb::options::FindOptions;
use mongodb::Database;
use serde_json::Value;

use crate::backoff::backoff_with_jitter_ms;

fn to_doc(op: &str, value: &FallbackOperation) -> Result<Document, ChronosError> {
    bson::to_document(value).map_err(|e| ChronosError::Integrity(format!("{op}: encode {e}")))
}

fn from_doc(op: &str, doc: Document) -> Result<FallbackOperation, ChronosError> {
    bson::from_document(doc).map_err(|e| ChronosError::Integrity(format!("{op}: decode {e}")))
}

/// The durable fallback queue: a pending-operations collection plus a
/// dead-letter collection, both under the database the mutation that
/// failed was routed to.
pub struct FallbackQueue {
    pending: mongodb::Collection<Document>,
    dead_letter: mongodb::Collection<Document>,
    config: FallbackConfig,
}

impl FallbackQueue {
    /// Bind a queue to `db`'s `_fallback` collection and the configured
    /// dead-letter collection name.
    pub fn new(db: Database, config: FallbackConfig) -> Self {
        let dead_letter_name = config.dead_letter_collection.clone();
        FallbackQueue {
            pending: db.collection("_fallback"),
            dead_letter: db.collection(&dead_letter_name),
            config,
        }
    }

    /// Enqueue a freshly-failed mutation. `item_id` for CREATE is the
    /// preallocated id the original attempt used, so a retry cannot
    /// produce a duplicate item.
    ///
    /// A no-op when `maxAttempts` is `0`: that setting disables the queue
    /// outright, so every failure surfaces immediately instead of going
    /// through an enqueue-then-dead-letter round trip.
    #[tracing::instrument(skip(self, route_context, payload), fields(operation, collection = %collection))]
    pub async fn enqueue(
        &self,
        operation: &str,
        collection: &str,
        item_id: ItemId,
        route_context: Value,
        payload: Value,
        expected_ov: Option<u64>,
        failure_message: String,
    ) -> Result<(), ChronosError> {
        if self.config.max_attempts == 0 {
            return Ok(());
        }
        let now = chrono::Utc::now();
        let delay_ms = backoff_with_jitter_ms(1, self.config.base_delay_ms, self.config.max_delay_ms);
        let fo = FallbackOperation {
            id: uuid::Uuid::new_v4().to_string(),
            operation: operation.to_string(),
            collection: collection.to_string(),
            item_id,
            route_context,
            payload,
            expected_ov,
            attempts: 1,
            first_attempt_at: now,
            next_attempt_at: now + chrono::Duration::milliseconds(delay_ms as i64),
            status: FallbackStatus::Pending,
            failure_history: vec![failure_message],
        };
        self.pending
            .insert_one(to_doc("enqueue", &fo)?)
            .await
            .map_err(|e| classify("enqueue", e))?;
        Ok(())
    }

    /// Fetch up to `limit` pending operations whose `nextAttemptAt` has
    /// elapsed, oldest-due first.
    pub async fn dequeue_due(&self, limit: i64) -> Result<Vec<FallbackOperation>, ChronosError> {
        let now = bson::DateTime::from_chrono(chrono::Utc::now());
        let filter = doc! { "nextAttemptAt": { "$lte": now }, "status": "pending" };
        let options = FindOptions::builder().sort(doc! { "nextAttemptAt": 1 }).limit(limit).build();
        let cursor = self
            .pending
            .find(filter)
            .with_options(options)
            .await
            .map_err(|e| classify("dequeue_due", e))?;
        let docs: Vec<Document> = cursor.try_collect().await.map_err(|e| classify("dequeue_due", e))?;
        docs.into_iter().map(|d| from_doc("dequeue_due", d)).collect()
    }

    /// Remove a fallback operation after its retry succeeds.
    pub async fn delete(&self, id: &str) -> Result<(), ChronosError> {
        self.pending
            .delete_one(doc! { "_id": id })
            .await
            .map_err(|e| classify("delete", e))?;
        Ok(())
    }

    /// Record a retry failure. Reschedules with backoff, or moves the
    /// operation to the dead-letter collection once `maxAttempts` is
    /// exhausted.
    pub async fn record_failure(&self, mut fo: FallbackOperation, message: String) -> Result<(), ChronosError> {
        fo.attempts += 1;
        fo.failure_history.push(message);

        if fo.attempts >= self.config.max_attempts {
            fo.status = FallbackStatus::DeadLettered;
            self.dead_letter
                .insert_one(to_doc("record_failure", &fo)?)
                .await
                .map_err(|e| classify("record_failure", e))?;
            self.pending
                .delete_one(doc! { "_id": fo.id.clone() })
                .await
                .map_err(|e| classify("record_failure", e))?;
            return Ok(());
        }

        let delay_ms = backoff_with_jitter_ms(fo.attempts, self.config.base_delay_ms, self.config.max_delay_ms);
        fo.next_attempt_at = chrono::Utc::now() + chrono::Duration::milliseconds(delay_ms as i64);
        self.pending
            .replace_one(doc! { "_id": fo.id.clone() }, to_doc("record_failure", &fo)?)
            .await
            .map_err(|e| classify("record_failure", e))?;
        Ok(())
    }

    /// List dead-lettered operations, most recently dead-lettered first,
    /// for the manual-retry/cancellation surface.
    pub async fn list_dead_letters(&self, limit: i64) -> Result<Vec<FallbackOperation>, ChronosError> {
        let options = FindOptions::builder().limit(limit).build();
        let cursor = self
            .dead_letter
            .find(doc! {})
            .with_options(options)
            .await
            .map_err(|e| classify("list_dead_letters", e))?;
        let docs: Vec<Document> = cursor.try_collect().await.map_err(|e| classify("list_dead_letters", e))?;
        docs.into_iter().map(|d| from_doc("list_dead_letters", d)).collect()
    }

    /// Move a dead-lettered operation back onto the pending queue for an
    /// immediate retry, resetting its attempt counter.
    pub async fn requeue_dead_letter(&self, id: &str) -> Result<(), ChronosError> {
        let found = self
            .dead_letter
            .find_one(doc! { "_id": id })
            .await
            .map_err(|e| classify("requeue_dead_letter", e))?
            .ok_or_else(|| ChronosError::NotFound(format!("dead letter {id}")))?;
        let mut fo: FallbackOperation = from_doc("requeue_dead_letter", found)?;
        fo.attempts = 0;
        fo.status = FallbackStatus::Pending;
        fo.next_attempt_at = chrono::Utc::now();

        self.pending
            .insert_one(to_doc("requeue_dead_letter", &fo)?)
            .await
            .map_err(|e| classify("requeue_dead_letter", e))?;
        self.dead_letter
            .delete_one(doc! { "_id": id })
            .await
            .map_err(|e| classify("requeue_dead_letter", e))?;
        Ok(())
    }

    /// Permanently remove a dead-lettered operation without retrying it.
    pub async fn cancel_dead_letter(&self, id: &str) -> Result<(), ChronosError> {
        self.dead_letter
            .delete_one(doc! { "_id": id })
            .await
            .map_err(|e| classify("cancel_dead_letter", e))?;
        Ok(())
    }
}
