//! Cooperative, cancellable polling loop that drains due fallback
//! operations to a [`RetryHandler`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::queue::FallbackQueue;
use crate::retry::RetryHandler;

/// Polls the fallback queue on an interval and dispatches due operations.
pub struct Worker {
    queue: Arc<FallbackQueue>,
    handler: Arc<dyn RetryHandler>,
    poll_interval: Duration,
    batch_size: i64,
}

impl Worker {
    /// Build a worker polling `queue` every `poll_interval`, retrying due
    /// operations through `handler`, up to `batch_size` per poll.
    pub fn new(queue: Arc<FallbackQueue>, handler: Arc<dyn RetryHandler>, poll_interval: Duration, batch_size: i64) -> Self {
        Worker {
            queue,
            handler,
            poll_interval,
            batch_size,
        }
    }

    /// Run until `cancel` reports `true`. Intended to be spawned as a
    /// background task; cancellation is cooperative (checked between
    /// polls, never mid-retry).
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        return;
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {
                    self.drain_due().await;
                }
            }
        }
    }

    /// Run exactly one poll-and-drain cycle. Exposed for callers that
    /// want to drive the worker from their own scheduler instead of
    /// `run`'s built-in interval loop.
    pub async fn drain_due(&self) {
        let due = match self.queue.dequeue_due(self.batch_size).await {
            Ok(due) => due,
            Err(err) => {
                tracing::warn!(error = %err, "failed to poll fallback queue");
                return;
            }
        };
        for operation in due {
            self.retry_one(operation).await;
        }
    }

    async fn retry_one(&self, operation: chronos_core::FallbackOperation) {
        let id = operation.id.clone();
        match self.handler.retry(&operation).await {
            Ok(()) => {
                if let Err(err) = self.queue.delete(&id).await {
                    tracing::warn!(error = %err, operation_id = %id, "failed to delete completed fallback operation");
                }
            }
            Err(err) => {
                let message = err.to_string();
                if let Err(record_err) = self.queue.record_failure(operation, message).await {
                    tracing::warn!(error = %record_err, operation_id = %id, "failed to record fallback retry failure");
                }
            }
        }
    }
}
