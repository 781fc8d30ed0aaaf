//! The event stream downstream consumers (counter-rule evaluation,
//! cross-tenant analytics) can subscribe to without touching the hot
//! mutation path. Every committed mutation is announced through a
//! pluggable [`EventSink`]; the default sink is a `tokio::sync::broadcast`
//! channel that drops events for subscribers who aren't listening.

use chronos_core::ItemId;

/// One committed mutation, announced after the doc-store commit succeeds.
#[derive(Debug, Clone)]
pub enum ChronosEvent {
    /// A new item was created.
    Created {
        /// Collection the item belongs to.
        collection: String,
        /// Item identifier.
        item_id: ItemId,
        /// Object version produced (always `0` for `Created`).
        ov: u64,
        /// Collection version produced.
        cv: u64,
    },
    /// An item was wholesale-replaced.
    Updated {
        /// Collection the item belongs to.
        collection: String,
        /// Item identifier.
        item_id: ItemId,
        /// Object version produced.
        ov: u64,
        /// Collection version produced.
        cv: u64,
    },
    /// An item was logically or hard deleted.
    Deleted {
        /// Collection the item belonged to.
        collection: String,
        /// Item identifier.
        item_id: ItemId,
        /// Object version produced by the tombstone, if logical delete
        /// is enabled; `None` for a hard delete.
        ov: Option<u64>,
    },
    /// An item was deep-merge enriched.
    Enriched {
        /// Collection the item belongs to.
        collection: String,
        /// Item identifier.
        item_id: ItemId,
        /// Object version produced.
        ov: u64,
        /// Collection version produced.
        cv: u64,
        /// Function identifiers recorded by this enrichment.
        function_ids: Vec<String>,
    },
    /// An item (or a collection sweep) was restored to a prior version.
    Restored {
        /// Collection the item belongs to.
        collection: String,
        /// Item identifier.
        item_id: ItemId,
        /// Object version produced by the restore.
        ov: u64,
        /// Collection version produced.
        cv: u64,
    },
}

/// Receives every [`ChronosEvent`] emitted after a committed mutation.
///
/// Implementations must not block the caller for long: `emit` runs inline
/// on the mutation's return path, after the backend commit has already
/// succeeded, so a slow sink adds latency to every write.
pub trait EventSink: Send + Sync {
    /// Announce one event. Never fails: a sink with nobody listening
    /// simply drops it.
    fn emit(&self, event: ChronosEvent);
}

/// Default sink: a broadcast channel subscribers can `.subscribe()` to.
/// Events published with no active subscriber are silently dropped, the
/// same behavior `tokio::sync::broadcast` gives for free.
pub struct BroadcastSink {
    sender: tokio::sync::broadcast::Sender<ChronosEvent>,
}

impl BroadcastSink {
    /// Build a sink with a channel capacity of `buffer` slow-subscriber
    /// slots before the oldest unread event is dropped.
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(buffer);
        BroadcastSink { sender }
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ChronosEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: ChronosEvent) {
        // send() fails only when there are no receivers; that's a no-op here.
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_with_no_subscribers_does_not_panic() {
        let sink = BroadcastSink::new(8);
        sink.emit(ChronosEvent::Created {
            collection: "docs".to_string(),
            item_id: ItemId::new(),
            ov: 0,
            cv: 1,
        });
    }

    #[tokio::test]
    async fn subscriber_receives_emitted_event() {
        let sink = BroadcastSink::new(8);
        let mut rx = sink.subscribe();
        sink.emit(ChronosEvent::Deleted {
            collection: "docs".to_string(),
            item_id: ItemId::new(),
            ov: Some(3),
        });
        let received = rx.recv().await.unwrap();
        assert!(matches!(received, ChronosEvent::Deleted { ov: Some(3), .. }));
    }
}
