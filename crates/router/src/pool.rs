//! Process-wide connection cache keyed by connection reference string.
//!
//! Opening the same URI twice must hand back the same pooled connection
//! rather than establishing a second one.

use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;

/// Caches `Arc<T>` connections by the reference string they were opened
/// from (a `dbConnRef`/`spaceConnRef` key, or the resolved URI).
pub struct ConnectionCache<T> {
    entries: DashMap<String, Arc<T>>,
}

impl<T> Default for ConnectionCache<T> {
    fn default() -> Self {
        ConnectionCache {
            entries: DashMap::new(),
        }
    }
}

impl<T> ConnectionCache<T> {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached connection for `key`, or build one with `open`
    /// and cache it. Concurrent callers racing on the same key may both
    /// run `open`; the cache keeps whichever insert lands first.
    pub async fn get_or_open<F, Fut, E>(&self, key: &str, open: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(existing) = self.entries.get(key) {
            return Ok(existing.clone());
        }
        let connection = Arc::new(open().await?);
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| connection.clone());
        Ok(entry.clone())
    }

    /// Drop a cached connection, e.g. after it is observed to be broken.
    pub fn evict(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Number of currently pooled connections.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache currently holds no connections.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn second_open_reuses_cached_connection() {
        let cache: ConnectionCache<u32> = ConnectionCache::new();
        let opens = Arc::new(AtomicUsize::new(0));

        let opens1 = opens.clone();
        let first = cache
            .get_or_open("uri-a", || async move {
                opens1.fetch_add(1, Ordering::SeqCst);
                Ok::<_, std::convert::Infallible>(42u32)
            })
            .await
            .unwrap();

        let opens2 = opens.clone();
        let second = cache
            .get_or_open("uri-a", || async move {
                opens2.fetch_add(1, Ordering::SeqCst);
                Ok::<_, std::convert::Infallible>(99u32)
            })
            .await
            .unwrap();

        assert_eq!(*first, 42);
        assert_eq!(*second, 42);
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_keys_open_independently() {
        let cache: ConnectionCache<u32> = ConnectionCache::new();
        cache
            .get_or_open("a", || async { Ok::<_, std::convert::Infallible>(1u32) })
            .await
            .unwrap();
        cache
            .get_or_open("b", || async { Ok::<_, std::convert::Infallible>(2u32) })
            .await
            .unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn evict_forces_reopen() {
        let cache: ConnectionCache<u32> = ConnectionCache::new();
        cache
            .get_or_open("a", || async { Ok::<_, std::convert::Infallible>(1u32) })
            .await
            .unwrap();
        cache.evict("a");
        assert!(cache.is_empty());
    }
}
