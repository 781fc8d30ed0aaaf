//! In-memory [`BlobAdapter`] double used by the engine and fallback test
//! suites so storage-layer behavior can be exercised without a real
//! backend.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::adapter::{BlobAdapter, HeadResult, ListPage, PutResult};
use crate::error::BlobError;

#[derive(Clone)]
struct Entry {
    bytes: Vec<u8>,
}

/// A process-local `BlobAdapter` backed by a `DashMap`.
#[derive(Default)]
pub struct InMemoryAdapter {
    objects: DashMap<(String, String), Entry>,
    fail_next_put: DashMap<String, ()>,
}

impl InMemoryAdapter {
    /// An empty adapter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arrange for the next `put_raw`/`put_json` against `bucket/key` to
    /// fail with a transient error, exercising fallback-queue retry paths.
    pub fn fail_next_put(&self, bucket: &str, key: &str) {
        self.fail_next_put.insert(format!("{bucket}/{key}"), ());
    }

    fn take_failure(&self, bucket: &str, key: &str) -> bool {
        self.fail_next_put.remove(&format!("{bucket}/{key}")).is_some()
    }
}

#[async_trait]
impl BlobAdapter for InMemoryAdapter {
    async fn put_json(&self, bucket: &str, key: &str, value: &Value) -> Result<PutResult, BlobError> {
        let bytes = chronos_core::canonical::canonical_bytes(value);
        self.put_raw(bucket, key, &bytes, "application/json").await
    }

    async fn put_raw(
        &self,
        bucket: &str,
        key: &str,
        bytes: &[u8],
        _content_type: &str,
    ) -> Result<PutResult, BlobError> {
        if self.take_failure(bucket, key) {
            return Err(BlobError::TransientBackend("injected failure".to_string()));
        }
        let checksum = chronos_core::canonical::checksum_bytes(bytes);
        self.objects.insert(
            (bucket.to_string(), key.to_string()),
            Entry { bytes: bytes.to_vec() },
        );
        Ok(PutResult {
            size: Some(bytes.len() as u64),
            checksum: Some(checksum),
        })
    }

    async fn get_json(&self, bucket: &str, key: &str) -> Result<Value, BlobError> {
        let bytes = self.get_raw(bucket, key).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| BlobError::PermanentBackend(format!("invalid json at {bucket}/{key}: {e}")))
    }

    async fn get_raw(&self, bucket: &str, key: &str) -> Result<Vec<u8>, BlobError> {
        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|e| e.bytes.clone())
            .ok_or_else(|| BlobError::NotFound(format!("{bucket}/{key}")))
    }

    async fn head(&self, bucket: &str, key: &str) -> Result<HeadResult, BlobError> {
        match self.objects.get(&(bucket.to_string(), key.to_string())) {
            Some(e) => Ok(HeadResult {
                exists: true,
                size: Some(e.bytes.len() as u64),
            }),
            None => Ok(HeadResult {
                exists: false,
                size: None,
            }),
        }
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), BlobError> {
        self.objects.remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn presign_get(&self, bucket: &str, key: &str, ttl_seconds: u64) -> Result<String, BlobError> {
        Ok(format!("memory://{bucket}/{key}?ttl={ttl_seconds}"))
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        max_keys: usize,
        continuation_token: Option<&str>,
    ) -> Result<ListPage, BlobError> {
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .filter(|entry| entry.key().0 == bucket && entry.key().1.starts_with(prefix))
            .map(|entry| entry.key().1.clone())
            .collect();
        keys.sort();

        let start = match continuation_token {
            Some(token) => keys.iter().position(|k| k == token).map(|i| i + 1).unwrap_or(0),
            None => 0,
        };
        let page: Vec<String> = keys.iter().skip(start).take(max_keys).cloned().collect();
        let next = if start + page.len() < keys.len() {
            page.last().cloned()
        } else {
            None
        };
        Ok(ListPage {
            keys: page,
            continuation_token: next,
        })
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<(), BlobError> {
        let bytes = self.get_raw(src_bucket, src_key).await?;
        self.put_raw(dst_bucket, dst_key, &bytes, "application/octet-stream")
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn put_get_round_trips() {
        let adapter = InMemoryAdapter::new();
        adapter.put_json("b", "k.json", &json!({"a": 1})).await.unwrap();
        let got = adapter.get_json("b", "k.json").await.unwrap();
        assert_eq!(got, json!({"a": 1}));
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let adapter = InMemoryAdapter::new();
        adapter.fail_next_put("b", "k.json");
        let first = adapter.put_json("b", "k.json", &json!({})).await;
        assert!(matches!(first, Err(BlobError::TransientBackend(_))));
        let second = adapter.put_json("b", "k.json", &json!({})).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let adapter = InMemoryAdapter::new();
        let err = adapter.get_raw("b", "missing").await.unwrap_err();
        assert!(matches!(err, BlobError::NotFound(_)));
    }
}
