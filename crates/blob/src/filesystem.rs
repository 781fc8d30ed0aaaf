//! Local filesystem backend: lays objects out at
//! `{basePath}/{bucket}/{key}` and returns `file://` URLs from `presignGet`
//! since there is no server to issue a signed request against.

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::adapter::{BlobAdapter, HeadResult, ListPage, PutResult};
use crate::error::BlobError;

/// Blob adapter backed by a directory tree.
pub struct FilesystemAdapter {
    base_path: PathBuf,
}

impl FilesystemAdapter {
    /// Root directory under which `{bucket}/{key}` trees are created.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        FilesystemAdapter {
            base_path: base_path.into(),
        }
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, BlobError> {
        if key.contains("..") {
            return Err(BlobError::PermanentBackend(format!(
                "key must not contain '..': {key}"
            )));
        }
        Ok(self.base_path.join(bucket).join(key))
    }

    async fn write_bytes(&self, path: &Path, bytes: &[u8]) -> Result<(), BlobError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BlobError::TransientBackend(format!("create_dir_all {parent:?}: {e}")))?;
        }
        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|e| BlobError::TransientBackend(format!("create {path:?}: {e}")))?;
        file.write_all(bytes)
            .await
            .map_err(|e| BlobError::TransientBackend(format!("write {path:?}: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl BlobAdapter for FilesystemAdapter {
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
        let path = self.object_path(bucket, key)?;
        let checksum = chronos_core::canonical::checksum_bytes(bytes);
        self.write_bytes(&path, bytes).await?;
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
        let path = self.object_path(bucket, key)?;
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BlobError::NotFound(format!("{bucket}/{key}"))
            } else {
                BlobError::TransientBackend(format!("read {path:?}: {e}"))
            }
        })
    }

    async fn head(&self, bucket: &str, key: &str) -> Result<HeadResult, BlobError> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(HeadResult {
                exists: true,
                size: Some(meta.len()),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HeadResult {
                exists: false,
                size: None,
            }),
            Err(e) => Err(BlobError::TransientBackend(format!("stat {path:?}: {e}"))),
        }
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), BlobError> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BlobError::TransientBackend(format!("remove {path:?}: {e}"))),
        }
    }

    async fn presign_get(&self, bucket: &str, key: &str, _ttl_seconds: u64) -> Result<String, BlobError> {
        let path = self.object_path(bucket, key)?;
        Ok(format!("file://{}", path.to_string_lossy()))
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        max_keys: usize,
        continuation_token: Option<&str>,
    ) -> Result<ListPage, BlobError> {
        let root = self.base_path.join(bucket);
        let mut all = Vec::new();
        collect_keys(&root, &root, &mut all).await?;
        all.retain(|k| k.starts_with(prefix));
        all.sort();

        let start = match continuation_token {
            Some(token) => all.iter().position(|k| k == token).map(|i| i + 1).unwrap_or(0),
            None => 0,
        };
        let page: Vec<String> = all.iter().skip(start).take(max_keys).cloned().collect();
        let next = if start + page.len() < all.len() {
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

fn collect_keys<'a>(
    root: &'a Path,
    dir: &'a Path,
    out: &'a mut Vec<String>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), BlobError>> + Send + 'a>> {
    Box::pin(async move {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(BlobError::TransientBackend(format!("read_dir {dir:?}: {e}"))),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| BlobError::TransientBackend(format!("read_dir entry: {e}")))?
        {
            let path = entry.path();
            if path.is_dir() {
                collect_keys(root, &path, out).await?;
            } else if let Ok(rel) = path.strip_prefix(root) {
                out.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn put_then_get_json_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FilesystemAdapter::new(dir.path());
        let value = json!({"b": 1, "a": 2});
        adapter.put_json("bucket", "a/b/item.json", &value).await.unwrap();
        let got = adapter.get_json("bucket", "a/b/item.json").await.unwrap();
        assert_eq!(got, value);
    }

    #[tokio::test]
    async fn head_reports_missing_object() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FilesystemAdapter::new(dir.path());
        let head = adapter.head("bucket", "missing.json").await.unwrap();
        assert!(!head.exists);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FilesystemAdapter::new(dir.path());
        adapter.delete("bucket", "missing.json").await.unwrap();
        adapter.delete("bucket", "missing.json").await.unwrap();
    }

    #[tokio::test]
    async fn presign_get_returns_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FilesystemAdapter::new(dir.path());
        let url = adapter.presign_get("bucket", "k.json", 60).await.unwrap();
        assert!(url.starts_with("file://"));
    }

    #[tokio::test]
    async fn list_paginates_with_continuation_token() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FilesystemAdapter::new(dir.path());
        for i in 0..5 {
            adapter
                .put_raw("bucket", &format!("k{i}.txt"), b"x", "text/plain")
                .await
                .unwrap();
        }
        let page1 = adapter.list("bucket", "", 2, None).await.unwrap();
        assert_eq!(page1.keys.len(), 2);
        let token = page1.continuation_token.unwrap();
        let page2 = adapter.list("bucket", "", 2, Some(&token)).await.unwrap();
        assert_eq!(page2.keys.len(), 2);
        assert_ne!(page1.keys, page2.keys);
    }

    #[tokio::test]
    async fn rejects_parent_traversal_in_key() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FilesystemAdapter::new(dir.path());
        let err = adapter.get_raw("bucket", "../escape.json").await.unwrap_err();
        assert!(matches!(err, BlobError::PermanentBackend(_)));
    }
}
