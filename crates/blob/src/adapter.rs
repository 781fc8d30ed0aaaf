//! The `BlobAdapter` capability trait every backend implements.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::BlobError;

/// Result of a `put*` call: the backend reports size/checksum when it can.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutResult {
    /// Byte length written, if the backend can report it.
    pub size: Option<u64>,
    /// SHA-256 checksum of the bytes written, if the backend can report it.
    pub checksum: Option<String>,
}

/// Result of a `head` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadResult {
    /// Whether the object exists.
    pub exists: bool,
    /// Byte length, if it exists and the backend can report it.
    pub size: Option<u64>,
}

/// A page of `list` results with an opaque continuation token.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Keys found under the requested prefix.
    pub keys: Vec<String>,
    /// Token to pass back in as `continuationToken` for the next page.
    pub continuation_token: Option<String>,
}

/// Uniform capability set over S3-compatible, Azure Blob, and local
/// filesystem backends.
///
/// `putJSON`/`putRaw` fully overwrite; `delete` is idempotent (deleting a
/// missing object is not an error); `presignGet` returns a URL valid only
/// for the requested TTL.
#[async_trait]
pub trait BlobAdapter: Send + Sync {
    /// Write canonical JSON bytes for `value` to `bucket/key`.
    async fn put_json(&self, bucket: &str, key: &str, value: &Value) -> Result<PutResult, BlobError>;

    /// Write raw bytes to `bucket/key` with the given content type.
    async fn put_raw(
        &self,
        bucket: &str,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<PutResult, BlobError>;

    /// Read and parse JSON from `bucket/key`.
    async fn get_json(&self, bucket: &str, key: &str) -> Result<Value, BlobError>;

    /// Read raw bytes from `bucket/key`.
    async fn get_raw(&self, bucket: &str, key: &str) -> Result<Vec<u8>, BlobError>;

    /// Check existence and size without fetching the body.
    async fn head(&self, bucket: &str, key: &str) -> Result<HeadResult, BlobError>;

    /// Delete `bucket/key`. Idempotent: deleting a missing object succeeds.
    async fn delete(&self, bucket: &str, key: &str) -> Result<(), BlobError>;

    /// Produce a time-limited read URL. The filesystem backend returns a
    /// `file://` URL.
    async fn presign_get(&self, bucket: &str, key: &str, ttl_seconds: u64) -> Result<String, BlobError>;

    /// List keys under `prefix`, paginated.
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        max_keys: usize,
        continuation_token: Option<&str>,
    ) -> Result<ListPage, BlobError>;

    /// Server-side copy when supported; otherwise download-and-upload.
    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<(), BlobError>;
}
