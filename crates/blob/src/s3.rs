//! S3-compatible backend, grounded on the `aws-sdk-s3` usage pattern in
//! `s3s-rados`'s `S3Client` (credentials, endpoint override, path-style
//! addressing, per-call `tracing::instrument`).

use async_trait::async_trait;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use serde_json::Value;

use crate::adapter::{BlobAdapter, HeadResult, ListPage, PutResult};
use crate::error::BlobError;

/// Connection settings for an S3-compatible endpoint.
#[derive(Clone)]
pub struct S3Settings {
    /// Endpoint URL override (set for non-AWS S3-compatible services).
    pub endpoint: Option<String>,
    /// Region.
    pub region: String,
    /// Access key id.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
    /// Whether to address buckets as path segments rather than subdomains.
    pub force_path_style: bool,
}

/// S3-compatible blob adapter.
pub struct S3Adapter {
    client: aws_sdk_s3::Client,
}

impl S3Adapter {
    /// Build a client from explicit settings (no ambient AWS config probing).
    pub fn new(settings: S3Settings) -> Self {
        let creds = Credentials::new(
            settings.access_key_id,
            settings.secret_access_key,
            None,
            None,
            "chronos-db",
        );
        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .region(Region::new(settings.region))
            .credentials_provider(creds)
            .force_path_style(settings.force_path_style);
        if let Some(endpoint) = settings.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        let client = aws_sdk_s3::Client::from_conf(builder.build());
        S3Adapter { client }
    }

    fn classify_sdk_error<E: std::fmt::Display>(op: &str, err: E) -> BlobError {
        let msg = format!("{op}: {err}");
        BlobError::TransientBackend(msg)
    }
}

#[async_trait]
impl BlobAdapter for S3Adapter {
    #[tracing::instrument(level = "debug", skip(self, value))]
    async fn put_json(&self, bucket: &str, key: &str, value: &Value) -> Result<PutResult, BlobError> {
        let bytes = chronos_core::canonical::canonical_bytes(value);
        self.put_raw(bucket, key, &bytes, "application/json").await
    }

    #[tracing::instrument(level = "debug", skip(self, bytes))]
    async fn put_raw(
        &self,
        bucket: &str,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<PutResult, BlobError> {
        let checksum = chronos_core::canonical::checksum_bytes(bytes);
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes.to_vec()))
            .send()
            .await
            .map_err(|e| Self::classify_sdk_error("put_object", e))?;
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

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_raw(&self, bucket: &str, key: &str) -> Result<Vec<u8>, BlobError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("NoSuchKey") {
                    BlobError::NotFound(format!("{bucket}/{key}"))
                } else {
                    Self::classify_sdk_error("get_object", e)
                }
            })?;
        let data = output
            .body
            .collect()
            .await
            .map_err(|e| BlobError::TransientBackend(format!("reading body: {e}")))?;
        Ok(data.into_bytes().to_vec())
    }

    async fn head(&self, bucket: &str, key: &str) -> Result<HeadResult, BlobError> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(output) => Ok(HeadResult {
                exists: true,
                size: output.content_length().map(|v| v.max(0) as u64),
            }),
            Err(e) => {
                let msg = e.to_string();
                if msg.contains("NotFound") || msg.contains("404") {
                    Ok(HeadResult {
                        exists: false,
                        size: None,
                    })
                } else {
                    Err(Self::classify_sdk_error("head_object", e))
                }
            }
        }
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), BlobError> {
        // delete_object on S3 is idempotent: a missing key returns success.
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Self::classify_sdk_error("delete_object", e))?;
        Ok(())
    }

    async fn presign_get(&self, bucket: &str, key: &str, ttl_seconds: u64) -> Result<String, BlobError> {
        let expires = aws_sdk_s3::presigning::PresigningConfig::expires_in(
            std::time::Duration::from_secs(ttl_seconds),
        )
        .map_err(|e| BlobError::PermanentBackend(format!("invalid ttl: {e}")))?;
        let presigned = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(expires)
            .await
            .map_err(|e| Self::classify_sdk_error("presign", e))?;
        Ok(presigned.uri().to_string())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        max_keys: usize,
        continuation_token: Option<&str>,
    ) -> Result<ListPage, BlobError> {
        let mut request = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .max_keys(max_keys as i32);
        if let Some(token) = continuation_token {
            request = request.continuation_token(token);
        }
        let output = request
            .send()
            .await
            .map_err(|e| Self::classify_sdk_error("list_objects_v2", e))?;
        let keys = output
            .contents()
            .iter()
            .filter_map(|obj| obj.key().map(|k| k.to_string()))
            .collect();
        Ok(ListPage {
            keys,
            continuation_token: output.next_continuation_token().map(|s| s.to_string()),
        })
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<(), BlobError> {
        let source = format!("{src_bucket}/{src_key}");
        self.client
            .copy_object()
            .bucket(dst_bucket)
            .key(dst_key)
            .copy_source(source)
            .send()
            .await
            .map_err(|e| Self::classify_sdk_error("copy_object", e))?;
        Ok(())
    }
}
