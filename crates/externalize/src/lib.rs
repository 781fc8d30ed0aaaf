//! Splits a write payload into what stays in the document store and what
//! moves to blob storage.
//!
//! Given a [`chronos_core::CollectionMap`], [`Externalizer::externalize`]
//! decodes every configured `base64Props` entry present in the payload,
//! writes it to blob storage under [`chronos_core::KeyBuilder`]'s property
//! key layout, and replaces it in a transformed copy with a reference
//! descriptor. The original payload is never serialized: only the
//! transformed copy and the extracted `metaIndexed` projection leave this
//! module.

#![warn(missing_docs)]

pub mod meta;

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use chronos_blob::BlobAdapter;
use chronos_core::{ChronosError, CollectionMap, ItemId, KeyBuilder};
use serde_json::Value;

/// One blob written during externalization, kept so the caller can delete
/// it again if the surrounding write transaction later rolls back.
#[derive(Debug, Clone)]
pub struct WrittenBlob {
    /// Bucket the object was written to.
    pub bucket: String,
    /// Key the object was written to.
    pub key: String,
}

/// The result of externalizing one payload.
#[derive(Debug)]
pub struct Externalized {
    /// The payload with every externalized property replaced by a `{ref: ...}`
    /// descriptor. This is what gets serialized as `item.json`.
    pub payload: Value,
    /// The `metaIndexed` projection extracted from the *original* payload.
    pub meta_indexed: Value,
    /// Every blob written, for compensation if the caller must roll back.
    pub written: Vec<WrittenBlob>,
}

/// Decodes configured base64 properties to blob storage and extracts
/// indexed metadata, against one content bucket.
pub struct Externalizer {
    blob: Arc<dyn BlobAdapter>,
}

impl Externalizer {
    /// Build an externalizer writing through `blob`.
    pub fn new(blob: Arc<dyn BlobAdapter>) -> Self {
        Externalizer { blob }
    }

    /// Externalize `payload` for `collection`/`item_id` at version `ov`,
    /// per `map`, writing blobs into `content_bucket`.
    ///
    /// Validation (`requiredIndexed`) runs before any blob write: a
    /// payload missing a required indexed field fails with
    /// `ChronosError::Validation` and nothing is written.
    #[tracing::instrument(skip(self, payload, map), fields(collection, item_id = %item_id))]
    pub async fn externalize(
        &self,
        collection: &str,
        item_id: &ItemId,
        ov: i64,
        payload: &Value,
        map: &CollectionMap,
        content_bucket: &str,
    ) -> Result<Externalized, ChronosError> {
        let meta_indexed = meta::extract_indexed(payload, &map.indexed_props);
        let missing = meta::missing_required(&meta_indexed, &map.required_indexed);
        if !missing.is_empty() {
            return Err(ChronosError::Validation(format!(
                "missing required indexed field(s): {}",
                missing.join(", ")
            )));
        }

        let mut transformed = payload.clone();
        let mut written = Vec::new();

        for (property, prop_spec) in &map.base64_props {
            let Some(raw_value) = transformed.get(property) else {
                continue;
            };
            let Some(encoded) = raw_value.as_str() else {
                return Err(ChronosError::Externalization(format!(
                    "property {property} is configured as base64 but is not a string"
                )));
            };
            let bytes = STANDARD
                .decode(encoded)
                .map_err(|e| ChronosError::Externalization(format!("property {property}: invalid base64: {e}")))?;

            let blob_key = KeyBuilder::blob_key(collection, property, item_id, ov)?;
            self.blob
                .put_raw(content_bucket, &blob_key, &bytes, &prop_spec.content_type)
                .await?;
            written.push(WrittenBlob {
                bucket: content_bucket.to_string(),
                key: blob_key.clone(),
            });

            let mut reference = serde_json::json!({
                "contentBucket": content_bucket,
                "blobKey": blob_key,
            });

            if prop_spec.preferred_text {
                let charset = prop_spec.text_charset.as_deref().unwrap_or("utf-8");
                let text = decode_text(&bytes, charset)?;
                let text_key = KeyBuilder::text_key(collection, property, item_id, ov)?;
                self.blob
                    .put_raw(content_bucket, &text_key, text.as_bytes(), "text/plain")
                    .await?;
                written.push(WrittenBlob {
                    bucket: content_bucket.to_string(),
                    key: text_key.clone(),
                });
                reference["textKey"] = Value::String(text_key);
            }

            transformed[property] = serde_json::json!({ "ref": reference });
        }

        Ok(Externalized {
            payload: transformed,
            meta_indexed,
            written,
        })
    }

    /// Delete every blob in `written`, best-effort, logging failures rather
    /// than propagating them. Used by the CRUD engine's saga compensation
    /// when a write fails after externalization but before the document
    /// store commit.
    pub async fn compensate(&self, written: &[WrittenBlob]) {
        for blob in written {
            if let Err(err) = self.blob.delete(&blob.bucket, &blob.key).await {
                tracing::warn!(bucket = %blob.bucket, key = %blob.key, error = %err, "compensation delete failed");
            }
        }
    }
}

fn decode_text(bytes: &[u8], charset: &str) -> Result<String, ChronosError> {
    match charset.to_ascii_lowercase().as_str() {
        "utf-8" | "utf8" => String::from_utf8(bytes.to_vec())
            .map_err(|e| ChronosError::Externalization(format!("text rendition is not valid utf-8: {e}"))),
        other => Err(ChronosError::Externalization(format!(
            "unsupported text charset: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chronos_blob::{BlobError, HeadResult, ListPage, PutResult};
    use chronos_core::Base64PropertySpec;
    use dashmap::DashMap;
    use std::collections::HashMap;

    struct RecordingAdapter {
        objects: DashMap<(String, String), Vec<u8>>,
    }

    impl RecordingAdapter {
        fn new() -> Self {
            RecordingAdapter {
                objects: DashMap::new(),
            }
        }
    }

    #[async_trait]
    impl BlobAdapter for RecordingAdapter {
        async fn put_json(&self, _bucket: &str, _key: &str, _value: &Value) -> Result<PutResult, BlobError> {
            unimplemented!("not exercised by these tests")
        }

        async fn put_raw(
            &self,
            bucket: &str,
            key: &str,
            bytes: &[u8],
            _content_type: &str,
        ) -> Result<PutResult, BlobError> {
            self.objects.insert((bucket.to_string(), key.to_string()), bytes.to_vec());
            Ok(PutResult {
                size: Some(bytes.len() as u64),
                checksum: None,
            })
        }

        async fn get_json(&self, _bucket: &str, _key: &str) -> Result<Value, BlobError> {
            unimplemented!("not exercised by these tests")
        }

        async fn get_raw(&self, bucket: &str, key: &str) -> Result<Vec<u8>, BlobError> {
            self.objects
                .get(&(bucket.to_string(), key.to_string()))
                .map(|v| v.clone())
                .ok_or_else(|| BlobError::NotFound(key.to_string()))
        }

        async fn head(&self, _bucket: &str, _key: &str) -> Result<HeadResult, BlobError> {
            unimplemented!("not exercised by these tests")
        }

        async fn delete(&self, bucket: &str, key: &str) -> Result<(), BlobError> {
            self.objects.remove(&(bucket.to_string(), key.to_string()));
            Ok(())
        }

        async fn presign_get(&self, _bucket: &str, _key: &str, _ttl_seconds: u64) -> Result<String, BlobError> {
            unimplemented!("not exercised by these tests")
        }

        async fn list(
            &self,
            _bucket: &str,
            _prefix: &str,
            _max_keys: usize,
            _continuation_token: Option<&str>,
        ) -> Result<ListPage, BlobError> {
            unimplemented!("not exercised by these tests")
        }

        async fn copy(
            &self,
            _src_bucket: &str,
            _src_key: &str,
            _dst_bucket: &str,
            _dst_key: &str,
        ) -> Result<(), BlobError> {
            unimplemented!("not exercised by these tests")
        }
    }

    fn map_with(base64_props: HashMap<String, Base64PropertySpec>, required: Vec<String>) -> CollectionMap {
        CollectionMap {
            indexed_props: vec!["status".to_string(), "customer.tier".to_string()],
            base64_props,
            required_indexed: required,
        }
    }

    #[tokio::test]
    async fn replaces_base64_property_with_ref_descriptor_and_writes_blob() {
        let adapter = Arc::new(RecordingAdapter::new());
        let externalizer = Externalizer::new(adapter.clone());
        let mut props = HashMap::new();
        props.insert(
            "avatar".to_string(),
            Base64PropertySpec {
                content_type: "image/png".to_string(),
                preferred_text: false,
                text_charset: None,
            },
        );
        let map = map_with(props, vec![]);
        let item_id = ItemId::new();
        let payload = serde_json::json!({
            "status": "active",
            "avatar": STANDARD.encode(b"png-bytes"),
        });

        let result = externalizer
            .externalize("users", &item_id, 0, &payload, &map, "content-bucket")
            .await
            .unwrap();

        assert_eq!(result.written.len(), 1);
        let key = KeyBuilder::blob_key("users", "avatar", &item_id, 0).unwrap();
        assert_eq!(adapter.get_raw("content-bucket", &key).await.unwrap(), b"png-bytes");
        assert!(result.payload["avatar"]["ref"]["blobKey"].as_str().unwrap() == key);
        assert!(result.payload["avatar"]["ref"].get("textKey").is_none());
        assert_eq!(result.meta_indexed, serde_json::json!({"status": "active"}));
    }

    #[tokio::test]
    async fn writes_text_rendition_when_preferred_text_is_set() {
        let adapter = Arc::new(RecordingAdapter::new());
        let externalizer = Externalizer::new(adapter.clone());
        let mut props = HashMap::new();
        props.insert(
            "notes".to_string(),
            Base64PropertySpec {
                content_type: "application/octet-stream".to_string(),
                preferred_text: true,
                text_charset: Some("utf-8".to_string()),
            },
        );
        let map = map_with(props, vec![]);
        let item_id = ItemId::new();
        let payload = serde_json::json!({ "notes": STANDARD.encode(b"hello world") });

        let result = externalizer
            .externalize("docs", &item_id, 2, &payload, &map, "bucket")
            .await
            .unwrap();

        let text_key = KeyBuilder::text_key("docs", "notes", &item_id, 2).unwrap();
        assert_eq!(result.written.len(), 2);
        assert_eq!(adapter.get_raw("bucket", &text_key).await.unwrap(), b"hello world");
        assert_eq!(result.payload["notes"]["ref"]["textKey"].as_str().unwrap(), text_key);
    }

    #[tokio::test]
    async fn missing_required_indexed_field_fails_before_any_write() {
        let adapter = Arc::new(RecordingAdapter::new());
        let externalizer = Externalizer::new(adapter.clone());
        let mut props = HashMap::new();
        props.insert(
            "avatar".to_string(),
            Base64PropertySpec {
                content_type: "image/png".to_string(),
                preferred_text: false,
                text_charset: None,
            },
        );
        let map = map_with(props, vec!["customer.tier".to_string()]);
        let item_id = ItemId::new();
        let payload = serde_json::json!({
            "status": "active",
            "avatar": STANDARD.encode(b"png-bytes"),
        });

        let err = externalizer
            .externalize("users", &item_id, 0, &payload, &map, "content-bucket")
            .await
            .unwrap_err();

        assert!(matches!(err, ChronosError::Validation(_)));
        assert!(adapter.objects.is_empty());
    }

    #[tokio::test]
    async fn invalid_base64_is_rejected_as_externalization_error() {
        let adapter = Arc::new(RecordingAdapter::new());
        let externalizer = Externalizer::new(adapter);
        let mut props = HashMap::new();
        props.insert(
            "avatar".to_string(),
            Base64PropertySpec {
                content_type: "image/png".to_string(),
                preferred_text: false,
                text_charset: None,
            },
        );
        let map = map_with(props, vec![]);
        let item_id = ItemId::new();
        let payload = serde_json::json!({ "status": "active", "avatar": "not-valid-base64!!" });

        let err = externalizer
            .externalize("users", &item_id, 0, &payload, &map, "bucket")
            .await
            .unwrap_err();

        assert!(matches!(err, ChronosError::Externalization(_)));
    }

    #[tokio::test]
    async fn absent_base64_property_is_skipped_not_an_error() {
        let adapter = Arc::new(RecordingAdapter::new());
        let externalizer = Externalizer::new(adapter.clone());
        let props = HashMap::from([(
            "avatar".to_string(),
            Base64PropertySpec {
                content_type: "image/png".to_string(),
                preferred_text: false,
                text_charset: None,
            },
        )]);
        let map = map_with(props, vec![]);
        let item_id = ItemId::new();
        let payload = serde_json::json!({ "status": "active" });

        let result = externalizer
            .externalize("users", &item_id, 0, &payload, &map, "bucket")
            .await
            .unwrap();

        assert!(result.written.is_empty());
        assert_eq!(result.payload, payload);
    }

    #[tokio::test]
    async fn compensate_deletes_every_written_blob() {
        let adapter = Arc::new(RecordingAdapter::new());
        let externalizer = Externalizer::new(adapter.clone());
        let mut props = HashMap::new();
        props.insert(
            "avatar".to_string(),
            Base64PropertySpec {
                content_type: "image/png".to_string(),
                preferred_text: false,
                text_charset: None,
            },
        );
        let map = map_with(props, vec![]);
        let item_id = ItemId::new();
        let payload = serde_json::json!({ "status": "active", "avatar": STANDARD.encode(b"x") });

        let result = externalizer
            .externalize("users", &item_id, 0, &payload, &map, "bucket")
            .await
            .unwrap();
        assert_eq!(adapter.objects.len(), 1);

        externalizer.compensate(&result.written).await;
        assert!(adapter.objects.is_empty());
    }
}
