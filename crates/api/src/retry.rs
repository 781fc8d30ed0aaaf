//! Dispatches a due fallback operation back into the engine it originated
//! from. This is the implementation of `chronos_fallback::RetryHandler`
//! the fallback crate deliberately leaves to its caller.

use async_trait::async_trait;
use chronos_core::{ChronosError, FallbackOperation};
use chronos_engine::{BatchEnrichInput, CreateInput, DeleteInput, EnrichInput, UpdateInput};
use chronos_fallback::RetryHandler;
use chronos_router::RouteContext;
use serde_json::Value;

use crate::db::ChronosDb;

/// Recover a `batch_enrich` retry's patches/function ids from the
/// `{patches, functionIds}` object `ChronosDb::batch_enrich` wraps them in
/// before enqueueing (`FallbackOperation::payload` only carries one `Value`).
fn decode_batch_enrich_payload(op: &FallbackOperation) -> (Vec<Value>, Vec<String>) {
    let patches = op.payload.get("patches").and_then(Value::as_array).cloned().unwrap_or_default();
    let function_ids = op
        .payload
        .get("functionIds")
        .and_then(Value::as_array)
        .map(|ids| ids.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    (patches, function_ids)
}

fn decode_route_context(op: &FallbackOperation) -> Result<RouteContext, ChronosError> {
    serde_json::from_value(op.route_context.clone())
        .map_err(|e| ChronosError::Integrity(format!("fallback operation {}: bad route context: {e}", op.id)))
}

#[async_trait]
impl RetryHandler for ChronosDb {
    async fn retry(&self, operation: &FallbackOperation) -> Result<(), ChronosError> {
        let ctx = decode_route_context(operation)?;
        match operation.operation.as_str() {
            "create" => {
                self.create(
                    ctx,
                    operation.collection.clone(),
                    CreateInput {
                        id: Some(operation.item_id),
                        payload: operation.payload.clone(),
                        actor: None,
                        reason: Some("fallback retry".to_string()),
                        lineage: Default::default(),
                    },
                )
                .await?;
            }
            "update" => {
                self.update(
                    ctx,
                    operation.collection.clone(),
                    UpdateInput {
                        id: operation.item_id,
                        payload: operation.payload.clone(),
                        expected_ov: operation.expected_ov,
                        actor: None,
                        reason: Some("fallback retry".to_string()),
                    },
                )
                .await?;
            }
            "delete" => {
                self.delete(
                    ctx,
                    operation.collection.clone(),
                    DeleteInput {
                        id: operation.item_id,
                        expected_ov: operation.expected_ov,
                        actor: None,
                        reason: Some("fallback retry".to_string()),
                    },
                )
                .await?;
            }
            "enrich" => {
                self.enrich(
                    ctx,
                    operation.collection.clone(),
                    EnrichInput {
                        id: operation.item_id,
                        patch: operation.payload.clone(),
                        function_id: None,
                        actor: None,
                        reason: Some("fallback retry".to_string()),
                    },
                )
                .await?;
            }
            "batch_enrich" => {
                let (patches, function_ids) = decode_batch_enrich_payload(operation);
                self.batch_enrich(
                    ctx,
                    operation.collection.clone(),
                    BatchEnrichInput {
                        id: operation.item_id,
                        patches,
                        function_ids,
                        actor: None,
                        reason: Some("fallback retry".to_string()),
                    },
                )
                .await?;
            }
            other => {
                return Err(ChronosError::Integrity(format!(
                    "fallback operation {}: unknown operation kind {other:?}",
                    operation.id
                )))
            }
        }
        Ok(())
    }
}

