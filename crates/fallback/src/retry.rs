//! The retry dispatch seam: the fallback crate knows nothing about the
//! CRUD/Enrich/Restore engines, only how to hand a due operation to
//! whatever implements this trait.

use async_trait::async_trait;
use chronos_core::{ChronosError, FallbackOperation};

/// Replays one fallback operation against the engine it originated from.
///
/// Implementations must be idempotent: CREATE retries carry the original
/// preallocated `itemId` and must not produce a duplicate item if the
/// original attempt's blob write (or even its doc commit) already landed.
/// UPDATE/DELETE retries are naturally idempotent via the doc store's
/// optimistic-lock predicate on `HR.ov`.
#[async_trait]
pub trait RetryHandler: Send + Sync {
    /// Attempt the operation once more. `Ok(())` dequeues it; `Err`
    /// reschedules it with backoff or dead-letters it.
    async fn retry(&self, operation: &FallbackOperation) -> Result<(), ChronosError>;
}
