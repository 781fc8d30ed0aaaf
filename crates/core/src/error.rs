//! Unified error taxonomy.
//!
//! `ChronosError` is the single error type every Chronos-DB operation
//! returns. Classification methods (`is_fallback_candidate`, `is_terminal`)
//! encode the retry/propagation policy so callers don't have to re-derive
//! it from the variant by hand.

use thiserror::Error;

/// Result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, ChronosError>;

/// The unified error type for all Chronos-DB operations.
#[derive(Debug, Error)]
pub enum ChronosError {
    /// Input failed validation before any I/O was attempted.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The referenced item (or version) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// `expectedOv` did not match the head record's current `ov`.
    #[error("optimistic lock conflict: expected ov={expected}, observed ov={observed}")]
    OptimisticLock {
        /// The version the caller expected.
        expected: u64,
        /// The version actually stored.
        observed: u64,
    },

    /// The routing configuration could not resolve a consistent backend pair.
    #[error("route mismatch: {0}")]
    RouteMismatch(String),

    /// A backend call failed in a way that is plausibly transient and may
    /// succeed if retried (network blip, throttling, leader election).
    #[error("transient storage error: {0}")]
    StorageTransient(String),

    /// A backend call failed in a way that will not succeed on retry
    /// (malformed request, bucket does not exist, permission denied).
    #[error("permanent storage error: {0}")]
    StoragePermanent(String),

    /// The document-store commit step failed after the blob write
    /// succeeded.
    #[error("document-store commit failed: {0}")]
    DocCommit(String),

    /// Externalization of a configured field failed (bad base64, missing
    /// content-type mapping, `requiredIndexed` not satisfied).
    #[error("externalization failed: {0}")]
    Externalization(String),

    /// Another writer currently holds the per-item transaction lock.
    #[error("lock conflict on item {0}")]
    LockConflict(String),

    /// A read-back checksum did not match the recorded checksum.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// A key built or parsed by the key builder violated its shape.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The supplied configuration is internally inconsistent (mismatched
    /// pool cardinalities, missing `tenantId`/`domain`, unknown tier).
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ChronosError {
    /// Failures that the CRUD/Enrich/Restore engines may enqueue onto the
    /// fallback queue when `fallback.enabled` is set.
    pub fn is_fallback_candidate(&self) -> bool {
        matches!(
            self,
            ChronosError::StorageTransient(_) | ChronosError::DocCommit(_)
        )
    }

    /// Failures that must never be retried automatically — the caller's
    /// input or routing was wrong, not the backend's availability.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChronosError::Validation(_)
                | ChronosError::NotFound(_)
                | ChronosError::OptimisticLock { .. }
                | ChronosError::RouteMismatch(_)
                | ChronosError::StoragePermanent(_)
                | ChronosError::Integrity(_)
                | ChronosError::Externalization(_)
                | ChronosError::InvalidKey(_)
                | ChronosError::Config(_)
        )
    }

    /// Short machine-readable tag, used when attaching routing context to
    /// a surfaced error for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            ChronosError::Validation(_) => "Validation",
            ChronosError::NotFound(_) => "NotFound",
            ChronosError::OptimisticLock { .. } => "OptimisticLock",
            ChronosError::RouteMismatch(_) => "RouteMismatch",
            ChronosError::StorageTransient(_) => "StorageTransient",
            ChronosError::StoragePermanent(_) => "StoragePermanent",
            ChronosError::DocCommit(_) => "DocCommit",
            ChronosError::Externalization(_) => "Externalization",
            ChronosError::LockConflict(_) => "LockConflict",
            ChronosError::Integrity(_) => "Integrity",
            ChronosError::InvalidKey(_) => "InvalidKey",
            ChronosError::Config(_) => "Config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_candidates_are_transient_only() {
        assert!(ChronosError::StorageTransient("x".into()).is_fallback_candidate());
        assert!(ChronosError::DocCommit("x".into()).is_fallback_candidate());
        assert!(!ChronosError::StoragePermanent("x".into()).is_fallback_candidate());
        assert!(!ChronosError::Validation("x".into()).is_fallback_candidate());
    }

    #[test]
    fn terminal_errors_are_never_fallback_candidates() {
        let terminal = ChronosError::OptimisticLock {
            expected: 3,
            observed: 4,
        };
        assert!(terminal.is_terminal());
        assert!(!terminal.is_fallback_candidate());
    }

    #[test]
    fn kind_is_stable_per_variant() {
        assert_eq!(ChronosError::LockConflict("x".into()).kind(), "LockConflict");
    }
}
