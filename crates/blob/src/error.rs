//! Blob-adapter failure taxonomy.

use thiserror::Error;

/// Failures a [`crate::BlobAdapter`] implementation can report.
#[derive(Debug, Error)]
pub enum BlobError {
    /// The requested bucket/key does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The caller's credentials do not permit this operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// A plausibly transient backend failure (network, throttling).
    #[error("transient backend error: {0}")]
    TransientBackend(String),
    /// A backend failure that will not succeed on retry.
    #[error("permanent backend error: {0}")]
    PermanentBackend(String),
    /// A checksum computed on read did not match the expected value.
    #[error("integrity check failed: {0}")]
    Integrity(String),
}

impl From<BlobError> for chronos_core::ChronosError {
    fn from(e: BlobError) -> Self {
        match e {
            BlobError::NotFound(m) => chronos_core::ChronosError::NotFound(m),
            BlobError::PermissionDenied(m) => chronos_core::ChronosError::StoragePermanent(m),
            BlobError::TransientBackend(m) => chronos_core::ChronosError::StorageTransient(m),
            BlobError::PermanentBackend(m) => chronos_core::ChronosError::StoragePermanent(m),
            BlobError::Integrity(m) => chronos_core::ChronosError::Integrity(m),
        }
    }
}
