//! Classification of `mongodb` driver failures into the shared error
//! taxonomy.

use chronos_core::ChronosError;
use mongodb::error::{ErrorKind, WriteFailure};

/// A duplicate-key write error (Mongo error code 11000), the signal a
/// unique-index insert uses to detect an existing head, lock, or
/// version row.
pub fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => write_error.code == 11000,
        ErrorKind::Command(command_error) => command_error.code == 11000,
        _ => false,
    }
}

/// A standalone `mongod` (not a replica set or `mongos`) rejecting
/// `startTransaction`/an op inside a session with "IllegalOperation" (error
/// code 20). `TransactionMode::AutoDetect` uses this to fall back to a
/// non-transactional commit instead of failing outright.
pub fn is_transactions_unsupported(err: &mongodb::error::Error) -> bool {
    if matches!(err.kind.as_ref(), ErrorKind::Command(command_error) if command_error.code == 20) {
        return true;
    }
    err.to_string().contains("Transaction numbers")
}

/// Map a driver error onto `ChronosError`, tagging duplicate-key failures
/// as lock conflicts and everything else as a storage error. Network and
/// timeout failures are treated as retryable; driver-reported non-retryable
/// errors (auth, command parsing) are permanent.
pub fn classify(op: &str, err: mongodb::error::Error) -> ChronosError {
    if is_duplicate_key(&err) {
        return ChronosError::LockConflict(format!("{op}: duplicate key"));
    }
    if matches!(
        err.kind.as_ref(),
        ErrorKind::Io(..) | ErrorKind::ConnectionPoolCleared { .. } | ErrorKind::ServerSelection { .. }
    ) {
        return ChronosError::StorageTransient(format!("{op}: {err}"));
    }
    ChronosError::StoragePermanent(format!("{op}: {err}"))
}
