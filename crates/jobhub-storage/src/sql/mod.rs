//! PostgreSQL storage backend.

pub mod dialect;
pub mod migrations;
pub mod pool;
pub mod provider;

pub use pool::DatabasePool;
pub use provider::PostgresStorageProvider;

use jobhub_core::StorageError;

/// Map a sqlx error to a storage error, keeping the retryable/fatal
/// distinction. Unique-key violations are handled at the call sites where
/// they mean a version conflict.
pub(crate) fn map_sqlx_err(context: &str, error: sqlx::Error) -> StorageError {
    let transient = matches!(
        error,
        sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Io(_)
    );
    if transient {
        StorageError::transient_with_source(context, error)
    } else {
        StorageError::fatal_with_source(context, error)
    }
}
