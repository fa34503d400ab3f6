//! Convenience result type alias for JobHub.

use crate::error::StorageError;

/// A specialized `Result` type for storage operations.
///
/// Defined as a convenience so that every crate does not need to write
/// `Result<T, StorageError>` explicitly.
pub type StorageResult<T> = Result<T, StorageError>;
