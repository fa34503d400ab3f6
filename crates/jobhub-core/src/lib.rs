//! # jobhub-core
//!
//! Contract layer for JobHub: the [`traits::storage::StorageProvider`]
//! operations every backend implements, configuration schemas, pagination
//! and sorting types, and the unified error system.
//!
//! Depends only on `jobhub-entity`; backend implementations live in
//! `jobhub-storage`.

pub mod config;
pub mod error;
pub mod result;
pub mod traits;
pub mod types;

pub use error::StorageError;
pub use result::StorageResult;
