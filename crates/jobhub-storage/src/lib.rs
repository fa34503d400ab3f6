//! # jobhub-storage
//!
//! Storage provider implementations for JobHub. Three backends implement
//! the contract from `jobhub-core`:
//!
//! - **memory**: in-process store, useful for tests and single-node setups
//! - **redis**: key-value store using the [redis](https://crates.io/crates/redis) crate
//! - **postgres**: SQL store using [sqlx](https://crates.io/crates/sqlx)
//!
//! The backend is selected at runtime based on configuration, and every
//! backend is wrapped in the change-notification layer.

pub mod concurrent;
pub mod index;
pub mod listeners;
#[cfg(feature = "memory")]
pub mod memory;
pub mod provider;
#[cfg(feature = "redis-backend")]
pub mod redis;
#[cfg(feature = "postgres-backend")]
pub mod sql;

pub use provider::StorageManager;
