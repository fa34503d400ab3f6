//! # jobhub-entity
//!
//! Domain entity models for JobHub. Every struct in this crate represents
//! a persisted record or a domain value object. All entities derive
//! `Debug`, `Clone`, `Serialize`, `Deserialize`; row-shaped entities
//! additionally derive `sqlx::FromRow`.
//!
//! This crate has **no** internal dependencies on other JobHub crates.

pub mod job;
pub mod metadata;
pub mod recurring;
pub mod server;
pub mod stats;

pub use job::{Job, JobDetails, JobState, StateRecord};
pub use metadata::StorageMetadata;
pub use recurring::RecurringJob;
pub use server::BackgroundJobServer;
pub use stats::JobStats;
