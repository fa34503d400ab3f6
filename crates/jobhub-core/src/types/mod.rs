//! Shared request/response types for storage queries.

pub mod pagination;
pub mod sorting;

pub use pagination::{Page, PageRequest};
pub use sorting::{SortDirection, SortField};
