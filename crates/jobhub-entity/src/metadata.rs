//! Storage metadata entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Arbitrary named key/value record owned by a named owner.
///
/// The owner is typically a server id or the literal `"cluster"` for
/// cluster-wide values. The compound key is `(name, owner)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct StorageMetadata {
    /// Metadata name.
    pub name: String,
    /// Metadata owner.
    pub owner: String,
    /// Metadata value.
    pub value: String,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
}

impl StorageMetadata {
    /// Name of the all-time succeeded jobs counter record.
    pub const SUCCEEDED_JOBS_COUNTER: &'static str = "succeeded-jobs-counter";
    /// Owner used for cluster-wide metadata.
    pub const CLUSTER_OWNER: &'static str = "cluster";

    /// Create a new metadata record stamped with the given instant.
    pub fn new(
        name: impl Into<String>,
        owner: impl Into<String>,
        value: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            value: value.into(),
            created_at: at,
            updated_at: at,
        }
    }

    /// Return the compound key `name-owner`.
    pub fn key(&self) -> String {
        Self::key_of(&self.name, &self.owner)
    }

    /// Build the compound key for a `(name, owner)` pair.
    pub fn key_of(name: &str, owner: &str) -> String {
        format!("{name}-{owner}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compound_key() {
        let metadata = StorageMetadata::new(
            StorageMetadata::SUCCEEDED_JOBS_COUNTER,
            StorageMetadata::CLUSTER_OWNER,
            "0",
            Utc::now(),
        );
        assert_eq!(metadata.key(), "succeeded-jobs-counter-cluster");
    }
}
