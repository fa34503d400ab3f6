//! Change-notification listener traits.
//!
//! Listeners are in-process observers registered with the storage
//! provider instance. Delivery is rate-limited and best-effort: a
//! listener never blocks or fails a storage operation, and bursts are
//! coalesced so the next delivery reflects current state.

use jobhub_entity::{JobStats, StorageMetadata};

/// Observer of job-count changes.
pub trait JobStatsChangeListener: Send + Sync + 'static {
    /// Called with fresh stats after mutations that can change counts.
    fn on_change(&self, stats: &JobStats);
}

/// Observer of changes to metadata records with one specific name.
pub trait MetadataChangeListener: Send + Sync + 'static {
    /// The metadata name this listener watches.
    fn metadata_name(&self) -> &str;

    /// Called with the current records for the watched name after one of
    /// them changed.
    fn on_change(&self, metadata: &[StorageMetadata]);
}
