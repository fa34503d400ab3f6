//! Aggregated job statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counts per job state plus cluster-wide totals, as observed at one
/// instant. Consumed by dashboards and change listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    /// When the counts were read.
    pub queried_at: DateTime<Utc>,
    /// Jobs in a live state (scheduled, enqueued, processing, succeeded or
    /// failed).
    pub total: u64,
    /// Jobs awaiting release.
    pub awaiting: u64,
    /// Jobs scheduled for a future instant.
    pub scheduled: u64,
    /// Jobs ready for a worker.
    pub enqueued: u64,
    /// Jobs currently executing.
    pub processing: u64,
    /// Jobs that finished successfully and are still retained.
    pub succeeded: u64,
    /// Jobs that finished with an error.
    pub failed: u64,
    /// Jobs soft-deleted but not yet permanently removed.
    pub deleted: u64,
    /// All-time count of succeeded jobs, including ones already purged.
    pub all_time_succeeded: u64,
    /// Number of recurring job definitions.
    pub recurring_jobs: u64,
    /// Number of background job servers known to the store.
    pub background_job_servers: u64,
}

impl JobStats {
    /// Stats of an empty store.
    pub fn empty(queried_at: DateTime<Utc>) -> Self {
        Self {
            queried_at,
            total: 0,
            awaiting: 0,
            scheduled: 0,
            enqueued: 0,
            processing: 0,
            succeeded: 0,
            failed: 0,
            deleted: 0,
            all_time_succeeded: 0,
            recurring_jobs: 0,
            background_job_servers: 0,
        }
    }

    /// Recompute `total` from the live state counts.
    pub fn with_total(mut self) -> Self {
        self.total =
            self.scheduled + self.enqueued + self.processing + self.succeeded + self.failed;
        self
    }
}
