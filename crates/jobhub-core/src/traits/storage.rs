//! Storage provider trait: the contract every backend implements.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use jobhub_entity::{BackgroundJobServer, Job, JobDetails, JobState, JobStats, RecurringJob,
    StorageMetadata};

use crate::result::StorageResult;
use crate::types::pagination::{Page, PageRequest};

/// The persistence and coordination contract of JobHub.
///
/// Many worker processes share one backing store through this interface;
/// no other means of mutating stored state is permitted. Every mutating
/// operation is one atomic group: primary write, secondary-index rewrite
/// and version-counter write commit together or not at all.
///
/// Operations honor caller deadlines through future cancellation and the
/// backend's own acquire/IO timeouts; a timed-out operation fails
/// [`StorageError::Transient`](crate::error::StorageError::Transient)
/// without committing.
#[async_trait]
pub trait StorageProvider: Send + Sync + 'static {
    // ── Job operations ─────────────────────────────────────────

    /// Persist a job, inserting when `version == 0` and updating
    /// otherwise.
    ///
    /// Inserting fails with a concurrent-modification error when a job
    /// with that id already exists; updating fails the same way when the
    /// stored version differs from `job.version`. On success the returned
    /// job carries the incremented version.
    async fn save_job(&self, job: Job) -> StorageResult<Job>;

    /// Persist a batch of jobs that must be either all new or all
    /// existing; a mixed batch is an invalid argument.
    ///
    /// Existing jobs are arbitrated independently: every job failing the
    /// version check is collected and reported in one
    /// concurrent-modification error so callers get a complete conflict
    /// report.
    async fn save_jobs(&self, jobs: Vec<Job>) -> StorageResult<Vec<Job>>;

    /// Fetch a job by id, failing when it does not exist.
    async fn get_job_by_id(&self, id: Uuid) -> StorageResult<Job>;

    /// Remove a job and all its index entries. Returns the number of jobs
    /// removed (0 or 1).
    async fn delete_job_permanently(&self, id: Uuid) -> StorageResult<u64>;

    /// Page through the jobs in a state, ordered by `updated_at`.
    async fn get_jobs(&self, state: JobState, page: &PageRequest) -> StorageResult<Vec<Job>>;

    /// Page through the jobs in a state whose `updated_at` is at or before
    /// the cutoff, ordered by `updated_at`.
    async fn get_jobs_updated_before(
        &self,
        state: JobState,
        updated_before: DateTime<Utc>,
        page: &PageRequest,
    ) -> StorageResult<Vec<Job>>;

    /// Page through scheduled jobs whose fire-at instant is at or before
    /// the cutoff.
    async fn get_scheduled_jobs(
        &self,
        scheduled_before: DateTime<Utc>,
        page: &PageRequest,
    ) -> StorageResult<Vec<Job>>;

    /// Return the total count for a state together with one page of jobs.
    async fn get_job_page(&self, state: JobState, page: &PageRequest) -> StorageResult<Page<Job>>;

    /// Delete all jobs in a state whose `updated_at` is at or before the
    /// cutoff, returning how many were deleted.
    ///
    /// Restartable: every job is removed together with its whole index
    /// footprint, so an interruption leaves the store valid and a rerun
    /// picks up where the previous one stopped.
    async fn delete_jobs_permanently(
        &self,
        state: JobState,
        updated_before: DateTime<Utc>,
    ) -> StorageResult<u64>;

    /// Return the union of job-details signatures present in the given
    /// states.
    async fn get_distinct_job_signatures(
        &self,
        states: &[JobState],
    ) -> StorageResult<HashSet<String>>;

    /// Check whether any job with these details is in any of the given
    /// states.
    async fn job_exists(&self, details: &JobDetails, states: &[JobState]) -> StorageResult<bool>;

    // ── Recurring job operations ───────────────────────────────

    /// Insert or overwrite a recurring job definition.
    async fn save_recurring_job(&self, recurring_job: RecurringJob)
        -> StorageResult<RecurringJob>;

    /// Return all recurring job definitions.
    async fn get_recurring_jobs(&self) -> StorageResult<Vec<RecurringJob>>;

    /// Delete a recurring job definition. Returns the number deleted
    /// (0 or 1).
    async fn delete_recurring_job(&self, id: &str) -> StorageResult<u64>;

    /// Check whether any job spawned from this recurring job is in any of
    /// the given states.
    async fn recurring_job_exists(
        &self,
        recurring_job_id: &str,
        states: &[JobState],
    ) -> StorageResult<bool>;

    // ── Server operations ──────────────────────────────────────

    /// Insert or overwrite a server record. Idempotent across restarts
    /// with the same id.
    async fn announce_server(&self, server: &BackgroundJobServer) -> StorageResult<()>;

    /// Record a heartbeat, failing when the server is no longer
    /// registered. Returns the stored is-running flag so the caller can
    /// react to being stopped remotely.
    async fn signal_server_alive(&self, server: &BackgroundJobServer) -> StorageResult<bool>;

    /// Remove a server record on graceful shutdown.
    async fn signal_server_stopped(&self, id: Uuid) -> StorageResult<()>;

    /// Return all servers ordered by first heartbeat ascending.
    async fn get_servers(&self) -> StorageResult<Vec<BackgroundJobServer>>;

    /// Return the id of the longest-running server, used to elect a unique
    /// actor for cluster-wide duties. Fails when the registry is empty.
    async fn get_longest_running_server_id(&self) -> StorageResult<Uuid>;

    /// Remove every server whose last heartbeat is at or before the
    /// cutoff, returning how many were removed. Each removal is its own
    /// atomic group.
    async fn remove_timed_out_servers(
        &self,
        heartbeat_older_than: DateTime<Utc>,
    ) -> StorageResult<u64>;

    // ── Metadata and stats ─────────────────────────────────────

    /// Insert or overwrite a metadata record.
    async fn save_metadata(&self, metadata: StorageMetadata) -> StorageResult<()>;

    /// Return all metadata records with the given name, across owners.
    async fn get_metadata_by_name(&self, name: &str) -> StorageResult<Vec<StorageMetadata>>;

    /// Return the metadata record for a `(name, owner)` pair, if present.
    async fn get_metadata(&self, name: &str, owner: &str)
        -> StorageResult<Option<StorageMetadata>>;

    /// Delete every metadata record with the given name, returning how
    /// many were removed.
    async fn delete_metadata(&self, name: &str) -> StorageResult<u64>;

    /// Return counts per state plus the all-time succeeded counter, the
    /// recurring-job count and the known-server count.
    async fn get_job_stats(&self) -> StorageResult<JobStats>;

    /// Atomically add to the all-time succeeded counter.
    async fn publish_total_amount_of_succeeded_jobs(&self, amount: u64) -> StorageResult<()>;

    // ── Health ─────────────────────────────────────────────────

    /// Check whether the backend is reachable.
    async fn health_check(&self) -> StorageResult<bool>;
}
