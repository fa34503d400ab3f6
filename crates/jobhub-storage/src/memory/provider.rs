//! In-memory storage provider.
//!
//! Authoritative in-process store used for tests and single-node setups.
//! One mutex guards the whole state, so each operation is naturally one
//! atomic group; the ordered indexes use the same microsecond scores as
//! the key-value layout.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use jobhub_core::traits::storage::StorageProvider;
use jobhub_core::types::pagination::{Page, PageRequest};
use jobhub_core::types::sorting::SortDirection;
use jobhub_core::{StorageError, StorageResult};
use jobhub_entity::{BackgroundJobServer, Job, JobDetails, JobState, JobStats, RecurringJob,
    StorageMetadata};

use crate::concurrent::{classify_batch, BatchKind, ConflictCollector};
use crate::index::{removal_ops, rewrite_ops, to_epoch_micros, IndexOp};

/// In-memory storage provider.
#[derive(Default)]
pub struct InMemoryStorageProvider {
    state: Mutex<InMemoryState>,
}

#[derive(Default)]
struct InMemoryState {
    jobs: HashMap<Uuid, Job>,
    versions: HashMap<Uuid, i32>,
    state_queues: HashMap<JobState, BTreeSet<(i64, Uuid)>>,
    scheduled: BTreeSet<(i64, Uuid)>,
    signatures: HashMap<JobState, HashSet<String>>,
    recurring_refs: HashMap<JobState, HashSet<String>>,
    recurring_jobs: BTreeMap<String, RecurringJob>,
    servers: HashMap<Uuid, BackgroundJobServer>,
    servers_created: BTreeSet<(i64, Uuid)>,
    servers_heartbeat: BTreeSet<(i64, Uuid)>,
    metadata: HashMap<String, StorageMetadata>,
}

impl InMemoryState {
    fn apply(&mut self, ops: &[IndexOp]) {
        for op in ops {
            match op {
                IndexOp::QueueAdd {
                    state,
                    id,
                    score_micros,
                } => {
                    self.state_queues
                        .entry(*state)
                        .or_default()
                        .insert((*score_micros, *id));
                }
                IndexOp::QueueRemove { state, id } => {
                    if let Some(queue) = self.state_queues.get_mut(state) {
                        queue.retain(|(_, job_id)| job_id != id);
                    }
                }
                IndexOp::ScheduledAdd { id, score_micros } => {
                    self.scheduled.insert((*score_micros, *id));
                }
                IndexOp::ScheduledRemove { id } => {
                    self.scheduled.retain(|(_, job_id)| job_id != id);
                }
                IndexOp::SignatureAdd { state, signature } => {
                    self.signatures
                        .entry(*state)
                        .or_default()
                        .insert(signature.clone());
                }
                IndexOp::SignatureRemove { state, signature } => {
                    if let Some(signatures) = self.signatures.get_mut(state) {
                        signatures.remove(signature);
                    }
                }
                IndexOp::RecurringRefAdd {
                    state,
                    recurring_job_id,
                } => {
                    self.recurring_refs
                        .entry(*state)
                        .or_default()
                        .insert(recurring_job_id.clone());
                }
                IndexOp::RecurringRefRemove {
                    state,
                    recurring_job_id,
                } => {
                    if let Some(refs) = self.recurring_refs.get_mut(state) {
                        refs.remove(recurring_job_id);
                    }
                }
            }
        }
    }

    /// Version check plus the full atomic group for one job.
    fn persist_job(&mut self, job: &mut Job) -> StorageResult<()> {
        if job.is_new() {
            if self.jobs.contains_key(&job.id) {
                return Err(StorageError::conflict(job.clone()));
            }
        } else {
            match self.versions.get(&job.id) {
                Some(stored) if *stored == job.version => {}
                _ => return Err(StorageError::conflict(job.clone())),
            }
        }
        job.increment_version();
        let ops = rewrite_ops(job);
        self.apply(&ops);
        self.versions.insert(job.id, job.version);
        self.jobs.insert(job.id, job.clone());
        Ok(())
    }

    fn remove_job(&mut self, id: Uuid) -> u64 {
        match self.jobs.remove(&id) {
            Some(job) => {
                self.versions.remove(&id);
                let ops = removal_ops(&job);
                self.apply(&ops);
                1
            }
            None => 0,
        }
    }

    fn remove_server(&mut self, id: Uuid) -> bool {
        let existed = self.servers.remove(&id).is_some();
        self.servers_created.retain(|(_, sid)| *sid != id);
        self.servers_heartbeat.retain(|(_, sid)| *sid != id);
        existed
    }
}

/// Collect one page of jobs from a state queue.
fn page_of_jobs(
    state: &InMemoryState,
    job_state: JobState,
    direction: SortDirection,
    cutoff_micros: Option<i64>,
    page: &PageRequest,
) -> Vec<Job> {
    let Some(queue) = state.state_queues.get(&job_state) else {
        return Vec::new();
    };
    let entries: Box<dyn Iterator<Item = &(i64, Uuid)>> = match direction {
        SortDirection::Asc => Box::new(queue.iter()),
        SortDirection::Desc => Box::new(queue.iter().rev()),
    };
    entries
        .filter(|(score, _)| cutoff_micros.map_or(true, |cutoff| *score <= cutoff))
        .skip(page.offset as usize)
        .take(page.limit as usize)
        .filter_map(|(_, id)| state.jobs.get(id).cloned())
        .collect()
}

impl InMemoryStorageProvider {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, InMemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl StorageProvider for InMemoryStorageProvider {
    async fn save_job(&self, mut job: Job) -> StorageResult<Job> {
        self.lock().persist_job(&mut job)?;
        Ok(job)
    }

    async fn save_jobs(&self, mut jobs: Vec<Job>) -> StorageResult<Vec<Job>> {
        if jobs.is_empty() {
            return Ok(jobs);
        }
        let kind = classify_batch(&jobs)?;
        let mut state = self.lock();
        match kind {
            BatchKind::AllNew => {
                // All-or-nothing: reject the whole batch before writing
                // anything when any id is already taken.
                let existing: Vec<Job> = jobs
                    .iter()
                    .filter(|job| state.jobs.contains_key(&job.id))
                    .cloned()
                    .collect();
                if !existing.is_empty() {
                    return Err(StorageError::conflicts(existing));
                }
                for job in &mut jobs {
                    state.persist_job(job)?;
                }
            }
            BatchKind::AllExisting => {
                let mut conflicts = ConflictCollector::new();
                for job in &mut jobs {
                    match state.persist_job(job) {
                        Ok(()) => {}
                        Err(StorageError::ConcurrentJobModification(_)) => {
                            conflicts.record(job.clone());
                        }
                        Err(other) => return Err(other),
                    }
                }
                conflicts.into_result()?;
            }
        }
        Ok(jobs)
    }

    async fn get_job_by_id(&self, id: Uuid) -> StorageResult<Job> {
        self.lock()
            .jobs
            .get(&id)
            .cloned()
            .ok_or(StorageError::JobNotFound(id))
    }

    async fn delete_job_permanently(&self, id: Uuid) -> StorageResult<u64> {
        Ok(self.lock().remove_job(id))
    }

    async fn get_jobs(&self, state: JobState, page: &PageRequest) -> StorageResult<Vec<Job>> {
        let direction = page.updated_at_direction()?;
        Ok(page_of_jobs(&self.lock(), state, direction, None, page))
    }

    async fn get_jobs_updated_before(
        &self,
        state: JobState,
        updated_before: DateTime<Utc>,
        page: &PageRequest,
    ) -> StorageResult<Vec<Job>> {
        let direction = page.updated_at_direction()?;
        Ok(page_of_jobs(
            &self.lock(),
            state,
            direction,
            Some(to_epoch_micros(updated_before)),
            page,
        ))
    }

    async fn get_scheduled_jobs(
        &self,
        scheduled_before: DateTime<Utc>,
        page: &PageRequest,
    ) -> StorageResult<Vec<Job>> {
        let cutoff = to_epoch_micros(scheduled_before);
        let state = self.lock();
        Ok(state
            .scheduled
            .iter()
            .take_while(|(score, _)| *score <= cutoff)
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .filter_map(|(_, id)| state.jobs.get(id).cloned())
            .collect())
    }

    async fn get_job_page(&self, state: JobState, page: &PageRequest) -> StorageResult<Page<Job>> {
        let direction = page.updated_at_direction()?;
        let guard = self.lock();
        let total = guard
            .state_queues
            .get(&state)
            .map_or(0, |queue| queue.len() as u64);
        if total == 0 {
            return Ok(Page::empty(page));
        }
        let items = page_of_jobs(&guard, state, direction, None, page);
        Ok(Page::new(items, total, page))
    }

    async fn delete_jobs_permanently(
        &self,
        state: JobState,
        updated_before: DateTime<Utc>,
    ) -> StorageResult<u64> {
        let cutoff = to_epoch_micros(updated_before);
        let mut guard = self.lock();
        // Ascending traversal stops at the first job beyond the cutoff.
        let ids: Vec<Uuid> = guard
            .state_queues
            .get(&state)
            .map(|queue| {
                queue
                    .iter()
                    .take_while(|(score, _)| *score <= cutoff)
                    .map(|(_, id)| *id)
                    .collect()
            })
            .unwrap_or_default();
        let mut deleted = 0;
        for id in ids {
            deleted += guard.remove_job(id);
        }
        Ok(deleted)
    }

    async fn get_distinct_job_signatures(
        &self,
        states: &[JobState],
    ) -> StorageResult<HashSet<String>> {
        let guard = self.lock();
        let mut signatures = HashSet::new();
        for state in states {
            if let Some(present) = guard.signatures.get(state) {
                signatures.extend(present.iter().cloned());
            }
        }
        Ok(signatures)
    }

    async fn job_exists(&self, details: &JobDetails, states: &[JobState]) -> StorageResult<bool> {
        let signature = details.signature();
        let guard = self.lock();
        Ok(states.iter().any(|state| {
            guard
                .signatures
                .get(state)
                .is_some_and(|present| present.contains(&signature))
        }))
    }

    async fn save_recurring_job(
        &self,
        recurring_job: RecurringJob,
    ) -> StorageResult<RecurringJob> {
        self.lock()
            .recurring_jobs
            .insert(recurring_job.id.clone(), recurring_job.clone());
        Ok(recurring_job)
    }

    async fn get_recurring_jobs(&self) -> StorageResult<Vec<RecurringJob>> {
        Ok(self.lock().recurring_jobs.values().cloned().collect())
    }

    async fn delete_recurring_job(&self, id: &str) -> StorageResult<u64> {
        Ok(u64::from(self.lock().recurring_jobs.remove(id).is_some()))
    }

    async fn recurring_job_exists(
        &self,
        recurring_job_id: &str,
        states: &[JobState],
    ) -> StorageResult<bool> {
        let guard = self.lock();
        Ok(states.iter().any(|state| {
            guard
                .recurring_refs
                .get(state)
                .is_some_and(|refs| refs.contains(recurring_job_id))
        }))
    }

    async fn announce_server(&self, server: &BackgroundJobServer) -> StorageResult<()> {
        let mut guard = self.lock();
        guard.remove_server(server.id);
        guard
            .servers_created
            .insert((to_epoch_micros(server.first_heartbeat), server.id));
        guard
            .servers_heartbeat
            .insert((to_epoch_micros(server.last_heartbeat), server.id));
        guard.servers.insert(server.id, server.clone());
        Ok(())
    }

    async fn signal_server_alive(&self, server: &BackgroundJobServer) -> StorageResult<bool> {
        let mut guard = self.lock();
        if !guard.servers.contains_key(&server.id) {
            return Err(StorageError::ServerTimedOut(server.id));
        }
        guard.servers_heartbeat.retain(|(_, sid)| *sid != server.id);
        guard
            .servers_heartbeat
            .insert((to_epoch_micros(server.last_heartbeat), server.id));
        let record = guard
            .servers
            .get_mut(&server.id)
            .ok_or(StorageError::ServerTimedOut(server.id))?;
        record.refresh_from(server);
        Ok(record.running)
    }

    async fn signal_server_stopped(&self, id: Uuid) -> StorageResult<()> {
        self.lock().remove_server(id);
        Ok(())
    }

    async fn get_servers(&self) -> StorageResult<Vec<BackgroundJobServer>> {
        let guard = self.lock();
        Ok(guard
            .servers_created
            .iter()
            .filter_map(|(_, id)| guard.servers.get(id).cloned())
            .collect())
    }

    async fn get_longest_running_server_id(&self) -> StorageResult<Uuid> {
        self.lock()
            .servers_created
            .iter()
            .next()
            .map(|(_, id)| *id)
            .ok_or_else(|| StorageError::invalid_argument("no background job servers registered"))
    }

    async fn remove_timed_out_servers(
        &self,
        heartbeat_older_than: DateTime<Utc>,
    ) -> StorageResult<u64> {
        let cutoff = to_epoch_micros(heartbeat_older_than);
        let mut guard = self.lock();
        let ids: Vec<Uuid> = guard
            .servers_heartbeat
            .iter()
            .take_while(|(score, _)| *score <= cutoff)
            .map(|(_, id)| *id)
            .collect();
        let mut removed = 0;
        for id in ids {
            if guard.remove_server(id) {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn save_metadata(&self, metadata: StorageMetadata) -> StorageResult<()> {
        self.lock().metadata.insert(metadata.key(), metadata);
        Ok(())
    }

    async fn get_metadata_by_name(&self, name: &str) -> StorageResult<Vec<StorageMetadata>> {
        let guard = self.lock();
        let mut records: Vec<StorageMetadata> = guard
            .metadata
            .values()
            .filter(|record| record.name == name)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.owner.cmp(&b.owner));
        Ok(records)
    }

    async fn get_metadata(
        &self,
        name: &str,
        owner: &str,
    ) -> StorageResult<Option<StorageMetadata>> {
        Ok(self
            .lock()
            .metadata
            .get(&StorageMetadata::key_of(name, owner))
            .cloned())
    }

    async fn delete_metadata(&self, name: &str) -> StorageResult<u64> {
        let mut guard = self.lock();
        let before = guard.metadata.len();
        guard.metadata.retain(|_, record| record.name != name);
        Ok((before - guard.metadata.len()) as u64)
    }

    async fn get_job_stats(&self) -> StorageResult<JobStats> {
        let guard = self.lock();
        let count = |state: JobState| {
            guard
                .state_queues
                .get(&state)
                .map_or(0, |queue| queue.len() as u64)
        };
        let all_time_succeeded = guard
            .metadata
            .get(&StorageMetadata::key_of(
                StorageMetadata::SUCCEEDED_JOBS_COUNTER,
                StorageMetadata::CLUSTER_OWNER,
            ))
            .and_then(|record| record.value.parse::<u64>().ok())
            .unwrap_or(0);
        let stats = JobStats {
            queried_at: Utc::now(),
            total: 0,
            awaiting: count(JobState::Awaiting),
            scheduled: count(JobState::Scheduled),
            enqueued: count(JobState::Enqueued),
            processing: count(JobState::Processing),
            succeeded: count(JobState::Succeeded),
            failed: count(JobState::Failed),
            deleted: count(JobState::Deleted),
            all_time_succeeded,
            recurring_jobs: guard.recurring_jobs.len() as u64,
            background_job_servers: guard.servers.len() as u64,
        };
        Ok(stats.with_total())
    }

    async fn publish_total_amount_of_succeeded_jobs(&self, amount: u64) -> StorageResult<()> {
        let mut guard = self.lock();
        let key = StorageMetadata::key_of(
            StorageMetadata::SUCCEEDED_JOBS_COUNTER,
            StorageMetadata::CLUSTER_OWNER,
        );
        let now = Utc::now();
        match guard.metadata.get_mut(&key) {
            Some(record) => {
                let current = record.value.parse::<u64>().unwrap_or(0);
                record.value = (current + amount).to_string();
                record.updated_at = now;
            }
            None => {
                guard.metadata.insert(
                    key,
                    StorageMetadata::new(
                        StorageMetadata::SUCCEEDED_JOBS_COUNTER,
                        StorageMetadata::CLUSTER_OWNER,
                        amount.to_string(),
                        now,
                    ),
                );
            }
        }
        Ok(())
    }

    async fn health_check(&self) -> StorageResult<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use jobhub_entity::StateRecord;

    fn ts(micros: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(micros).expect("valid timestamp")
    }

    fn details() -> JobDetails {
        JobDetails::new("com.acme.Mailer", "sendDigest", vec!["7".to_string()])
    }

    fn enqueued_job(at_micros: i64) -> Job {
        Job::new(
            details(),
            StateRecord::Enqueued {
                created_at: ts(at_micros),
            },
        )
    }

    fn succeeded_job(at_micros: i64) -> Job {
        Job::new(
            JobDetails::new("com.acme.Mailer", "archive", vec![at_micros.to_string()]),
            StateRecord::Succeeded {
                created_at: ts(at_micros),
            },
        )
    }

    fn server(first_micros: i64, last_micros: i64) -> BackgroundJobServer {
        BackgroundJobServer {
            id: Uuid::new_v4(),
            worker_pool_size: 8,
            poll_interval_seconds: 15,
            first_heartbeat: ts(first_micros),
            last_heartbeat: ts(last_micros),
            running: true,
            system_total_memory: 16_000_000_000,
            system_free_memory: 8_000_000_000,
            system_cpu_load: 0.25,
            process_max_memory: 4_000_000_000,
            process_free_memory: 2_000_000_000,
            process_allocated_memory: 1_000_000_000,
            process_cpu_load: 0.10,
        }
    }

    #[tokio::test]
    async fn test_insert_then_page_and_exists() {
        let provider = InMemoryStorageProvider::new();
        let job = enqueued_job(1_000);
        let saved = provider.save_job(job).await.expect("insert");
        assert_eq!(saved.version, 1);

        let page = provider
            .get_job_page(JobState::Enqueued, &PageRequest::ascending_on_updated_at(0, 10))
            .await
            .expect("page");
        assert_eq!(page.total, 1);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, saved.id);

        assert!(provider
            .job_exists(&details(), &[JobState::Enqueued])
            .await
            .expect("exists"));
        assert!(!provider
            .job_exists(&details(), &[JobState::Processing])
            .await
            .expect("exists"));
    }

    #[tokio::test]
    async fn test_versions_have_no_gaps() {
        let provider = InMemoryStorageProvider::new();
        let mut job = provider
            .save_job(enqueued_job(1_000))
            .await
            .expect("insert");
        assert_eq!(job.version, 1);
        for expected in 2..=5 {
            job.transition(StateRecord::Enqueued {
                created_at: ts(1_000 + i64::from(expected)),
            });
            job = provider.save_job(job).await.expect("update");
            assert_eq!(job.version, expected);
        }
    }

    #[tokio::test]
    async fn test_duplicate_insert_conflicts() {
        let provider = InMemoryStorageProvider::new();
        let job = enqueued_job(1_000);
        let duplicate = job.clone();
        provider.save_job(job).await.expect("first insert");

        let err = provider.save_job(duplicate).await.expect_err("duplicate");
        match err {
            StorageError::ConcurrentJobModification(modification) => {
                assert_eq!(modification.conflicting_jobs().len(), 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_stale_version_loses_the_race() {
        let provider = InMemoryStorageProvider::new();
        let stored = provider
            .save_job(enqueued_job(1_000))
            .await
            .expect("insert");

        let mut winner = stored.clone();
        winner.transition(StateRecord::Processing {
            created_at: ts(2_000),
            server_id: Uuid::new_v4(),
        });
        let mut loser = stored;
        loser.transition(StateRecord::Deleted {
            created_at: ts(2_001),
        });

        let winner = provider.save_job(winner).await.expect("first writer");
        assert_eq!(winner.version, 2);
        let err = provider.save_job(loser).await.expect_err("second writer");
        assert!(matches!(err, StorageError::ConcurrentJobModification(_)));
    }

    #[tokio::test]
    async fn test_concurrent_writers_exactly_one_commits() {
        let provider = Arc::new(InMemoryStorageProvider::new());
        let stored = provider
            .save_job(enqueued_job(1_000))
            .await
            .expect("insert");

        let mut a = stored.clone();
        a.transition(StateRecord::Processing {
            created_at: ts(2_000),
            server_id: Uuid::new_v4(),
        });
        let mut b = stored;
        b.transition(StateRecord::Deleted {
            created_at: ts(2_000),
        });

        let (ra, rb) = tokio::join!(
            tokio::spawn({
                let provider = Arc::clone(&provider);
                async move { provider.save_job(a).await }
            }),
            tokio::spawn({
                let provider = Arc::clone(&provider);
                async move { provider.save_job(b).await }
            }),
        );
        let outcomes = [ra.expect("task"), rb.expect("task")];
        let committed = outcomes.iter().filter(|r| r.is_ok()).count();
        assert_eq!(committed, 1);
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(StorageError::ConcurrentJobModification(_)))));
    }

    #[tokio::test]
    async fn test_job_lives_in_exactly_one_queue() {
        let provider = InMemoryStorageProvider::new();
        let mut job = provider
            .save_job(enqueued_job(1_000))
            .await
            .expect("insert");
        job.transition(StateRecord::Processing {
            created_at: ts(2_000),
            server_id: Uuid::new_v4(),
        });
        let job = provider.save_job(job).await.expect("update");

        let page = PageRequest::ascending_on_updated_at(0, 10);
        assert!(provider
            .get_jobs(JobState::Enqueued, &page)
            .await
            .expect("enqueued")
            .is_empty());
        let processing = provider
            .get_jobs(JobState::Processing, &page)
            .await
            .expect("processing");
        assert_eq!(processing.len(), 1);
        assert_eq!(processing[0].updated_at, ts(2_000));

        // The signature moved with the job.
        assert!(!provider
            .job_exists(&job.job_details, &[JobState::Enqueued])
            .await
            .expect("exists"));
        assert!(provider
            .job_exists(&job.job_details, &[JobState::Processing])
            .await
            .expect("exists"));
    }

    #[tokio::test]
    async fn test_scheduled_cutoff_is_inclusive_of_fire_at() {
        let provider = InMemoryStorageProvider::new();
        let job = Job::new(
            details(),
            StateRecord::Scheduled {
                created_at: ts(1_000),
                scheduled_at: ts(2_000),
                recurring_job_id: None,
                reason: None,
            },
        );
        provider.save_job(job).await.expect("insert");

        let page = PageRequest::ascending_on_updated_at(0, 10);
        assert!(provider
            .get_scheduled_jobs(ts(1_999), &page)
            .await
            .expect("before")
            .is_empty());
        assert_eq!(
            provider
                .get_scheduled_jobs(ts(2_001), &page)
                .await
                .expect("after")
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_bulk_delete_stops_at_cutoff() {
        let provider = InMemoryStorageProvider::new();
        for at in [1_000, 3_000, 5_001, 7_000] {
            provider.save_job(succeeded_job(at)).await.expect("insert");
        }

        let deleted = provider
            .delete_jobs_permanently(JobState::Succeeded, ts(5_000))
            .await
            .expect("delete");
        assert_eq!(deleted, 2);

        let remaining = provider
            .get_jobs(
                JobState::Succeeded,
                &PageRequest::ascending_on_updated_at(0, 10),
            )
            .await
            .expect("remaining");
        let times: Vec<_> = remaining.iter().map(|job| job.updated_at).collect();
        assert_eq!(times, vec![ts(5_001), ts(7_000)]);
    }

    #[tokio::test]
    async fn test_permanent_delete_leaves_nothing_behind() {
        let provider = InMemoryStorageProvider::new();
        let job = Job::new(
            details(),
            StateRecord::Scheduled {
                created_at: ts(1_000),
                scheduled_at: ts(9_000),
                recurring_job_id: Some("digest".to_string()),
                reason: None,
            },
        );
        let id = job.id;
        provider.save_job(job).await.expect("insert");

        assert_eq!(
            provider.delete_job_permanently(id).await.expect("delete"),
            1
        );
        assert_eq!(
            provider.delete_job_permanently(id).await.expect("repeat"),
            0
        );

        assert!(matches!(
            provider.get_job_by_id(id).await,
            Err(StorageError::JobNotFound(_))
        ));
        let page = PageRequest::ascending_on_updated_at(0, 10);
        assert!(provider
            .get_scheduled_jobs(ts(10_000), &page)
            .await
            .expect("scheduled")
            .is_empty());
        assert!(!provider
            .job_exists(&details(), &[JobState::Scheduled])
            .await
            .expect("exists"));
        assert!(!provider
            .recurring_job_exists("digest", &[JobState::Scheduled])
            .await
            .expect("refs"));
        let stats = provider.get_job_stats().await.expect("stats");
        assert_eq!(stats.scheduled, 0);
    }

    #[tokio::test]
    async fn test_save_of_fresh_read_only_bumps_version() {
        let provider = InMemoryStorageProvider::new();
        let saved = provider
            .save_job(enqueued_job(1_000))
            .await
            .expect("insert");

        let fetched = provider.get_job_by_id(saved.id).await.expect("get");
        let resaved = provider.save_job(fetched).await.expect("resave");
        assert_eq!(resaved.version, 2);

        // Indexes are unchanged: still one entry in one queue.
        let page = provider
            .get_job_page(JobState::Enqueued, &PageRequest::ascending_on_updated_at(0, 10))
            .await
            .expect("page");
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn test_mixed_batch_is_rejected() {
        let provider = InMemoryStorageProvider::new();
        let saved = provider
            .save_job(enqueued_job(1_000))
            .await
            .expect("insert");
        let err = provider
            .save_jobs(vec![saved, enqueued_job(2_000)])
            .await
            .expect_err("mixed");
        assert!(matches!(err, StorageError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_batch_update_reports_complete_conflict_set() {
        let provider = InMemoryStorageProvider::new();
        let first = provider
            .save_job(enqueued_job(1_000))
            .await
            .expect("insert");
        let second = provider
            .save_job(enqueued_job(2_000))
            .await
            .expect("insert");

        // Bump the second job behind the batch's back.
        let mut racing = second.clone();
        racing.transition(StateRecord::Processing {
            created_at: ts(3_000),
            server_id: Uuid::new_v4(),
        });
        provider.save_job(racing).await.expect("race");

        let mut fresh = first.clone();
        fresh.transition(StateRecord::Succeeded {
            created_at: ts(4_000),
        });
        let mut stale = second;
        stale.transition(StateRecord::Succeeded {
            created_at: ts(4_000),
        });
        let stale_id = stale.id;

        let err = provider
            .save_jobs(vec![fresh, stale])
            .await
            .expect_err("conflict");
        match err {
            StorageError::ConcurrentJobModification(modification) => {
                let conflicting = modification.conflicting_jobs();
                assert_eq!(conflicting.len(), 1);
                assert_eq!(conflicting[0].id, stale_id);
            }
            other => panic!("unexpected error: {other}"),
        }
        // The fresh job in the batch still committed.
        assert_eq!(
            provider.get_job_by_id(first.id).await.expect("get").version,
            2
        );
    }

    #[tokio::test]
    async fn test_pagination_and_ordering() {
        let provider = InMemoryStorageProvider::new();
        for at in [1_000, 2_000, 3_000] {
            provider.save_job(succeeded_job(at)).await.expect("insert");
        }

        let ascending = provider
            .get_jobs(
                JobState::Succeeded,
                &PageRequest::ascending_on_updated_at(1, 1),
            )
            .await
            .expect("asc");
        assert_eq!(ascending.len(), 1);
        assert_eq!(ascending[0].updated_at, ts(2_000));

        let descending = provider
            .get_jobs(
                JobState::Succeeded,
                &PageRequest::descending_on_updated_at(0, 2),
            )
            .await
            .expect("desc");
        let times: Vec<_> = descending.iter().map(|job| job.updated_at).collect();
        assert_eq!(times, vec![ts(3_000), ts(2_000)]);

        let err = provider
            .get_jobs(
                JobState::Succeeded,
                &PageRequest::new(
                    0,
                    10,
                    jobhub_core::types::sorting::SortField::asc("created_at"),
                ),
            )
            .await
            .expect_err("unsupported sort");
        assert!(matches!(err, StorageError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_distinct_signatures_union() {
        let provider = InMemoryStorageProvider::new();
        provider.save_job(enqueued_job(1_000)).await.expect("a");
        provider.save_job(succeeded_job(2_000)).await.expect("b");

        let signatures = provider
            .get_distinct_job_signatures(&[JobState::Enqueued, JobState::Succeeded])
            .await
            .expect("signatures");
        assert_eq!(signatures.len(), 2);
    }

    #[tokio::test]
    async fn test_server_registry_lifecycle() {
        let provider = InMemoryStorageProvider::new();
        let a = server(100, 120);
        let b = server(200, 210);
        provider.announce_server(&a).await.expect("announce a");
        provider.announce_server(&b).await.expect("announce b");
        // Re-announce is idempotent.
        provider.announce_server(&a).await.expect("re-announce");

        let servers = provider.get_servers().await.expect("servers");
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].id, a.id);

        assert_eq!(
            provider
                .get_longest_running_server_id()
                .await
                .expect("leader"),
            a.id
        );

        let removed = provider
            .remove_timed_out_servers(ts(150))
            .await
            .expect("gc");
        assert_eq!(removed, 1);
        assert_eq!(
            provider
                .get_longest_running_server_id()
                .await
                .expect("leader"),
            b.id
        );
        for remaining in provider.get_servers().await.expect("servers") {
            assert!(remaining.last_heartbeat > ts(150));
        }
    }

    #[tokio::test]
    async fn test_heartbeat_for_unknown_server_times_out() {
        let provider = InMemoryStorageProvider::new();
        let ghost = server(100, 120);
        let err = provider
            .signal_server_alive(&ghost)
            .await
            .expect_err("unknown server");
        assert!(matches!(err, StorageError::ServerTimedOut(id) if id == ghost.id));
    }

    #[tokio::test]
    async fn test_heartbeat_returns_stored_running_flag() {
        let provider = InMemoryStorageProvider::new();
        let mut a = server(100, 120);
        provider.announce_server(&a).await.expect("announce");

        a.last_heartbeat = ts(130);
        assert!(provider.signal_server_alive(&a).await.expect("alive"));

        // Stop the server remotely by overwriting its record.
        let mut stopped = a.clone();
        stopped.running = false;
        provider.announce_server(&stopped).await.expect("overwrite");
        a.last_heartbeat = ts(140);
        assert!(!provider.signal_server_alive(&a).await.expect("alive"));
    }

    #[tokio::test]
    async fn test_recurring_jobs_roundtrip() {
        let provider = InMemoryStorageProvider::new();
        let recurring = RecurringJob::new("digest", "0 8 * * *", details(), ts(1_000));
        provider
            .save_recurring_job(recurring.clone())
            .await
            .expect("save");

        let all = provider.get_recurring_jobs().await.expect("all");
        assert!(all.contains(&recurring));

        assert_eq!(
            provider.delete_recurring_job("digest").await.expect("del"),
            1
        );
        assert_eq!(
            provider.delete_recurring_job("digest").await.expect("del"),
            0
        );
    }

    #[tokio::test]
    async fn test_recurring_refs_follow_instances() {
        let provider = InMemoryStorageProvider::new();
        let mut job = Job::new(
            details(),
            StateRecord::Scheduled {
                created_at: ts(1_000),
                scheduled_at: ts(5_000),
                recurring_job_id: Some("digest".to_string()),
                reason: None,
            },
        );
        job = provider.save_job(job).await.expect("insert");
        assert!(provider
            .recurring_job_exists("digest", &[JobState::Scheduled])
            .await
            .expect("refs"));

        job.transition(StateRecord::Enqueued {
            created_at: ts(5_000),
        });
        provider.save_job(job).await.expect("update");
        assert!(!provider
            .recurring_job_exists("digest", &[JobState::Scheduled])
            .await
            .expect("refs"));
        assert!(provider
            .recurring_job_exists("digest", &[JobState::Enqueued])
            .await
            .expect("refs"));
    }

    #[tokio::test]
    async fn test_metadata_compound_key() {
        let provider = InMemoryStorageProvider::new();
        provider
            .save_metadata(StorageMetadata::new("dashboard", "server-a", "1", ts(1_000)))
            .await
            .expect("save");
        provider
            .save_metadata(StorageMetadata::new("dashboard", "server-b", "2", ts(1_000)))
            .await
            .expect("save");

        let by_name = provider
            .get_metadata_by_name("dashboard")
            .await
            .expect("by name");
        assert_eq!(by_name.len(), 2);

        let one = provider
            .get_metadata("dashboard", "server-b")
            .await
            .expect("one")
            .expect("present");
        assert_eq!(one.value, "2");

        assert_eq!(
            provider.delete_metadata("dashboard").await.expect("del"),
            2
        );
        assert!(provider
            .get_metadata("dashboard", "server-a")
            .await
            .expect("gone")
            .is_none());
    }

    #[tokio::test]
    async fn test_succeeded_counter_is_cumulative() {
        let provider = InMemoryStorageProvider::new();
        provider.save_job(succeeded_job(1_000)).await.expect("job");
        let before = provider.get_job_stats().await.expect("stats");

        provider
            .publish_total_amount_of_succeeded_jobs(5)
            .await
            .expect("publish");
        let after = provider.get_job_stats().await.expect("stats");
        assert_eq!(after.all_time_succeeded, before.all_time_succeeded + 5);
        assert_eq!(after.succeeded, before.succeeded);
    }

    #[tokio::test]
    async fn test_stats_counts_per_state() {
        let provider = InMemoryStorageProvider::new();
        provider.save_job(enqueued_job(1_000)).await.expect("a");
        provider.save_job(succeeded_job(2_000)).await.expect("b");
        provider
            .save_recurring_job(RecurringJob::new("digest", "@daily", details(), ts(0)))
            .await
            .expect("recurring");
        provider
            .announce_server(&server(100, 120))
            .await
            .expect("server");

        let stats = provider.get_job_stats().await.expect("stats");
        assert_eq!(stats.enqueued, 1);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.total, 2);
        assert_eq!(stats.recurring_jobs, 1);
        assert_eq!(stats.background_job_servers, 1);
    }
}
