//! Redis storage provider.
//!
//! Jobs are stored as serialized documents beside a separate version
//! counter key; the secondary indexes are sorted sets and sets per the key
//! families in [`super::keys`]. Sorted-set scores are microseconds since
//! the epoch as doubles.
//!
//! The optimistic update protocol runs on a dedicated connection: `WATCH`
//! the version key, read and compare it, then apply the whole write-set in
//! one `MULTI`/`EXEC`. A nil `EXEC` reply means another writer touched the
//! version key between the read and the commit.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::{AsyncCommands, Pipeline};
use tracing::debug;
use uuid::Uuid;

use jobhub_core::config::RedisConfig;
use jobhub_core::traits::serializer::JobSerializer;
use jobhub_core::traits::storage::StorageProvider;
use jobhub_core::types::pagination::{Page, PageRequest};
use jobhub_core::types::sorting::SortDirection;
use jobhub_core::{StorageError, StorageResult};
use jobhub_entity::{BackgroundJobServer, Job, JobDetails, JobState, JobStats, RecurringJob,
    StorageMetadata};

use crate::concurrent::{classify_batch, BatchKind, ConflictCollector};
use crate::index::{removal_ops, rewrite_ops, to_epoch_micros, IndexOp};

use super::keys;
use super::{map_redis_err, RedisClient};

// Hash field names of the background job server record.
const FIELD_ID: &str = "id";
const FIELD_WORKER_POOL_SIZE: &str = "worker_pool_size";
const FIELD_POLL_INTERVAL: &str = "poll_interval_seconds";
const FIELD_FIRST_HEARTBEAT: &str = "first_heartbeat";
const FIELD_LAST_HEARTBEAT: &str = "last_heartbeat";
const FIELD_IS_RUNNING: &str = "running";
const FIELD_SYSTEM_TOTAL_MEMORY: &str = "system_total_memory";
const FIELD_SYSTEM_FREE_MEMORY: &str = "system_free_memory";
const FIELD_SYSTEM_CPU_LOAD: &str = "system_cpu_load";
const FIELD_PROCESS_MAX_MEMORY: &str = "process_max_memory";
const FIELD_PROCESS_FREE_MEMORY: &str = "process_free_memory";
const FIELD_PROCESS_ALLOCATED_MEMORY: &str = "process_allocated_memory";
const FIELD_PROCESS_CPU_LOAD: &str = "process_cpu_load";

// Hash field names of the metadata record.
const FIELD_NAME: &str = "name";
const FIELD_OWNER: &str = "owner";
const FIELD_VALUE: &str = "value";
const FIELD_CREATED_AT: &str = "created_at";
const FIELD_UPDATED_AT: &str = "updated_at";

/// Redis-backed storage provider.
pub struct RedisStorageProvider {
    client: RedisClient,
    serializer: Arc<dyn JobSerializer>,
}

impl RedisStorageProvider {
    /// Connect to Redis and create the provider.
    pub async fn connect(
        config: &RedisConfig,
        serializer: Arc<dyn JobSerializer>,
    ) -> StorageResult<Self> {
        let client = RedisClient::connect(config).await?;
        Ok(Self::new(client, serializer))
    }

    /// Create the provider from an existing client.
    pub fn new(client: RedisClient, serializer: Arc<dyn JobSerializer>) -> Self {
        Self { client, serializer }
    }

    fn prefix(&self) -> &str {
        self.client.prefix()
    }

    /// Queue the full atomic group for one job at its next version:
    /// version counter, document, and the index rewrite.
    fn queue_job_writes(&self, pipe: &mut Pipeline, job: &Job, new_version: i32)
        -> StorageResult<()> {
        let prefix = self.prefix();
        let mut to_store = job.clone();
        to_store.version = new_version;
        let document = self.serializer.serialize_job(&to_store)?;

        pipe.set(keys::job_version_key(prefix, job.id), new_version)
            .ignore();
        pipe.set(keys::job_key(prefix, job.id), document).ignore();
        for op in rewrite_ops(job) {
            apply_index_op(pipe, prefix, &op);
        }
        Ok(())
    }

    /// Optimistic update of one existing job. On success the job carries
    /// the new version; on a version conflict it is left untouched.
    async fn update_job(
        &self,
        conn: &mut MultiplexedConnection,
        job: &mut Job,
    ) -> StorageResult<()> {
        let version_key = keys::job_version_key(self.prefix(), job.id);

        let _: () = redis::cmd("WATCH")
            .arg(&version_key)
            .query_async(conn)
            .await
            .map_err(|e| map_redis_err("failed to watch job version", e))?;
        let stored: Option<i32> = conn
            .get(&version_key)
            .await
            .map_err(|e| map_redis_err("failed to read job version", e))?;
        if stored != Some(job.version) {
            let _: () = redis::cmd("UNWATCH")
                .query_async(conn)
                .await
                .map_err(|e| map_redis_err("failed to unwatch job version", e))?;
            return Err(StorageError::conflict(job.clone()));
        }

        let new_version = job.version + 1;
        let mut pipe = redis::pipe();
        pipe.atomic();
        self.queue_job_writes(&mut pipe, job, new_version)?;
        let committed: Option<()> = pipe
            .query_async(conn)
            .await
            .map_err(|e| map_redis_err("failed to commit job update", e))?;
        if committed.is_none() {
            return Err(StorageError::conflict(job.clone()));
        }
        job.version = new_version;
        Ok(())
    }

    /// Insert one new job, failing when the id is already taken.
    async fn insert_job(
        &self,
        conn: &mut MultiplexedConnection,
        job: &mut Job,
    ) -> StorageResult<()> {
        let taken: bool = conn
            .exists(keys::job_key(self.prefix(), job.id))
            .await
            .map_err(|e| map_redis_err("failed to check job existence", e))?;
        if taken {
            return Err(StorageError::conflict(job.clone()));
        }

        let new_version = job.version + 1;
        let mut pipe = redis::pipe();
        pipe.atomic();
        self.queue_job_writes(&mut pipe, job, new_version)?;
        let _: () = pipe
            .query_async(conn)
            .await
            .map_err(|e| map_redis_err("failed to commit job insert", e))?;
        job.version = new_version;
        Ok(())
    }

    /// Batched id-to-document fan-in: one round trip for any number of
    /// jobs. Ids whose document vanished concurrently are skipped; callers
    /// tolerate stale index membership.
    async fn read_jobs(
        &self,
        conn: &mut ConnectionManager,
        ids: &[String],
    ) -> StorageResult<Vec<Job>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        for id in ids {
            pipe.get(keys::job_key(self.prefix(), id));
        }
        let documents: Vec<Option<String>> = pipe
            .query_async(conn)
            .await
            .map_err(|e| map_redis_err("failed to read job documents", e))?;
        documents
            .into_iter()
            .flatten()
            .map(|document| self.serializer.deserialize_job(&document))
            .collect()
    }

    /// Delete one job and its whole index footprint in one transaction.
    async fn delete_job_group(&self, job: &Job) -> StorageResult<()> {
        let prefix = self.prefix();
        let mut conn = self.client.dedicated().await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.del(keys::job_key(prefix, job.id)).ignore();
        pipe.del(keys::job_version_key(prefix, job.id)).ignore();
        for op in removal_ops(job) {
            apply_index_op(&mut pipe, prefix, &op);
        }
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_err("failed to delete job", e))?;
        Ok(())
    }
}

fn apply_index_op(pipe: &mut Pipeline, prefix: &str, op: &IndexOp) {
    match op {
        IndexOp::QueueAdd {
            state,
            id,
            score_micros,
        } => {
            pipe.zadd(
                keys::job_queue_key(prefix, *state),
                id.to_string(),
                *score_micros as f64,
            )
            .ignore();
        }
        IndexOp::QueueRemove { state, id } => {
            pipe.zrem(keys::job_queue_key(prefix, *state), id.to_string())
                .ignore();
        }
        IndexOp::ScheduledAdd { id, score_micros } => {
            pipe.zadd(
                keys::scheduled_jobs_key(prefix),
                id.to_string(),
                *score_micros as f64,
            )
            .ignore();
        }
        IndexOp::ScheduledRemove { id } => {
            pipe.zrem(keys::scheduled_jobs_key(prefix), id.to_string())
                .ignore();
        }
        IndexOp::SignatureAdd { state, signature } => {
            pipe.sadd(keys::job_details_key(prefix, *state), signature)
                .ignore();
        }
        IndexOp::SignatureRemove { state, signature } => {
            pipe.srem(keys::job_details_key(prefix, *state), signature)
                .ignore();
        }
        IndexOp::RecurringRefAdd {
            state,
            recurring_job_id,
        } => {
            pipe.sadd(
                keys::recurring_job_state_key(prefix, *state),
                recurring_job_id,
            )
            .ignore();
        }
        IndexOp::RecurringRefRemove {
            state,
            recurring_job_id,
        } => {
            pipe.srem(
                keys::recurring_job_state_key(prefix, *state),
                recurring_job_id,
            )
            .ignore();
        }
    }
}

fn field<'a>(map: &'a HashMap<String, String>, name: &str) -> StorageResult<&'a str> {
    map.get(name)
        .map(String::as_str)
        .ok_or_else(|| StorageError::fatal(format!("corrupt record: missing field '{name}'")))
}

fn parse_field<T>(map: &HashMap<String, String>, name: &str) -> StorageResult<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = field(map, name)?;
    value.parse::<T>().map_err(|e| {
        StorageError::fatal_with_source(format!("corrupt record: field '{name}' = '{value}'"), e)
    })
}

fn parse_instant(map: &HashMap<String, String>, name: &str) -> StorageResult<DateTime<Utc>> {
    let value = field(map, name)?;
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            StorageError::fatal_with_source(
                format!("corrupt record: field '{name}' = '{value}'"),
                e,
            )
        })
}

fn server_fields(server: &BackgroundJobServer) -> Vec<(&'static str, String)> {
    vec![
        (FIELD_ID, server.id.to_string()),
        (FIELD_WORKER_POOL_SIZE, server.worker_pool_size.to_string()),
        (FIELD_POLL_INTERVAL, server.poll_interval_seconds.to_string()),
        (FIELD_FIRST_HEARTBEAT, server.first_heartbeat.to_rfc3339()),
        (FIELD_LAST_HEARTBEAT, server.last_heartbeat.to_rfc3339()),
        (FIELD_IS_RUNNING, server.running.to_string()),
        (
            FIELD_SYSTEM_TOTAL_MEMORY,
            server.system_total_memory.to_string(),
        ),
        (
            FIELD_SYSTEM_FREE_MEMORY,
            server.system_free_memory.to_string(),
        ),
        (FIELD_SYSTEM_CPU_LOAD, server.system_cpu_load.to_string()),
        (
            FIELD_PROCESS_MAX_MEMORY,
            server.process_max_memory.to_string(),
        ),
        (
            FIELD_PROCESS_FREE_MEMORY,
            server.process_free_memory.to_string(),
        ),
        (
            FIELD_PROCESS_ALLOCATED_MEMORY,
            server.process_allocated_memory.to_string(),
        ),
        (FIELD_PROCESS_CPU_LOAD, server.process_cpu_load.to_string()),
    ]
}

fn server_from_hash(map: &HashMap<String, String>) -> StorageResult<BackgroundJobServer> {
    Ok(BackgroundJobServer {
        id: parse_field(map, FIELD_ID)?,
        worker_pool_size: parse_field(map, FIELD_WORKER_POOL_SIZE)?,
        poll_interval_seconds: parse_field(map, FIELD_POLL_INTERVAL)?,
        first_heartbeat: parse_instant(map, FIELD_FIRST_HEARTBEAT)?,
        last_heartbeat: parse_instant(map, FIELD_LAST_HEARTBEAT)?,
        running: parse_field(map, FIELD_IS_RUNNING)?,
        system_total_memory: parse_field(map, FIELD_SYSTEM_TOTAL_MEMORY)?,
        system_free_memory: parse_field(map, FIELD_SYSTEM_FREE_MEMORY)?,
        system_cpu_load: parse_field(map, FIELD_SYSTEM_CPU_LOAD)?,
        process_max_memory: parse_field(map, FIELD_PROCESS_MAX_MEMORY)?,
        process_free_memory: parse_field(map, FIELD_PROCESS_FREE_MEMORY)?,
        process_allocated_memory: parse_field(map, FIELD_PROCESS_ALLOCATED_MEMORY)?,
        process_cpu_load: parse_field(map, FIELD_PROCESS_CPU_LOAD)?,
    })
}

fn metadata_from_hash(map: &HashMap<String, String>) -> StorageResult<StorageMetadata> {
    Ok(StorageMetadata {
        name: field(map, FIELD_NAME)?.to_string(),
        owner: field(map, FIELD_OWNER)?.to_string(),
        value: field(map, FIELD_VALUE)?.to_string(),
        created_at: parse_instant(map, FIELD_CREATED_AT)?,
        updated_at: parse_instant(map, FIELD_UPDATED_AT)?,
    })
}

#[async_trait]
impl StorageProvider for RedisStorageProvider {
    async fn save_job(&self, mut job: Job) -> StorageResult<Job> {
        let mut conn = self.client.dedicated().await?;
        if job.is_new() {
            self.insert_job(&mut conn, &mut job).await?;
        } else {
            self.update_job(&mut conn, &mut job).await?;
        }
        Ok(job)
    }

    async fn save_jobs(&self, mut jobs: Vec<Job>) -> StorageResult<Vec<Job>> {
        if jobs.is_empty() {
            return Ok(jobs);
        }
        let kind = classify_batch(&jobs)?;
        let mut conn = self.client.dedicated().await?;
        match kind {
            BatchKind::AllNew => {
                // All-or-nothing: check every id first, then write the
                // whole batch in one transaction.
                let mut pipe = redis::pipe();
                for job in &jobs {
                    pipe.exists(keys::job_key(self.prefix(), job.id));
                }
                let taken: Vec<bool> = pipe
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| map_redis_err("failed to check job existence", e))?;
                let existing: Vec<Job> = jobs
                    .iter()
                    .zip(&taken)
                    .filter(|(_, taken)| **taken)
                    .map(|(job, _)| job.clone())
                    .collect();
                if !existing.is_empty() {
                    return Err(StorageError::conflicts(existing));
                }

                let mut pipe = redis::pipe();
                pipe.atomic();
                for job in &jobs {
                    self.queue_job_writes(&mut pipe, job, job.version + 1)?;
                }
                let _: () = pipe
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| map_redis_err("failed to commit job batch", e))?;
                for job in &mut jobs {
                    job.version += 1;
                }
            }
            BatchKind::AllExisting => {
                // Each job is arbitrated independently so the caller gets
                // a complete conflict report.
                let mut conflicts = ConflictCollector::new();
                for job in &mut jobs {
                    match self.update_job(&mut conn, job).await {
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
        let mut conn = self.client.reader();
        let document: Option<String> = conn
            .get(keys::job_key(self.prefix(), id))
            .await
            .map_err(|e| map_redis_err("failed to read job", e))?;
        match document {
            Some(document) => self.serializer.deserialize_job(&document),
            None => Err(StorageError::JobNotFound(id)),
        }
    }

    async fn delete_job_permanently(&self, id: Uuid) -> StorageResult<u64> {
        let job = match self.get_job_by_id(id).await {
            Ok(job) => job,
            Err(StorageError::JobNotFound(_)) => return Ok(0),
            Err(other) => return Err(other),
        };
        self.delete_job_group(&job).await?;
        Ok(1)
    }

    async fn get_jobs(&self, state: JobState, page: &PageRequest) -> StorageResult<Vec<Job>> {
        let direction = page.updated_at_direction()?;
        let queue_key = keys::job_queue_key(self.prefix(), state);
        let start = page.offset as isize;
        let stop = start + page.limit as isize - 1;
        let mut conn = self.client.reader();
        let ids: Vec<String> = match direction {
            SortDirection::Asc => conn.zrange(&queue_key, start, stop),
            SortDirection::Desc => conn.zrevrange(&queue_key, start, stop),
        }
        .await
        .map_err(|e| map_redis_err("failed to read state queue", e))?;
        self.read_jobs(&mut conn, &ids).await
    }

    async fn get_jobs_updated_before(
        &self,
        state: JobState,
        updated_before: DateTime<Utc>,
        page: &PageRequest,
    ) -> StorageResult<Vec<Job>> {
        let direction = page.updated_at_direction()?;
        let queue_key = keys::job_queue_key(self.prefix(), state);
        let cutoff = to_epoch_micros(updated_before) as f64;
        let mut conn = self.client.reader();
        let ids: Vec<String> = match direction {
            SortDirection::Asc => {
                conn.zrangebyscore_limit(
                    &queue_key,
                    0f64,
                    cutoff,
                    page.offset as isize,
                    page.limit as isize,
                )
                .await
            }
            SortDirection::Desc => {
                conn.zrevrangebyscore_limit(
                    &queue_key,
                    cutoff,
                    0f64,
                    page.offset as isize,
                    page.limit as isize,
                )
                .await
            }
        }
        .map_err(|e| map_redis_err("failed to read state queue", e))?;
        self.read_jobs(&mut conn, &ids).await
    }

    async fn get_scheduled_jobs(
        &self,
        scheduled_before: DateTime<Utc>,
        page: &PageRequest,
    ) -> StorageResult<Vec<Job>> {
        let cutoff = to_epoch_micros(scheduled_before) as f64;
        let mut conn = self.client.reader();
        let ids: Vec<String> = conn
            .zrangebyscore_limit(
                keys::scheduled_jobs_key(self.prefix()),
                0f64,
                cutoff,
                page.offset as isize,
                page.limit as isize,
            )
            .await
            .map_err(|e| map_redis_err("failed to read scheduled set", e))?;
        self.read_jobs(&mut conn, &ids).await
    }

    async fn get_job_page(&self, state: JobState, page: &PageRequest) -> StorageResult<Page<Job>> {
        let mut conn = self.client.reader();
        let total: u64 = conn
            .zcard(keys::job_queue_key(self.prefix(), state))
            .await
            .map_err(|e| map_redis_err("failed to count state queue", e))?;
        if total == 0 {
            // Still validate the requested ordering.
            page.updated_at_direction()?;
            return Ok(Page::empty(page));
        }
        let items = self.get_jobs(state, page).await?;
        Ok(Page::new(items, total, page))
    }

    async fn delete_jobs_permanently(
        &self,
        state: JobState,
        updated_before: DateTime<Utc>,
    ) -> StorageResult<u64> {
        let queue_key = keys::job_queue_key(self.prefix(), state);
        let cutoff = to_epoch_micros(updated_before);
        let mut reader = self.client.reader();
        let mut deleted = 0u64;

        // Page from the head of the queue; each removal is its own
        // transaction so an interruption leaves the store valid. Never
        // rely on a single snapshot of the queue.
        'traversal: loop {
            let ids: Vec<String> = reader
                .zrange(&queue_key, 0, 1000)
                .await
                .map_err(|e| map_redis_err("failed to read state queue", e))?;
            if ids.is_empty() {
                break;
            }
            let mut progressed = false;
            for id in ids {
                let document: Option<String> = reader
                    .get(keys::job_key(self.prefix(), &id))
                    .await
                    .map_err(|e| map_redis_err("failed to read job", e))?;
                let Some(document) = document else {
                    // Orphan queue entry left by a concurrent permanent
                    // delete; clear it so the traversal can progress.
                    let _: () = reader
                        .zrem(&queue_key, &id)
                        .await
                        .map_err(|e| map_redis_err("failed to drop orphan entry", e))?;
                    progressed = true;
                    continue;
                };
                let job = self.serializer.deserialize_job(&document)?;
                if to_epoch_micros(job.updated_at) > cutoff {
                    break 'traversal;
                }
                self.delete_job_group(&job).await?;
                deleted += 1;
                progressed = true;
            }
            if !progressed {
                break;
            }
        }

        debug!(state = %state, deleted, "Deleted jobs permanently");
        Ok(deleted)
    }

    async fn get_distinct_job_signatures(
        &self,
        states: &[JobState],
    ) -> StorageResult<HashSet<String>> {
        if states.is_empty() {
            return Ok(HashSet::new());
        }
        let mut conn = self.client.reader();
        let mut pipe = redis::pipe();
        for state in states {
            pipe.smembers(keys::job_details_key(self.prefix(), *state));
        }
        let sets: Vec<HashSet<String>> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_err("failed to read job signatures", e))?;
        Ok(sets.into_iter().flatten().collect())
    }

    async fn job_exists(&self, details: &JobDetails, states: &[JobState]) -> StorageResult<bool> {
        if states.is_empty() {
            return Ok(false);
        }
        let signature = details.signature();
        let mut conn = self.client.reader();
        let mut pipe = redis::pipe();
        for state in states {
            pipe.sismember(keys::job_details_key(self.prefix(), *state), &signature);
        }
        let present: Vec<bool> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_err("failed to check job signatures", e))?;
        Ok(present.into_iter().any(|found| found))
    }

    async fn save_recurring_job(
        &self,
        recurring_job: RecurringJob,
    ) -> StorageResult<RecurringJob> {
        let document = self.serializer.serialize_recurring_job(&recurring_job)?;
        let mut conn = self.client.reader();
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.set(
            keys::recurring_job_key(self.prefix(), &recurring_job.id),
            document,
        )
        .ignore();
        pipe.sadd(keys::recurring_jobs_key(self.prefix()), &recurring_job.id)
            .ignore();
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_err("failed to save recurring job", e))?;
        Ok(recurring_job)
    }

    async fn get_recurring_jobs(&self) -> StorageResult<Vec<RecurringJob>> {
        let mut conn = self.client.reader();
        let ids: Vec<String> = conn
            .smembers(keys::recurring_jobs_key(self.prefix()))
            .await
            .map_err(|e| map_redis_err("failed to read recurring job ids", e))?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.get(keys::recurring_job_key(self.prefix(), id));
        }
        let documents: Vec<Option<String>> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_err("failed to read recurring jobs", e))?;
        documents
            .into_iter()
            .flatten()
            .map(|document| self.serializer.deserialize_recurring_job(&document))
            .collect()
    }

    async fn delete_recurring_job(&self, id: &str) -> StorageResult<u64> {
        let mut conn = self.client.reader();
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.del(keys::recurring_job_key(self.prefix(), id));
        pipe.srem(keys::recurring_jobs_key(self.prefix()), id);
        let result: Option<(i64, i64)> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_err("failed to delete recurring job", e))?;
        Ok(result.map_or(0, |(removed, _)| removed as u64))
    }

    async fn recurring_job_exists(
        &self,
        recurring_job_id: &str,
        states: &[JobState],
    ) -> StorageResult<bool> {
        if states.is_empty() {
            return Ok(false);
        }
        let mut conn = self.client.reader();
        let mut pipe = redis::pipe();
        for state in states {
            pipe.sismember(
                keys::recurring_job_state_key(self.prefix(), *state),
                recurring_job_id,
            );
        }
        let present: Vec<bool> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_err("failed to check recurring job refs", e))?;
        Ok(present.into_iter().any(|found| found))
    }

    async fn announce_server(&self, server: &BackgroundJobServer) -> StorageResult<()> {
        let prefix = self.prefix();
        let mut conn = self.client.reader();
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.hset_multiple(keys::server_key(prefix, server.id), &server_fields(server))
            .ignore();
        pipe.zadd(
            keys::servers_created_key(prefix),
            server.id.to_string(),
            to_epoch_micros(server.first_heartbeat) as f64,
        )
        .ignore();
        pipe.zadd(
            keys::servers_updated_key(prefix),
            server.id.to_string(),
            to_epoch_micros(server.last_heartbeat) as f64,
        )
        .ignore();
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_err("failed to announce server", e))?;
        Ok(())
    }

    async fn signal_server_alive(&self, server: &BackgroundJobServer) -> StorageResult<bool> {
        let prefix = self.prefix();
        let server_key = keys::server_key(prefix, server.id);
        let mut conn = self.client.reader();

        let stored: HashMap<String, String> = conn
            .hgetall(&server_key)
            .await
            .map_err(|e| map_redis_err("failed to read server record", e))?;
        if stored.is_empty() {
            return Err(StorageError::ServerTimedOut(server.id));
        }

        let liveness: Vec<(&str, String)> = vec![
            (FIELD_LAST_HEARTBEAT, server.last_heartbeat.to_rfc3339()),
            (
                FIELD_SYSTEM_FREE_MEMORY,
                server.system_free_memory.to_string(),
            ),
            (FIELD_SYSTEM_CPU_LOAD, server.system_cpu_load.to_string()),
            (
                FIELD_PROCESS_FREE_MEMORY,
                server.process_free_memory.to_string(),
            ),
            (
                FIELD_PROCESS_ALLOCATED_MEMORY,
                server.process_allocated_memory.to_string(),
            ),
            (FIELD_PROCESS_CPU_LOAD, server.process_cpu_load.to_string()),
        ];
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.hset_multiple(&server_key, &liveness).ignore();
        pipe.zadd(
            keys::servers_updated_key(prefix),
            server.id.to_string(),
            to_epoch_micros(server.last_heartbeat) as f64,
        )
        .ignore();
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_err("failed to record heartbeat", e))?;

        let running: Option<String> = conn
            .hget(&server_key, FIELD_IS_RUNNING)
            .await
            .map_err(|e| map_redis_err("failed to read running flag", e))?;
        Ok(running.as_deref() == Some("true"))
    }

    async fn signal_server_stopped(&self, id: Uuid) -> StorageResult<()> {
        let prefix = self.prefix();
        let mut conn = self.client.reader();
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.del(keys::server_key(prefix, id)).ignore();
        pipe.zrem(keys::servers_created_key(prefix), id.to_string())
            .ignore();
        pipe.zrem(keys::servers_updated_key(prefix), id.to_string())
            .ignore();
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_err("failed to remove server", e))?;
        Ok(())
    }

    async fn get_servers(&self) -> StorageResult<Vec<BackgroundJobServer>> {
        let mut conn = self.client.reader();
        let ids: Vec<String> = conn
            .zrange(keys::servers_created_key(self.prefix()), 0, -1)
            .await
            .map_err(|e| map_redis_err("failed to read server ids", e))?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.hgetall(keys::server_key(self.prefix(), id));
        }
        let records: Vec<HashMap<String, String>> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_err("failed to read server records", e))?;
        records
            .iter()
            .filter(|record| !record.is_empty())
            .map(server_from_hash)
            .collect()
    }

    async fn get_longest_running_server_id(&self) -> StorageResult<Uuid> {
        let mut conn = self.client.reader();
        let head: Vec<String> = conn
            .zrange(keys::servers_created_key(self.prefix()), 0, 0)
            .await
            .map_err(|e| map_redis_err("failed to read server ids", e))?;
        let id = head
            .first()
            .ok_or_else(|| StorageError::invalid_argument("no background job servers registered"))?;
        id.parse()
            .map_err(|e| StorageError::fatal_with_source(format!("corrupt server id '{id}'"), e))
    }

    async fn remove_timed_out_servers(
        &self,
        heartbeat_older_than: DateTime<Utc>,
    ) -> StorageResult<u64> {
        let prefix = self.prefix();
        let cutoff = to_epoch_micros(heartbeat_older_than) as f64;
        let mut conn = self.client.reader();
        let ids: Vec<String> = conn
            .zrangebyscore(keys::servers_updated_key(prefix), 0f64, cutoff)
            .await
            .map_err(|e| map_redis_err("failed to read timed-out servers", e))?;

        let mut removed = 0u64;
        for id in ids {
            // One transaction per server: either present-and-fresh or
            // absent, even when this sweep is interrupted.
            let mut pipe = redis::pipe();
            pipe.atomic();
            pipe.del(keys::server_key(prefix, &id));
            pipe.zrem(keys::servers_created_key(prefix), &id);
            pipe.zrem(keys::servers_updated_key(prefix), &id);
            let result: Option<(i64, i64, i64)> = pipe
                .query_async(&mut conn)
                .await
                .map_err(|e| map_redis_err("failed to remove timed-out server", e))?;
            if result.map_or(0, |(deleted, _, _)| deleted) > 0 {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn save_metadata(&self, metadata: StorageMetadata) -> StorageResult<()> {
        let prefix = self.prefix();
        let record_key = keys::metadata_key(prefix, &metadata.key());
        let fields: Vec<(&str, String)> = vec![
            (FIELD_NAME, metadata.name.clone()),
            (FIELD_OWNER, metadata.owner.clone()),
            (FIELD_VALUE, metadata.value.clone()),
            (FIELD_CREATED_AT, metadata.created_at.to_rfc3339()),
            (FIELD_UPDATED_AT, metadata.updated_at.to_rfc3339()),
        ];
        let mut conn = self.client.reader();
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.hset_multiple(&record_key, &fields).ignore();
        pipe.sadd(keys::metadatas_key(prefix), &record_key).ignore();
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_err("failed to save metadata", e))?;
        Ok(())
    }

    async fn get_metadata_by_name(&self, name: &str) -> StorageResult<Vec<StorageMetadata>> {
        let prefix = self.prefix();
        let wanted = keys::metadata_key(prefix, &format!("{name}-"));
        let mut conn = self.client.reader();
        let all_keys: Vec<String> = conn
            .smembers(keys::metadatas_key(prefix))
            .await
            .map_err(|e| map_redis_err("failed to read metadata keys", e))?;
        let matching: Vec<String> = all_keys
            .into_iter()
            .filter(|key| key.starts_with(&wanted))
            .collect();
        if matching.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        for key in &matching {
            pipe.hgetall(key);
        }
        let records: Vec<HashMap<String, String>> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_err("failed to read metadata records", e))?;
        let mut metadata: Vec<StorageMetadata> = records
            .iter()
            .filter(|record| !record.is_empty())
            .map(metadata_from_hash)
            .collect::<StorageResult<_>>()?;
        metadata.sort_by(|a, b| a.owner.cmp(&b.owner));
        Ok(metadata)
    }

    async fn get_metadata(
        &self,
        name: &str,
        owner: &str,
    ) -> StorageResult<Option<StorageMetadata>> {
        let record_key =
            keys::metadata_key(self.prefix(), &StorageMetadata::key_of(name, owner));
        let mut conn = self.client.reader();
        let record: HashMap<String, String> = conn
            .hgetall(&record_key)
            .await
            .map_err(|e| map_redis_err("failed to read metadata record", e))?;
        if record.is_empty() {
            return Ok(None);
        }
        metadata_from_hash(&record).map(Some)
    }

    async fn delete_metadata(&self, name: &str) -> StorageResult<u64> {
        let prefix = self.prefix();
        let wanted = keys::metadata_key(prefix, &format!("{name}-"));
        let mut conn = self.client.reader();
        let all_keys: Vec<String> = conn
            .smembers(keys::metadatas_key(prefix))
            .await
            .map_err(|e| map_redis_err("failed to read metadata keys", e))?;
        let matching: Vec<String> = all_keys
            .into_iter()
            .filter(|key| key.starts_with(&wanted))
            .collect();
        if matching.is_empty() {
            return Ok(0);
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for key in &matching {
            pipe.del(key).ignore();
            pipe.srem(keys::metadatas_key(prefix), key).ignore();
        }
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_err("failed to delete metadata", e))?;
        Ok(matching.len() as u64)
    }

    async fn get_job_stats(&self) -> StorageResult<JobStats> {
        let prefix = self.prefix();
        let queried_at = Utc::now();
        let stats_key = keys::metadata_key(
            prefix,
            &StorageMetadata::key_of(
                StorageMetadata::SUCCEEDED_JOBS_COUNTER,
                StorageMetadata::CLUSTER_OWNER,
            ),
        );
        let mut conn = self.client.reader();
        let mut pipe = redis::pipe();
        pipe.hget(&stats_key, FIELD_VALUE);
        for state in JobState::ALL {
            pipe.zcard(keys::job_queue_key(prefix, state));
        }
        pipe.scard(keys::recurring_jobs_key(prefix));
        pipe.zcard(keys::servers_updated_key(prefix));

        type StatsRow = (Option<String>, u64, u64, u64, u64, u64, u64, u64, u64, u64);
        let (
            all_time,
            awaiting,
            scheduled,
            enqueued,
            processing,
            succeeded,
            failed,
            deleted,
            recurring_jobs,
            background_job_servers,
        ): StatsRow = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_err("failed to read job stats", e))?;

        let stats = JobStats {
            queried_at,
            total: 0,
            awaiting,
            scheduled,
            enqueued,
            processing,
            succeeded,
            failed,
            deleted,
            all_time_succeeded: all_time.and_then(|v| v.parse().ok()).unwrap_or(0),
            recurring_jobs,
            background_job_servers,
        };
        Ok(stats.with_total())
    }

    async fn publish_total_amount_of_succeeded_jobs(&self, amount: u64) -> StorageResult<()> {
        let stats_key = keys::metadata_key(
            self.prefix(),
            &StorageMetadata::key_of(
                StorageMetadata::SUCCEEDED_JOBS_COUNTER,
                StorageMetadata::CLUSTER_OWNER,
            ),
        );
        let mut conn = self.client.reader();
        let _: i64 = conn
            .hincr(&stats_key, FIELD_VALUE, amount as i64)
            .await
            .map_err(|e| map_redis_err("failed to publish succeeded total", e))?;
        Ok(())
    }

    async fn health_check(&self) -> StorageResult<bool> {
        let mut conn = self.client.reader();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_err("Redis health check failed", e))?;
        Ok(pong == "PONG")
    }
}
