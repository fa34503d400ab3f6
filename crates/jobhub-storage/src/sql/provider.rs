//! PostgreSQL storage provider.
//!
//! Jobs are rows carrying the serialized document beside the columns the
//! secondary indexes need (state, updated_at, scheduled_at,
//! recurring_job_id, job_signature); database indexes over those columns
//! are the secondary indexes, so the whole atomic group is one row write.
//! The optimistic version check is the `AND version = $n` predicate: zero
//! affected rows means another writer committed first.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use jobhub_core::config::PostgresConfig;
use jobhub_core::traits::serializer::JobSerializer;
use jobhub_core::traits::storage::StorageProvider;
use jobhub_core::types::pagination::{Page, PageRequest};
use jobhub_core::{StorageError, StorageResult};
use jobhub_entity::{BackgroundJobServer, Job, JobDetails, JobState, JobStats, RecurringJob,
    StorageMetadata};

use crate::concurrent::{classify_batch, BatchKind, ConflictCollector};

use super::dialect::SqlDialect;
use super::migrations;
use super::pool::DatabasePool;
use super::map_sqlx_err;

const JOBS_TABLE: &str = "jobrunr_jobs";
const RECURRING_JOBS_TABLE: &str = "jobrunr_recurring_jobs";
const SERVERS_TABLE: &str = "jobrunr_background_job_servers";
const METADATA_TABLE: &str = "jobrunr_metadata";
const JOBS_STATS_VIEW: &str = "jobrunr_jobs_stats";

/// PostgreSQL-backed storage provider.
pub struct PostgresStorageProvider {
    pool: PgPool,
    table_prefix: String,
    dialect: SqlDialect,
    serializer: Arc<dyn JobSerializer>,
}

impl PostgresStorageProvider {
    /// Connect, reconcile the schema per the configured database options,
    /// and create the provider.
    pub async fn connect(
        config: &PostgresConfig,
        serializer: Arc<dyn JobSerializer>,
    ) -> StorageResult<Self> {
        let pool = DatabasePool::connect(config).await?.into_pool();
        migrations::run(&pool, &config.table_prefix, config.database_options).await?;
        Ok(Self::new(pool, config.table_prefix.clone(), serializer))
    }

    /// Create the provider over an existing pool. The schema must already
    /// be in place.
    pub fn new(pool: PgPool, table_prefix: String, serializer: Arc<dyn JobSerializer>) -> Self {
        Self {
            pool,
            table_prefix,
            dialect: SqlDialect::POSTGRES,
            serializer,
        }
    }

    fn table(&self, name: &str) -> String {
        format!("{}{}", self.table_prefix, name)
    }

    /// Serialize the job as it will exist at its next version.
    fn document_at(&self, job: &Job, version: i32) -> StorageResult<String> {
        let mut to_store = job.clone();
        to_store.version = version;
        self.serializer.serialize_job(&to_store)
    }

    async fn insert_job(&self, job: &mut Job) -> StorageResult<()> {
        let new_version = job.version + 1;
        let document = self.document_at(job, new_version)?;
        let sql = format!(
            "INSERT INTO {} (id, version, job_as_json, job_signature, state, updated_at, \
             scheduled_at, recurring_job_id) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            self.table(JOBS_TABLE)
        );
        let result = sqlx::query(&sql)
            .bind(job.id)
            .bind(new_version)
            .bind(&document)
            .bind(job.signature())
            .bind(job.state().as_str())
            .bind(job.updated_at)
            .bind(job.scheduled_at())
            .bind(job.recurring_job_id())
            .execute(&self.pool)
            .await;
        match result {
            Ok(_) => {
                job.version = new_version;
                Ok(())
            }
            Err(error)
                if error
                    .as_database_error()
                    .is_some_and(|db| db.is_unique_violation()) =>
            {
                Err(StorageError::conflict(job.clone()))
            }
            Err(error) => Err(map_sqlx_err("failed to insert job", error)),
        }
    }

    async fn update_job(&self, job: &mut Job) -> StorageResult<()> {
        let new_version = job.version + 1;
        let document = self.document_at(job, new_version)?;
        let sql = format!(
            "UPDATE {} SET version = $1, job_as_json = $2, job_signature = $3, state = $4, \
             updated_at = $5, scheduled_at = $6, recurring_job_id = $7 \
             WHERE id = $8 AND version = $9",
            self.table(JOBS_TABLE)
        );
        let result = sqlx::query(&sql)
            .bind(new_version)
            .bind(&document)
            .bind(job.signature())
            .bind(job.state().as_str())
            .bind(job.updated_at)
            .bind(job.scheduled_at())
            .bind(job.recurring_job_id())
            .bind(job.id)
            .bind(job.version)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("failed to update job", e))?;
        if result.rows_affected() == 0 {
            return Err(StorageError::conflict(job.clone()));
        }
        job.version = new_version;
        Ok(())
    }

    fn deserialize_jobs(&self, documents: Vec<String>) -> StorageResult<Vec<Job>> {
        documents
            .iter()
            .map(|document| self.serializer.deserialize_job(document))
            .collect()
    }

    fn state_names(states: &[JobState]) -> Vec<String> {
        states.iter().map(|state| state.as_str().to_string()).collect()
    }
}

#[async_trait]
impl StorageProvider for PostgresStorageProvider {
    async fn save_job(&self, mut job: Job) -> StorageResult<Job> {
        if job.is_new() {
            self.insert_job(&mut job).await?;
        } else {
            self.update_job(&mut job).await?;
        }
        Ok(job)
    }

    async fn save_jobs(&self, mut jobs: Vec<Job>) -> StorageResult<Vec<Job>> {
        if jobs.is_empty() {
            return Ok(jobs);
        }
        let kind = classify_batch(&jobs)?;
        match kind {
            BatchKind::AllNew => {
                // One transaction: the whole batch inserts or none of it
                // does.
                let sql = format!(
                    "INSERT INTO {} (id, version, job_as_json, job_signature, state, \
                     updated_at, scheduled_at, recurring_job_id) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                    self.table(JOBS_TABLE)
                );
                let mut tx = self
                    .pool
                    .begin()
                    .await
                    .map_err(|e| map_sqlx_err("failed to begin job batch", e))?;
                for job in &jobs {
                    let document = self.document_at(job, job.version + 1)?;
                    let result = sqlx::query(&sql)
                        .bind(job.id)
                        .bind(job.version + 1)
                        .bind(&document)
                        .bind(job.signature())
                        .bind(job.state().as_str())
                        .bind(job.updated_at)
                        .bind(job.scheduled_at())
                        .bind(job.recurring_job_id())
                        .execute(&mut *tx)
                        .await;
                    match result {
                        Ok(_) => {}
                        Err(error)
                            if error
                                .as_database_error()
                                .is_some_and(|db| db.is_unique_violation()) =>
                        {
                            return Err(StorageError::conflict(job.clone()));
                        }
                        Err(error) => {
                            return Err(map_sqlx_err("failed to insert job batch", error));
                        }
                    }
                }
                tx.commit()
                    .await
                    .map_err(|e| map_sqlx_err("failed to commit job batch", e))?;
                for job in &mut jobs {
                    job.version += 1;
                }
            }
            BatchKind::AllExisting => {
                let mut conflicts = ConflictCollector::new();
                for job in &mut jobs {
                    match self.update_job(job).await {
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
        let sql = format!(
            "SELECT job_as_json FROM {} WHERE id = $1",
            self.table(JOBS_TABLE)
        );
        let document: Option<String> = sqlx::query_scalar(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("failed to read job", e))?;
        match document {
            Some(document) => self.serializer.deserialize_job(&document),
            None => Err(StorageError::JobNotFound(id)),
        }
    }

    async fn delete_job_permanently(&self, id: Uuid) -> StorageResult<u64> {
        let sql = format!("DELETE FROM {} WHERE id = $1", self.table(JOBS_TABLE));
        let result = sqlx::query(&sql)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("failed to delete job", e))?;
        Ok(result.rows_affected())
    }

    async fn get_jobs(&self, state: JobState, page: &PageRequest) -> StorageResult<Vec<Job>> {
        let direction = page.updated_at_direction()?;
        let sql = format!(
            "SELECT job_as_json FROM {} WHERE state = $1 ORDER BY updated_at {}{}",
            self.table(JOBS_TABLE),
            direction.as_sql(),
            self.dialect.limit_and_offset(2, 3)
        );
        let documents: Vec<String> = sqlx::query_scalar(&sql)
            .bind(state.as_str())
            .bind(i64::from(page.limit))
            .bind(page.offset as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("failed to read jobs by state", e))?;
        self.deserialize_jobs(documents)
    }

    async fn get_jobs_updated_before(
        &self,
        state: JobState,
        updated_before: DateTime<Utc>,
        page: &PageRequest,
    ) -> StorageResult<Vec<Job>> {
        let direction = page.updated_at_direction()?;
        let sql = format!(
            "SELECT job_as_json FROM {} WHERE state = $1 AND updated_at <= $2 \
             ORDER BY updated_at {}{}",
            self.table(JOBS_TABLE),
            direction.as_sql(),
            self.dialect.limit_and_offset(3, 4)
        );
        let documents: Vec<String> = sqlx::query_scalar(&sql)
            .bind(state.as_str())
            .bind(updated_before)
            .bind(i64::from(page.limit))
            .bind(page.offset as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("failed to read jobs by state", e))?;
        self.deserialize_jobs(documents)
    }

    async fn get_scheduled_jobs(
        &self,
        scheduled_before: DateTime<Utc>,
        page: &PageRequest,
    ) -> StorageResult<Vec<Job>> {
        let sql = format!(
            "SELECT job_as_json FROM {} WHERE state = $1 AND scheduled_at <= $2 \
             ORDER BY scheduled_at ASC{}",
            self.table(JOBS_TABLE),
            self.dialect.limit_and_offset(3, 4)
        );
        let documents: Vec<String> = sqlx::query_scalar(&sql)
            .bind(JobState::Scheduled.as_str())
            .bind(scheduled_before)
            .bind(i64::from(page.limit))
            .bind(page.offset as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("failed to read scheduled jobs", e))?;
        self.deserialize_jobs(documents)
    }

    async fn get_job_page(&self, state: JobState, page: &PageRequest) -> StorageResult<Page<Job>> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE state = $1",
            self.table(JOBS_TABLE)
        );
        let total: i64 = sqlx::query_scalar(&sql)
            .bind(state.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("failed to count jobs by state", e))?;
        if total == 0 {
            page.updated_at_direction()?;
            return Ok(Page::empty(page));
        }
        let items = self.get_jobs(state, page).await?;
        Ok(Page::new(items, total as u64, page))
    }

    async fn delete_jobs_permanently(
        &self,
        state: JobState,
        updated_before: DateTime<Utc>,
    ) -> StorageResult<u64> {
        let sql = format!(
            "DELETE FROM {} WHERE state = $1 AND updated_at <= $2",
            self.table(JOBS_TABLE)
        );
        let result = sqlx::query(&sql)
            .bind(state.as_str())
            .bind(updated_before)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("failed to delete jobs", e))?;
        let deleted = result.rows_affected();
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
        let sql = format!(
            "SELECT DISTINCT job_signature FROM {} WHERE state = ANY($1)",
            self.table(JOBS_TABLE)
        );
        let signatures: Vec<String> = sqlx::query_scalar(&sql)
            .bind(Self::state_names(states))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("failed to read job signatures", e))?;
        Ok(signatures.into_iter().collect())
    }

    async fn job_exists(&self, details: &JobDetails, states: &[JobState]) -> StorageResult<bool> {
        if states.is_empty() {
            return Ok(false);
        }
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE job_signature = $1 AND state = ANY($2))",
            self.table(JOBS_TABLE)
        );
        sqlx::query_scalar(&sql)
            .bind(details.signature())
            .bind(Self::state_names(states))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("failed to check job signature", e))
    }

    async fn save_recurring_job(
        &self,
        recurring_job: RecurringJob,
    ) -> StorageResult<RecurringJob> {
        let document = self.serializer.serialize_recurring_job(&recurring_job)?;
        let sql = format!(
            "INSERT INTO {} (id, job_as_json) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET job_as_json = EXCLUDED.job_as_json",
            self.table(RECURRING_JOBS_TABLE)
        );
        sqlx::query(&sql)
            .bind(&recurring_job.id)
            .bind(&document)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("failed to save recurring job", e))?;
        Ok(recurring_job)
    }

    async fn get_recurring_jobs(&self) -> StorageResult<Vec<RecurringJob>> {
        let sql = format!(
            "SELECT job_as_json FROM {} ORDER BY id",
            self.table(RECURRING_JOBS_TABLE)
        );
        let documents: Vec<String> = sqlx::query_scalar(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("failed to read recurring jobs", e))?;
        documents
            .iter()
            .map(|document| self.serializer.deserialize_recurring_job(document))
            .collect()
    }

    async fn delete_recurring_job(&self, id: &str) -> StorageResult<u64> {
        let sql = format!(
            "DELETE FROM {} WHERE id = $1",
            self.table(RECURRING_JOBS_TABLE)
        );
        let result = sqlx::query(&sql)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("failed to delete recurring job", e))?;
        Ok(result.rows_affected())
    }

    async fn recurring_job_exists(
        &self,
        recurring_job_id: &str,
        states: &[JobState],
    ) -> StorageResult<bool> {
        if states.is_empty() {
            return Ok(false);
        }
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE recurring_job_id = $1 AND state = ANY($2))",
            self.table(JOBS_TABLE)
        );
        sqlx::query_scalar(&sql)
            .bind(recurring_job_id)
            .bind(Self::state_names(states))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("failed to check recurring job refs", e))
    }

    async fn announce_server(&self, server: &BackgroundJobServer) -> StorageResult<()> {
        let sql = format!(
            "INSERT INTO {} (id, worker_pool_size, poll_interval_seconds, first_heartbeat, \
             last_heartbeat, running, system_total_memory, system_free_memory, \
             system_cpu_load, process_max_memory, process_free_memory, \
             process_allocated_memory, process_cpu_load) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (id) DO UPDATE SET \
             worker_pool_size = EXCLUDED.worker_pool_size, \
             poll_interval_seconds = EXCLUDED.poll_interval_seconds, \
             first_heartbeat = EXCLUDED.first_heartbeat, \
             last_heartbeat = EXCLUDED.last_heartbeat, \
             running = EXCLUDED.running, \
             system_total_memory = EXCLUDED.system_total_memory, \
             system_free_memory = EXCLUDED.system_free_memory, \
             system_cpu_load = EXCLUDED.system_cpu_load, \
             process_max_memory = EXCLUDED.process_max_memory, \
             process_free_memory = EXCLUDED.process_free_memory, \
             process_allocated_memory = EXCLUDED.process_allocated_memory, \
             process_cpu_load = EXCLUDED.process_cpu_load",
            self.table(SERVERS_TABLE)
        );
        sqlx::query(&sql)
            .bind(server.id)
            .bind(server.worker_pool_size)
            .bind(server.poll_interval_seconds)
            .bind(server.first_heartbeat)
            .bind(server.last_heartbeat)
            .bind(server.running)
            .bind(server.system_total_memory)
            .bind(server.system_free_memory)
            .bind(server.system_cpu_load)
            .bind(server.process_max_memory)
            .bind(server.process_free_memory)
            .bind(server.process_allocated_memory)
            .bind(server.process_cpu_load)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("failed to announce server", e))?;
        Ok(())
    }

    async fn signal_server_alive(&self, server: &BackgroundJobServer) -> StorageResult<bool> {
        let sql = format!(
            "UPDATE {} SET last_heartbeat = $2, system_free_memory = $3, \
             system_cpu_load = $4, process_free_memory = $5, \
             process_allocated_memory = $6, process_cpu_load = $7 \
             WHERE id = $1 RETURNING running",
            self.table(SERVERS_TABLE)
        );
        let running: Option<bool> = sqlx::query_scalar(&sql)
            .bind(server.id)
            .bind(server.last_heartbeat)
            .bind(server.system_free_memory)
            .bind(server.system_cpu_load)
            .bind(server.process_free_memory)
            .bind(server.process_allocated_memory)
            .bind(server.process_cpu_load)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("failed to record heartbeat", e))?;
        running.ok_or(StorageError::ServerTimedOut(server.id))
    }

    async fn signal_server_stopped(&self, id: Uuid) -> StorageResult<()> {
        let sql = format!("DELETE FROM {} WHERE id = $1", self.table(SERVERS_TABLE));
        sqlx::query(&sql)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("failed to remove server", e))?;
        Ok(())
    }

    async fn get_servers(&self) -> StorageResult<Vec<BackgroundJobServer>> {
        let sql = format!(
            "SELECT * FROM {} ORDER BY first_heartbeat ASC",
            self.table(SERVERS_TABLE)
        );
        sqlx::query_as::<_, BackgroundJobServer>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("failed to read servers", e))
    }

    async fn get_longest_running_server_id(&self) -> StorageResult<Uuid> {
        let sql = format!(
            "SELECT id FROM {} ORDER BY first_heartbeat ASC LIMIT 1",
            self.table(SERVERS_TABLE)
        );
        let id: Option<Uuid> = sqlx::query_scalar(&sql)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("failed to read servers", e))?;
        id.ok_or_else(|| StorageError::invalid_argument("no background job servers registered"))
    }

    async fn remove_timed_out_servers(
        &self,
        heartbeat_older_than: DateTime<Utc>,
    ) -> StorageResult<u64> {
        let sql = format!(
            "DELETE FROM {} WHERE last_heartbeat <= $1",
            self.table(SERVERS_TABLE)
        );
        let result = sqlx::query(&sql)
            .bind(heartbeat_older_than)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("failed to remove timed-out servers", e))?;
        Ok(result.rows_affected())
    }

    async fn save_metadata(&self, metadata: StorageMetadata) -> StorageResult<()> {
        let sql = format!(
            "INSERT INTO {} (name, owner, value, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (name, owner) DO UPDATE SET \
             value = EXCLUDED.value, updated_at = EXCLUDED.updated_at",
            self.table(METADATA_TABLE)
        );
        sqlx::query(&sql)
            .bind(&metadata.name)
            .bind(&metadata.owner)
            .bind(&metadata.value)
            .bind(metadata.created_at)
            .bind(metadata.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("failed to save metadata", e))?;
        Ok(())
    }

    async fn get_metadata_by_name(&self, name: &str) -> StorageResult<Vec<StorageMetadata>> {
        let sql = format!(
            "SELECT * FROM {} WHERE name = $1 ORDER BY owner ASC",
            self.table(METADATA_TABLE)
        );
        sqlx::query_as::<_, StorageMetadata>(&sql)
            .bind(name)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("failed to read metadata", e))
    }

    async fn get_metadata(
        &self,
        name: &str,
        owner: &str,
    ) -> StorageResult<Option<StorageMetadata>> {
        let sql = format!(
            "SELECT * FROM {} WHERE name = $1 AND owner = $2",
            self.table(METADATA_TABLE)
        );
        sqlx::query_as::<_, StorageMetadata>(&sql)
            .bind(name)
            .bind(owner)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("failed to read metadata", e))
    }

    async fn delete_metadata(&self, name: &str) -> StorageResult<u64> {
        let sql = format!("DELETE FROM {} WHERE name = $1", self.table(METADATA_TABLE));
        let result = sqlx::query(&sql)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("failed to delete metadata", e))?;
        Ok(result.rows_affected())
    }

    async fn get_job_stats(&self) -> StorageResult<JobStats> {
        let queried_at = Utc::now();
        let view_sql = format!(
            "SELECT total, awaiting, scheduled, enqueued, processing, succeeded, failed, \
             deleted FROM {}",
            self.table(JOBS_STATS_VIEW)
        );
        let (total, awaiting, scheduled, enqueued, processing, succeeded, failed, deleted): (
            i64,
            i64,
            i64,
            i64,
            i64,
            i64,
            i64,
            i64,
        ) = sqlx::query_as(&view_sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("failed to read job stats view", e))?;

        let counter_sql = format!(
            "SELECT value FROM {} WHERE name = $1 AND owner = $2",
            self.table(METADATA_TABLE)
        );
        let all_time: Option<String> = sqlx::query_scalar(&counter_sql)
            .bind(StorageMetadata::SUCCEEDED_JOBS_COUNTER)
            .bind(StorageMetadata::CLUSTER_OWNER)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("failed to read succeeded counter", e))?;

        let recurring_sql = format!(
            "SELECT COUNT(*) FROM {}",
            self.table(RECURRING_JOBS_TABLE)
        );
        let recurring_jobs: i64 = sqlx::query_scalar(&recurring_sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("failed to count recurring jobs", e))?;

        let servers_sql = format!("SELECT COUNT(*) FROM {}", self.table(SERVERS_TABLE));
        let background_job_servers: i64 = sqlx::query_scalar(&servers_sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("failed to count servers", e))?;

        Ok(JobStats {
            queried_at,
            total: total as u64,
            awaiting: awaiting as u64,
            scheduled: scheduled as u64,
            enqueued: enqueued as u64,
            processing: processing as u64,
            succeeded: succeeded as u64,
            failed: failed as u64,
            deleted: deleted as u64,
            all_time_succeeded: all_time.and_then(|v| v.parse().ok()).unwrap_or(0),
            recurring_jobs: recurring_jobs as u64,
            background_job_servers: background_job_servers as u64,
        })
    }

    async fn publish_total_amount_of_succeeded_jobs(&self, amount: u64) -> StorageResult<()> {
        let table = self.table(METADATA_TABLE);
        let sql = format!(
            "INSERT INTO {table} (name, owner, value, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $4) \
             ON CONFLICT (name, owner) DO UPDATE SET \
             value = (CAST({table}.value AS BIGINT) + CAST(EXCLUDED.value AS BIGINT))::TEXT, \
             updated_at = EXCLUDED.updated_at"
        );
        sqlx::query(&sql)
            .bind(StorageMetadata::SUCCEEDED_JOBS_COUNTER)
            .bind(StorageMetadata::CLUSTER_OWNER)
            .bind(amount.to_string())
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_err("failed to publish succeeded total", e))?;
        Ok(())
    }

    async fn health_check(&self) -> StorageResult<bool> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|v| v == 1)
            .map_err(|e| map_sqlx_err("PostgreSQL health check failed", e))
    }
}
