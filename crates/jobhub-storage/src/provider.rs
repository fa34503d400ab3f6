//! Storage manager that dispatches to the configured provider.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use jobhub_core::config::StorageConfig;
use jobhub_core::traits::listener::{JobStatsChangeListener, MetadataChangeListener};
use jobhub_core::traits::serializer::JobSerializer;
use jobhub_core::traits::storage::StorageProvider;
use jobhub_core::types::pagination::{Page, PageRequest};
use jobhub_core::{StorageError, StorageResult};
use jobhub_entity::{BackgroundJobServer, Job, JobDetails, JobState, JobStats, RecurringJob,
    StorageMetadata};

use crate::listeners::{ListenerHandle, NotifyingStorageProvider};

/// Storage manager that wraps the configured storage provider.
///
/// The backend is selected at construction time based on configuration and
/// wrapped in the change-notification layer. Listener registration goes
/// through the manager; everything else delegates to the backend.
#[derive(Clone)]
pub struct StorageManager {
    inner: Arc<NotifyingStorageProvider>,
}

impl std::fmt::Debug for StorageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageManager").finish_non_exhaustive()
    }
}

impl StorageManager {
    /// Create a new storage manager from configuration.
    pub async fn new(
        config: &StorageConfig,
        serializer: Arc<dyn JobSerializer>,
    ) -> StorageResult<Self> {
        let backend: Arc<dyn StorageProvider> = match config.provider.as_str() {
            #[cfg(feature = "memory")]
            "memory" => {
                info!("Initializing in-memory storage provider");
                Arc::new(crate::memory::InMemoryStorageProvider::new())
            }
            #[cfg(feature = "redis-backend")]
            "redis" => {
                let redis_config = config.redis.as_ref().ok_or_else(|| {
                    StorageError::invalid_argument(
                        "storage provider 'redis' selected but redis configuration is missing",
                    )
                })?;
                info!("Initializing Redis storage provider");
                let provider = crate::redis::RedisStorageProvider::connect(
                    redis_config,
                    Arc::clone(&serializer),
                )
                .await?;
                Arc::new(provider)
            }
            #[cfg(feature = "postgres-backend")]
            "postgres" => {
                let postgres_config = config.postgres.as_ref().ok_or_else(|| {
                    StorageError::invalid_argument(
                        "storage provider 'postgres' selected but postgres configuration is missing",
                    )
                })?;
                info!("Initializing PostgreSQL storage provider");
                let provider = crate::sql::PostgresStorageProvider::connect(
                    postgres_config,
                    Arc::clone(&serializer),
                )
                .await?;
                Arc::new(provider)
            }
            other => {
                return Err(StorageError::invalid_argument(format!(
                    "unknown storage provider: '{other}'. Supported: memory, redis, postgres"
                )));
            }
        };

        Ok(Self::from_provider(
            backend,
            config.job_stats_notifications_per_second,
        ))
    }

    /// Wrap an existing backend (for tests and embedders that build their
    /// own provider).
    pub fn from_provider(provider: Arc<dyn StorageProvider>, job_stats_per_second: u32) -> Self {
        Self {
            inner: Arc::new(NotifyingStorageProvider::new(
                provider,
                job_stats_per_second,
            )),
        }
    }

    /// Create a manager over a fresh in-memory store with the default
    /// notification budget.
    #[cfg(feature = "memory")]
    pub fn in_memory() -> Self {
        Self::from_provider(Arc::new(crate::memory::InMemoryStorageProvider::new()), 1)
    }

    /// Register a job-stats listener for the lifetime of the returned
    /// handle.
    pub fn on_job_stats_change(
        &self,
        listener: Arc<dyn JobStatsChangeListener>,
    ) -> ListenerHandle {
        self.inner.on_job_stats_change(listener)
    }

    /// Register a metadata listener for the lifetime of the returned
    /// handle.
    pub fn on_metadata_change(&self, listener: Arc<dyn MetadataChangeListener>) -> ListenerHandle {
        self.inner.on_metadata_change(listener)
    }

    /// Get a reference to the wrapped provider.
    pub fn provider(&self) -> &dyn StorageProvider {
        self.inner.as_ref()
    }
}

#[async_trait]
impl StorageProvider for StorageManager {
    async fn save_job(&self, job: Job) -> StorageResult<Job> {
        self.inner.save_job(job).await
    }

    async fn save_jobs(&self, jobs: Vec<Job>) -> StorageResult<Vec<Job>> {
        self.inner.save_jobs(jobs).await
    }

    async fn get_job_by_id(&self, id: Uuid) -> StorageResult<Job> {
        self.inner.get_job_by_id(id).await
    }

    async fn delete_job_permanently(&self, id: Uuid) -> StorageResult<u64> {
        self.inner.delete_job_permanently(id).await
    }

    async fn get_jobs(&self, state: JobState, page: &PageRequest) -> StorageResult<Vec<Job>> {
        self.inner.get_jobs(state, page).await
    }

    async fn get_jobs_updated_before(
        &self,
        state: JobState,
        updated_before: DateTime<Utc>,
        page: &PageRequest,
    ) -> StorageResult<Vec<Job>> {
        self.inner
            .get_jobs_updated_before(state, updated_before, page)
            .await
    }

    async fn get_scheduled_jobs(
        &self,
        scheduled_before: DateTime<Utc>,
        page: &PageRequest,
    ) -> StorageResult<Vec<Job>> {
        self.inner.get_scheduled_jobs(scheduled_before, page).await
    }

    async fn get_job_page(&self, state: JobState, page: &PageRequest) -> StorageResult<Page<Job>> {
        self.inner.get_job_page(state, page).await
    }

    async fn delete_jobs_permanently(
        &self,
        state: JobState,
        updated_before: DateTime<Utc>,
    ) -> StorageResult<u64> {
        self.inner
            .delete_jobs_permanently(state, updated_before)
            .await
    }

    async fn get_distinct_job_signatures(
        &self,
        states: &[JobState],
    ) -> StorageResult<HashSet<String>> {
        self.inner.get_distinct_job_signatures(states).await
    }

    async fn job_exists(&self, details: &JobDetails, states: &[JobState]) -> StorageResult<bool> {
        self.inner.job_exists(details, states).await
    }

    async fn save_recurring_job(
        &self,
        recurring_job: RecurringJob,
    ) -> StorageResult<RecurringJob> {
        self.inner.save_recurring_job(recurring_job).await
    }

    async fn get_recurring_jobs(&self) -> StorageResult<Vec<RecurringJob>> {
        self.inner.get_recurring_jobs().await
    }

    async fn delete_recurring_job(&self, id: &str) -> StorageResult<u64> {
        self.inner.delete_recurring_job(id).await
    }

    async fn recurring_job_exists(
        &self,
        recurring_job_id: &str,
        states: &[JobState],
    ) -> StorageResult<bool> {
        self.inner
            .recurring_job_exists(recurring_job_id, states)
            .await
    }

    async fn announce_server(&self, server: &BackgroundJobServer) -> StorageResult<()> {
        self.inner.announce_server(server).await
    }

    async fn signal_server_alive(&self, server: &BackgroundJobServer) -> StorageResult<bool> {
        self.inner.signal_server_alive(server).await
    }

    async fn signal_server_stopped(&self, id: Uuid) -> StorageResult<()> {
        self.inner.signal_server_stopped(id).await
    }

    async fn get_servers(&self) -> StorageResult<Vec<BackgroundJobServer>> {
        self.inner.get_servers().await
    }

    async fn get_longest_running_server_id(&self) -> StorageResult<Uuid> {
        self.inner.get_longest_running_server_id().await
    }

    async fn remove_timed_out_servers(
        &self,
        heartbeat_older_than: DateTime<Utc>,
    ) -> StorageResult<u64> {
        self.inner
            .remove_timed_out_servers(heartbeat_older_than)
            .await
    }

    async fn save_metadata(&self, metadata: StorageMetadata) -> StorageResult<()> {
        self.inner.save_metadata(metadata).await
    }

    async fn get_metadata_by_name(&self, name: &str) -> StorageResult<Vec<StorageMetadata>> {
        self.inner.get_metadata_by_name(name).await
    }

    async fn get_metadata(
        &self,
        name: &str,
        owner: &str,
    ) -> StorageResult<Option<StorageMetadata>> {
        self.inner.get_metadata(name, owner).await
    }

    async fn delete_metadata(&self, name: &str) -> StorageResult<u64> {
        self.inner.delete_metadata(name).await
    }

    async fn get_job_stats(&self) -> StorageResult<JobStats> {
        self.inner.get_job_stats().await
    }

    async fn publish_total_amount_of_succeeded_jobs(&self, amount: u64) -> StorageResult<()> {
        self.inner
            .publish_total_amount_of_succeeded_jobs(amount)
            .await
    }

    async fn health_check(&self) -> StorageResult<bool> {
        self.inner.health_check().await
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use chrono::Utc;
    use jobhub_entity::{JobDetails, StateRecord};

    struct CountingListener {
        deliveries: AtomicUsize,
    }

    impl JobStatsChangeListener for CountingListener {
        fn on_change(&self, _stats: &JobStats) {
            self.deliveries.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct WatchingListener {
        deliveries: AtomicUsize,
    }

    impl MetadataChangeListener for WatchingListener {
        fn metadata_name(&self) -> &str {
            "dashboard"
        }

        fn on_change(&self, _metadata: &[StorageMetadata]) {
            self.deliveries.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn job() -> Job {
        Job::new(
            JobDetails::new("com.acme.Mailer", "send", Vec::new()),
            StateRecord::Enqueued {
                created_at: Utc::now(),
            },
        )
    }

    #[tokio::test]
    async fn test_unknown_provider_is_rejected() {
        let config = StorageConfig {
            provider: "tape-drive".to_string(),
            ..StorageConfig::default()
        };
        let err = StorageManager::new(
            &config,
            Arc::new(jobhub_core::traits::serializer::JsonJobSerializer),
        )
        .await
        .expect_err("unknown provider");
        assert!(matches!(err, StorageError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_save_notifies_job_stats_listeners() {
        let manager = StorageManager::in_memory();
        let listener = Arc::new(CountingListener {
            deliveries: AtomicUsize::new(0),
        });
        let _handle = manager.on_job_stats_change(Arc::clone(&listener) as _);

        manager.save_job(job()).await.expect("save");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(listener.deliveries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bursts_are_coalesced_into_trailing_delivery() {
        let manager = StorageManager::in_memory();
        let listener = Arc::new(CountingListener {
            deliveries: AtomicUsize::new(0),
        });
        let _handle = manager.on_job_stats_change(Arc::clone(&listener) as _);

        for _ in 0..10 {
            manager.save_job(job()).await.expect("save");
        }
        // One immediate delivery, one trailing delivery at the end of the
        // one-second budget window; the other eight coalesce.
        tokio::time::sleep(Duration::from_millis(1_200)).await;
        assert_eq!(listener.deliveries.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dropped_handle_stops_deliveries() {
        let manager = StorageManager::in_memory();
        let listener = Arc::new(CountingListener {
            deliveries: AtomicUsize::new(0),
        });
        let handle = manager.on_job_stats_change(Arc::clone(&listener) as _);
        drop(handle);

        manager.save_job(job()).await.expect("save");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(listener.deliveries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_metadata_listener_sees_only_its_name() {
        let manager = StorageManager::in_memory();
        let listener = Arc::new(WatchingListener {
            deliveries: AtomicUsize::new(0),
        });
        let _handle = manager.on_metadata_change(Arc::clone(&listener) as _);

        manager
            .save_metadata(StorageMetadata::new("other", "cluster", "1", Utc::now()))
            .await
            .expect("save");
        manager
            .save_metadata(StorageMetadata::new("dashboard", "cluster", "1", Utc::now()))
            .await
            .expect("save");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(listener.deliveries.load(Ordering::SeqCst), 1);
    }
}
