//! Rate-limited change notification.
//!
//! The listener registry is owned by the storage provider instance;
//! registration returns a scoped handle that deregisters on drop. The
//! [`NotifyingStorageProvider`] decorator wraps any backend and fires
//! notifications after successful mutations on spawned tasks, so delivery
//! can never block or fail a storage operation.
//!
//! Job-stats deliveries go through a coalescing rate gate: within one
//! budget window at most one immediate delivery happens, and a burst
//! schedules exactly one trailing delivery that reads then-current state.
//! Intermediate events are not replayed.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::warn;
use uuid::Uuid;

use jobhub_core::traits::listener::{JobStatsChangeListener, MetadataChangeListener};
use jobhub_core::traits::storage::StorageProvider;
use jobhub_core::types::pagination::{Page, PageRequest};
use jobhub_core::StorageResult;
use jobhub_entity::{BackgroundJobServer, Job, JobDetails, JobState, RecurringJob,
    StorageMetadata};

/// Listener registry owned by one storage provider instance.
#[derive(Default)]
pub struct ChangeListenerRegistry {
    next_id: AtomicU64,
    job_stats: DashMap<u64, Arc<dyn JobStatsChangeListener>>,
    metadata: DashMap<u64, Arc<dyn MetadataChangeListener>>,
}

impl ChangeListenerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn register_job_stats(
        self: &Arc<Self>,
        listener: Arc<dyn JobStatsChangeListener>,
    ) -> ListenerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.job_stats.insert(id, listener);
        ListenerHandle {
            id,
            kind: ListenerKind::JobStats,
            registry: Arc::downgrade(self),
        }
    }

    fn register_metadata(
        self: &Arc<Self>,
        listener: Arc<dyn MetadataChangeListener>,
    ) -> ListenerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.metadata.insert(id, listener);
        ListenerHandle {
            id,
            kind: ListenerKind::Metadata,
            registry: Arc::downgrade(self),
        }
    }

    fn job_stats_listeners(&self) -> Vec<Arc<dyn JobStatsChangeListener>> {
        self.job_stats.iter().map(|e| Arc::clone(e.value())).collect()
    }

    fn metadata_listeners(&self) -> Vec<Arc<dyn MetadataChangeListener>> {
        self.metadata.iter().map(|e| Arc::clone(e.value())).collect()
    }
}

#[derive(Debug, Clone, Copy)]
enum ListenerKind {
    JobStats,
    Metadata,
}

/// Scoped registration: dropping the handle deregisters the listener.
pub struct ListenerHandle {
    id: u64,
    kind: ListenerKind,
    registry: Weak<ChangeListenerRegistry>,
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            match self.kind {
                ListenerKind::JobStats => {
                    registry.job_stats.remove(&self.id);
                }
                ListenerKind::Metadata => {
                    registry.metadata.remove(&self.id);
                }
            }
        }
    }
}

/// Outcome of asking the gate whether a delivery may go out now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// Deliver immediately.
    Deliver,
    /// Budget exhausted; schedule one trailing delivery after the delay.
    Trail(Duration),
    /// A trailing delivery is already scheduled; coalesce into it.
    Coalesced,
}

/// Coalescing rate gate with a fixed budget window.
pub(crate) struct RateGate {
    period: Duration,
    state: Mutex<GateState>,
}

#[derive(Debug, Default)]
struct GateState {
    window_started: Option<Instant>,
    trailing_scheduled: bool,
}

impl RateGate {
    /// Gate allowing `per_second` deliveries per second.
    pub(crate) fn per_second(per_second: u32) -> Self {
        let per_second = per_second.max(1);
        Self {
            period: Duration::from_secs(1) / per_second,
            state: Mutex::new(GateState::default()),
        }
    }

    pub(crate) fn admit(&self) -> Admission {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        match state.window_started {
            None => {
                state.window_started = Some(now);
                Admission::Deliver
            }
            Some(started) if now.duration_since(started) >= self.period => {
                state.window_started = Some(now);
                Admission::Deliver
            }
            Some(started) => {
                if state.trailing_scheduled {
                    Admission::Coalesced
                } else {
                    state.trailing_scheduled = true;
                    Admission::Trail(self.period - now.duration_since(started))
                }
            }
        }
    }

    /// Mark the scheduled trailing delivery as fired, opening a fresh
    /// budget window.
    pub(crate) fn trailing_fired(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.trailing_scheduled = false;
        state.window_started = Some(Instant::now());
    }
}

/// Decorator adding change notification to any backend.
pub struct NotifyingStorageProvider {
    inner: Arc<dyn StorageProvider>,
    registry: Arc<ChangeListenerRegistry>,
    job_stats_gate: Arc<RateGate>,
}

impl NotifyingStorageProvider {
    /// Wrap a backend with the given job-stats delivery budget.
    pub fn new(inner: Arc<dyn StorageProvider>, job_stats_per_second: u32) -> Self {
        Self {
            inner,
            registry: Arc::new(ChangeListenerRegistry::new()),
            job_stats_gate: Arc::new(RateGate::per_second(job_stats_per_second)),
        }
    }

    /// Register a job-stats listener; the registration lives as long as
    /// the returned handle.
    pub fn on_job_stats_change(
        &self,
        listener: Arc<dyn JobStatsChangeListener>,
    ) -> ListenerHandle {
        self.registry.register_job_stats(listener)
    }

    /// Register a metadata listener; the registration lives as long as the
    /// returned handle.
    pub fn on_metadata_change(&self, listener: Arc<dyn MetadataChangeListener>) -> ListenerHandle {
        self.registry.register_metadata(listener)
    }

    fn notify_job_stats(&self) {
        if self.registry.job_stats.is_empty() {
            return;
        }
        match self.job_stats_gate.admit() {
            Admission::Deliver => {
                self.spawn_job_stats_delivery(None);
            }
            Admission::Trail(delay) => {
                self.spawn_job_stats_delivery(Some(delay));
            }
            Admission::Coalesced => {}
        }
    }

    fn spawn_job_stats_delivery(&self, delay: Option<Duration>) {
        let inner = Arc::clone(&self.inner);
        let registry = Arc::clone(&self.registry);
        let gate = Arc::clone(&self.job_stats_gate);
        tokio::spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
                gate.trailing_fired();
            }
            match inner.get_job_stats().await {
                Ok(stats) => {
                    for listener in registry.job_stats_listeners() {
                        listener.on_change(&stats);
                    }
                }
                Err(error) => {
                    warn!(%error, "failed to read job stats for change notification");
                }
            }
        });
    }

    fn notify_metadata(&self, name: &str) {
        let listeners: Vec<_> = self
            .registry
            .metadata_listeners()
            .into_iter()
            .filter(|listener| listener.metadata_name() == name)
            .collect();
        if listeners.is_empty() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let name = name.to_string();
        tokio::spawn(async move {
            match inner.get_metadata_by_name(&name).await {
                Ok(metadata) => {
                    for listener in listeners {
                        listener.on_change(&metadata);
                    }
                }
                Err(error) => {
                    warn!(%error, name, "failed to read metadata for change notification");
                }
            }
        });
    }
}

#[async_trait]
impl StorageProvider for NotifyingStorageProvider {
    async fn save_job(&self, job: Job) -> StorageResult<Job> {
        let saved = self.inner.save_job(job).await?;
        self.notify_job_stats();
        Ok(saved)
    }

    async fn save_jobs(&self, jobs: Vec<Job>) -> StorageResult<Vec<Job>> {
        let saved = self.inner.save_jobs(jobs).await?;
        if !saved.is_empty() {
            self.notify_job_stats();
        }
        Ok(saved)
    }

    async fn get_job_by_id(&self, id: Uuid) -> StorageResult<Job> {
        self.inner.get_job_by_id(id).await
    }

    async fn delete_job_permanently(&self, id: Uuid) -> StorageResult<u64> {
        let deleted = self.inner.delete_job_permanently(id).await?;
        if deleted > 0 {
            self.notify_job_stats();
        }
        Ok(deleted)
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
        let deleted = self
            .inner
            .delete_jobs_permanently(state, updated_before)
            .await?;
        if deleted > 0 {
            self.notify_job_stats();
        }
        Ok(deleted)
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
        let saved = self.inner.save_recurring_job(recurring_job).await?;
        self.notify_job_stats();
        Ok(saved)
    }

    async fn get_recurring_jobs(&self) -> StorageResult<Vec<RecurringJob>> {
        self.inner.get_recurring_jobs().await
    }

    async fn delete_recurring_job(&self, id: &str) -> StorageResult<u64> {
        let deleted = self.inner.delete_recurring_job(id).await?;
        if deleted > 0 {
            self.notify_job_stats();
        }
        Ok(deleted)
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
        let name = metadata.name.clone();
        self.inner.save_metadata(metadata).await?;
        self.notify_metadata(&name);
        Ok(())
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
        let deleted = self.inner.delete_metadata(name).await?;
        if deleted > 0 {
            self.notify_metadata(name);
        }
        Ok(deleted)
    }

    async fn get_job_stats(&self) -> StorageResult<jobhub_entity::JobStats> {
        self.inner.get_job_stats().await
    }

    async fn publish_total_amount_of_succeeded_jobs(&self, amount: u64) -> StorageResult<()> {
        self.inner
            .publish_total_amount_of_succeeded_jobs(amount)
            .await?;
        self.notify_job_stats();
        Ok(())
    }

    async fn health_check(&self) -> StorageResult<bool> {
        self.inner.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_gate_coalesces_bursts() {
        let gate = RateGate::per_second(1);
        assert_eq!(gate.admit(), Admission::Deliver);
        assert!(matches!(gate.admit(), Admission::Trail(_)));
        assert_eq!(gate.admit(), Admission::Coalesced);
        assert_eq!(gate.admit(), Admission::Coalesced);

        gate.trailing_fired();
        // The trailing delivery opened a fresh window: the next burst
        // trails again instead of delivering immediately.
        assert!(matches!(gate.admit(), Admission::Trail(_)));
    }

    #[test]
    fn test_handle_drop_deregisters() {
        struct Counter;
        impl JobStatsChangeListener for Counter {
            fn on_change(&self, _stats: &jobhub_entity::JobStats) {}
        }

        let registry = Arc::new(ChangeListenerRegistry::new());
        let handle = registry.register_job_stats(Arc::new(Counter));
        assert_eq!(registry.job_stats.len(), 1);
        drop(handle);
        assert_eq!(registry.job_stats.len(), 0);
    }
}
