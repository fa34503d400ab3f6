//! Background job server entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Liveness record of one worker process sharing the backing store.
///
/// A server announces itself at process start, refreshes `last_heartbeat`
/// on every poll interval, and is removed on graceful shutdown or garbage
/// collected once its heartbeat goes stale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct BackgroundJobServer {
    /// Identifier assigned at process start.
    pub id: Uuid,
    /// Number of worker threads the process runs.
    pub worker_pool_size: i32,
    /// Seconds between store polls.
    pub poll_interval_seconds: i32,
    /// When the server first announced itself.
    pub first_heartbeat: DateTime<Utc>,
    /// When the server last signalled it is alive.
    pub last_heartbeat: DateTime<Utc>,
    /// Whether the server is processing jobs. A server that was stopped
    /// remotely sees `false` on its next heartbeat and reacts to it.
    pub running: bool,
    /// Total memory of the host, in bytes.
    pub system_total_memory: i64,
    /// Free memory of the host, in bytes.
    pub system_free_memory: i64,
    /// Host CPU load, 0.0 to 1.0.
    pub system_cpu_load: f64,
    /// Maximum memory the process may allocate, in bytes.
    pub process_max_memory: i64,
    /// Free memory within the process allocation, in bytes.
    pub process_free_memory: i64,
    /// Memory currently allocated by the process, in bytes.
    pub process_allocated_memory: i64,
    /// Process CPU load, 0.0 to 1.0.
    pub process_cpu_load: f64,
}

impl BackgroundJobServer {
    /// Refresh the liveness fields from a newer heartbeat record.
    ///
    /// The `running` flag is deliberately not copied: it is owned by the
    /// store so operators can stop a server remotely.
    pub fn refresh_from(&mut self, status: &BackgroundJobServer) {
        self.last_heartbeat = status.last_heartbeat;
        self.system_free_memory = status.system_free_memory;
        self.system_cpu_load = status.system_cpu_load;
        self.process_free_memory = status.process_free_memory;
        self.process_allocated_memory = status.process_allocated_memory;
        self.process_cpu_load = status.process_cpu_load;
    }
}
