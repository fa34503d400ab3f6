//! PostgreSQL backend configuration.

use serde::{Deserialize, Serialize};

use super::storage::DatabaseOptions;

/// PostgreSQL connection pool and schema configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// PostgreSQL connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection acquire timeout in seconds. Doubles as the operation
    /// deadline when the pool is saturated.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    /// Idle connection timeout in seconds.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,
    /// Prefix applied to every table and view name.
    #[serde(default)]
    pub table_prefix: String,
    /// What to do about the schema at startup.
    #[serde(default)]
    pub database_options: DatabaseOptions,
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_idle_timeout() -> u64 {
    300
}
