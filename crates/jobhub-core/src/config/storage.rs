//! Storage provider selection and notification budget.

use serde::{Deserialize, Serialize};

use super::database::PostgresConfig;
use super::redis::RedisConfig;

/// Root storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Which backend to use: `"memory"`, `"redis"` or `"postgres"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Delivery budget for job-stats change notifications, per second.
    #[serde(default = "default_job_stats_rate")]
    pub job_stats_notifications_per_second: u32,
    /// PostgreSQL backend settings, required when `provider = "postgres"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postgres: Option<PostgresConfig>,
    /// Redis backend settings, required when `provider = "redis"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            job_stats_notifications_per_second: default_job_stats_rate(),
            postgres: None,
            redis: None,
        }
    }
}

fn default_provider() -> String {
    "memory".to_string()
}

fn default_job_stats_rate() -> u32 {
    1
}

/// What a SQL backend should do about its schema at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseOptions {
    /// Apply any pending schema scripts.
    #[default]
    Create,
    /// Trust the operator: touch nothing, validate nothing.
    SkipCreate,
    /// Fail fatally unless every schema script has been applied.
    Validate,
}
