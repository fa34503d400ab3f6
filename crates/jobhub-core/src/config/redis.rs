//! Redis backend configuration.

use serde::{Deserialize, Serialize};

/// Redis connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
    /// Prefix applied to every key. Empty by default.
    #[serde(default)]
    pub key_prefix: String,
}
