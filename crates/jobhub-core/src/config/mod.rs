//! Storage configuration schemas.
//!
//! All configuration structs are plain serde targets. The core never reads
//! environment variables or configuration files itself; host applications
//! deserialize these structs from whatever source they own and hand them
//! to the provider manager.

pub mod database;
pub mod redis;
pub mod storage;

pub use self::database::PostgresConfig;
pub use self::redis::RedisConfig;
pub use self::storage::{DatabaseOptions, StorageConfig};
