//! Cross-crate trait seams.

pub mod listener;
pub mod serializer;
pub mod storage;

pub use listener::{JobStatsChangeListener, MetadataChangeListener};
pub use serializer::{JobSerializer, JsonJobSerializer};
pub use storage::StorageProvider;
