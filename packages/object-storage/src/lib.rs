//! Layer 1 of the storage stack: raw byte objects addressed by opaque keys.

pub mod config;
pub mod download;
pub mod engine;
mod error;
pub mod keys;
mod metrics;
pub mod replication;
pub mod retry;
mod space;
mod storage;
mod transform;

pub use config::{ObjectStorageConfig, ReplicationConfig, SpaceConfig};
pub use download::DownloadManager;
pub use engine::{
    BoxReader, DeliverySink, DeliveryStatus, EngineRegistry, FetchedObject, StorageEngine,
};
pub use error::StorageError;
pub use metrics::MetricsSnapshot;
pub use replication::{ReplicationManager, ReplicationTask, ReplicationTaskStorage};
pub use space::ObjectStorageSpace;
pub use storage::ObjectStorage;
pub use transform::ByteTransform;
