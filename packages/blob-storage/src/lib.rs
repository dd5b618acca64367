//! Layer 2 of the storage stack: a virtual filesystem of directories and
//! named blobs with metadata in a relational store and bytes in layer 1.

mod changes;
pub mod config;
pub mod database;
pub mod entity;
mod error;
pub mod jobs;
pub mod loops;
pub mod naming;
pub mod replication;
mod space;
mod storage;

pub use changes::{BlobChange, BlobChangeHandler};
pub use config::{BlobSpaceConfig, BlobStorageConfig, LimitsConfig, LoopConfig};
pub use error::BlobStorageError;
pub use replication::SqlReplicationTaskStorage;
pub use space::{BlobStorageSpace, Converter, compute_checksum};
pub use storage::BlobStorage;
