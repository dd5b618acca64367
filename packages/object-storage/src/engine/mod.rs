mod filesystem;
mod s3;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::ObjectStorageConfig;
use crate::error::StorageError;

pub use self::filesystem::FilesystemEngine;
pub use self::s3::S3Engine;

/// Type alias for a boxed async reader.
pub type BoxReader = Box<dyn AsyncRead + Unpin + Send>;

/// Type alias for the sink a delivery is written into.
pub type DeliverySink<'a> = &'a mut (dyn AsyncWrite + Unpin + Send);

/// Object data handed out by [`StorageEngine::fetch`].
pub struct FetchedObject {
    pub reader: BoxReader,
    pub size: u64,
}

/// Outcome of a delivery which did not fail with an I/O error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// The object was written to the sink.
    Delivered { bytes: u64 },
    /// The object could not be delivered; carries an HTTP status code.
    Failed(u16),
}

impl DeliveryStatus {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Primitive operations of a storage backend.
///
/// Every operation is scoped by the name of the space and an opaque physical key.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Store `size` bytes read from `data` under `key`.
    async fn store(
        &self,
        space: &str,
        key: &str,
        data: BoxReader,
        size: u64,
    ) -> Result<(), StorageError>;

    /// Delete the object. Deleting a missing object is not an error.
    async fn delete(&self, space: &str, key: &str) -> Result<(), StorageError>;

    /// Open the object for reading, `None` if it does not exist.
    async fn fetch(&self, space: &str, key: &str) -> Result<Option<FetchedObject>, StorageError>;

    /// Whether the object exists.
    async fn exists(&self, space: &str, key: &str) -> Result<bool, StorageError> {
        Ok(self.fetch(space, key).await?.is_some())
    }

    /// Write the object into `sink`.
    ///
    /// A missing object is reported as `DeliveryStatus::Failed(404)`; only I/O failures are errors.
    async fn deliver(
        &self,
        space: &str,
        key: &str,
        sink: DeliverySink<'_>,
    ) -> Result<DeliveryStatus, StorageError>;
}

/// Builds an engine from the layer 1 configuration.
pub type EngineFactory =
    Arc<dyn Fn(&ObjectStorageConfig) -> Result<Arc<dyn StorageEngine>, StorageError> + Send + Sync>;

/// Identifier of the built-in filesystem engine.
pub const FS_ENGINE: &str = "fs";
/// Identifier of the built-in S3 engine.
pub const S3_ENGINE: &str = "s3";

/// Maps engine identifiers to constructors.
#[derive(Clone)]
pub struct EngineRegistry {
    factories: HashMap<String, EngineFactory>,
}

impl EngineRegistry {
    /// A registry knowing only the built-in engines.
    pub fn with_builtin_engines() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register(
            FS_ENGINE,
            Arc::new(
                |config: &ObjectStorageConfig| -> Result<Arc<dyn StorageEngine>, StorageError> {
                    Ok(Arc::new(FilesystemEngine::from_config(config)))
                },
            ),
        );
        registry.register(
            S3_ENGINE,
            Arc::new(
                |config: &ObjectStorageConfig| -> Result<Arc<dyn StorageEngine>, StorageError> {
                    Ok(Arc::new(S3Engine::from_config(config)))
                },
            ),
        );
        registry
    }

    /// Register (or replace) the constructor for `name`.
    pub fn register(&mut self, name: impl Into<String>, factory: EngineFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub(crate) fn build(
        &self,
        name: &str,
        config: &ObjectStorageConfig,
    ) -> Option<Result<Arc<dyn StorageEngine>, StorageError>> {
        self.factories.get(name).map(|factory| factory(config))
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::with_builtin_engines()
    }
}
