#![allow(dead_code)]

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use object_storage::engine::FilesystemEngine;
use object_storage::replication::{InMemoryReplicationQueue, ReplicationReceiver};
use object_storage::{
    BoxReader, ByteTransform, DeliverySink, DeliveryStatus, EngineRegistry, FetchedObject,
    ObjectStorage, ObjectStorageConfig, SpaceConfig, StorageEngine, StorageError,
};
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};

/// Declare a space in `config`.
pub fn add_space(
    config: &mut ObjectStorageConfig,
    name: &str,
    engine: &str,
    replication_space: Option<&str>,
) {
    config.spaces.insert(
        name.to_string(),
        SpaceConfig {
            engine: engine.to_string(),
            path: None,
            bucket: None,
            replication_space: replication_space.map(str::to_string),
        },
    );
}

pub fn config_in(dir: &Path) -> ObjectStorageConfig {
    let mut config = ObjectStorageConfig::default();
    config.fs.base_dir = dir.to_path_buf();
    config
}

/// Build a storage with the test engines registered next to the built-in ones.
pub fn build_storage(
    config: ObjectStorageConfig,
    counting: Option<Arc<CountingEngine>>,
) -> (ObjectStorage, ReplicationReceiver) {
    let mut registry = EngineRegistry::default();
    registry.register(
        "failing",
        Arc::new(
            |_: &ObjectStorageConfig| -> Result<Arc<dyn StorageEngine>, StorageError> {
                Ok(Arc::new(FailingEngine))
            },
        ),
    );
    registry.register(
        "truncating",
        Arc::new(
            |_: &ObjectStorageConfig| -> Result<Arc<dyn StorageEngine>, StorageError> {
                Ok(Arc::new(TruncatingEngine))
            },
        ),
    );
    if let Some(counting) = counting {
        registry.register(
            "counting",
            Arc::new(
                move |_: &ObjectStorageConfig| -> Result<Arc<dyn StorageEngine>, StorageError> {
                    Ok(Arc::clone(&counting) as Arc<dyn StorageEngine>)
                },
            ),
        );
    }

    let (queue, receiver) = InMemoryReplicationQueue::new();
    let storage = ObjectStorage::with_registry(config, registry, Arc::new(queue)).unwrap();
    (storage, receiver)
}

/// An engine whose backend is permanently unavailable.
pub struct FailingEngine;

fn unavailable(space: &str, key: &str, operation: &'static str) -> StorageError {
    StorageError::Io {
        space: space.to_string(),
        key: key.to_string(),
        operation,
        source: io::Error::other("backend unavailable"),
    }
}

#[async_trait]
impl StorageEngine for FailingEngine {
    async fn store(
        &self,
        space: &str,
        key: &str,
        _data: BoxReader,
        _size: u64,
    ) -> Result<(), StorageError> {
        Err(unavailable(space, key, "store"))
    }

    async fn delete(&self, space: &str, key: &str) -> Result<(), StorageError> {
        Err(unavailable(space, key, "delete"))
    }

    async fn fetch(&self, space: &str, key: &str) -> Result<Option<FetchedObject>, StorageError> {
        Err(unavailable(space, key, "fetch"))
    }

    async fn deliver(
        &self,
        _space: &str,
        _key: &str,
        _sink: DeliverySink<'_>,
    ) -> Result<DeliveryStatus, StorageError> {
        Ok(DeliveryStatus::Failed(503))
    }
}

/// An engine whose connection drops in the middle of a delivery.
pub struct TruncatingEngine;

#[async_trait]
impl StorageEngine for TruncatingEngine {
    async fn store(
        &self,
        space: &str,
        key: &str,
        _data: BoxReader,
        _size: u64,
    ) -> Result<(), StorageError> {
        Err(unavailable(space, key, "store"))
    }

    async fn delete(&self, space: &str, key: &str) -> Result<(), StorageError> {
        Err(unavailable(space, key, "delete"))
    }

    async fn fetch(&self, space: &str, key: &str) -> Result<Option<FetchedObject>, StorageError> {
        Err(unavailable(space, key, "fetch"))
    }

    async fn deliver(
        &self,
        space: &str,
        key: &str,
        sink: DeliverySink<'_>,
    ) -> Result<DeliveryStatus, StorageError> {
        sink.write_all(b"repl")
            .await
            .map_err(|e| StorageError::Io {
                space: space.to_string(),
                key: key.to_string(),
                operation: "deliver",
                source: e,
            })?;
        Err(unavailable(space, key, "deliver"))
    }
}

/// A filesystem engine with slow fetches that records peak fetch concurrency.
pub struct CountingEngine {
    inner: FilesystemEngine,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl CountingEngine {
    pub fn new(config: &ObjectStorageConfig) -> Self {
        let roots = config
            .spaces
            .keys()
            .filter_map(|name| config.fs_root(name).map(|root| (name.clone(), root)))
            .collect();
        Self {
            inner: FilesystemEngine::new(roots),
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageEngine for CountingEngine {
    async fn store(
        &self,
        space: &str,
        key: &str,
        data: BoxReader,
        size: u64,
    ) -> Result<(), StorageError> {
        self.inner.store(space, key, data, size).await
    }

    async fn delete(&self, space: &str, key: &str) -> Result<(), StorageError> {
        self.inner.delete(space, key).await
    }

    async fn fetch(&self, space: &str, key: &str) -> Result<Option<FetchedObject>, StorageError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let result = self.inner.fetch(space, key).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn deliver(
        &self,
        space: &str,
        key: &str,
        sink: DeliverySink<'_>,
    ) -> Result<DeliveryStatus, StorageError> {
        self.inner.deliver(space, key, sink).await
    }
}

/// XORs every byte with a fixed mask; its own inverse.
pub struct XorTransform(pub u8);

struct XorReader {
    inner: BoxReader,
    mask: u8,
}

impl AsyncRead for XorReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let mask = self.mask;
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            for byte in &mut buf.filled_mut()[before..] {
                *byte ^= mask;
            }
        }
        poll
    }
}

impl ByteTransform for XorTransform {
    fn encode(&self, input: BoxReader) -> BoxReader {
        Box::new(XorReader {
            inner: input,
            mask: self.0,
        })
    }

    fn decode(&self, input: BoxReader) -> BoxReader {
        self.encode(input)
    }
}

/// Stores bytes unchanged but cannot decode them.
pub struct CorruptTransform;

struct CorruptReader;

impl AsyncRead for CorruptReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::InvalidData, "corrupt block")))
    }
}

impl ByteTransform for CorruptTransform {
    fn encode(&self, input: BoxReader) -> BoxReader {
        input
    }

    fn decode(&self, _input: BoxReader) -> BoxReader {
        Box::new(CorruptReader)
    }
}
