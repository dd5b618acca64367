use std::io::Cursor;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tracing::warn;

use crate::engine::{BoxReader, DeliverySink, DeliveryStatus, FetchedObject, StorageEngine};
use crate::error::StorageError;
use crate::metrics::{MetricsSnapshot, SpaceMetrics};
use crate::replication::ReplicationManager;
use crate::transform::ByteTransform;

/// The space (and its engine) holding copies of another space's objects.
pub(crate) struct ReplicaTarget {
    pub(crate) name: String,
    pub(crate) engine: Arc<dyn StorageEngine>,
}

/// A named layer 1 space bound to one storage engine.
///
/// Writes are propagated to the replica space (if any) asynchronously; reads
/// fall back to the replica when the primary engine cannot serve an object.
pub struct ObjectStorageSpace {
    name: String,
    engine: Arc<dyn StorageEngine>,
    replica: Option<ReplicaTarget>,
    replication: Arc<ReplicationManager>,
    transform: Option<Arc<dyn ByteTransform>>,
    metrics: SpaceMetrics,
}

impl ObjectStorageSpace {
    pub(crate) fn new(
        name: String,
        engine: Arc<dyn StorageEngine>,
        replica: Option<ReplicaTarget>,
        replication: Arc<ReplicationManager>,
        transform: Option<Arc<dyn ByteTransform>>,
    ) -> Self {
        Self {
            name,
            engine,
            replica,
            replication,
            transform,
            metrics: SpaceMetrics::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn replica_name(&self) -> Option<&str> {
        self.replica.as_ref().map(|replica| replica.name.as_str())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub(crate) fn engine(&self) -> &Arc<dyn StorageEngine> {
        &self.engine
    }

    /// Store `size` bytes from `data` under `key`.
    pub async fn upload(&self, key: &str, data: BoxReader, size: u64) -> Result<(), StorageError> {
        let data = match &self.transform {
            Some(transform) => transform.encode(data),
            None => data,
        };
        self.engine.store(&self.name, key, data, size).await?;
        self.metrics.record_upload();
        self.replication.notify_about_update(&self.name, key).await;
        Ok(())
    }

    /// Store an in-memory buffer under `key`.
    pub async fn upload_bytes(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.upload(key, Box::new(Cursor::new(data.to_vec())), data.len() as u64)
            .await
    }

    /// Open the object for reading, `None` if neither primary nor replica has it.
    pub async fn stream(&self, key: &str) -> Result<Option<BoxReader>, StorageError> {
        let object = self.fetch_with_fallback(key).await?;
        self.metrics.record_stream();
        Ok(object.map(|object| self.decode(object.reader)))
    }

    /// Read the whole object into memory.
    pub async fn download(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let Some(object) = self.fetch_with_fallback(key).await? else {
            return Ok(None);
        };
        self.metrics.record_download();

        let mut reader = self.decode(object.reader);
        let mut buf = Vec::with_capacity(object.size as usize);
        reader
            .read_to_end(&mut buf)
            .await
            .map_err(|e| StorageError::io(&self.name, key, "download", e))?;
        Ok(Some(buf))
    }

    /// Whether the primary engine holds the object.
    pub async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.engine.exists(&self.name, key).await
    }

    /// Write the object into `sink`.
    ///
    /// When the primary reports a failure status, the replica is tried and the
    /// status is surfaced only when both fail (or no replica exists). An I/O
    /// error may leave partial output in `sink`, so it is returned as is.
    pub async fn deliver(
        &self,
        key: &str,
        sink: DeliverySink<'_>,
    ) -> Result<DeliveryStatus, StorageError> {
        self.metrics.record_delivery();

        if self.transform.is_some() {
            return self.deliver_decoded(key, sink).await;
        }

        let primary = self.engine.deliver(&self.name, key, sink).await;
        let Some(replica) = &self.replica else {
            if let Ok(DeliveryStatus::Failed(status)) = &primary {
                self.metrics.record_delivery_failure(*status);
            }
            return primary;
        };

        match primary {
            Ok(DeliveryStatus::Delivered { bytes }) => Ok(DeliveryStatus::Delivered { bytes }),
            Ok(DeliveryStatus::Failed(status)) => {
                warn!(
                    space = %self.name,
                    replica = %replica.name,
                    key,
                    status,
                    "Primary delivery failed, falling back to replica"
                );
                self.metrics.record_fallback();
                self.deliver_from_replica(replica, key, sink).await
            }
            Err(e) => Err(e),
        }
    }

    async fn deliver_from_replica(
        &self,
        replica: &ReplicaTarget,
        key: &str,
        sink: DeliverySink<'_>,
    ) -> Result<DeliveryStatus, StorageError> {
        let status = replica.engine.deliver(&replica.name, key, sink).await?;
        if let DeliveryStatus::Failed(code) = status {
            self.metrics.record_delivery_failure(code);
        }
        Ok(status)
    }

    async fn deliver_decoded(
        &self,
        key: &str,
        sink: DeliverySink<'_>,
    ) -> Result<DeliveryStatus, StorageError> {
        let Some(object) = self.fetch_with_fallback(key).await? else {
            self.metrics.record_delivery_failure(404);
            return Ok(DeliveryStatus::Failed(404));
        };

        let mut reader = self.decode(object.reader);
        let bytes = tokio::io::copy(&mut reader, sink)
            .await
            .map_err(|e| StorageError::io(&self.name, key, "deliver", e))?;
        Ok(DeliveryStatus::Delivered { bytes })
    }

    /// Delete the object here and schedule its removal from the replica.
    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.engine.delete(&self.name, key).await?;
        self.replication.notify_about_delete(&self.name, key).await;
        Ok(())
    }

    async fn fetch_with_fallback(&self, key: &str) -> Result<Option<FetchedObject>, StorageError> {
        let primary = self.engine.fetch(&self.name, key).await;
        let Some(replica) = &self.replica else {
            return primary;
        };

        match primary {
            Ok(Some(object)) => Ok(Some(object)),
            Ok(None) => {
                let object = replica.engine.fetch(&replica.name, key).await?;
                if object.is_some() {
                    warn!(space = %self.name, replica = %replica.name, key, "Object served from replica");
                    self.metrics.record_fallback();
                }
                Ok(object)
            }
            Err(primary_error) => {
                warn!(
                    space = %self.name,
                    replica = %replica.name,
                    key,
                    error = %primary_error,
                    "Primary fetch failed, falling back to replica"
                );
                self.metrics.record_fallback();
                match replica.engine.fetch(&replica.name, key).await {
                    Ok(Some(object)) => Ok(Some(object)),
                    Ok(None) | Err(_) => Err(primary_error),
                }
            }
        }
    }

    fn decode(&self, reader: BoxReader) -> BoxReader {
        match &self.transform {
            Some(transform) => transform.decode(reader),
            None => reader,
        }
    }
}
