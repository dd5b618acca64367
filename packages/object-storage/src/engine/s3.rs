use std::collections::HashMap;
use std::io::Cursor;

use async_trait::async_trait;
use dashmap::DashMap;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use super::{BoxReader, DeliverySink, DeliveryStatus, FetchedObject, S3_ENGINE, StorageEngine};
use crate::config::{ObjectStorageConfig, S3Config};
use crate::error::StorageError;

/// S3-compatible storage engine.
///
/// Every space maps to its own bucket. Bucket handles are created on first use.
pub struct S3Engine {
    settings: S3Config,
    buckets: HashMap<String, String>,
    handles: DashMap<String, Box<Bucket>>,
}

impl S3Engine {
    pub fn new(settings: S3Config, buckets: HashMap<String, String>) -> Self {
        Self {
            settings,
            buckets,
            handles: DashMap::new(),
        }
    }

    /// Create an engine serving every space configured with the `s3` engine.
    pub fn from_config(config: &ObjectStorageConfig) -> Self {
        let buckets = config
            .spaces
            .iter()
            .filter(|(_, settings)| settings.engine == S3_ENGINE)
            .filter_map(|(name, _)| config.bucket_name(name).map(|bucket| (name.clone(), bucket)))
            .collect();
        Self::new(config.s3.clone(), buckets)
    }

    fn bucket(&self, space: &str) -> Result<Box<Bucket>, StorageError> {
        if let Some(bucket) = self.handles.get(space) {
            return Ok(bucket.clone());
        }

        let name = self
            .buckets
            .get(space)
            .ok_or_else(|| StorageError::UnknownSpace(space.to_string()))?;
        let region = Region::Custom {
            region: self.settings.region.clone(),
            endpoint: self.settings.endpoint.clone(),
        };
        let credentials = Credentials::new(
            Some(self.settings.access_key.as_str()),
            Some(self.settings.secret_key.as_str()),
            None,
            None,
            None,
        )
        .map_err(|e| StorageError::Config(format!("S3 credentials for '{space}': {e}")))?;

        let mut bucket = Bucket::new(name, region, credentials)
            .map_err(|e| StorageError::Config(format!("S3 bucket for '{space}': {e}")))?;
        if self.settings.path_style {
            bucket = bucket.with_path_style();
        }

        debug!(space, bucket = %name, "Created S3 bucket handle");
        self.handles.insert(space.to_string(), bucket.clone());
        Ok(bucket)
    }
}

/// Extract the HTTP status of a failed request, if the client reports one.
fn failure_status(err: &S3Error) -> Option<u16> {
    match err {
        S3Error::HttpFailWithBody(status, _) => Some(*status),
        _ => None,
    }
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

#[async_trait]
impl StorageEngine for S3Engine {
    async fn store(
        &self,
        space: &str,
        key: &str,
        mut data: BoxReader,
        size: u64,
    ) -> Result<(), StorageError> {
        let bucket = self.bucket(space)?;

        if size < self.settings.multipart_threshold {
            let mut buf = Vec::with_capacity(size as usize);
            data.read_to_end(&mut buf)
                .await
                .map_err(|e| StorageError::io(space, key, "store", e))?;
            let response = bucket
                .put_object(key, &buf)
                .await
                .map_err(|e| StorageError::s3(space, key, "store", e))?;
            if !is_success(response.status_code()) {
                return Err(StorageError::S3Status {
                    space: space.to_string(),
                    key: key.to_string(),
                    operation: "store",
                    status: response.status_code(),
                });
            }
        } else {
            bucket
                .put_object_stream(&mut data, key)
                .await
                .map_err(|e| StorageError::s3(space, key, "store", e))?;
        }

        Ok(())
    }

    async fn delete(&self, space: &str, key: &str) -> Result<(), StorageError> {
        let bucket = self.bucket(space)?;
        match bucket.delete_object(key).await {
            Ok(_) => Ok(()),
            Err(e) if failure_status(&e) == Some(404) => Ok(()),
            Err(e) => Err(StorageError::s3(space, key, "delete", e)),
        }
    }

    async fn fetch(&self, space: &str, key: &str) -> Result<Option<FetchedObject>, StorageError> {
        let bucket = self.bucket(space)?;
        let response = match bucket.get_object(key).await {
            Ok(response) => response,
            Err(e) if failure_status(&e) == Some(404) => return Ok(None),
            Err(e) => return Err(StorageError::s3(space, key, "fetch", e)),
        };

        match response.status_code() {
            404 => Ok(None),
            status if is_success(status) => {
                let data = response.bytes().to_vec();
                let size = data.len() as u64;
                Ok(Some(FetchedObject {
                    reader: Box::new(Cursor::new(data)),
                    size,
                }))
            }
            status => Err(StorageError::S3Status {
                space: space.to_string(),
                key: key.to_string(),
                operation: "fetch",
                status,
            }),
        }
    }

    async fn exists(&self, space: &str, key: &str) -> Result<bool, StorageError> {
        let bucket = self.bucket(space)?;
        match bucket.head_object(key).await {
            Ok((_, status)) => Ok(is_success(status)),
            Err(e) if failure_status(&e) == Some(404) => Ok(false),
            Err(e) => Err(StorageError::s3(space, key, "exists", e)),
        }
    }

    async fn deliver(
        &self,
        space: &str,
        key: &str,
        sink: DeliverySink<'_>,
    ) -> Result<DeliveryStatus, StorageError> {
        let bucket = self.bucket(space)?;
        let response = match bucket.get_object(key).await {
            Ok(response) => response,
            Err(e) => match failure_status(&e) {
                Some(status) => return Ok(DeliveryStatus::Failed(status)),
                None => return Err(StorageError::s3(space, key, "deliver", e)),
            },
        };

        let status = response.status_code();
        if !is_success(status) {
            return Ok(DeliveryStatus::Failed(status));
        }

        let data = response.bytes();
        sink.write_all(data)
            .await
            .map_err(|e| StorageError::io(space, key, "deliver", e))?;
        Ok(DeliveryStatus::Delivered {
            bytes: data.len() as u64,
        })
    }
}
