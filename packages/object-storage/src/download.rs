use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::error::StorageError;
use crate::space::ObjectStorageSpace;

/// Default number of downloads kept in flight.
pub const DEFAULT_MAX_QUEUED_DOWNLOADS: usize = 8;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

struct PendingDownload<P> {
    payload: P,
    key: String,
    handle: JoinHandle<Result<Option<Vec<u8>>, StorageError>>,
}

/// Pipelines downloads from one space for batch consumers.
///
/// At most `capacity` downloads run at a time. Completion callbacks are
/// invoked from within [`add_download`](Self::add_download) and
/// [`close`](Self::close), so they never run concurrently with each other.
pub struct DownloadManager<P, S, F>
where
    S: FnMut(P, Vec<u8>),
    F: FnMut(P, StorageError),
{
    space: Arc<ObjectStorageSpace>,
    capacity: usize,
    in_flight: Vec<PendingDownload<P>>,
    on_success: S,
    on_failure: F,
}

impl<P, S, F> DownloadManager<P, S, F>
where
    S: FnMut(P, Vec<u8>),
    F: FnMut(P, StorageError),
{
    pub fn new(space: Arc<ObjectStorageSpace>, on_success: S, on_failure: F) -> Self {
        Self::with_capacity(space, DEFAULT_MAX_QUEUED_DOWNLOADS, on_success, on_failure)
    }

    pub fn with_capacity(
        space: Arc<ObjectStorageSpace>,
        capacity: usize,
        on_success: S,
        on_failure: F,
    ) -> Self {
        Self {
            space,
            capacity: capacity.max(1),
            in_flight: Vec::new(),
            on_success,
            on_failure,
        }
    }

    /// Number of downloads currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Start downloading `key`; `payload` is handed to the completion callback.
    ///
    /// Waits for a free slot when `capacity` downloads are already running.
    pub async fn add_download(&mut self, payload: P, key: impl Into<String>) {
        self.reap_finished().await;
        while self.in_flight.len() >= self.capacity {
            tokio::time::sleep(POLL_INTERVAL).await;
            self.reap_finished().await;
        }

        let key = key.into();
        let space = Arc::clone(&self.space);
        let task_key = key.clone();
        let handle = tokio::spawn(async move { space.download(&task_key).await });
        self.in_flight.push(PendingDownload {
            payload,
            key,
            handle,
        });
    }

    /// Wait for every pending download and report its outcome.
    pub async fn close(mut self) {
        loop {
            self.reap_finished().await;
            if self.in_flight.is_empty() {
                break;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn reap_finished(&mut self) {
        let mut index = 0;
        while index < self.in_flight.len() {
            if self.in_flight[index].handle.is_finished() {
                let pending = self.in_flight.swap_remove(index);
                self.complete(pending).await;
            } else {
                index += 1;
            }
        }
    }

    async fn complete(&mut self, pending: PendingDownload<P>) {
        let PendingDownload {
            payload,
            key,
            handle,
        } = pending;

        match handle.await {
            Ok(Ok(Some(data))) => (self.on_success)(payload, data),
            Ok(Ok(None)) => (self.on_failure)(
                payload,
                StorageError::NotFound {
                    space: self.space.name().to_string(),
                    key,
                },
            ),
            Ok(Err(e)) => (self.on_failure)(payload, e),
            Err(e) => (self.on_failure)(payload, StorageError::Task(e.to_string())),
        }
    }
}
