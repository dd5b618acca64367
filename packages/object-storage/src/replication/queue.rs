use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{ReplicationTask, ReplicationTaskStorage};
use crate::config::ReplicationConfig;
use crate::error::StorageError;
use crate::retry::calculate_backoff;
use crate::storage::ObjectStorage;

/// Process-local replication queue.
///
/// Tasks are lost when the process exits; use a persistent [`ReplicationTaskStorage`]
/// where that matters.
#[derive(Clone)]
pub struct InMemoryReplicationQueue {
    sender: mpsc::UnboundedSender<ReplicationTask>,
}

/// Receiving half of an [`InMemoryReplicationQueue`].
pub struct ReplicationReceiver {
    receiver: mpsc::UnboundedReceiver<ReplicationTask>,
    requeue: mpsc::UnboundedSender<ReplicationTask>,
}

impl InMemoryReplicationQueue {
    pub fn new() -> (Self, ReplicationReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let receiver = ReplicationReceiver {
            receiver,
            requeue: sender.clone(),
        };
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl ReplicationTaskStorage for InMemoryReplicationQueue {
    async fn enqueue(&self, task: ReplicationTask) -> Result<(), StorageError> {
        self.sender
            .send(task)
            .map_err(|_| StorageError::Replication("replication queue is closed".into()))
    }
}

impl ReplicationReceiver {
    /// Take the next queued task without waiting.
    pub fn try_next(&mut self) -> Option<ReplicationTask> {
        self.receiver.try_recv().ok()
    }
}

/// Spawn a worker executing queued replication tasks against `storage`.
///
/// Failed tasks are re-queued with exponential backoff until
/// `config.max_attempts` executions have failed.
pub fn spawn_replication_worker(
    mut tasks: ReplicationReceiver,
    storage: Arc<ObjectStorage>,
    config: ReplicationConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            max_attempts = config.max_attempts,
            "Starting replication worker"
        );

        while let Some(task) = tasks.receiver.recv().await {
            match storage.execute_replication_task(&task).await {
                Ok(()) => {
                    debug!(
                        space = %task.primary_space,
                        key = %task.object_key,
                        delete = task.delete,
                        "Replicated object"
                    );
                }
                Err(e) => {
                    let attempt = task.attempt + 1;
                    if attempt >= config.max_attempts {
                        error!(
                            space = %task.primary_space,
                            key = %task.object_key,
                            attempts = attempt,
                            error = %e,
                            "Replication task ultimately failed"
                        );
                        continue;
                    }

                    let delay = calculate_backoff(
                        attempt,
                        config.retry_delay_ms,
                        config.max_retry_delay_ms,
                    );
                    warn!(
                        space = %task.primary_space,
                        key = %task.object_key,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Replication task failed, retrying"
                    );
                    requeue_later(
                        tasks.requeue.clone(),
                        ReplicationTask { attempt, ..task },
                        delay,
                    );
                }
            }
        }
    })
}

fn requeue_later(
    sender: mpsc::UnboundedSender<ReplicationTask>,
    task: ReplicationTask,
    delay: Duration,
) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if sender.send(task).is_err() {
            debug!("Replication queue closed before retry");
        }
    });
}
