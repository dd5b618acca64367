//! Replication of layer 1 spaces onto secondary spaces.

mod queue;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;

use crate::config::ObjectStorageConfig;
use crate::error::StorageError;

pub use queue::{InMemoryReplicationQueue, ReplicationReceiver, spawn_replication_worker};

/// A pending copy or delete of one object onto the replica of its space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationTask {
    pub primary_space: String,
    pub object_key: String,
    /// Delete the object on the replica instead of copying it.
    pub delete: bool,
    /// Failed executions so far.
    pub attempt: u32,
}

impl ReplicationTask {
    pub fn update(primary_space: impl Into<String>, object_key: impl Into<String>) -> Self {
        Self {
            primary_space: primary_space.into(),
            object_key: object_key.into(),
            delete: false,
            attempt: 0,
        }
    }

    pub fn delete(primary_space: impl Into<String>, object_key: impl Into<String>) -> Self {
        Self {
            delete: true,
            ..Self::update(primary_space, object_key)
        }
    }
}

/// Durable or in-memory sink for replication tasks.
#[async_trait]
pub trait ReplicationTaskStorage: Send + Sync {
    async fn enqueue(&self, task: ReplicationTask) -> Result<(), StorageError>;
}

/// Knows which space replicates onto which and schedules replication tasks.
pub struct ReplicationManager {
    replicas: HashMap<String, String>,
    tasks: Arc<dyn ReplicationTaskStorage>,
}

impl ReplicationManager {
    /// Validate the replication setup of `config`.
    ///
    /// A space cannot replicate onto itself or onto an unknown space, and a
    /// replica cannot serve more than one primary.
    pub fn new(
        config: &ObjectStorageConfig,
        tasks: Arc<dyn ReplicationTaskStorage>,
    ) -> Result<Self, StorageError> {
        let mut replicas = HashMap::new();
        let mut primaries: HashMap<&str, &str> = HashMap::new();

        for (space, settings) in &config.spaces {
            let Some(replica) = settings.replication_space.as_deref() else {
                continue;
            };
            if replica.is_empty() {
                continue;
            }
            if replica == space {
                return Err(StorageError::Replication(format!(
                    "space '{space}' cannot replicate onto itself"
                )));
            }
            if !config.spaces.contains_key(replica) {
                return Err(StorageError::Replication(format!(
                    "space '{space}' replicates onto unknown space '{replica}'"
                )));
            }
            if let Some(other) = primaries.insert(replica, space.as_str()) {
                return Err(StorageError::Replication(format!(
                    "space '{replica}' is already the replica of '{other}' and cannot also replicate '{space}'"
                )));
            }
            replicas.insert(space.clone(), replica.to_string());
        }

        Ok(Self { replicas, tasks })
    }

    /// The replica configured for `space`, if any.
    pub fn replica_of(&self, space: &str) -> Option<&str> {
        self.replicas.get(space).map(String::as_str)
    }

    pub fn is_replicated(&self, space: &str) -> bool {
        self.replicas.contains_key(space)
    }

    /// Schedule copying `key` onto the replica of `space`.
    ///
    /// Scheduling failures are logged; the caller's write has already succeeded.
    pub async fn notify_about_update(&self, space: &str, key: &str) {
        if self.is_replicated(space) {
            self.schedule(ReplicationTask::update(space, key)).await;
        }
    }

    /// Schedule deleting `key` from the replica of `space`.
    pub async fn notify_about_delete(&self, space: &str, key: &str) {
        if self.is_replicated(space) {
            self.schedule(ReplicationTask::delete(space, key)).await;
        }
    }

    pub(crate) async fn schedule(&self, task: ReplicationTask) {
        if let Err(e) = self.tasks.enqueue(task.clone()).await {
            error!(
                space = %task.primary_space,
                key = %task.object_key,
                delete = task.delete,
                error = %e,
                "Failed to schedule replication task"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpaceConfig;

    fn config(spaces: &[(&str, Option<&str>)]) -> ObjectStorageConfig {
        let mut config = ObjectStorageConfig::default();
        for (name, replica) in spaces {
            config.spaces.insert(
                name.to_string(),
                SpaceConfig {
                    engine: "fs".into(),
                    path: None,
                    bucket: None,
                    replication_space: replica.map(str::to_string),
                },
            );
        }
        config
    }

    fn manager(spaces: &[(&str, Option<&str>)]) -> Result<ReplicationManager, StorageError> {
        let (queue, _receiver) = InMemoryReplicationQueue::new();
        ReplicationManager::new(&config(spaces), Arc::new(queue))
    }

    #[test]
    fn resolves_configured_replica() {
        let manager = manager(&[("files", Some("files-backup")), ("files-backup", None)]).unwrap();
        assert_eq!(manager.replica_of("files"), Some("files-backup"));
        assert_eq!(manager.replica_of("files-backup"), None);
    }

    #[test]
    fn rejects_self_replication() {
        let err = manager(&[("files", Some("files"))]).err().unwrap();
        assert!(matches!(err, StorageError::Replication(_)));
    }

    #[test]
    fn rejects_unknown_replica() {
        let err = manager(&[("files", Some("nowhere"))]).err().unwrap();
        assert!(matches!(err, StorageError::Replication(_)));
    }

    #[test]
    fn rejects_shared_replica() {
        let err = manager(&[
            ("a", Some("backup")),
            ("b", Some("backup")),
            ("backup", None),
        ])
        .err()
        .unwrap();
        assert!(matches!(err, StorageError::Replication(_)));
    }

    #[tokio::test]
    async fn only_replicated_spaces_schedule_tasks() {
        let (queue, mut receiver) = InMemoryReplicationQueue::new();
        let manager = ReplicationManager::new(
            &config(&[("files", Some("backup")), ("backup", None), ("plain", None)]),
            Arc::new(queue),
        )
        .unwrap();

        manager.notify_about_update("plain", "k0").await;
        manager.notify_about_update("files", "k1").await;
        manager.notify_about_delete("files", "k2").await;

        assert_eq!(
            receiver.try_next(),
            Some(ReplicationTask::update("files", "k1"))
        );
        assert_eq!(
            receiver.try_next(),
            Some(ReplicationTask::delete("files", "k2"))
        );
        assert_eq!(receiver.try_next(), None);
    }
}
