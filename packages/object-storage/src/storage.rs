use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};

use crate::config::ObjectStorageConfig;
use crate::engine::{EngineRegistry, StorageEngine};
use crate::error::StorageError;
use crate::metrics::MetricsSnapshot;
use crate::replication::{ReplicationManager, ReplicationTask, ReplicationTaskStorage};
use crate::space::{ObjectStorageSpace, ReplicaTarget};
use crate::transform::ByteTransform;

/// Layer 1 entry point: resolves space names to [`ObjectStorageSpace`]s.
///
/// Spaces and engines are constructed from the configuration on first use.
pub struct ObjectStorage {
    config: ObjectStorageConfig,
    registry: EngineRegistry,
    engines: DashMap<String, Arc<dyn StorageEngine>>,
    spaces: DashMap<String, Arc<ObjectStorageSpace>>,
    transforms: HashMap<String, Arc<dyn ByteTransform>>,
    replication: Arc<ReplicationManager>,
}

impl ObjectStorage {
    pub fn new(
        config: ObjectStorageConfig,
        tasks: Arc<dyn ReplicationTaskStorage>,
    ) -> Result<Self, StorageError> {
        Self::with_registry(config, EngineRegistry::default(), tasks)
    }

    /// Create a storage resolving engines through a custom registry.
    pub fn with_registry(
        config: ObjectStorageConfig,
        registry: EngineRegistry,
        tasks: Arc<dyn ReplicationTaskStorage>,
    ) -> Result<Self, StorageError> {
        let replication = Arc::new(ReplicationManager::new(&config, tasks)?);
        Ok(Self {
            config,
            registry,
            engines: DashMap::new(),
            spaces: DashMap::new(),
            transforms: HashMap::new(),
            replication,
        })
    }

    /// Apply `transform` to all objects of `space`.
    ///
    /// Must be called before the space is first resolved.
    pub fn with_transform(mut self, space: impl Into<String>, transform: Arc<dyn ByteTransform>) -> Self {
        self.transforms.insert(space.into(), transform);
        self
    }

    pub fn config(&self) -> &ObjectStorageConfig {
        &self.config
    }

    pub fn replication(&self) -> &ReplicationManager {
        &self.replication
    }

    /// Names of all configured spaces, sorted.
    pub fn space_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.config.spaces.keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolve a space by name.
    pub fn space(&self, name: &str) -> Result<Arc<ObjectStorageSpace>, StorageError> {
        if let Some(space) = self.spaces.get(name) {
            return Ok(Arc::clone(space.value()));
        }

        let space = Arc::new(self.build_space(name)?);
        let entry = self.spaces.entry(name.to_string()).or_insert(space);
        Ok(Arc::clone(entry.value()))
    }

    fn build_space(&self, name: &str) -> Result<ObjectStorageSpace, StorageError> {
        let engine = self.engine_for(name)?;
        let replica = match self.replication.replica_of(name) {
            Some(replica) => Some(ReplicaTarget {
                name: replica.to_string(),
                engine: self.engine_for(replica)?,
            }),
            None => None,
        };

        info!(
            space = name,
            replica = replica.as_ref().map(|r| r.name.as_str()),
            "Initialized object storage space"
        );

        Ok(ObjectStorageSpace::new(
            name.to_string(),
            engine,
            replica,
            Arc::clone(&self.replication),
            self.transforms.get(name).cloned(),
        ))
    }

    fn engine_for(&self, space: &str) -> Result<Arc<dyn StorageEngine>, StorageError> {
        let settings = self
            .config
            .spaces
            .get(space)
            .ok_or_else(|| StorageError::UnknownSpace(space.to_string()))?;

        if let Some(engine) = self.engines.get(&settings.engine) {
            return Ok(Arc::clone(engine.value()));
        }

        let engine = self
            .registry
            .build(&settings.engine, &self.config)
            .ok_or_else(|| StorageError::UnknownEngine {
                space: space.to_string(),
                engine: settings.engine.clone(),
            })??;
        let entry = self.engines.entry(settings.engine.clone()).or_insert(engine);
        Ok(Arc::clone(entry.value()))
    }

    /// Bring the replica of `task.primary_space` in line with the primary.
    pub async fn execute_replication_task(&self, task: &ReplicationTask) -> Result<(), StorageError> {
        let primary = self.space(&task.primary_space)?;
        let replica_name = self
            .replication
            .replica_of(&task.primary_space)
            .ok_or_else(|| {
                StorageError::Replication(format!(
                    "space '{}' has no replica",
                    task.primary_space
                ))
            })?;
        let replica_engine = self.engine_for(replica_name)?;

        if task.delete {
            return replica_engine.delete(replica_name, &task.object_key).await;
        }

        let Some(object) = primary
            .engine()
            .fetch(&task.primary_space, &task.object_key)
            .await?
        else {
            warn!(
                space = %task.primary_space,
                key = %task.object_key,
                "Object vanished before it could be replicated"
            );
            return Ok(());
        };

        replica_engine
            .store(replica_name, &task.object_key, object.reader, object.size)
            .await
    }

    /// Schedule copying `keys` onto the replica of `space` again.
    ///
    /// Returns the number of scheduled tasks.
    pub async fn force_replication<I>(&self, space: &str, keys: I) -> Result<usize, StorageError>
    where
        I: IntoIterator<Item = String>,
    {
        if !self.config.spaces.contains_key(space) {
            return Err(StorageError::UnknownSpace(space.to_string()));
        }
        if !self.replication.is_replicated(space) {
            return Err(StorageError::Replication(format!(
                "space '{space}' has no replica"
            )));
        }

        let mut scheduled = 0;
        for key in keys {
            self.replication
                .schedule(ReplicationTask::update(space, key))
                .await;
            scheduled += 1;
        }
        Ok(scheduled)
    }

    /// Metrics of every space resolved so far.
    pub fn metrics(&self) -> Vec<(String, MetricsSnapshot)> {
        let mut metrics: Vec<(String, MetricsSnapshot)> = self
            .spaces
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().metrics()))
            .collect();
        metrics.sort_by(|a, b| a.0.cmp(&b.0));
        metrics
    }
}
