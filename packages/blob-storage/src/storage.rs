use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use object_storage::ObjectStorage;
use sea_orm::DatabaseConnection;
use tracing::debug;

use crate::changes::{BlobChange, BlobChangeHandler};
use crate::config::BlobStorageConfig;
use crate::error::BlobStorageError;
use crate::space::{BlobStorageSpace, Converter};

/// Entry point to layer 2: resolves configured spaces and carries the
/// converters and change handlers shared by all of them.
pub struct BlobStorage {
    db: DatabaseConnection,
    objects: Arc<ObjectStorage>,
    config: BlobStorageConfig,
    node: String,
    converters: Arc<HashMap<String, Arc<dyn Converter>>>,
    handlers: HashMap<BlobChange, Vec<Arc<dyn BlobChangeHandler>>>,
    spaces: DashMap<String, Arc<BlobStorageSpace>>,
}

impl BlobStorage {
    pub fn new(
        db: DatabaseConnection,
        objects: Arc<ObjectStorage>,
        config: BlobStorageConfig,
        node: impl Into<String>,
    ) -> Self {
        Self {
            db,
            objects,
            config,
            node: node.into(),
            converters: Arc::new(HashMap::new()),
            handlers: HashMap::new(),
            spaces: DashMap::new(),
        }
    }

    /// Register the converter producing `variant_name`.
    pub fn with_converter(
        mut self,
        variant_name: impl Into<String>,
        converter: Arc<dyn Converter>,
    ) -> Self {
        Arc::make_mut(&mut self.converters).insert(variant_name.into(), converter);
        self.spaces.clear();
        self
    }

    pub fn with_change_handler(
        mut self,
        change: BlobChange,
        handler: Arc<dyn BlobChangeHandler>,
    ) -> Self {
        self.handlers.entry(change).or_default().push(handler);
        self
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn objects(&self) -> &Arc<ObjectStorage> {
        &self.objects
    }

    pub fn config(&self) -> &BlobStorageConfig {
        &self.config
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn space_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.config.spaces.keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn handlers(&self, change: BlobChange) -> &[Arc<dyn BlobChangeHandler>] {
        self.handlers.get(&change).map(Vec::as_slice).unwrap_or_default()
    }

    /// Resolve a configured space. Spaces are built on first use.
    pub fn space(&self, name: &str) -> Result<Arc<BlobStorageSpace>, BlobStorageError> {
        if let Some(space) = self.spaces.get(name) {
            return Ok(space.clone());
        }

        let settings = self
            .config
            .spaces
            .get(name)
            .ok_or_else(|| BlobStorageError::UnknownSpace(name.to_string()))?;
        let object_space = settings.object_space.as_deref().unwrap_or(name);
        let physical = self.objects.space(object_space)?;

        debug!(space = name, object_space, "Initializing blob storage space");
        let space = Arc::new(BlobStorageSpace::new(
            name.to_string(),
            self.db.clone(),
            physical,
            settings.clone(),
            self.config.limits.clone(),
            self.node.clone(),
            self.converters.clone(),
        ));

        Ok(self
            .spaces
            .entry(name.to_string())
            .or_insert(space)
            .clone())
    }
}
