mod content;
mod create;
mod tree;
mod variants;

use std::collections::HashMap;
use std::sync::Arc;

use object_storage::ObjectStorageSpace;
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
};
use uuid::Uuid;

use crate::config::{BlobSpaceConfig, LimitsConfig};
use crate::entity::{blob, directory};
use crate::error::BlobStorageError;
use crate::naming::{normalize, sanitize_name, split_path};

pub use content::compute_checksum;
pub use variants::Converter;

/// Maximum depth walked when resolving a directory's ancestors.
const MAX_DIRECTORY_DEPTH: usize = 256;

/// A layer 2 space: a virtual filesystem of directories and blobs whose
/// metadata lives in the database and whose bytes live in a layer 1 space.
pub struct BlobStorageSpace {
    name: String,
    db: DatabaseConnection,
    physical: Arc<ObjectStorageSpace>,
    settings: BlobSpaceConfig,
    limits: LimitsConfig,
    node: String,
    converters: Arc<HashMap<String, Arc<dyn Converter>>>,
}

impl BlobStorageSpace {
    pub(crate) fn new(
        name: String,
        db: DatabaseConnection,
        physical: Arc<ObjectStorageSpace>,
        settings: BlobSpaceConfig,
        limits: LimitsConfig,
        node: String,
        converters: Arc<HashMap<String, Arc<dyn Converter>>>,
    ) -> Self {
        Self {
            name,
            db,
            physical,
            settings,
            limits,
            node,
            converters,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &BlobSpaceConfig {
        &self.settings
    }

    /// The layer 1 space holding this space's bytes.
    pub fn physical_space(&self) -> &Arc<ObjectStorageSpace> {
        &self.physical
    }

    pub(crate) fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    /// The form of `name` used for uniqueness and lookups.
    fn name_key(&self, name: &str) -> String {
        if self.settings.use_normalized_names {
            normalize(name)
        } else {
            name.to_string()
        }
    }

    fn root_slot(&self, tenant_id: &str) -> String {
        format!("{}|root|{}", self.name, tenant_id)
    }

    fn directory_slot(&self, parent_id: Uuid, name: &str) -> String {
        format!("{}|dir|{}|{}", self.name, parent_id, self.name_key(name))
    }

    fn blob_slot(&self, parent_id: Uuid, name: &str) -> String {
        format!("{}|blob|{}|{}", self.name, parent_id, self.name_key(name))
    }

    fn reference_slot(&self, reference: &str, name: &str) -> String {
        format!("{}|ref|{}|{}", self.name, reference, self.name_key(name))
    }

    fn directory_name_condition(&self, name: &str) -> Condition {
        if self.settings.use_normalized_names {
            Condition::all().add(directory::Column::NormalizedDirectoryName.eq(normalize(name)))
        } else {
            Condition::all().add(directory::Column::DirectoryName.eq(name))
        }
    }

    fn blob_name_condition(&self, name: &str) -> Condition {
        if self.settings.use_normalized_names {
            Condition::all().add(blob::Column::NormalizedFilename.eq(normalize(name)))
        } else {
            Condition::all().add(blob::Column::Filename.eq(name))
        }
    }

    /// Find a visible blob by its blob key.
    pub async fn find_by_blob_key(
        &self,
        blob_key: &str,
    ) -> Result<Option<blob::Model>, BlobStorageError> {
        Ok(blob::Entity::find()
            .filter(blob::Column::SpaceName.eq(self.name.as_str()))
            .filter(blob::Column::BlobKey.eq(blob_key))
            .filter(blob::Column::Committed.eq(true))
            .filter(blob::Column::Deleted.eq(false))
            .one(&self.db)
            .await?)
    }

    /// Find a visible directory by id.
    pub async fn find_directory_by_id(
        &self,
        id: Uuid,
    ) -> Result<Option<directory::Model>, BlobStorageError> {
        Ok(directory::Entity::find_by_id(id)
            .filter(directory::Column::SpaceName.eq(self.name.as_str()))
            .filter(directory::Column::Committed.eq(true))
            .filter(directory::Column::Deleted.eq(false))
            .one(&self.db)
            .await?)
    }

    /// Find the root directory of `tenant_id` without creating it.
    pub async fn find_root(
        &self,
        tenant_id: &str,
    ) -> Result<Option<directory::Model>, BlobStorageError> {
        Ok(directory::Entity::find()
            .filter(directory::Column::SpaceName.eq(self.name.as_str()))
            .filter(directory::Column::TenantId.eq(tenant_id))
            .filter(directory::Column::ParentId.is_null())
            .filter(directory::Column::Committed.eq(true))
            .filter(directory::Column::Deleted.eq(false))
            .one(&self.db)
            .await?)
    }

    pub async fn find_child_directory(
        &self,
        parent: &directory::Model,
        name: &str,
    ) -> Result<Option<directory::Model>, BlobStorageError> {
        let name = sanitize_name(name)?;
        Ok(directory::Entity::find()
            .filter(directory::Column::SpaceName.eq(self.name.as_str()))
            .filter(directory::Column::ParentId.eq(parent.id))
            .filter(self.directory_name_condition(name))
            .filter(directory::Column::Committed.eq(true))
            .filter(directory::Column::Deleted.eq(false))
            .one(&self.db)
            .await?)
    }

    pub async fn find_child_blob(
        &self,
        parent: &directory::Model,
        name: &str,
    ) -> Result<Option<blob::Model>, BlobStorageError> {
        let name = sanitize_name(name)?;
        Ok(blob::Entity::find()
            .filter(blob::Column::SpaceName.eq(self.name.as_str()))
            .filter(blob::Column::ParentId.eq(parent.id))
            .filter(self.blob_name_condition(name))
            .filter(blob::Column::Committed.eq(true))
            .filter(blob::Column::Deleted.eq(false))
            .one(&self.db)
            .await?)
    }

    pub async fn list_child_directories(
        &self,
        parent: &directory::Model,
    ) -> Result<Vec<directory::Model>, BlobStorageError> {
        Ok(directory::Entity::find()
            .filter(directory::Column::SpaceName.eq(self.name.as_str()))
            .filter(directory::Column::ParentId.eq(parent.id))
            .filter(directory::Column::Committed.eq(true))
            .filter(directory::Column::Deleted.eq(false))
            .order_by_asc(directory::Column::NormalizedDirectoryName)
            .all(&self.db)
            .await?)
    }

    pub async fn list_child_blobs(
        &self,
        parent: &directory::Model,
    ) -> Result<Vec<blob::Model>, BlobStorageError> {
        Ok(blob::Entity::find()
            .filter(blob::Column::SpaceName.eq(self.name.as_str()))
            .filter(blob::Column::ParentId.eq(parent.id))
            .filter(blob::Column::Committed.eq(true))
            .filter(blob::Column::Deleted.eq(false))
            .order_by_asc(blob::Column::NormalizedFilename)
            .all(&self.db)
            .await?)
    }

    /// Whether `parent` holds a visible directory or blob named `name`,
    /// ignoring the entries given in `except`.
    async fn has_child_named(
        &self,
        parent_id: Uuid,
        name: &str,
        except: Option<Uuid>,
    ) -> Result<bool, BlobStorageError> {
        let mut directories = directory::Entity::find()
            .filter(directory::Column::SpaceName.eq(self.name.as_str()))
            .filter(directory::Column::ParentId.eq(parent_id))
            .filter(self.directory_name_condition(name))
            .filter(directory::Column::Committed.eq(true))
            .filter(directory::Column::Deleted.eq(false));
        let mut blobs = blob::Entity::find()
            .filter(blob::Column::SpaceName.eq(self.name.as_str()))
            .filter(blob::Column::ParentId.eq(parent_id))
            .filter(self.blob_name_condition(name))
            .filter(blob::Column::Committed.eq(true))
            .filter(blob::Column::Deleted.eq(false));
        if let Some(id) = except {
            directories = directories.filter(directory::Column::Id.ne(id));
            blobs = blobs.filter(blob::Column::Id.ne(id));
        }

        Ok(directories.one(&self.db).await?.is_some() || blobs.one(&self.db).await?.is_some())
    }

    /// Blobs attached to `reference`.
    pub async fn find_attached_blobs(
        &self,
        reference: &str,
    ) -> Result<Vec<blob::Model>, BlobStorageError> {
        Ok(blob::Entity::find()
            .filter(blob::Column::SpaceName.eq(self.name.as_str()))
            .filter(blob::Column::Reference.eq(reference))
            .filter(blob::Column::Committed.eq(true))
            .filter(blob::Column::Deleted.eq(false))
            .order_by_asc(blob::Column::Id)
            .all(&self.db)
            .await?)
    }

    /// The blob attached to `reference` under `designator`.
    pub async fn find_attached_blob_by_designator(
        &self,
        reference: &str,
        designator: &str,
    ) -> Result<Option<blob::Model>, BlobStorageError> {
        Ok(blob::Entity::find()
            .filter(blob::Column::SpaceName.eq(self.name.as_str()))
            .filter(blob::Column::Reference.eq(reference))
            .filter(blob::Column::ReferenceDesignator.eq(designator))
            .filter(blob::Column::Committed.eq(true))
            .filter(blob::Column::Deleted.eq(false))
            .one(&self.db)
            .await?)
    }

    /// Resolve `path` below the root of `tenant_id` to a blob.
    pub async fn find_by_path(
        &self,
        tenant_id: &str,
        path: &str,
    ) -> Result<Option<blob::Model>, BlobStorageError> {
        let segments = split_path(path);
        let Some((filename, directories)) = segments.split_last() else {
            return Ok(None);
        };
        let Some(mut current) = self.find_root(tenant_id).await? else {
            return Ok(None);
        };

        for segment in directories {
            match self.find_child_directory(&current, segment).await? {
                Some(child) => current = child,
                None => return Ok(None),
            }
        }

        self.find_child_blob(&current, filename).await
    }

    /// Absolute path of `directory`, `/` for a root.
    pub async fn determine_directory_path(
        &self,
        directory: &directory::Model,
    ) -> Result<String, BlobStorageError> {
        let mut names = Vec::new();
        let mut current = directory.clone();

        while let Some(parent_id) = current.parent_id {
            if names.len() >= MAX_DIRECTORY_DEPTH {
                break;
            }
            names.push(current.directory_name.clone().unwrap_or_default());
            current = directory::Entity::find_by_id(parent_id)
                .one(&self.db)
                .await?
                .ok_or(BlobStorageError::UnknownDirectory(parent_id))?;
        }

        names.reverse();
        Ok(format!("/{}", names.join("/")))
    }

    /// Absolute path of `blob`, `None` if it is not placed in a directory.
    pub async fn determine_blob_path(
        &self,
        blob: &blob::Model,
    ) -> Result<Option<String>, BlobStorageError> {
        let Some(parent_id) = blob.parent_id else {
            return Ok(None);
        };
        let parent = directory::Entity::find_by_id(parent_id)
            .one(&self.db)
            .await?
            .ok_or(BlobStorageError::UnknownDirectory(parent_id))?;

        let directory_path = self.determine_directory_path(&parent).await?;
        let filename = blob.filename.as_deref().unwrap_or_default();
        if directory_path == "/" {
            Ok(Some(format!("/{filename}")))
        } else {
            Ok(Some(format!("{directory_path}/{filename}")))
        }
    }

    /// Whether `ancestor` is `directory` itself or one of its parents.
    async fn is_same_or_ancestor(
        &self,
        ancestor: Uuid,
        directory: &directory::Model,
    ) -> Result<bool, BlobStorageError> {
        let mut current = Some(directory.id);
        let mut parent = directory.parent_id;
        let mut depth = 0;

        while let Some(id) = current {
            if id == ancestor {
                return Ok(true);
            }
            if depth >= MAX_DIRECTORY_DEPTH {
                break;
            }
            depth += 1;
            current = parent;
            if let Some(parent_id) = parent {
                parent = directory::Entity::find_by_id(parent_id)
                    .one(&self.db)
                    .await?
                    .and_then(|dir| dir.parent_id);
            }
        }

        Ok(false)
    }
}
