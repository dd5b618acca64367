use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

use super::BlobStorageSpace;
use crate::entity::{blob, directory};
use crate::error::{BlobStorageError, is_unique_violation};
use crate::naming::{extension, normalize, sanitize_name};

impl BlobStorageSpace {
    /// Name slot of a blob after a rename. Unplaced blobs which never held a
    /// slot keep none.
    pub(super) fn renamed_blob_slot(&self, blob: &blob::Model, name: &str) -> Option<String> {
        blob.name_slot.as_ref()?;
        match (blob.parent_id, blob.reference.as_deref()) {
            (Some(parent_id), _) => Some(self.blob_slot(parent_id, name)),
            (None, Some(reference)) if blob.reference_designator.is_none() => {
                Some(self.reference_slot(reference, name))
            }
            _ => None,
        }
    }

    pub async fn rename_blob(
        &self,
        blob: &blob::Model,
        new_name: &str,
    ) -> Result<blob::Model, BlobStorageError> {
        let new_name = sanitize_name(new_name)?;
        if let Some(parent_id) = blob.parent_id
            && self.has_child_named(parent_id, new_name, Some(blob.id)).await?
        {
            return Err(BlobStorageError::NameInUse(new_name.to_string()));
        }

        let result = blob::Entity::update_many()
            .col_expr(blob::Column::Filename, Expr::value(Some(new_name.to_string())))
            .col_expr(blob::Column::NormalizedFilename, Expr::value(Some(normalize(new_name))))
            .col_expr(blob::Column::FileExtension, Expr::value(extension(new_name)))
            .col_expr(blob::Column::NameSlot, Expr::value(self.renamed_blob_slot(blob, new_name)))
            .col_expr(blob::Column::Renamed, Expr::value(true))
            .col_expr(blob::Column::LastModified, Expr::value(Utc::now()))
            .filter(blob::Column::Id.eq(blob.id))
            .filter(blob::Column::Deleted.eq(false))
            .exec(&self.db)
            .await
            .map_err(|e| name_conflict(e, new_name))?;

        if result.rows_affected == 0 {
            return Err(BlobStorageError::UnknownBlob(blob.blob_key.clone()));
        }
        self.reload_blob(blob).await
    }

    /// Move `blob` into `new_parent`, or out of any directory for `None`.
    pub async fn move_blob(
        &self,
        blob: &blob::Model,
        new_parent: Option<&directory::Model>,
    ) -> Result<blob::Model, BlobStorageError> {
        let name = blob.filename.as_deref().unwrap_or_default();

        let slot = match new_parent {
            Some(parent) => {
                if parent.space_name != blob.space_name
                    || blob.tenant_id.as_deref().is_some_and(|t| t != parent.tenant_id)
                {
                    return Err(BlobStorageError::CrossTenantMove);
                }
                if blob.filename.is_none() {
                    return Err(BlobStorageError::InvalidName {
                        name: String::new(),
                        reason: "a blob needs a file name to be placed in a directory",
                    });
                }
                if self.has_child_named(parent.id, name, Some(blob.id)).await? {
                    return Err(BlobStorageError::NameInUse(name.to_string()));
                }
                Some(self.blob_slot(parent.id, name))
            }
            None => None,
        };

        let result = blob::Entity::update_many()
            .col_expr(blob::Column::ParentId, Expr::value(new_parent.map(|p| p.id)))
            .col_expr(blob::Column::NameSlot, Expr::value(slot))
            .col_expr(blob::Column::ParentChanged, Expr::value(true))
            .col_expr(blob::Column::LastModified, Expr::value(Utc::now()))
            .filter(blob::Column::Id.eq(blob.id))
            .filter(blob::Column::Deleted.eq(false))
            .exec(&self.db)
            .await
            .map_err(|e| name_conflict(e, name))?;

        if result.rows_affected == 0 {
            return Err(BlobStorageError::UnknownBlob(blob.blob_key.clone()));
        }
        self.reload_blob(blob).await
    }

    /// Soft delete; the row and its bytes are removed by the change loop.
    pub async fn delete_blob(&self, blob: &blob::Model) -> Result<(), BlobStorageError> {
        blob::Entity::update_many()
            .col_expr(blob::Column::Deleted, Expr::value(true))
            .col_expr(blob::Column::NameSlot, Expr::value(Option::<String>::None))
            .col_expr(blob::Column::LastModified, Expr::value(Utc::now()))
            .filter(blob::Column::Id.eq(blob.id))
            .filter(blob::Column::Deleted.eq(false))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn rename_directory(
        &self,
        directory: &directory::Model,
        new_name: &str,
    ) -> Result<directory::Model, BlobStorageError> {
        let Some(parent_id) = directory.parent_id else {
            return Err(BlobStorageError::RootDirectory);
        };
        let new_name = sanitize_name(new_name)?;
        if self.has_child_named(parent_id, new_name, Some(directory.id)).await? {
            return Err(BlobStorageError::NameInUse(new_name.to_string()));
        }

        let result = directory::Entity::update_many()
            .col_expr(directory::Column::DirectoryName, Expr::value(Some(new_name.to_string())))
            .col_expr(
                directory::Column::NormalizedDirectoryName,
                Expr::value(Some(normalize(new_name))),
            )
            .col_expr(
                directory::Column::NameSlot,
                Expr::value(Some(self.directory_slot(parent_id, new_name))),
            )
            .col_expr(directory::Column::LastModified, Expr::value(Utc::now()))
            .filter(directory::Column::Id.eq(directory.id))
            .filter(directory::Column::Deleted.eq(false))
            .exec(&self.db)
            .await
            .map_err(|e| name_conflict(e, new_name))?;

        if result.rows_affected == 0 {
            return Err(BlobStorageError::UnknownDirectory(directory.id));
        }
        self.reload_directory(directory.id).await
    }

    pub async fn move_directory(
        &self,
        directory: &directory::Model,
        new_parent: &directory::Model,
    ) -> Result<directory::Model, BlobStorageError> {
        if directory.is_root() {
            return Err(BlobStorageError::RootDirectory);
        }
        if new_parent.space_name != directory.space_name
            || new_parent.tenant_id != directory.tenant_id
        {
            return Err(BlobStorageError::CrossTenantMove);
        }
        if self.is_same_or_ancestor(directory.id, new_parent).await? {
            return Err(BlobStorageError::CircularMove);
        }

        let name = directory.directory_name.as_deref().unwrap_or_default();
        if self.has_child_named(new_parent.id, name, Some(directory.id)).await? {
            return Err(BlobStorageError::NameInUse(name.to_string()));
        }

        let result = directory::Entity::update_many()
            .col_expr(directory::Column::ParentId, Expr::value(Some(new_parent.id)))
            .col_expr(
                directory::Column::NameSlot,
                Expr::value(Some(self.directory_slot(new_parent.id, name))),
            )
            .col_expr(directory::Column::LastModified, Expr::value(Utc::now()))
            .filter(directory::Column::Id.eq(directory.id))
            .filter(directory::Column::Deleted.eq(false))
            .exec(&self.db)
            .await
            .map_err(|e| name_conflict(e, name))?;

        if result.rows_affected == 0 {
            return Err(BlobStorageError::UnknownDirectory(directory.id));
        }
        self.reload_directory(directory.id).await
    }

    /// Soft delete; children are removed one level per pass of the change loop.
    pub async fn delete_directory(
        &self,
        directory: &directory::Model,
    ) -> Result<(), BlobStorageError> {
        if directory.is_root() {
            return Err(BlobStorageError::RootDirectory);
        }

        directory::Entity::update_many()
            .col_expr(directory::Column::Deleted, Expr::value(true))
            .col_expr(directory::Column::NameSlot, Expr::value(Option::<String>::None))
            .col_expr(directory::Column::LastModified, Expr::value(Utc::now()))
            .filter(directory::Column::Id.eq(directory.id))
            .filter(directory::Column::Deleted.eq(false))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub(super) async fn reload_blob(
        &self,
        blob: &blob::Model,
    ) -> Result<blob::Model, BlobStorageError> {
        blob::Entity::find_by_id(blob.id)
            .filter(blob::Column::Deleted.eq(false))
            .one(&self.db)
            .await?
            .ok_or_else(|| BlobStorageError::UnknownBlob(blob.blob_key.clone()))
    }

    async fn reload_directory(&self, id: Uuid) -> Result<directory::Model, BlobStorageError> {
        directory::Entity::find_by_id(id)
            .filter(directory::Column::Deleted.eq(false))
            .one(&self.db)
            .await?
            .ok_or(BlobStorageError::UnknownDirectory(id))
    }
}

fn name_conflict(err: sea_orm::DbErr, name: &str) -> BlobStorageError {
    if is_unique_violation(&err) {
        BlobStorageError::NameInUse(name.to_string())
    } else {
        err.into()
    }
}
