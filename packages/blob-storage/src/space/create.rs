use std::future::Future;

use chrono::Utc;
use object_storage::keys::new_blob_key;
use object_storage::retry::random_pause;
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use tracing::{debug, warn};
use uuid::Uuid;

use super::BlobStorageSpace;
use crate::entity::{blob, directory};
use crate::error::{BlobStorageError, is_unique_violation};
use crate::naming::{extension, normalize, sanitize_name, split_path};

/// Fields of a blob row about to be inserted.
struct NewBlob<'a> {
    tenant_id: Option<&'a str>,
    parent_id: Option<Uuid>,
    filename: Option<&'a str>,
    reference: Option<&'a str>,
    temporary: bool,
    committed: bool,
}

impl BlobStorageSpace {
    /// Lookup-or-create under the name slot protocol.
    ///
    /// `create` inserts an uncommitted row and tries to commit it by claiming
    /// its name slot. It yields `None` when another writer claimed the slot
    /// first, in which case the lookup is retried after a random pause.
    async fn find_or_create<T, L, LF, C, CF>(
        &self,
        operation: &'static str,
        lookup: L,
        create: C,
    ) -> Result<T, BlobStorageError>
    where
        L: Fn() -> LF,
        LF: Future<Output = Result<Option<T>, BlobStorageError>>,
        C: Fn() -> CF,
        CF: Future<Output = Result<Option<T>, BlobStorageError>>,
    {
        let attempts = self.limits.max_optimistic_lock_attempts.max(1);

        for attempt in 1..=attempts {
            if let Some(existing) = lookup().await? {
                return Ok(existing);
            }
            if let Some(created) = create().await? {
                return Ok(created);
            }

            debug!(space = %self.name, operation, attempt, "Lost a concurrent create, retrying");
            random_pause(self.limits.optimistic_lock_pause_ms).await;
        }

        warn!(space = %self.name, operation, attempts, "Giving up on optimistic create");
        Err(BlobStorageError::OptimisticLockExhausted {
            operation,
            attempts,
        })
    }

    /// The root directory of `tenant_id`, created on first use.
    pub async fn get_root(&self, tenant_id: &str) -> Result<directory::Model, BlobStorageError> {
        self.find_or_create(
            "root directory creation",
            move || self.find_root(tenant_id),
            move || self.create_directory(tenant_id, None, None, self.root_slot(tenant_id)),
        )
        .await
    }

    pub async fn find_or_create_child_directory(
        &self,
        parent: &directory::Model,
        name: &str,
    ) -> Result<directory::Model, BlobStorageError> {
        let name = sanitize_name(name)?;
        self.find_or_create(
            "directory creation",
            move || self.find_child_directory(parent, name),
            move || {
                self.create_directory(
                    &parent.tenant_id,
                    Some(parent.id),
                    Some(name),
                    self.directory_slot(parent.id, name),
                )
            },
        )
        .await
    }

    pub async fn find_or_create_child_blob(
        &self,
        parent: &directory::Model,
        name: &str,
    ) -> Result<blob::Model, BlobStorageError> {
        let name = sanitize_name(name)?;
        self.find_or_create(
            "blob creation",
            move || self.find_child_blob(parent, name),
            move || {
                let row = NewBlob {
                    tenant_id: Some(&parent.tenant_id),
                    parent_id: Some(parent.id),
                    filename: Some(name),
                    reference: None,
                    temporary: false,
                    committed: false,
                };
                self.create_blob(row, Some(self.blob_slot(parent.id, name)))
            },
        )
        .await
    }

    /// Resolve `path` below the root of `tenant_id`, creating missing
    /// directories and the blob itself.
    pub async fn find_or_create_by_path(
        &self,
        tenant_id: &str,
        path: &str,
    ) -> Result<blob::Model, BlobStorageError> {
        let segments = split_path(path);
        let Some((filename, directories)) = segments.split_last() else {
            return Err(BlobStorageError::InvalidName {
                name: path.to_string(),
                reason: "a path needs at least a file name",
            });
        };

        let mut current = self.get_root(tenant_id).await?;
        for segment in directories {
            current = self.find_or_create_child_directory(&current, segment).await?;
        }

        self.find_or_create_child_blob(&current, filename).await
    }

    /// The blob attached to `reference` under `filename`, created on first use.
    pub async fn find_or_create_attached_blob_by_name(
        &self,
        reference: &str,
        filename: &str,
    ) -> Result<blob::Model, BlobStorageError> {
        let filename = sanitize_name(filename)?;
        self.find_or_create(
            "attached blob creation",
            move || self.find_attached_blob_by_name(reference, filename),
            move || {
                let row = NewBlob {
                    tenant_id: None,
                    parent_id: None,
                    filename: Some(filename),
                    reference: Some(reference),
                    temporary: false,
                    committed: false,
                };
                self.create_blob(row, Some(self.reference_slot(reference, filename)))
            },
        )
        .await
    }

    pub async fn find_attached_blob_by_name(
        &self,
        reference: &str,
        filename: &str,
    ) -> Result<Option<blob::Model>, BlobStorageError> {
        let filename = sanitize_name(filename)?;
        Ok(blob::Entity::find()
            .filter(blob::Column::SpaceName.eq(self.name.as_str()))
            .filter(blob::Column::Reference.eq(reference))
            .filter(blob::Column::ReferenceDesignator.is_null())
            .filter(self.blob_name_condition(filename))
            .filter(blob::Column::Committed.eq(true))
            .filter(blob::Column::Deleted.eq(false))
            .one(&self.db)
            .await?)
    }

    /// A new, empty blob which is removed by the cleanup loop unless it gets
    /// attached or marked as used in time.
    pub async fn create_temporary_blob(
        &self,
        tenant_id: Option<&str>,
    ) -> Result<blob::Model, BlobStorageError> {
        let row = NewBlob {
            tenant_id,
            parent_id: None,
            filename: None,
            reference: None,
            temporary: true,
            committed: true,
        };
        Ok(self.insert_blob(row).await?)
    }

    async fn create_directory(
        &self,
        tenant_id: &str,
        parent_id: Option<Uuid>,
        name: Option<&str>,
        slot: String,
    ) -> Result<Option<directory::Model>, BlobStorageError> {
        let now = Utc::now();
        let row = directory::ActiveModel {
            id: Set(Uuid::now_v7()),
            space_name: Set(self.name.clone()),
            tenant_id: Set(tenant_id.to_string()),
            parent_id: Set(parent_id),
            directory_name: Set(name.map(str::to_string)),
            normalized_directory_name: Set(name.map(normalize)),
            name_slot: Set(None),
            committed: Set(false),
            deleted: Set(false),
            created_at: Set(now),
            last_modified: Set(now),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;

        let claimed = directory::Entity::update_many()
            .col_expr(directory::Column::Committed, Expr::value(true))
            .col_expr(directory::Column::NameSlot, Expr::value(Some(slot.clone())))
            .filter(directory::Column::Id.eq(row.id))
            .filter(directory::Column::Committed.eq(false))
            .exec(&self.db)
            .await;

        match claimed {
            Ok(result) if result.rows_affected == 1 => Ok(Some(directory::Model {
                committed: true,
                name_slot: Some(slot),
                ..row
            })),
            Ok(_) => {
                directory::Entity::delete_by_id(row.id).exec(&self.db).await?;
                Ok(None)
            }
            Err(e) => {
                directory::Entity::delete_by_id(row.id).exec(&self.db).await?;
                if is_unique_violation(&e) {
                    Ok(None)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    async fn create_blob(
        &self,
        new: NewBlob<'_>,
        slot: Option<String>,
    ) -> Result<Option<blob::Model>, BlobStorageError> {
        let row = self.insert_blob(new).await?;

        let claimed = blob::Entity::update_many()
            .col_expr(blob::Column::Committed, Expr::value(true))
            .col_expr(blob::Column::NameSlot, Expr::value(slot.clone()))
            .filter(blob::Column::Id.eq(row.id))
            .filter(blob::Column::Committed.eq(false))
            .exec(&self.db)
            .await;

        match claimed {
            Ok(result) if result.rows_affected == 1 => Ok(Some(blob::Model {
                committed: true,
                name_slot: slot,
                ..row
            })),
            Ok(_) => {
                blob::Entity::delete_by_id(row.id).exec(&self.db).await?;
                Ok(None)
            }
            Err(e) => {
                blob::Entity::delete_by_id(row.id).exec(&self.db).await?;
                if is_unique_violation(&e) {
                    Ok(None)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    async fn insert_blob(&self, new: NewBlob<'_>) -> Result<blob::Model, sea_orm::DbErr> {
        let now = Utc::now();
        blob::ActiveModel {
            id: Set(Uuid::now_v7()),
            space_name: Set(self.name.clone()),
            tenant_id: Set(new.tenant_id.map(str::to_string)),
            blob_key: Set(new_blob_key()),
            physical_object_key: Set(None),
            parent_id: Set(new.parent_id),
            filename: Set(new.filename.map(str::to_string)),
            normalized_filename: Set(new.filename.map(normalize)),
            file_extension: Set(new.filename.and_then(extension)),
            name_slot: Set(None),
            reference: Set(new.reference.map(str::to_string)),
            reference_designator: Set(None),
            size: Set(0),
            checksum: Set(None),
            temporary: Set(new.temporary),
            committed: Set(new.committed),
            deleted: Set(false),
            created: Set(true),
            renamed: Set(false),
            content_updated: Set(false),
            parent_changed: Set(false),
            created_at: Set(now),
            last_modified: Set(now),
            last_touched: Set(None),
            ..Default::default()
        }
        .insert(&self.db)
        .await
    }
}
