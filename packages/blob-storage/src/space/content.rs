use chrono::Utc;
use object_storage::keys::new_physical_key;
use object_storage::{BoxReader, DeliverySink, DeliveryStatus};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, Condition, EntityTrait, QueryFilter};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::BlobStorageSpace;
use crate::entity::{blob, directory};
use crate::error::{BlobStorageError, is_unique_violation};
use crate::naming::{extension, normalize, sanitize_name};

/// Attempts to swap the content pointer before giving up.
const MAX_CONTENT_UPDATE_ATTEMPTS: u32 = 3;

/// Hex encoded SHA-256 of `data`.
pub fn compute_checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

impl BlobStorageSpace {
    /// Store `data` as the new content of `blob`, optionally renaming it.
    pub async fn update_content(
        &self,
        blob: &blob::Model,
        filename: Option<&str>,
        data: &[u8],
    ) -> Result<blob::Model, BlobStorageError> {
        let filename = filename.map(sanitize_name).transpose()?;
        let physical_key = new_physical_key();
        self.physical.upload_bytes(&physical_key, data).await?;

        let checksum = compute_checksum(data);
        self.swap_content(blob, filename, &physical_key, data.len() as i64, Some(checksum))
            .await
    }

    /// Like [`update_content`](Self::update_content) for streamed data. The
    /// checksum is left for the backfill job.
    pub async fn update_content_stream(
        &self,
        blob: &blob::Model,
        filename: Option<&str>,
        data: BoxReader,
        size: u64,
    ) -> Result<blob::Model, BlobStorageError> {
        let filename = filename.map(sanitize_name).transpose()?;
        let physical_key = new_physical_key();
        self.physical.upload(&physical_key, data, size).await?;

        self.swap_content(blob, filename, &physical_key, size as i64, None)
            .await
    }

    async fn swap_content(
        &self,
        blob: &blob::Model,
        filename: Option<&str>,
        physical_key: &str,
        size: i64,
        checksum: Option<String>,
    ) -> Result<blob::Model, BlobStorageError> {
        let mut current = blob.clone();

        for attempt in 1..=MAX_CONTENT_UPDATE_ATTEMPTS {
            let mut update = blob::Entity::update_many()
                .col_expr(
                    blob::Column::PhysicalObjectKey,
                    Expr::value(Some(physical_key.to_string())),
                )
                .col_expr(blob::Column::Size, Expr::value(size))
                .col_expr(blob::Column::Checksum, Expr::value(checksum.clone()))
                .col_expr(blob::Column::ContentUpdated, Expr::value(true))
                .col_expr(blob::Column::LastModified, Expr::value(Utc::now()))
                .filter(blob::Column::Id.eq(current.id))
                .filter(blob::Column::Deleted.eq(false));

            if let Some(name) = filename
                && current.filename.as_deref() != Some(name)
            {
                update = update
                    .col_expr(blob::Column::Filename, Expr::value(Some(name.to_string())))
                    .col_expr(blob::Column::NormalizedFilename, Expr::value(Some(normalize(name))))
                    .col_expr(blob::Column::FileExtension, Expr::value(extension(name)))
                    .col_expr(
                        blob::Column::NameSlot,
                        Expr::value(self.renamed_blob_slot(&current, name)),
                    )
                    .col_expr(blob::Column::Renamed, Expr::value(true));
            }

            update = match &current.physical_object_key {
                Some(previous) => update.filter(blob::Column::PhysicalObjectKey.eq(previous.clone())),
                None => update.filter(blob::Column::PhysicalObjectKey.is_null()),
            };

            let swapped = match update.exec(&self.db).await {
                Ok(result) => result.rows_affected == 1,
                Err(e) => {
                    self.discard_object(physical_key).await;
                    return Err(if is_unique_violation(&e) {
                        BlobStorageError::NameInUse(filename.unwrap_or_default().to_string())
                    } else {
                        e.into()
                    });
                }
            };

            if swapped {
                self.release_previous_content(&current).await;
                return self.reload_blob(&current).await;
            }

            debug!(space = %self.name, blob_key = %current.blob_key, attempt, "Content changed concurrently, retrying");
            match self.reload_blob(&current).await {
                Ok(reloaded) => current = reloaded,
                Err(e) => {
                    self.discard_object(physical_key).await;
                    return Err(e);
                }
            }
        }

        self.discard_object(physical_key).await;
        Err(BlobStorageError::OptimisticLockExhausted {
            operation: "content update",
            attempts: MAX_CONTENT_UPDATE_ATTEMPTS,
        })
    }

    async fn release_previous_content(&self, previous: &blob::Model) {
        if let Some(key) = &previous.physical_object_key {
            self.discard_object(key).await;
        }
        if let Err(e) = self.delete_variants(previous.id).await {
            warn!(blob_key = %previous.blob_key, error = %e, "Failed to release variants of replaced content");
        }
    }

    async fn discard_object(&self, physical_key: &str) {
        if let Err(e) = self.physical.delete(physical_key).await {
            warn!(space = %self.name, physical_key, error = %e, "Failed to delete physical object");
        }
    }

    /// Content of `blob`; `None` if it has none yet.
    pub async fn download(&self, blob: &blob::Model) -> Result<Option<Vec<u8>>, BlobStorageError> {
        let Some(key) = &blob.physical_object_key else {
            return Ok(None);
        };
        self.touch(&blob.blob_key).await?;
        Ok(self.physical.download(key).await?)
    }

    pub async fn stream(&self, blob: &blob::Model) -> Result<Option<BoxReader>, BlobStorageError> {
        let Some(key) = &blob.physical_object_key else {
            return Ok(None);
        };
        self.touch(&blob.blob_key).await?;
        Ok(self.physical.stream(key).await?)
    }

    /// Write the blob (or one of its variants) to `sink`. Unknown blobs
    /// yield 404, variants still being converted yield 503.
    pub async fn deliver(
        &self,
        blob_key: &str,
        variant_name: Option<&str>,
        sink: DeliverySink<'_>,
    ) -> Result<DeliveryStatus, BlobStorageError> {
        let Some(blob) = self.find_by_blob_key(blob_key).await? else {
            return Ok(DeliveryStatus::Failed(404));
        };

        let physical_key = match variant_name {
            None => blob.physical_object_key,
            Some(name) => match self.resolve_variant(blob_key, name).await? {
                Some(key) => Some(key),
                None => return Ok(DeliveryStatus::Failed(503)),
            },
        };
        let Some(physical_key) = physical_key else {
            return Ok(DeliveryStatus::Failed(404));
        };

        self.touch(blob_key).await?;
        Ok(self.physical.deliver(&physical_key, sink).await?)
    }

    pub async fn resolve_filename(&self, blob_key: &str) -> Result<Option<String>, BlobStorageError> {
        Ok(self
            .find_by_blob_key(blob_key)
            .await?
            .and_then(|blob| blob.filename))
    }

    /// Record a read access. No-op unless touch tracking is enabled.
    pub async fn touch(&self, blob_key: &str) -> Result<(), BlobStorageError> {
        if !self.settings.touch_tracking {
            return Ok(());
        }

        blob::Entity::update_many()
            .col_expr(blob::Column::LastTouched, Expr::value(Some(Utc::now())))
            .filter(blob::Column::SpaceName.eq(self.name.as_str()))
            .filter(blob::Column::BlobKey.eq(blob_key))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Attach a temporary blob to `reference`.
    pub async fn attach_temporary_blob(
        &self,
        blob_key: &str,
        reference: &str,
    ) -> Result<(), BlobStorageError> {
        let result = blob::Entity::update_many()
            .col_expr(blob::Column::Reference, Expr::value(Some(reference.to_string())))
            .col_expr(blob::Column::Temporary, Expr::value(false))
            .filter(blob::Column::SpaceName.eq(self.name.as_str()))
            .filter(blob::Column::BlobKey.eq(blob_key))
            .filter(blob::Column::Temporary.eq(true))
            .filter(blob::Column::Reference.is_null())
            .filter(blob::Column::Deleted.eq(false))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(BlobStorageError::NotAttachable(blob_key.to_string()));
        }
        Ok(())
    }

    /// Attach `blob_key` as the single blob of `(reference, designator)`,
    /// deleting whichever blob held that position before.
    pub async fn attach_blob_by_type(
        &self,
        blob_key: &str,
        reference: &str,
        designator: &str,
    ) -> Result<(), BlobStorageError> {
        let attachable = self.find_by_blob_key(blob_key).await?.is_some_and(|blob| {
            blob.temporary
                || (blob.reference.as_deref() == Some(reference)
                    && blob.reference_designator.as_deref() == Some(designator))
        });
        if !attachable {
            return Err(BlobStorageError::NotAttachable(blob_key.to_string()));
        }

        self.delete_referenced_blobs(reference, Some(designator), Some(blob_key))
            .await?;

        let result = blob::Entity::update_many()
            .col_expr(blob::Column::Reference, Expr::value(Some(reference.to_string())))
            .col_expr(
                blob::Column::ReferenceDesignator,
                Expr::value(Some(designator.to_string())),
            )
            .col_expr(blob::Column::Temporary, Expr::value(false))
            .filter(blob::Column::SpaceName.eq(self.name.as_str()))
            .filter(blob::Column::BlobKey.eq(blob_key))
            .filter(blob::Column::Deleted.eq(false))
            .filter(
                Condition::any().add(blob::Column::Temporary.eq(true)).add(
                    Condition::all()
                        .add(blob::Column::Reference.eq(reference))
                        .add(blob::Column::ReferenceDesignator.eq(designator)),
                ),
            )
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(BlobStorageError::NotAttachable(blob_key.to_string()));
        }
        Ok(())
    }

    /// Soft delete every blob attached to `reference`.
    pub async fn delete_attached_blobs(&self, reference: &str) -> Result<u64, BlobStorageError> {
        self.delete_referenced_blobs(reference, None, None).await
    }

    /// Soft delete blobs attached to `reference`, restricted to `designator`
    /// when given and sparing `excluded_blob_key`.
    pub async fn delete_referenced_blobs(
        &self,
        reference: &str,
        designator: Option<&str>,
        excluded_blob_key: Option<&str>,
    ) -> Result<u64, BlobStorageError> {
        let mut update = blob::Entity::update_many()
            .col_expr(blob::Column::Deleted, Expr::value(true))
            .col_expr(blob::Column::NameSlot, Expr::value(Option::<String>::None))
            .col_expr(blob::Column::LastModified, Expr::value(Utc::now()))
            .filter(blob::Column::SpaceName.eq(self.name.as_str()))
            .filter(blob::Column::Reference.eq(reference))
            .filter(blob::Column::Deleted.eq(false));
        if let Some(designator) = designator {
            update = update.filter(blob::Column::ReferenceDesignator.eq(designator));
        }
        if let Some(excluded) = excluded_blob_key {
            update = update.filter(blob::Column::BlobKey.ne(excluded));
        }

        Ok(update.exec(&self.db).await?.rows_affected)
    }

    /// Keep a temporary blob from being cleaned up.
    pub async fn mark_as_used(&self, blob_key: &str) -> Result<(), BlobStorageError> {
        blob::Entity::update_many()
            .col_expr(blob::Column::Temporary, Expr::value(false))
            .filter(blob::Column::SpaceName.eq(self.name.as_str()))
            .filter(blob::Column::BlobKey.eq(blob_key))
            .filter(blob::Column::Temporary.eq(true))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Remove a soft deleted blob for good: bytes, variants and row.
    pub(crate) async fn purge_blob(&self, blob: &blob::Model) -> Result<(), BlobStorageError> {
        if let Some(key) = &blob.physical_object_key {
            self.physical.delete(key).await?;
        }
        self.delete_variants(blob.id).await?;
        blob::Entity::delete_by_id(blob.id).exec(&self.db).await?;
        Ok(())
    }

    /// Remove a soft deleted directory, handing deletion down to its direct
    /// children. Returns the number of children marked.
    pub(crate) async fn purge_directory(
        &self,
        dir: &directory::Model,
    ) -> Result<u64, BlobStorageError> {
        let now = Utc::now();
        let directories = directory::Entity::update_many()
            .col_expr(directory::Column::Deleted, Expr::value(true))
            .col_expr(directory::Column::NameSlot, Expr::value(Option::<String>::None))
            .col_expr(directory::Column::LastModified, Expr::value(now))
            .filter(directory::Column::ParentId.eq(dir.id))
            .filter(directory::Column::Deleted.eq(false))
            .exec(&self.db)
            .await?;
        let blobs = blob::Entity::update_many()
            .col_expr(blob::Column::Deleted, Expr::value(true))
            .col_expr(blob::Column::NameSlot, Expr::value(Option::<String>::None))
            .col_expr(blob::Column::LastModified, Expr::value(now))
            .filter(blob::Column::ParentId.eq(dir.id))
            .filter(blob::Column::Deleted.eq(false))
            .exec(&self.db)
            .await?;

        directory::Entity::delete_by_id(dir.id).exec(&self.db).await?;
        Ok(directories.rows_affected + blobs.rows_affected)
    }
}
