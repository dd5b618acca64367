use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entity::blob;
use crate::space::compute_checksum;
use crate::storage::BlobStorage;

/// Compute the checksum of every blob which has content but none recorded.
///
/// Returns the number of blobs updated.
pub async fn fill_blob_checksums(
    storage: &BlobStorage,
    cancel: &CancellationToken,
) -> anyhow::Result<u64> {
    let batch_size = storage.config().loops.batch_size;
    let mut cursor: Option<Uuid> = None;
    let mut updated = 0;

    loop {
        if cancel.is_cancelled() {
            info!(updated, "Checksum backfill cancelled");
            return Ok(updated);
        }

        let mut query = blob::Entity::find()
            .filter(blob::Column::Committed.eq(true))
            .filter(blob::Column::Deleted.eq(false))
            .filter(blob::Column::PhysicalObjectKey.is_not_null())
            .filter(blob::Column::Checksum.is_null());
        if let Some(last) = cursor {
            query = query.filter(blob::Column::Id.gt(last));
        }
        let batch = query
            .order_by_asc(blob::Column::Id)
            .limit(batch_size)
            .all(storage.db())
            .await?;

        let Some(last) = batch.last() else {
            break;
        };
        cursor = Some(last.id);

        for candidate in &batch {
            match fill_checksum(storage, candidate).await {
                Ok(true) => updated += 1,
                Ok(false) => {}
                Err(e) => warn!(blob_key = %candidate.blob_key, error = %e, "Failed to compute checksum"),
            }
        }
    }

    info!(updated, "Checksum backfill finished");
    Ok(updated)
}

async fn fill_checksum(storage: &BlobStorage, candidate: &blob::Model) -> anyhow::Result<bool> {
    let Some(physical_key) = &candidate.physical_object_key else {
        return Ok(false);
    };
    let space = storage.space(&candidate.space_name)?;
    let Some(data) = space.physical_space().download(physical_key).await? else {
        warn!(blob_key = %candidate.blob_key, physical_key, "Physical object is missing");
        return Ok(false);
    };

    // The content may have been replaced while downloading.
    let result = blob::Entity::update_many()
        .col_expr(blob::Column::Checksum, Expr::value(Some(compute_checksum(&data))))
        .filter(blob::Column::Id.eq(candidate.id))
        .filter(blob::Column::PhysicalObjectKey.eq(physical_key.clone()))
        .filter(blob::Column::Checksum.is_null())
        .exec(storage.db())
        .await?;

    Ok(result.rows_affected == 1)
}
