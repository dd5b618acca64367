use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entity::blob;
use crate::storage::BlobStorage;

/// A blob whose content pointer leads nowhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingObject {
    pub space_name: String,
    pub blob_key: String,
    pub physical_object_key: String,
}

/// Report blobs of `space_name` whose physical object does not exist.
pub async fn find_missing_objects(
    storage: &BlobStorage,
    space_name: &str,
    cancel: &CancellationToken,
) -> anyhow::Result<Vec<MissingObject>> {
    let space = storage.space(space_name)?;
    let batch_size = storage.config().loops.batch_size;
    let mut cursor: Option<Uuid> = None;
    let mut missing = Vec::new();
    let mut checked = 0usize;

    loop {
        if cancel.is_cancelled() {
            info!(space = space_name, checked, "Missing object check cancelled");
            return Ok(missing);
        }

        let mut query = blob::Entity::find()
            .filter(blob::Column::SpaceName.eq(space_name))
            .filter(blob::Column::Committed.eq(true))
            .filter(blob::Column::Deleted.eq(false))
            .filter(blob::Column::PhysicalObjectKey.is_not_null());
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

        for candidate in batch {
            let Some(physical_key) = candidate.physical_object_key else {
                continue;
            };
            checked += 1;
            if !space.physical_space().exists(&physical_key).await? {
                warn!(space = space_name, blob_key = %candidate.blob_key, %physical_key, "Physical object is missing");
                missing.push(MissingObject {
                    space_name: space_name.to_string(),
                    blob_key: candidate.blob_key,
                    physical_object_key: physical_key,
                });
            }
        }
    }

    info!(space = space_name, checked, missing = missing.len(), "Missing object check finished");
    Ok(missing)
}
