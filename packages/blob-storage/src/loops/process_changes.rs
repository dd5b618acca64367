use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, Condition, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::changes::BlobChange;
use crate::entity::{blob, directory};
use crate::space::BlobStorageSpace;
use crate::storage::BlobStorage;

/// Outcome of a single [`process_changes`] pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChangePass {
    pub purged_directories: usize,
    pub purged_blobs: usize,
    pub handled_blobs: usize,
}

impl ChangePass {
    pub fn is_empty(&self) -> bool {
        self.purged_directories == 0 && self.purged_blobs == 0 && self.handled_blobs == 0
    }
}

/// Run [`process_changes`] as a background task.
pub async fn run_process_changes_loop(storage: Arc<BlobStorage>) {
    let interval_secs = storage.config().loops.process_changes_interval_secs;
    info!(interval_secs, "Starting change processing loop");

    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        interval.tick().await;

        match process_changes(&storage).await {
            Ok(pass) if pass.is_empty() => {}
            Ok(pass) => debug!(?pass, "Processed blob storage changes"),
            Err(e) => error!(error = %e, "Processing blob storage changes failed"),
        }
    }
}

/// One pass: hard delete soft deleted directories (marking their children)
/// and blobs, then run change handlers for flagged blobs.
pub async fn process_changes(storage: &BlobStorage) -> anyhow::Result<ChangePass> {
    let batch_size = storage.config().loops.batch_size;
    let mut pass = ChangePass::default();

    let mut unknown_spaces = HashSet::new();

    // Rows that fail to purge stay deleted; the cursor moves past them so they
    // cannot starve the rows behind them.
    let mut cursor: Option<Uuid> = None;
    loop {
        let mut query = directory::Entity::find().filter(directory::Column::Deleted.eq(true));
        if let Some(last) = cursor {
            query = query.filter(directory::Column::Id.gt(last));
        }
        let directories = query
            .order_by_asc(directory::Column::Id)
            .limit(batch_size)
            .all(storage.db())
            .await?;
        let fetched = directories.len() as u64;

        for dir in directories {
            cursor = Some(dir.id);
            let Some(space) = resolve_space(storage, &dir.space_name, &mut unknown_spaces) else {
                continue;
            };
            match space.purge_directory(&dir).await {
                Ok(children) => {
                    pass.purged_directories += 1;
                    debug!(directory_id = %dir.id, children, "Purged directory");
                }
                Err(e) => warn!(directory_id = %dir.id, error = %e, "Failed to purge directory"),
            }
        }

        if fetched < batch_size || pass.purged_directories as u64 >= batch_size {
            break;
        }
    }

    let mut cursor: Option<Uuid> = None;
    loop {
        let mut query = blob::Entity::find().filter(blob::Column::Deleted.eq(true));
        if let Some(last) = cursor {
            query = query.filter(blob::Column::Id.gt(last));
        }
        let blobs = query
            .order_by_asc(blob::Column::Id)
            .limit(batch_size)
            .all(storage.db())
            .await?;
        let fetched = blobs.len() as u64;

        for deleted in blobs {
            cursor = Some(deleted.id);
            let Some(space) = resolve_space(storage, &deleted.space_name, &mut unknown_spaces)
            else {
                continue;
            };
            match space.purge_blob(&deleted).await {
                Ok(()) => pass.purged_blobs += 1,
                Err(e) => warn!(blob_key = %deleted.blob_key, error = %e, "Failed to purge blob"),
            }
        }

        if fetched < batch_size || pass.purged_blobs as u64 >= batch_size {
            break;
        }
    }

    let flagged = blob::Entity::find()
        .filter(blob::Column::Committed.eq(true))
        .filter(blob::Column::Deleted.eq(false))
        .filter(
            Condition::any()
                .add(blob::Column::Created.eq(true))
                .add(blob::Column::Renamed.eq(true))
                .add(blob::Column::ContentUpdated.eq(true))
                .add(blob::Column::ParentChanged.eq(true)),
        )
        .order_by_asc(blob::Column::Id)
        .limit(batch_size)
        .all(storage.db())
        .await?;
    for changed in flagged {
        match handle_changes(storage, &changed).await {
            Ok(()) => pass.handled_blobs += 1,
            Err(e) => warn!(blob_key = %changed.blob_key, error = %e, "Failed to process blob changes"),
        }
    }

    Ok(pass)
}

/// The space a row belongs to, warning once per pass about spaces which are
/// no longer configured.
fn resolve_space(
    storage: &BlobStorage,
    name: &str,
    unknown_spaces: &mut HashSet<String>,
) -> Option<Arc<BlobStorageSpace>> {
    match storage.space(name) {
        Ok(space) => Some(space),
        Err(e) => {
            if unknown_spaces.insert(name.to_string()) {
                warn!(space = name, error = %e, "Skipping deleted rows of unavailable space");
            }
            None
        }
    }
}

async fn handle_changes(storage: &BlobStorage, changed: &blob::Model) -> anyhow::Result<()> {
    let mut clear = blob::Entity::update_many();

    for change in BlobChange::ALL {
        if !change.is_flagged(changed) {
            continue;
        }
        for handler in storage.handlers(change) {
            if let Err(e) = handler.handle(changed).await {
                warn!(blob_key = %changed.blob_key, ?change, error = %e, "Blob change handler failed");
            }
        }
        let column = match change {
            BlobChange::Created => blob::Column::Created,
            BlobChange::Renamed => blob::Column::Renamed,
            BlobChange::ContentUpdated => blob::Column::ContentUpdated,
            BlobChange::ParentChanged => blob::Column::ParentChanged,
        };
        clear = clear.col_expr(column, Expr::value(false));
    }

    // A blob modified in the meantime keeps its flags for the next pass.
    clear
        .filter(blob::Column::Id.eq(changed.id))
        .filter(blob::Column::LastModified.eq(changed.last_modified))
        .exec(storage.db())
        .await?;
    Ok(())
}
