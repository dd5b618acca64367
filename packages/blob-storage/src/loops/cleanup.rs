use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, Condition, EntityTrait, QueryFilter};
use tracing::{debug, error, info};

use crate::entity::{blob, directory};
use crate::storage::BlobStorage;

/// Rows still uncommitted after this long belong to a crashed create.
const STALE_UNCOMMITTED_SECS: i64 = 3600;

/// Outcome of a single [`cleanup`] pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupPass {
    pub expired_temporary: u64,
    pub expired_by_retention: u64,
    pub discarded_uncommitted: u64,
}

/// Run [`cleanup`] as a background task.
pub async fn run_cleanup_loop(storage: Arc<BlobStorage>) {
    let interval_secs = storage.config().loops.cleanup_interval_secs;
    info!(interval_secs, "Starting blob storage cleanup loop");

    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        interval.tick().await;

        match cleanup(&storage).await {
            Ok(pass) => debug!(?pass, "Blob storage cleanup finished"),
            Err(e) => error!(error = %e, "Blob storage cleanup failed"),
        }
    }
}

/// Soft delete expired temporary blobs and blobs past their space's
/// retention, and drop leftovers of interrupted creates. Deleted rows are
/// purged by the change loop.
pub async fn cleanup(storage: &BlobStorage) -> anyhow::Result<CleanupPass> {
    let now = Utc::now();
    let mut pass = CleanupPass::default();

    let temporary_cutoff =
        now - chrono::Duration::seconds(storage.config().loops.temporary_blob_max_age_secs as i64);
    pass.expired_temporary = blob::Entity::update_many()
        .col_expr(blob::Column::Deleted, Expr::value(true))
        .col_expr(blob::Column::NameSlot, Expr::value(Option::<String>::None))
        .filter(blob::Column::Temporary.eq(true))
        .filter(blob::Column::Committed.eq(true))
        .filter(blob::Column::Deleted.eq(false))
        .filter(blob::Column::CreatedAt.lt(temporary_cutoff))
        .exec(storage.db())
        .await?
        .rows_affected;

    for (space_name, settings) in &storage.config().spaces {
        if settings.retention_days == 0 {
            continue;
        }
        let cutoff = now - chrono::Duration::days(i64::from(settings.retention_days));
        let expired = blob::Entity::update_many()
            .col_expr(blob::Column::Deleted, Expr::value(true))
            .col_expr(blob::Column::NameSlot, Expr::value(Option::<String>::None))
            .filter(blob::Column::SpaceName.eq(space_name.as_str()))
            .filter(blob::Column::Committed.eq(true))
            .filter(blob::Column::Deleted.eq(false))
            .filter(blob::Column::LastModified.lt(cutoff))
            .filter(
                Condition::any()
                    .add(blob::Column::LastTouched.is_null())
                    .add(blob::Column::LastTouched.lt(cutoff)),
            )
            .exec(storage.db())
            .await?
            .rows_affected;
        if expired > 0 {
            info!(space = %space_name, expired, retention_days = settings.retention_days, "Expired blobs by retention");
        }
        pass.expired_by_retention += expired;
    }

    let stale_cutoff = now - chrono::Duration::seconds(STALE_UNCOMMITTED_SECS);
    pass.discarded_uncommitted += blob::Entity::delete_many()
        .filter(blob::Column::Committed.eq(false))
        .filter(blob::Column::CreatedAt.lt(stale_cutoff))
        .exec(storage.db())
        .await?
        .rows_affected;
    pass.discarded_uncommitted += directory::Entity::delete_many()
        .filter(directory::Column::Committed.eq(false))
        .filter(directory::Column::CreatedAt.lt(stale_cutoff))
        .exec(storage.db())
        .await?
        .rows_affected;

    Ok(pass)
}
