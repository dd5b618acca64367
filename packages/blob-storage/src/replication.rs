//! Replication tasks persisted in the metadata store, so that pending
//! copies survive restarts and are shared by all nodes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use object_storage::retry::calculate_backoff;
use object_storage::{ObjectStorage, ReplicationConfig, ReplicationTask, ReplicationTaskStorage, StorageError};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::entity::replication_task;

/// A claim older than this is considered abandoned by a crashed node.
const STALE_CLAIM_SECS: i64 = 600;

/// Stores replication tasks as rows of `storage_replication_task`.
#[derive(Clone)]
pub struct SqlReplicationTaskStorage {
    db: DatabaseConnection,
}

impl SqlReplicationTaskStorage {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ReplicationTaskStorage for SqlReplicationTaskStorage {
    async fn enqueue(&self, task: ReplicationTask) -> Result<(), StorageError> {
        let now = Utc::now();
        replication_task::ActiveModel {
            id: Set(Uuid::now_v7()),
            primary_space: Set(task.primary_space.clone()),
            object_key: Set(task.object_key.clone()),
            perform_delete: Set(task.delete),
            earliest_execution: Set(now),
            scheduled: Set(None),
            last_execution: Set(None),
            failure_counter: Set(task.attempt as i32),
            failed: Set(false),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(&self.db)
        .await
        .map_err(|e| {
            StorageError::Replication(format!(
                "failed to persist replication task for '{}' in '{}': {e}",
                task.object_key, task.primary_space
            ))
        })?;
        Ok(())
    }
}

/// Outcome of one [`execute_replication_batch`] pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplicationPass {
    pub executed: usize,
    pub retried: usize,
    pub failed: usize,
}

/// Run [`execute_replication_batch`] as a background task.
pub async fn run_replication_executor(db: DatabaseConnection, storage: Arc<ObjectStorage>) {
    let config = storage.config().replication.clone();
    info!(
        poll_interval_secs = config.poll_interval_secs,
        max_attempts = config.max_attempts,
        "Starting replication executor"
    );

    let mut interval = tokio::time::interval(Duration::from_secs(config.poll_interval_secs));
    loop {
        interval.tick().await;

        match execute_replication_batch(&db, &storage, &config).await {
            Ok(pass) if pass == ReplicationPass::default() => {}
            Ok(pass) => debug!(?pass, "Executed replication tasks"),
            Err(e) => error!(error = %e, "Executing replication tasks failed"),
        }
    }
}

/// Claim and execute due tasks. Successful tasks are removed; failed ones
/// are pushed back with backoff and marked failed after `max_attempts`.
pub async fn execute_replication_batch(
    db: &DatabaseConnection,
    storage: &ObjectStorage,
    config: &ReplicationConfig,
) -> anyhow::Result<ReplicationPass> {
    let now = Utc::now();
    let stale_claim = now - chrono::Duration::seconds(STALE_CLAIM_SECS);

    let due = replication_task::Entity::find()
        .filter(replication_task::Column::Failed.eq(false))
        .filter(replication_task::Column::EarliestExecution.lte(now))
        .filter(
            Condition::any()
                .add(replication_task::Column::Scheduled.is_null())
                .add(replication_task::Column::Scheduled.lt(stale_claim)),
        )
        .order_by_asc(replication_task::Column::EarliestExecution)
        .limit(config.batch_size)
        .all(db)
        .await?;

    let mut pass = ReplicationPass::default();
    for row in due {
        if !claim(db, &row).await? {
            continue;
        }

        let task = ReplicationTask {
            primary_space: row.primary_space.clone(),
            object_key: row.object_key.clone(),
            delete: row.perform_delete,
            attempt: row.failure_counter.max(0) as u32,
        };

        match storage.execute_replication_task(&task).await {
            Ok(()) => {
                replication_task::Entity::delete_by_id(row.id).exec(db).await?;
                pass.executed += 1;
            }
            Err(e) => {
                let failures = row.failure_counter + 1;
                let failed = failures as u32 >= config.max_attempts;
                let delay = calculate_backoff(
                    failures as u32,
                    config.retry_delay_ms,
                    config.max_retry_delay_ms,
                );
                let retry_at = Utc::now()
                    + chrono::Duration::milliseconds(delay.as_millis() as i64);

                if failed {
                    error!(space = %row.primary_space, key = %row.object_key, failures, error = %e, "Replication task ultimately failed");
                    pass.failed += 1;
                } else {
                    warn!(space = %row.primary_space, key = %row.object_key, failures, error = %e, "Replication task failed, retrying");
                    pass.retried += 1;
                }

                replication_task::Entity::update_many()
                    .col_expr(replication_task::Column::FailureCounter, Expr::value(failures))
                    .col_expr(replication_task::Column::Failed, Expr::value(failed))
                    .col_expr(replication_task::Column::EarliestExecution, Expr::value(retry_at))
                    .col_expr(
                        replication_task::Column::Scheduled,
                        Expr::value(Option::<chrono::DateTime<Utc>>::None),
                    )
                    .col_expr(replication_task::Column::LastExecution, Expr::value(Some(Utc::now())))
                    .filter(replication_task::Column::Id.eq(row.id))
                    .exec(db)
                    .await?;
            }
        }
    }

    Ok(pass)
}

/// Mark `row` as taken by this node. Fails if another executor got it first.
async fn claim(db: &DatabaseConnection, row: &replication_task::Model) -> anyhow::Result<bool> {
    let mut update = replication_task::Entity::update_many()
        .col_expr(replication_task::Column::Scheduled, Expr::value(Some(Utc::now())))
        .filter(replication_task::Column::Id.eq(row.id));
    update = match row.scheduled {
        Some(previous) => update.filter(replication_task::Column::Scheduled.eq(previous)),
        None => update.filter(replication_task::Column::Scheduled.is_null()),
    };

    Ok(update.exec(db).await?.rows_affected == 1)
}
