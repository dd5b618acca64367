mod config;

use std::sync::Arc;

use anyhow::Context;
use blob_storage::database::init_db;
use blob_storage::loops::{run_cleanup_loop, run_process_changes_loop};
use blob_storage::replication::run_replication_executor;
use blob_storage::{BlobStorage, SqlReplicationTaskStorage};
use object_storage::ObjectStorage;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let config = config::AppConfig::load().context("Failed to load config")?;
    info!(node = %config.node.name, "Storage daemon starting");

    let db = init_db(&config.database.url)
        .await
        .context("Failed to initialize database")?;

    let tasks = Arc::new(SqlReplicationTaskStorage::new(db.clone()));
    let objects = Arc::new(
        ObjectStorage::new(config.object_storage.clone(), tasks)
            .context("Invalid object storage configuration")?,
    );
    let storage = Arc::new(BlobStorage::new(
        db.clone(),
        objects.clone(),
        config.blob_storage.clone(),
        config.node.name.clone(),
    ));

    // Resolve every space up front so misconfiguration fails at startup.
    for name in storage.space_names() {
        storage
            .space(&name)
            .with_context(|| format!("Failed to initialize blob storage space '{name}'"))?;
    }
    info!(
        object_spaces = ?objects.space_names(),
        blob_spaces = ?storage.space_names(),
        "Storage initialized"
    );

    let changes = tokio::spawn(run_process_changes_loop(storage.clone()));
    let cleanup = tokio::spawn(run_cleanup_loop(storage.clone()));
    let replication = tokio::spawn(run_replication_executor(db, objects));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");

    changes.abort();
    cleanup.abort();
    replication.abort();
    Ok(())
}
