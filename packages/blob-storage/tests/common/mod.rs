#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use blob_storage::database::connect_with;
use blob_storage::entity::blob;
use blob_storage::{
    BlobSpaceConfig, BlobStorage, BlobStorageConfig, BlobStorageSpace, Converter,
    SqlReplicationTaskStorage,
};
use object_storage::{ObjectStorage, ObjectStorageConfig, SpaceConfig};
use sea_orm::{ConnectOptions, DatabaseConnection};
use tempfile::TempDir;

pub const TENANT: &str = "tenant-a";

pub struct Harness {
    pub db: DatabaseConnection,
    pub objects: Arc<ObjectStorage>,
    pub storage: Arc<BlobStorage>,
    _dir: TempDir,
}

impl Harness {
    pub fn space(&self, name: &str) -> Arc<BlobStorageSpace> {
        self.storage.space(name).unwrap()
    }

    pub fn documents(&self) -> Arc<BlobStorageSpace> {
        self.space("documents")
    }
}

fn object_space(engine: &str, replication_space: Option<&str>) -> SpaceConfig {
    SpaceConfig {
        engine: engine.to_string(),
        path: None,
        bucket: None,
        replication_space: replication_space.map(str::to_string),
    }
}

fn blob_space(configure: impl FnOnce(&mut BlobSpaceConfig)) -> BlobSpaceConfig {
    let mut settings = BlobSpaceConfig {
        object_space: Some("files".to_string()),
        ..BlobSpaceConfig::default()
    };
    configure(&mut settings);
    settings
}

pub async fn harness() -> Harness {
    harness_with(|storage| storage).await
}

/// In-memory metadata store and filesystem objects below a temp dir.
///
/// Spaces: `documents` (case-insensitive names), `exact` (case-sensitive,
/// touch tracking), `frozen` (no conversion) and `archive` (1 day retention).
/// Object space `files` replicates onto `replica`.
pub async fn harness_with(build: impl FnOnce(BlobStorage) -> BlobStorage) -> Harness {
    let dir = tempfile::tempdir().unwrap();

    let mut opt = ConnectOptions::new("sqlite::memory:");
    opt.max_connections(1).min_connections(1).sqlx_logging(false);
    let db = connect_with(opt).await.unwrap();

    let mut object_config = ObjectStorageConfig::default();
    object_config.fs.base_dir = dir.path().to_path_buf();
    object_config
        .spaces
        .insert("files".to_string(), object_space("fs", Some("replica")));
    object_config
        .spaces
        .insert("replica".to_string(), object_space("fs", None));
    object_config.replication.retry_delay_ms = 60_000;
    object_config.replication.max_attempts = 2;

    let tasks = Arc::new(SqlReplicationTaskStorage::new(db.clone()));
    let objects = Arc::new(ObjectStorage::new(object_config, tasks).unwrap());

    let mut config = BlobStorageConfig::default();
    config.limits.optimistic_lock_pause_ms = 5;
    config.limits.conversion_retry_delay_ms = 10;
    config.limits.max_conversion_wait_attempts = 3;
    config.loops.batch_size = 2;
    config
        .spaces
        .insert("documents".to_string(), blob_space(|_| {}));
    config.spaces.insert(
        "exact".to_string(),
        blob_space(|s| {
            s.use_normalized_names = false;
            s.touch_tracking = true;
        }),
    );
    config.spaces.insert(
        "frozen".to_string(),
        blob_space(|s| s.conversion_enabled = false),
    );
    config.spaces.insert(
        "archive".to_string(),
        blob_space(|s| s.retention_days = 1),
    );

    let storage = build(BlobStorage::new(db.clone(), objects.clone(), config, "node-test"));

    Harness {
        db,
        objects,
        storage: Arc::new(storage),
        _dir: dir,
    }
}

/// Uppercases ASCII content and counts its invocations.
#[derive(Default)]
pub struct UppercaseConverter {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Converter for UppercaseConverter {
    async fn convert(&self, _blob: &blob::Model, input: Vec<u8>) -> anyhow::Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(input.to_ascii_uppercase())
    }
}

/// Always fails and counts its invocations.
#[derive(Default)]
pub struct BrokenConverter {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Converter for BrokenConverter {
    async fn convert(&self, _blob: &blob::Model, _input: Vec<u8>) -> anyhow::Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("unsupported input")
    }
}

/// Remembers the blob keys it was invoked for.
#[derive(Default)]
pub struct RecordingHandler {
    pub seen: Mutex<Vec<String>>,
}

impl RecordingHandler {
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl blob_storage::BlobChangeHandler for RecordingHandler {
    async fn handle(&self, blob: &blob::Model) -> anyhow::Result<()> {
        self.seen.lock().unwrap().push(blob.blob_key.clone());
        Ok(())
    }
}
