use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufReader};

use super::{BoxReader, DeliverySink, DeliveryStatus, FetchedObject, StorageEngine, FS_ENGINE};
use crate::config::ObjectStorageConfig;
use crate::error::StorageError;

/// Filesystem-backed storage engine.
///
/// Objects are stored in a sharded directory layout:
/// `{space root}/{first 2 chars of key}/{key}`
pub struct FilesystemEngine {
    roots: HashMap<String, PathBuf>,
}

impl FilesystemEngine {
    /// Create an engine serving the given `space -> root directory` mapping.
    pub fn new(roots: HashMap<String, PathBuf>) -> Self {
        Self { roots }
    }

    /// Create an engine serving every space configured with the `fs` engine.
    pub fn from_config(config: &ObjectStorageConfig) -> Self {
        let roots = config
            .spaces
            .iter()
            .filter(|(_, settings)| settings.engine == FS_ENGINE)
            .filter_map(|(name, _)| config.fs_root(name).map(|root| (name.clone(), root)))
            .collect();
        Self::new(roots)
    }

    fn root(&self, space: &str) -> Result<&PathBuf, StorageError> {
        self.roots
            .get(space)
            .ok_or_else(|| StorageError::UnknownSpace(space.to_string()))
    }

    /// Compute the filesystem path for a given key.
    fn object_path(&self, space: &str, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        let shard: String = key.chars().take(2).collect();
        Ok(self.root(space)?.join(shard).join(key))
    }

    /// Path for a temporary file during writes.
    fn temp_path(&self, space: &str) -> Result<PathBuf, StorageError> {
        Ok(self
            .root(space)?
            .join(".tmp")
            .join(uuid::Uuid::new_v4().to_string()))
    }
}

fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty()
        || key.starts_with('.')
        || key.contains('/')
        || key.contains('\\')
        || key.chars().any(|c| c.is_ascii_control())
    {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[async_trait]
impl StorageEngine for FilesystemEngine {
    async fn store(
        &self,
        space: &str,
        key: &str,
        mut data: BoxReader,
        _size: u64,
    ) -> Result<(), StorageError> {
        let object_path = self.object_path(space, key)?;
        let temp_path = self.temp_path(space)?;
        let io_err = |e| StorageError::io(space, key, "store", e);

        if let Some(parent) = temp_path.parent() {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let mut temp_file = fs::File::create(&temp_path).await.map_err(io_err)?;
        let copied = async {
            tokio::io::copy(&mut data, &mut temp_file).await?;
            temp_file.flush().await?;
            temp_file.sync_all().await
        }
        .await;
        drop(temp_file);

        if let Err(e) = copied {
            let _ = fs::remove_file(&temp_path).await;
            return Err(io_err(e));
        }

        if let Some(parent) = object_path.parent() {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        if let Err(e) = fs::rename(&temp_path, &object_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(io_err(e));
        }

        Ok(())
    }

    async fn delete(&self, space: &str, key: &str) -> Result<(), StorageError> {
        let object_path = self.object_path(space, key)?;
        match fs::remove_file(&object_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(space, key, "delete", e)),
        }
    }

    async fn fetch(&self, space: &str, key: &str) -> Result<Option<FetchedObject>, StorageError> {
        let object_path = self.object_path(space, key)?;
        let file = match fs::File::open(&object_path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(space, key, "fetch", e)),
        };
        let size = file
            .metadata()
            .await
            .map_err(|e| StorageError::io(space, key, "fetch", e))?
            .len();

        Ok(Some(FetchedObject {
            reader: Box::new(BufReader::new(file)),
            size,
        }))
    }

    async fn exists(&self, space: &str, key: &str) -> Result<bool, StorageError> {
        let object_path = self.object_path(space, key)?;
        fs::try_exists(&object_path)
            .await
            .map_err(|e| StorageError::io(space, key, "exists", e))
    }

    async fn deliver(
        &self,
        space: &str,
        key: &str,
        sink: DeliverySink<'_>,
    ) -> Result<DeliveryStatus, StorageError> {
        let Some(mut object) = self.fetch(space, key).await? else {
            return Ok(DeliveryStatus::Failed(404));
        };

        let bytes = tokio::io::copy(&mut object.reader, sink)
            .await
            .map_err(|e| StorageError::io(space, key, "deliver", e))?;
        Ok(DeliveryStatus::Delivered { bytes })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use tokio::io::AsyncReadExt;

    use super::*;

    fn temp_engine() -> (FilesystemEngine, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut roots = HashMap::new();
        roots.insert("files".to_string(), dir.path().join("files"));
        (FilesystemEngine::new(roots), dir)
    }

    fn reader(data: &[u8]) -> BoxReader {
        Box::new(Cursor::new(data.to_vec()))
    }

    #[tokio::test]
    async fn store_then_fetch() {
        let (engine, _dir) = temp_engine();
        engine
            .store("files", "abc123", reader(b"hello world"), 11)
            .await
            .unwrap();

        let mut object = engine.fetch("files", "abc123").await.unwrap().unwrap();
        let mut buf = Vec::new();
        object.reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello world");
        assert_eq!(object.size, 11);
    }

    #[tokio::test]
    async fn objects_are_sharded_by_key_prefix() {
        let (engine, dir) = temp_engine();
        engine
            .store("files", "9f00aa", reader(b"x"), 1)
            .await
            .unwrap();

        assert!(dir.path().join("files").join("9f").join("9f00aa").exists());
    }

    #[tokio::test]
    async fn store_leaves_no_temp_files() {
        let (engine, dir) = temp_engine();
        engine
            .store("files", "key1", reader(b"data"), 4)
            .await
            .unwrap();

        let temp_dir = dir.path().join("files").join(".tmp");
        let entries: Vec<_> = std::fs::read_dir(&temp_dir).unwrap().collect();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn fetch_missing_returns_none() {
        let (engine, _dir) = temp_engine();
        assert!(engine.fetch("files", "missing").await.unwrap().is_none());
        assert!(!engine.exists("files", "missing").await.unwrap());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (engine, _dir) = temp_engine();
        engine
            .store("files", "gone", reader(b"bye"), 3)
            .await
            .unwrap();
        engine.delete("files", "gone").await.unwrap();
        engine.delete("files", "gone").await.unwrap();
        assert!(!engine.exists("files", "gone").await.unwrap());
    }

    #[tokio::test]
    async fn deliver_missing_reports_not_found_status() {
        let (engine, _dir) = temp_engine();
        let mut sink = Vec::new();
        let status = engine.deliver("files", "nope", &mut sink).await.unwrap();
        assert_eq!(status, DeliveryStatus::Failed(404));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn deliver_writes_object_to_sink() {
        let (engine, _dir) = temp_engine();
        engine
            .store("files", "doc", reader(b"payload"), 7)
            .await
            .unwrap();

        let mut sink = Vec::new();
        let status = engine.deliver("files", "doc", &mut sink).await.unwrap();
        assert_eq!(status, DeliveryStatus::Delivered { bytes: 7 });
        assert_eq!(sink, b"payload");
    }

    #[tokio::test]
    async fn unknown_space_is_rejected() {
        let (engine, _dir) = temp_engine();
        let err = engine.fetch("other", "abc").await.err().unwrap();
        assert!(matches!(err, StorageError::UnknownSpace(space) if space == "other"));
    }

    #[tokio::test]
    async fn keys_cannot_escape_the_space_root() {
        let (engine, _dir) = temp_engine();
        for key in ["", "../etc", "a/b", ".hidden"] {
            let err = engine.fetch("files", key).await.err().unwrap();
            assert!(matches!(err, StorageError::InvalidKey(_)), "{key}");
        }
    }
}
