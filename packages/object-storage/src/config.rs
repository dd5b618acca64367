use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

/// Configuration of a single layer 1 space.
#[derive(Debug, Deserialize, Clone)]
pub struct SpaceConfig {
    /// Engine identifier, e.g. "fs" or "s3".
    pub engine: String,
    /// Root directory for the filesystem engine. Default: `{fs.base_dir}/{space}`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Bucket name for the S3 engine. Default: `{space}{s3.bucket_suffix}`.
    #[serde(default)]
    pub bucket: Option<String>,
    /// Name of the space which receives a copy of every object.
    #[serde(default)]
    pub replication_space: Option<String>,
}

/// Settings shared by all filesystem-backed spaces.
#[derive(Debug, Deserialize, Clone)]
pub struct FsConfig {
    /// Default: "data/storage".
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("data/storage")
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
        }
    }
}

/// Connection settings for the S3 engine.
#[derive(Debug, Deserialize, Clone)]
pub struct S3Config {
    /// Default: "http://localhost:9000".
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Default: "us-east-1".
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    /// Use path-style bucket addressing. Default: true.
    #[serde(default = "default_path_style")]
    pub path_style: bool,
    /// Appended to the space name to derive the bucket name. Default: "".
    #[serde(default)]
    pub bucket_suffix: String,
    /// Payloads of at least this many bytes use a multipart upload. Default: 5 MiB.
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold: u64,
}

fn default_endpoint() -> String {
    "http://localhost:9000".into()
}
fn default_region() -> String {
    "us-east-1".into()
}
fn default_path_style() -> bool {
    true
}
fn default_multipart_threshold() -> u64 {
    5 * 1024 * 1024
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            region: default_region(),
            access_key: String::new(),
            secret_key: String::new(),
            path_style: default_path_style(),
            bucket_suffix: String::new(),
            multipart_threshold: default_multipart_threshold(),
        }
    }
}

/// Retry policy for replication tasks.
#[derive(Debug, Deserialize, Clone)]
pub struct ReplicationConfig {
    /// Attempts before a task is given up. Default: 5.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay before a failed task is retried. Default: 30000.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Upper bound for the retry delay. Default: 600000.
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    /// Tasks executed per pass of the persistent executor. Default: 100.
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    /// Seconds between passes of the persistent executor. Default: 10.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_max_attempts() -> u32 {
    5
}
fn default_retry_delay_ms() -> u64 {
    30_000
}
fn default_max_retry_delay_ms() -> u64 {
    600_000
}
fn default_batch_size() -> u64 {
    100
}
fn default_poll_interval_secs() -> u64 {
    10
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            batch_size: default_batch_size(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

/// Layer 1 configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ObjectStorageConfig {
    #[serde(default)]
    pub spaces: HashMap<String, SpaceConfig>,
    #[serde(default)]
    pub fs: FsConfig,
    #[serde(default)]
    pub s3: S3Config,
    #[serde(default)]
    pub replication: ReplicationConfig,
}

impl ObjectStorageConfig {
    /// Root directory used by the filesystem engine for `space`.
    pub fn fs_root(&self, space: &str) -> Option<PathBuf> {
        let settings = self.spaces.get(space)?;
        Some(
            settings
                .path
                .clone()
                .unwrap_or_else(|| self.fs.base_dir.join(space)),
        )
    }

    /// Bucket used by the S3 engine for `space`.
    pub fn bucket_name(&self, space: &str) -> Option<String> {
        let settings = self.spaces.get(space)?;
        Some(
            settings
                .bucket
                .clone()
                .unwrap_or_else(|| format!("{space}{}", self.s3.bucket_suffix)),
        )
    }
}
