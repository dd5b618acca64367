use std::collections::HashMap;

use serde::Deserialize;

/// Configuration of a single layer 2 space.
#[derive(Debug, Deserialize, Clone)]
pub struct BlobSpaceConfig {
    /// Layer 1 space holding the bytes. Default: the name of this space.
    #[serde(default)]
    pub object_space: Option<String>,
    /// Compare names case-insensitively. Default: true.
    #[serde(default = "default_use_normalized_names")]
    pub use_normalized_names: bool,
    /// Record reads in `last_touched`. Default: false.
    #[serde(default)]
    pub touch_tracking: bool,
    /// Delete blobs neither modified nor touched for this many days; 0 keeps them forever.
    #[serde(default)]
    pub retention_days: u32,
    /// Whether this node may convert variants. Default: true.
    #[serde(default = "default_conversion_enabled")]
    pub conversion_enabled: bool,
}

fn default_use_normalized_names() -> bool {
    true
}
fn default_conversion_enabled() -> bool {
    true
}

impl Default for BlobSpaceConfig {
    fn default() -> Self {
        Self {
            object_space: None,
            use_normalized_names: default_use_normalized_names(),
            touch_tracking: false,
            retention_days: 0,
            conversion_enabled: default_conversion_enabled(),
        }
    }
}

/// Retry bounds for optimistic updates and variant conversion.
#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    /// Attempts of the optimistic create protocol before giving up. Default: 5.
    #[serde(default = "default_max_optimistic_lock_attempts")]
    pub max_optimistic_lock_attempts: u32,
    /// Upper bound of the random pause between optimistic attempts. Default: 250.
    #[serde(default = "default_optimistic_lock_pause_ms")]
    pub optimistic_lock_pause_ms: u64,
    /// Conversion attempts per variant before it is considered failed. Default: 3.
    #[serde(default = "default_max_conversion_attempts")]
    pub max_conversion_attempts: i32,
    /// A queued conversion older than this may be claimed again. Default: 900.
    #[serde(default = "default_hanging_conversion_retry_secs")]
    pub hanging_conversion_retry_secs: u64,
    /// Pause between checks for a conversion running elsewhere. Default: 500.
    #[serde(default = "default_conversion_retry_delay_ms")]
    pub conversion_retry_delay_ms: u64,
    /// Checks before a pending conversion is reported as not yet available. Default: 10.
    #[serde(default = "default_max_conversion_wait_attempts")]
    pub max_conversion_wait_attempts: u32,
}

fn default_max_optimistic_lock_attempts() -> u32 {
    5
}
fn default_optimistic_lock_pause_ms() -> u64 {
    250
}
fn default_max_conversion_attempts() -> i32 {
    3
}
fn default_hanging_conversion_retry_secs() -> u64 {
    900
}
fn default_conversion_retry_delay_ms() -> u64 {
    500
}
fn default_max_conversion_wait_attempts() -> u32 {
    10
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_optimistic_lock_attempts: default_max_optimistic_lock_attempts(),
            optimistic_lock_pause_ms: default_optimistic_lock_pause_ms(),
            max_conversion_attempts: default_max_conversion_attempts(),
            hanging_conversion_retry_secs: default_hanging_conversion_retry_secs(),
            conversion_retry_delay_ms: default_conversion_retry_delay_ms(),
            max_conversion_wait_attempts: default_max_conversion_wait_attempts(),
        }
    }
}

/// Schedules and batch sizes of the background loops.
#[derive(Debug, Deserialize, Clone)]
pub struct LoopConfig {
    /// Default: 15.
    #[serde(default = "default_process_changes_interval_secs")]
    pub process_changes_interval_secs: u64,
    /// Default: 3600.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Rows handled per query of a pass. Default: 256.
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    /// Temporary blobs idle for longer are deleted. Default: 4 hours.
    #[serde(default = "default_temporary_blob_max_age_secs")]
    pub temporary_blob_max_age_secs: u64,
}

fn default_process_changes_interval_secs() -> u64 {
    15
}
fn default_cleanup_interval_secs() -> u64 {
    3600
}
fn default_batch_size() -> u64 {
    256
}
fn default_temporary_blob_max_age_secs() -> u64 {
    4 * 60 * 60
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            process_changes_interval_secs: default_process_changes_interval_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            batch_size: default_batch_size(),
            temporary_blob_max_age_secs: default_temporary_blob_max_age_secs(),
        }
    }
}

/// Layer 2 configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct BlobStorageConfig {
    #[serde(default)]
    pub spaces: HashMap<String, BlobSpaceConfig>,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub loops: LoopConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn space_defaults() {
        let config: BlobStorageConfig = serde_json::from_value(serde_json::json!({
            "spaces": { "documents": { "retention_days": 30 } },
            "limits": { "max_conversion_attempts": 5 }
        }))
        .unwrap();

        let documents = &config.spaces["documents"];
        assert!(documents.use_normalized_names);
        assert!(documents.conversion_enabled);
        assert!(!documents.touch_tracking);
        assert_eq!(documents.retention_days, 30);
        assert!(documents.object_space.is_none());

        assert_eq!(config.limits.max_conversion_attempts, 5);
        assert_eq!(config.limits.max_optimistic_lock_attempts, 5);
        assert_eq!(config.loops.batch_size, 256);
        assert_eq!(config.loops.temporary_blob_max_age_secs, 14_400);
    }
}
