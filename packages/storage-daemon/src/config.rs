use blob_storage::BlobStorageConfig;
use config::{Config, ConfigError, Environment, File};
use object_storage::ObjectStorageConfig;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Identity of this node, recorded on variant conversions.
#[derive(Debug, Deserialize, Clone)]
pub struct NodeConfig {
    /// Default: "node-1".
    #[serde(default = "default_node_name")]
    pub name: String,
}

fn default_node_name() -> String {
    "node-1".into()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: default_node_name(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub object_storage: ObjectStorageConfig,
    #[serde(default)]
    pub blob_storage: BlobStorageConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("STORAGE_CONFIG").unwrap_or_else(|_| "config/config".to_string());

        let s = Config::builder()
            .set_default("database.url", "sqlite://data/storage.db?mode=rwc")?
            .set_default("node.name", "node-1")?
            // Load from config/config.toml (or $STORAGE_CONFIG)
            .add_source(File::with_name(&config_path).required(false))
            // Override from environment (e.g., STORAGE__DATABASE__URL)
            .add_source(Environment::with_prefix("STORAGE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
