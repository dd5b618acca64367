use thiserror::Error;

/// Errors raised by layer 1 object storage.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{operation} of '{key}' in space '{space}' failed: {source}")]
    Io {
        space: String,
        key: String,
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("S3 {operation} of '{key}' in space '{space}' failed: {source}")]
    S3 {
        space: String,
        key: String,
        operation: &'static str,
        #[source]
        source: s3::error::S3Error,
    },

    #[error("S3 {operation} of '{key}' in space '{space}' returned HTTP {status}")]
    S3Status {
        space: String,
        key: String,
        operation: &'static str,
        status: u16,
    },

    #[error("object '{key}' does not exist in space '{space}'")]
    NotFound { space: String, key: String },

    #[error("invalid physical key: '{0}'")]
    InvalidKey(String),

    #[error("unknown storage space: {0}")]
    UnknownSpace(String),

    #[error("unknown storage engine '{engine}' configured for space '{space}'")]
    UnknownEngine { space: String, engine: String },

    #[error("invalid storage configuration: {0}")]
    Config(String),

    #[error("invalid replication setup: {0}")]
    Replication(String),

    #[error("background task failed: {0}")]
    Task(String),
}

impl StorageError {
    pub(crate) fn io(space: &str, key: &str, operation: &'static str, source: std::io::Error) -> Self {
        Self::Io {
            space: space.to_string(),
            key: key.to_string(),
            operation,
            source,
        }
    }

    pub(crate) fn s3(
        space: &str,
        key: &str,
        operation: &'static str,
        source: s3::error::S3Error,
    ) -> Self {
        Self::S3 {
            space: space.to_string(),
            key: key.to_string(),
            operation,
            source,
        }
    }

    /// Whether this error means the object is simply absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
