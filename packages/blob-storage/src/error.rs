use object_storage::StorageError;
use sea_orm::DbErr;
use thiserror::Error;

/// Errors raised by layer 2 blob storage.
#[derive(Debug, Error)]
pub enum BlobStorageError {
    #[error("metadata store error: {0}")]
    Database(#[from] DbErr),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("unknown blob storage space: {0}")]
    UnknownSpace(String),

    #[error("invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("an entry named '{0}' already exists")]
    NameInUse(String),

    #[error("a directory cannot be moved into itself or one of its children")]
    CircularMove,

    #[error("cannot move entries across spaces or tenants")]
    CrossTenantMove,

    #[error("the root directory cannot be renamed, moved or deleted")]
    RootDirectory,

    #[error("blob '{0}' is not a temporary blob which can be attached")]
    NotAttachable(String),

    #[error("blob '{0}' does not exist")]
    UnknownBlob(String),

    #[error("directory {0} does not exist")]
    UnknownDirectory(uuid::Uuid),

    #[error("gave up {operation} after {attempts} optimistic attempts")]
    OptimisticLockExhausted {
        operation: &'static str,
        attempts: u32,
    },

    #[error("exhausted conversion attempts for variant '{variant}' of blob '{blob_key}'")]
    ExhaustedConversionAttempts { blob_key: String, variant: String },

    #[error("variant '{variant}' of blob '{blob_key}' cannot be converted on this node")]
    ConversionDisabled { blob_key: String, variant: String },

    #[error("no converter is registered for variant '{0}'")]
    UnknownVariant(String),
}

pub(crate) fn is_unique_violation(err: &DbErr) -> bool {
    matches!(
        err.sql_err(),
        Some(sea_orm::SqlErr::UniqueConstraintViolation(_))
    )
}
