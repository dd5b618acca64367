use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "storage_blob")]
pub struct Model {
    /// UUIDv7 primary key.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(indexed)]
    pub space_name: String,

    #[sea_orm(indexed)]
    pub tenant_id: Option<String>,

    /// Stable external identity.
    #[sea_orm(unique)]
    pub blob_key: String,

    /// Current content; `None` until content is first stored.
    #[sea_orm(indexed)]
    pub physical_object_key: Option<String>,

    #[sea_orm(indexed)]
    pub parent_id: Option<Uuid>,

    pub filename: Option<String>,

    #[sea_orm(indexed)]
    pub normalized_filename: Option<String>,

    pub file_extension: Option<String>,

    /// Claims the name within the parent (or reference) while committed and not deleted.
    #[sea_orm(unique)]
    pub name_slot: Option<String>,

    /// Owning entity, e.g. "invoice-4711".
    #[sea_orm(indexed)]
    pub reference: Option<String>,

    pub reference_designator: Option<String>,

    pub size: i64,

    /// Hex SHA-256 of the current content.
    pub checksum: Option<String>,

    #[sea_orm(default_value = false, indexed)]
    pub temporary: bool,

    #[sea_orm(default_value = false)]
    pub committed: bool,

    #[sea_orm(default_value = false, indexed)]
    pub deleted: bool,

    #[sea_orm(default_value = false)]
    pub created: bool,

    #[sea_orm(default_value = false)]
    pub renamed: bool,

    #[sea_orm(default_value = false)]
    pub content_updated: bool,

    #[sea_orm(default_value = false)]
    pub parent_changed: bool,

    pub created_at: DateTimeUtc,

    pub last_modified: DateTimeUtc,

    pub last_touched: Option<DateTimeUtc>,
}

impl ActiveModelBehavior for ActiveModel {}
