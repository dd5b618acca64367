use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "storage_variant")]
pub struct Model {
    /// UUIDv7 primary key; the oldest row of a `(blob, variant)` pair wins.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(indexed)]
    pub blob_id: Uuid,

    #[sea_orm(indexed)]
    pub variant_name: String,

    pub physical_object_key: Option<String>,

    pub size: i64,

    #[sea_orm(default_value = false)]
    pub queued_for_conversion: bool,

    pub num_attempts: i32,

    pub last_conversion_attempt: DateTimeUtc,

    /// Node which performed the last conversion attempt.
    pub node: Option<String>,

    pub conversion_duration_ms: i64,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
