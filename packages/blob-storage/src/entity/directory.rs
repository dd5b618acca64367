use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "storage_directory")]
pub struct Model {
    /// UUIDv7 primary key.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(indexed)]
    pub space_name: String,

    #[sea_orm(indexed)]
    pub tenant_id: String,

    /// `None` only for the root directory of a tenant.
    #[sea_orm(indexed)]
    pub parent_id: Option<Uuid>,

    pub directory_name: Option<String>,

    #[sea_orm(indexed)]
    pub normalized_directory_name: Option<String>,

    /// Claims the name within the parent while the row is committed and not deleted.
    #[sea_orm(unique)]
    pub name_slot: Option<String>,

    #[sea_orm(default_value = false)]
    pub committed: bool,

    #[sea_orm(default_value = false, indexed)]
    pub deleted: bool,

    pub created_at: DateTimeUtc,

    pub last_modified: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}
