use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "storage_replication_task")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub primary_space: String,

    pub object_key: String,

    #[sea_orm(default_value = false)]
    pub perform_delete: bool,

    #[sea_orm(indexed)]
    pub earliest_execution: DateTimeUtc,

    /// Set while an executor holds the task.
    pub scheduled: Option<DateTimeUtc>,

    pub last_execution: Option<DateTimeUtc>,

    #[sea_orm(default_value = 0)]
    pub failure_counter: i32,

    #[sea_orm(default_value = false, indexed)]
    pub failed: bool,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
