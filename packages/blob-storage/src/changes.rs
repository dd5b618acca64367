use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::entity::blob;

/// Kinds of modification recorded on a blob until the change loop handled them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlobChange {
    Created,
    Renamed,
    ContentUpdated,
    ParentChanged,
}

impl BlobChange {
    pub const ALL: [BlobChange; 4] = [
        BlobChange::Created,
        BlobChange::Renamed,
        BlobChange::ContentUpdated,
        BlobChange::ParentChanged,
    ];

    pub fn is_flagged(self, blob: &blob::Model) -> bool {
        match self {
            BlobChange::Created => blob.created,
            BlobChange::Renamed => blob.renamed,
            BlobChange::ContentUpdated => blob.content_updated,
            BlobChange::ParentChanged => blob.parent_changed,
        }
    }
}

/// Reacts to blob changes, e.g. to update a search index.
///
/// Handlers run at least once per change; a failing handler is logged and
/// does not keep the flag from being cleared.
#[async_trait]
pub trait BlobChangeHandler: Send + Sync {
    async fn handle(&self, blob: &blob::Model) -> anyhow::Result<()>;
}
