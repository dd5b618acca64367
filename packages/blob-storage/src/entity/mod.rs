pub mod blob;
pub mod directory;
pub mod replication_task;
pub mod variant;
