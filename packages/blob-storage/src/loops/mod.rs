//! Periodic reconciliation running on every node.
//!
//! Passes operate on bounded batches and only use idempotent deletes and
//! conditional updates, so several nodes may run them concurrently.

mod cleanup;
mod process_changes;

pub use cleanup::{CleanupPass, cleanup, run_cleanup_loop};
pub use process_changes::{ChangePass, process_changes, run_process_changes_loop};
