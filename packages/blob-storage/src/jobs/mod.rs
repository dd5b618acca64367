//! Long running maintenance jobs. Each checks its cancellation token at
//! batch boundaries and stops cleanly once it is cancelled.

mod checksum;
mod missing;

pub use checksum::fill_blob_checksums;
pub use missing::{MissingObject, find_missing_objects};
