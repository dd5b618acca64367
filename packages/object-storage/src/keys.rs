//! Generation of opaque, single-use object identifiers.

use uuid::Uuid;

/// Generate a fresh physical object key.
///
/// Keys are random so that the filesystem engine's prefix sharding spreads evenly.
pub fn new_physical_key() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Generate a fresh blob key.
pub fn new_blob_key() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn keys_are_unique_and_path_safe() {
        let keys: HashSet<String> = (0..1000).map(|_| new_physical_key()).collect();
        assert_eq!(keys.len(), 1000);
        assert!(
            keys.iter()
                .all(|k| k.len() == 32 && k.chars().all(|c| c.is_ascii_hexdigit()))
        );
    }
}
