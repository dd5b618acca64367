//! Validation and normalization of directory and file names.

use crate::error::BlobStorageError;

fn invalid(name: &str, reason: &'static str) -> BlobStorageError {
    BlobStorageError::InvalidName {
        name: name.to_string(),
        reason,
    }
}

/// Validates a single path segment and returns it trimmed.
pub fn sanitize_name(name: &str) -> Result<&str, BlobStorageError> {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return Err(invalid(name, "names cannot be empty"));
    }

    if trimmed.chars().any(|c| c.is_control()) {
        return Err(invalid(name, "control characters are not allowed"));
    }

    if trimmed.contains('/') || trimmed.contains('\\') {
        return Err(invalid(name, "path separators are not allowed"));
    }

    if trimmed == "." || trimmed == ".." {
        return Err(invalid(name, "relative path segments are not allowed"));
    }

    Ok(trimmed)
}

/// Lowercase form used for case-insensitive comparisons.
pub fn normalize(name: &str) -> String {
    name.to_lowercase()
}

/// Lowercase extension after the last dot, if any.
pub fn extension(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

/// Splits a path into its segments, dropping empty ones.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split(['/', '\\'])
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect()
}
