//! Change detection between a source object and its destination copy.

use objstore_storage::{Metadata, StorageBackend};

/// Whether the source object differs from the destination copy: it is missing, the ETags
/// differ, the sizes differ, or the source is newer.
pub fn has_changed(src: &Metadata, dest: Option<&Metadata>) -> bool {
    let Some(dest) = dest else {
        return true;
    };
    if !src.etag.is_empty() && !dest.etag.is_empty() && src.etag != dest.etag {
        return true;
    }
    if src.size != dest.size {
        return true;
    }
    match (src.last_modified, dest.last_modified) {
        (Some(s), Some(d)) => s > d,
        (Some(_), None) => true,
        _ => false,
    }
}

/// Looks up the destination copy of `key` and compares. Any lookup failure counts as changed.
pub async fn needs_copy(dest: &dyn StorageBackend, key: &str, src: Option<&Metadata>) -> bool {
    let Some(src) = src else {
        return true;
    };
    match dest.metadata(key).await {
        Ok(dest_meta) => has_changed(src, Some(&dest_meta)),
        Err(_) => true,
    }
}
