//! Object key and backend name validation.

use crate::error::{StorageError, StorageResult};

/// Maximum object key length in bytes.
pub const MAX_KEY_LENGTH: usize = 1024;

/// Maximum backend name length.
pub const MAX_BACKEND_NAME_LENGTH: usize = 64;

fn invalid_key(key: &str, reason: &str) -> StorageError {
    StorageError::InvalidKey {
        key: sanitize_for_log(key),
        reason: reason.to_string(),
    }
}

/// Validates an object key. Keys are relative, slash-separated paths.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(invalid_key(key, "key cannot be empty"));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(invalid_key(key, "key exceeds 1024 bytes"));
    }
    if key.chars().any(|c| c.is_control()) {
        return Err(invalid_key(key, "key contains control characters"));
    }
    if key.contains('\\') {
        return Err(invalid_key(key, "key contains a backslash"));
    }
    if key.starts_with('/') {
        return Err(invalid_key(key, "key cannot be an absolute path"));
    }
    if key.contains("//") {
        return Err(invalid_key(key, "key contains an empty path segment"));
    }
    if key.split('/').any(|seg| seg == ".." || seg == ".") {
        return Err(invalid_key(key, "key cannot contain relative path segments"));
    }
    Ok(())
}

/// Validates a listing prefix. The empty prefix lists everything.
pub fn validate_prefix(prefix: &str) -> StorageResult<()> {
    if prefix.is_empty() {
        return Ok(());
    }
    validate_key(prefix)
}

/// Validates a backend name: 1-64 characters of `[a-z0-9-]`.
pub fn validate_backend_name(name: &str) -> StorageResult<()> {
    let reason = if name.is_empty() {
        Some("backend name cannot be empty")
    } else if name.len() > MAX_BACKEND_NAME_LENGTH {
        Some("backend name exceeds 64 characters")
    } else if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        Some("backend name may only contain a-z, 0-9 and '-'")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StorageError::InvalidBackendName {
            name: sanitize_for_log(name),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// Strips control characters and caps length so user input is safe to log.
pub fn sanitize_for_log(s: &str) -> String {
    let mut cleaned: String = s.chars().filter(|c| !c.is_control()).collect();
    if cleaned.len() > 256 {
        let mut cut = 256;
        while !cleaned.is_char_boundary(cut) {
            cut -= 1;
        }
        cleaned.truncate(cut);
        cleaned.push_str("...[truncated]");
    }
    cleaned
}
