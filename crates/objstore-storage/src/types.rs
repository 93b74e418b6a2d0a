//! Object metadata and listing types shared by every backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default page size used when `ListOptions::max_results` is zero.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Metadata stored alongside an object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Object size in bytes.
    pub size: u64,
    /// MIME type (e.g. "application/json").
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content_type: String,
    /// Encoding applied to the payload (e.g. "gzip").
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content_encoding: String,
    /// Content hash of the stored bytes.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub etag: String,
    /// Last modification time; `None` when the backend cannot tell.
    pub last_modified: Option<DateTime<Utc>>,
    /// Free-form key/value pairs.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub custom: HashMap<String, String>,
}

impl Metadata {
    /// Creates metadata with only a content type set.
    pub fn with_content_type(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            ..Self::default()
        }
    }

    /// Sets the last-modified timestamp.
    pub fn modified_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_modified = Some(at);
        self
    }

    /// Adds a custom entry.
    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom.insert(key.into(), value.into());
        self
    }
}

/// BLAKE3 hex digest used as the ETag of stored bytes.
pub fn etag_for(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// A listed object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Object key relative to the backend root.
    pub key: String,
    /// Object metadata, absent when the backend could not read it.
    pub metadata: Option<Metadata>,
}

/// Options for a paginated listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Only keys starting with this prefix are returned.
    pub prefix: String,
    /// Page size; zero selects [`DEFAULT_PAGE_SIZE`].
    pub max_results: usize,
    /// Continuation token from a previous page; empty starts from the beginning.
    pub continue_from: String,
}

impl ListOptions {
    /// Listing of everything under `prefix`, first page.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    /// Effective page size.
    pub fn page_size(&self) -> usize {
        if self.max_results == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            self.max_results
        }
    }
}

/// One page of a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListResult {
    /// Objects in key order.
    pub objects: Vec<ObjectInfo>,
    /// Token for the next page; empty when there are no more results.
    pub next_token: String,
    /// Whether more results are available.
    pub truncated: bool,
}

/// Cuts one page out of an ordered key sequence. The continuation token is the last key returned.
pub(crate) fn paginate<I>(keys: I, opts: &ListOptions) -> (Vec<String>, String, bool)
where
    I: IntoIterator<Item = String>,
{
    let page_size = opts.page_size();
    let mut page = Vec::with_capacity(page_size.min(256));
    let mut truncated = false;

    for key in keys {
        if !key.starts_with(&opts.prefix) {
            continue;
        }
        if !opts.continue_from.is_empty() && key.as_str() <= opts.continue_from.as_str() {
            continue;
        }
        if page.len() == page_size {
            truncated = true;
            break;
        }
        page.push(key);
    }

    let next_token = if truncated {
        page.last().cloned().unwrap_or_default()
    } else {
        String::new()
    };
    (page, next_token, truncated)
}
