//! Lifecycle retention policies.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use objstore_storage::Archiver;

use crate::error::{PolicyError, PolicyResult};
use crate::store::Policy;

/// What happens to an object once its retention has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    /// Remove the object.
    Delete,
    /// Copy the object to the policy's archive destination.
    Archive,
}

impl LifecycleAction {
    /// Parses `"delete"` or `"archive"`.
    pub fn parse(s: &str) -> PolicyResult<Self> {
        match s {
            "delete" => Ok(LifecycleAction::Delete),
            "archive" => Ok(LifecycleAction::Archive),
            other => Err(PolicyError::invalid(
                "action",
                format!("unknown action {:?}, expected \"delete\" or \"archive\"", other),
            )),
        }
    }

    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleAction::Delete => "delete",
            LifecycleAction::Archive => "archive",
        }
    }
}

impl FromStr for LifecycleAction {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A retention rule applied by the sweep engine.
#[derive(Clone)]
pub struct LifecyclePolicy {
    /// Unique id.
    pub id: String,
    /// Key prefix the policy covers; empty matches every key.
    pub prefix: String,
    /// Objects strictly older than this are acted on.
    pub retention: Duration,
    /// Action taken on expired objects.
    pub action: LifecycleAction,
    /// Archive target; required for [`LifecycleAction::Archive`].
    pub destination: Option<Arc<dyn Archiver>>,
}

impl fmt::Debug for LifecyclePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecyclePolicy")
            .field("id", &self.id)
            .field("prefix", &self.prefix)
            .field("retention", &self.retention)
            .field("action", &self.action)
            .field("has_destination", &self.destination.is_some())
            .finish()
    }
}

impl Policy for LifecyclePolicy {
    fn id(&self) -> &str {
        &self.id
    }
}

impl LifecyclePolicy {
    /// A delete policy.
    pub fn delete(id: impl Into<String>, prefix: impl Into<String>, retention: Duration) -> Self {
        Self {
            id: id.into(),
            prefix: prefix.into(),
            retention,
            action: LifecycleAction::Delete,
            destination: None,
        }
    }

    /// An archive policy writing to `destination`.
    pub fn archive(
        id: impl Into<String>,
        prefix: impl Into<String>,
        retention: Duration,
        destination: Arc<dyn Archiver>,
    ) -> Self {
        Self {
            id: id.into(),
            prefix: prefix.into(),
            retention,
            action: LifecycleAction::Archive,
            destination: Some(destination),
        }
    }

    /// Checks required fields.
    pub fn validate(&self) -> PolicyResult<()> {
        if self.id.trim().is_empty() {
            return Err(PolicyError::invalid("id", "policy id is required"));
        }
        if self.retention.is_zero() {
            return Err(PolicyError::invalid("retention", "retention must be positive"));
        }
        if self.action == LifecycleAction::Archive && self.destination.is_none() {
            return Err(PolicyError::invalid(
                "destination",
                "archive action requires a destination",
            ));
        }
        Ok(())
    }

    /// Whether `key` falls under this policy's prefix.
    pub fn matches(&self, key: &str) -> bool {
        key.starts_with(&self.prefix)
    }

    /// Whether an object last modified at `last_modified` is past retention at `now`.
    /// Age must strictly exceed the retention.
    pub fn is_expired(&self, last_modified: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(last_modified);
        match chrono::Duration::from_std(self.retention) {
            Ok(retention) => age > retention,
            Err(_) => false,
        }
    }
}
