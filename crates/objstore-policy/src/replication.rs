//! Replication policy, result and status types.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use objstore_storage::validation::validate_backend_name;
use serde::{Deserialize, Serialize};

use crate::error::{PolicyError, PolicyResult};
use crate::store::Policy;

/// How objects are carried between backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationMode {
    /// Decrypt with the source layer, re-encrypt with the destination layer.
    #[default]
    Transparent,
    /// Copy bytes unchanged, ignoring the client-side layers.
    Opaque,
}

impl ReplicationMode {
    /// Parses `"transparent"` or `"opaque"`; the empty string means transparent.
    pub fn parse(s: &str) -> PolicyResult<Self> {
        match s {
            "" | "transparent" => Ok(ReplicationMode::Transparent),
            "opaque" => Ok(ReplicationMode::Opaque),
            other => Err(PolicyError::invalid(
                "replication_mode",
                format!("unknown mode {:?}, expected \"transparent\" or \"opaque\"", other),
            )),
        }
    }

    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicationMode::Transparent => "transparent",
            ReplicationMode::Opaque => "opaque",
        }
    }
}

impl FromStr for ReplicationMode {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ReplicationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One encryption layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// Whether the layer is active.
    #[serde(default)]
    pub enabled: bool,
    /// Name of the encrypter provider.
    #[serde(default)]
    pub provider: String,
    /// Key id used when an object does not record one.
    #[serde(default)]
    pub default_key: String,
}

impl EncryptionConfig {
    /// An enabled layer.
    pub fn enabled(provider: impl Into<String>, default_key: impl Into<String>) -> Self {
        Self {
            enabled: true,
            provider: provider.into(),
            default_key: default_key.into(),
        }
    }
}

/// The three encryption layers of a replication policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionPolicy {
    /// At-rest encryption performed by the backends themselves; informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<EncryptionConfig>,
    /// Client-side layer to decrypt when reading from the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<EncryptionConfig>,
    /// Client-side layer to encrypt with when writing to the destination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<EncryptionConfig>,
}

fn layer_enabled(layer: &Option<EncryptionConfig>) -> Option<&EncryptionConfig> {
    layer.as_ref().filter(|c| c.enabled)
}

impl EncryptionPolicy {
    /// The backend layer, if enabled.
    pub fn backend_layer(&self) -> Option<&EncryptionConfig> {
        layer_enabled(&self.backend)
    }

    /// The source layer, if enabled.
    pub fn source_layer(&self) -> Option<&EncryptionConfig> {
        layer_enabled(&self.source)
    }

    /// The destination layer, if enabled.
    pub fn destination_layer(&self) -> Option<&EncryptionConfig> {
        layer_enabled(&self.destination)
    }
}

/// Copies objects from one backend to another on a fixed interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationPolicy {
    /// Unique id.
    pub id: String,
    /// Source backend name.
    pub source_backend: String,
    /// Source backend settings, used when the name is not a registered backend.
    #[serde(default)]
    pub source_settings: HashMap<String, String>,
    /// Only keys under this prefix are copied.
    #[serde(default)]
    pub source_prefix: String,
    /// Destination backend name.
    pub destination_backend: String,
    /// Destination backend settings.
    #[serde(default)]
    pub destination_settings: HashMap<String, String>,
    /// Time between scheduled runs.
    #[serde(rename = "check_interval_ms", with = "duration_ms")]
    pub check_interval: Duration,
    /// Disabled policies are skipped by `sync_all` and the scheduler.
    #[serde(default)]
    pub enabled: bool,
    /// Copy mode.
    #[serde(default)]
    pub replication_mode: ReplicationMode,
    /// Encryption layers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<EncryptionPolicy>,
    /// Completion time of the latest run.
    #[serde(default)]
    pub last_sync_time: Option<DateTime<Utc>>,
}

impl Policy for ReplicationPolicy {
    fn id(&self) -> &str {
        &self.id
    }
}

impl ReplicationPolicy {
    /// An enabled transparent-mode policy without encryption.
    pub fn new(
        id: impl Into<String>,
        source_backend: impl Into<String>,
        destination_backend: impl Into<String>,
        check_interval: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            source_backend: source_backend.into(),
            source_settings: HashMap::new(),
            source_prefix: String::new(),
            destination_backend: destination_backend.into(),
            destination_settings: HashMap::new(),
            check_interval,
            enabled: true,
            replication_mode: ReplicationMode::Transparent,
            encryption: None,
            last_sync_time: None,
        }
    }

    /// Sets the source prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.source_prefix = prefix.into();
        self
    }

    /// Sets the copy mode.
    pub fn with_mode(mut self, mode: ReplicationMode) -> Self {
        self.replication_mode = mode;
        self
    }

    /// Sets the encryption layers.
    pub fn with_encryption(mut self, encryption: EncryptionPolicy) -> Self {
        self.encryption = Some(encryption);
        self
    }

    /// Checks required fields.
    pub fn validate(&self) -> PolicyResult<()> {
        if self.id.trim().is_empty() {
            return Err(PolicyError::invalid("id", "policy id is required"));
        }
        if self.source_backend.trim().is_empty() {
            return Err(PolicyError::invalid("source_backend", "source backend is required"));
        }
        if self.destination_backend.trim().is_empty() {
            return Err(PolicyError::invalid(
                "destination_backend",
                "destination backend is required",
            ));
        }
        for (field, name) in [
            ("source_backend", &self.source_backend),
            ("destination_backend", &self.destination_backend),
        ] {
            validate_backend_name(name).map_err(|e| PolicyError::invalid(field, e.to_string()))?;
        }
        if self.check_interval.is_zero() {
            return Err(PolicyError::invalid(
                "check_interval",
                "check interval must be positive",
            ));
        }
        if let Some(enc) = &self.encryption {
            for (field, layer) in [
                ("encryption.backend", &enc.backend),
                ("encryption.source", &enc.source),
                ("encryption.destination", &enc.destination),
            ] {
                if let Some(cfg) = layer_enabled(layer) {
                    if cfg.provider.trim().is_empty() {
                        return Err(PolicyError::invalid(field, "enabled layer requires a provider"));
                    }
                }
            }
        }
        Ok(())
    }

    /// Encryption layers, empty when none are configured.
    pub fn encryption_layers(&self) -> EncryptionPolicy {
        self.encryption.clone().unwrap_or_default()
    }
}

/// Outcome of one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    /// Policy id, or `"all"` for an aggregate.
    pub policy_id: String,
    /// Objects copied.
    pub synced: u64,
    /// Objects deleted at the destination.
    pub deleted: u64,
    /// Objects (or, in an aggregate, policies) that failed.
    pub failed: u64,
    /// Bytes written.
    pub bytes_total: u64,
    /// Wall-clock run time.
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
    /// One entry per failure, `"<key>: <error>"`.
    pub errors: Vec<String>,
    /// Whether the run stopped early on cancellation.
    pub cancelled: bool,
}

impl SyncResult {
    /// Empty result for `policy_id`.
    pub fn new(policy_id: impl Into<String>) -> Self {
        Self {
            policy_id: policy_id.into(),
            ..Self::default()
        }
    }

    /// Records a copied object.
    pub fn record_success(&mut self, bytes: u64) {
        self.synced += 1;
        self.bytes_total += bytes;
    }

    /// Records an object removed from the destination.
    pub fn record_deletion(&mut self) {
        self.deleted += 1;
    }

    /// Records a failed object.
    pub fn record_failure(&mut self, key: &str, err: impl fmt::Display) {
        self.failed += 1;
        self.errors.push(format!("{}: {}", key, err));
    }

    /// Adds another result's counts and errors into this one.
    pub fn merge(&mut self, other: &SyncResult) {
        self.synced += other.synced;
        self.deleted += other.deleted;
        self.failed += other.failed;
        self.bytes_total += other.bytes_total;
        self.errors.extend(other.errors.iter().cloned());
        self.cancelled |= other.cancelled;
    }
}

/// Cumulative per-policy replication status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplicationStatus {
    /// Policy id.
    pub policy_id: String,
    /// Source backend name.
    pub source_backend: String,
    /// Destination backend name.
    pub destination_backend: String,
    /// Whether the policy is enabled.
    pub enabled: bool,
    /// Objects copied across all runs.
    pub total_objects_synced: u64,
    /// Objects deleted across all runs.
    pub total_objects_deleted: u64,
    /// Bytes copied across all runs.
    pub total_bytes_synced: u64,
    /// Error entries across all runs.
    pub total_errors: u64,
    /// Completion time of the latest run.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Mean run duration.
    #[serde(rename = "average_sync_duration_ms", with = "duration_ms")]
    pub average_sync_duration: Duration,
    /// Completed runs.
    pub sync_count: u64,
}

pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis().min(u128::from(u64::MAX)) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
