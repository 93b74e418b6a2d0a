//! Service configuration, loaded from TOML or JSON.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use objstore_crypt::{EncryptionAlgorithm, KeyringFactory, ProviderRegistry};
use objstore_policy::changelog::DEFAULT_MAX_LOG_BYTES;
use objstore_policy::{LifecycleAction, LifecyclePolicy, ManagerOptions, ReplicationPolicy};
use objstore_storage::{new_archiver, BackendConfig, FacadeConfig};
use serde::{Deserialize, Serialize};

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_backends() -> HashMap<String, BackendConfig> {
    HashMap::from([("default".to_string(), BackendConfig::new("memory"))])
}

fn default_sweep_interval() -> u64 {
    3600
}

fn default_workers() -> usize {
    4
}

fn default_true() -> bool {
    true
}

fn default_change_log_max_bytes() -> u64 {
    DEFAULT_MAX_LOG_BYTES
}

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjstoreConfig {
    /// Address the admin API listens on.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Named storage backends registered with the facade.
    #[serde(default = "default_backends")]
    pub backends: HashMap<String, BackendConfig>,
    /// Backend used for keys without a backend prefix.
    #[serde(default)]
    pub default_backend: Option<String>,
    /// Emit JSON log lines instead of plain text.
    #[serde(default)]
    pub log_json: bool,
    /// Keyring providers by name, alongside the built-in `noop`.
    #[serde(default)]
    pub encryption_providers: HashMap<String, KeyringConfig>,
    /// Lifecycle sweep settings.
    #[serde(default)]
    pub lifecycle: LifecycleSection,
    /// Replication settings.
    #[serde(default)]
    pub replication: ReplicationSection,
}

/// A keyring provider: key ids mapped to secret material, expanded with HKDF.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyringConfig {
    /// Key id used for new objects.
    pub default_key: String,
    /// Secret material per key id.
    #[serde(default)]
    pub keys: HashMap<String, String>,
    /// AEAD cipher for new objects.
    #[serde(default)]
    pub algorithm: EncryptionAlgorithm,
}

/// `[lifecycle]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleSection {
    /// Backend swept by lifecycle policies; the facade default when absent.
    #[serde(default)]
    pub backend: Option<String>,
    /// Seconds between periodic sweeps under `serve`.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Policies added at startup.
    #[serde(default)]
    pub policies: Vec<LifecyclePolicyConfig>,
}

impl Default for LifecycleSection {
    fn default() -> Self {
        Self {
            backend: None,
            sweep_interval_secs: default_sweep_interval(),
            policies: Vec::new(),
        }
    }
}

/// A lifecycle policy as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecyclePolicyConfig {
    /// Unique id.
    pub id: String,
    /// Key prefix the policy applies to.
    #[serde(default)]
    pub prefix: String,
    /// Age in seconds after which objects expire.
    pub retention_secs: u64,
    /// `delete` or `archive`.
    pub action: String,
    /// Archive destination; required for `archive`.
    #[serde(default)]
    pub destination: Option<BackendConfig>,
}

impl LifecyclePolicyConfig {
    /// Builds and validates the policy, opening the archive destination if one is set.
    pub async fn build(&self) -> anyhow::Result<LifecyclePolicy> {
        let action = LifecycleAction::parse(&self.action)?;
        let destination = match &self.destination {
            Some(dest) => Some(new_archiver(&dest.kind, &dest.settings).await?),
            None => None,
        };
        let policy = LifecyclePolicy {
            id: self.id.clone(),
            prefix: self.prefix.clone(),
            retention: Duration::from_secs(self.retention_secs),
            action,
            destination,
        };
        policy.validate()?;
        Ok(policy)
    }
}

/// `[replication]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationSection {
    /// JSON file replication policies are persisted to.
    #[serde(default)]
    pub policy_file: Option<PathBuf>,
    /// JSON Lines log of source changes for incremental syncs.
    #[serde(default)]
    pub change_log: Option<PathBuf>,
    /// Size at which the change log is rotated.
    #[serde(default = "default_change_log_max_bytes")]
    pub change_log_max_bytes: u64,
    /// Default copies in flight for parallel syncs.
    #[serde(default = "default_workers")]
    pub parallel_workers: usize,
    /// Skip objects whose destination copy is current.
    #[serde(default)]
    pub skip_unchanged: bool,
    /// Run each enabled policy on its interval under `serve`.
    #[serde(default = "default_true")]
    pub scheduler_enabled: bool,
    /// Policies added at startup unless already present in the policy file.
    #[serde(default)]
    pub policies: Vec<ReplicationPolicy>,
}

impl Default for ReplicationSection {
    fn default() -> Self {
        Self {
            policy_file: None,
            change_log: None,
            change_log_max_bytes: default_change_log_max_bytes(),
            parallel_workers: default_workers(),
            skip_unchanged: false,
            scheduler_enabled: true,
            policies: Vec::new(),
        }
    }
}

impl ReplicationSection {
    /// Manager tunables from this section.
    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            parallel_workers: self.parallel_workers.max(1),
            skip_unchanged: self.skip_unchanged,
        }
    }
}

impl Default for ObjstoreConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            backends: default_backends(),
            default_backend: None,
            log_json: false,
            encryption_providers: HashMap::new(),
            lifecycle: LifecycleSection::default(),
            replication: ReplicationSection::default(),
        }
    }
}

impl ObjstoreConfig {
    /// Parses `path` as TOML or JSON, chosen by extension.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: ObjstoreConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: ObjstoreConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }

    /// Loads `path` if it exists, otherwise the defaults.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::warn!("Config file not found, using defaults: {}", path.display());
            Ok(Self::default())
        }
    }

    /// Facade configuration building every configured backend.
    pub fn facade_config(&self) -> FacadeConfig {
        FacadeConfig {
            backends: HashMap::new(),
            backend_configs: self.backends.clone(),
            default_backend: self.default_backend.clone(),
        }
    }

    /// Provider registry holding `noop` plus one keyring per configured provider.
    pub fn provider_registry(&self) -> anyhow::Result<Arc<ProviderRegistry>> {
        let registry = ProviderRegistry::new();
        for (name, cfg) in &self.encryption_providers {
            let keyring = KeyringFactory::new(cfg.default_key.clone()).with_algorithm(cfg.algorithm);
            for (key_id, secret) in &cfg.keys {
                keyring.insert_derived_key(key_id, secret.as_bytes())?;
            }
            registry.register(name.clone(), Arc::new(keyring));
        }
        Ok(Arc::new(registry))
    }
}
