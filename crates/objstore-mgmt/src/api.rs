//! Admin operations shared by the REST adapter and the CLI.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use objstore_policy::{
    ChangeEvent, ChangeLog, ChangeOperation, EncryptionPolicy, LifecycleAction, LifecycleManager, LifecyclePolicy, PolicyError,
    PolicyFile, ReplicationManager, ReplicationMode, ReplicationPolicy, ReplicationStatus,
    Scheduler, SweepReport, SyncResult,
};
use objstore_storage::{new_archiver, Facade};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ObjstoreConfig;

/// Error returned by admin operations, carrying the status code the REST adapter answers with.
#[derive(Debug, Clone, Error, Serialize, PartialEq, Eq)]
#[error("{message}")]
pub struct ApiError {
    /// HTTP status code.
    pub status: u16,
    /// Error category, such as `validation` or `not_found`.
    pub kind: &'static str,
    /// Human-readable description.
    pub message: String,
}

impl ApiError {
    /// A 400 validation error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: 400,
            kind: "validation",
            message: message.into(),
        }
    }
}

impl From<PolicyError> for ApiError {
    fn from(e: PolicyError) -> Self {
        Self {
            status: e.http_status(),
            kind: e.kind().as_str(),
            message: e.to_string(),
        }
    }
}

/// Result type of admin operations.
pub type ApiResult<T> = Result<T, ApiError>;

/// Body of a lifecycle policy creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddLifecyclePolicyRequest {
    /// Unique id.
    pub id: String,
    /// Key prefix the policy applies to.
    #[serde(default)]
    pub prefix: String,
    /// Age in seconds after which objects expire.
    pub retention_seconds: u64,
    /// `delete` or `archive`.
    pub action: String,
    /// Backend type of the archive destination; required for `archive`.
    #[serde(default)]
    pub destination_type: Option<String>,
    /// Settings for the archive destination backend.
    #[serde(default)]
    pub destination_settings: HashMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

/// Body of a replication policy creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddReplicationPolicyRequest {
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
    /// Seconds between scheduled runs.
    pub check_interval_seconds: u64,
    /// Defaults to true.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// `transparent` (the default) or `opaque`.
    #[serde(default)]
    pub replication_mode: String,
    /// Encryption layers.
    #[serde(default)]
    pub encryption: Option<EncryptionPolicy>,
}

impl AddReplicationPolicyRequest {
    /// Converts the request into a policy, rejecting an unknown mode.
    pub fn into_policy(self) -> ApiResult<ReplicationPolicy> {
        let mode = ReplicationMode::parse(&self.replication_mode)?;
        Ok(ReplicationPolicy {
            id: self.id,
            source_backend: self.source_backend,
            source_settings: self.source_settings,
            source_prefix: self.source_prefix,
            destination_backend: self.destination_backend,
            destination_settings: self.destination_settings,
            check_interval: Duration::from_secs(self.check_interval_seconds),
            enabled: self.enabled,
            replication_mode: mode,
            encryption: self.encryption,
            last_sync_time: None,
        })
    }
}

/// Sync request: one policy, or every enabled policy when `policy_id` is absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerSyncRequest {
    /// Policy to run.
    #[serde(default)]
    pub policy_id: Option<String>,
    /// Copies in flight for a single-policy run; zero or absent runs sequentially.
    #[serde(default)]
    pub parallel_workers: Option<usize>,
    /// Apply the policy's pending change log entries instead of listing the source.
    #[serde(default)]
    pub incremental: bool,
}

/// A source change to append to the change log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordChangeRequest {
    /// Object key on the source backend.
    pub key: String,
    /// `put` or `delete`.
    pub operation: ChangeOperation,
    /// ETag after a put.
    #[serde(default)]
    pub etag: Option<String>,
    /// Size after a put.
    #[serde(default)]
    pub size: Option<u64>,
}

/// Lifecycle policy as reported by the admin API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecyclePolicyView {
    /// Unique id.
    pub id: String,
    /// Key prefix.
    pub prefix: String,
    /// Retention in seconds.
    pub retention_seconds: u64,
    /// `delete` or `archive`.
    pub action: &'static str,
    /// Whether an archive destination is bound.
    pub has_destination: bool,
}

impl From<&LifecyclePolicy> for LifecyclePolicyView {
    fn from(p: &LifecyclePolicy) -> Self {
        Self {
            id: p.id.clone(),
            prefix: p.prefix.clone(),
            retention_seconds: p.retention.as_secs(),
            action: p.action.as_str(),
            has_destination: p.destination.is_some(),
        }
    }
}

/// A list of policies with its length.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyList<T> {
    /// The policies, ordered by id.
    pub policies: Vec<T>,
    /// Number of policies.
    pub count: usize,
}

impl<T> From<Vec<T>> for PolicyList<T> {
    fn from(policies: Vec<T>) -> Self {
        let count = policies.len();
        Self { policies, count }
    }
}

/// Admin operations over the facade and both policy engines.
pub struct AdminService {
    facade: Arc<Facade>,
    lifecycle: Arc<LifecycleManager>,
    replication: Arc<ReplicationManager>,
    scheduler: Option<Arc<Scheduler>>,
    shutdown: CancellationToken,
}

impl AdminService {
    /// Service over already built managers, without a scheduler.
    pub fn new(
        facade: Arc<Facade>,
        lifecycle: Arc<LifecycleManager>,
        replication: Arc<ReplicationManager>,
    ) -> Self {
        Self {
            facade,
            lifecycle,
            replication,
            scheduler: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Keeps `scheduler` in step with policies added or removed through this service.
    pub fn with_scheduler(mut self, scheduler: Arc<Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Wires storage, providers, both managers and (when enabled) the scheduler from config.
    pub async fn from_config(config: &ObjstoreConfig) -> anyhow::Result<Self> {
        let facade = Arc::new(Facade::with_config(config.facade_config()).await?);
        let providers = config.provider_registry()?;

        let mut replication = ReplicationManager::new(facade.clone())
            .with_providers(providers)
            .with_options(config.replication.manager_options());
        if let Some(path) = &config.replication.policy_file {
            replication = replication
                .with_policy_file(PolicyFile::new(path.clone()))
                .await?;
        }
        if let Some(path) = &config.replication.change_log {
            replication = replication.with_change_log(Arc::new(ChangeLog::new(
                path.clone(),
                config.replication.change_log_max_bytes,
            )));
        }
        for policy in &config.replication.policies {
            match replication.add_policy(policy.clone()).await {
                Ok(()) => {}
                Err(PolicyError::PolicyAlreadyExists { .. }) => {
                    info!(policy_id = %policy.id, "configured policy already stored, keeping stored copy");
                }
                Err(e) => return Err(e.into()),
            }
        }
        let replication = Arc::new(replication);

        let lifecycle = LifecycleManager::from_facade(&facade, config.lifecycle.backend.as_deref())?;
        for policy in &config.lifecycle.policies {
            lifecycle.add_policy(policy.build().await?)?;
        }

        let mut service = Self::new(facade, Arc::new(lifecycle), replication.clone());
        if config.replication.scheduler_enabled {
            service = service.with_scheduler(Arc::new(Scheduler::new(replication)));
        }
        Ok(service)
    }

    /// Backend facade.
    pub fn facade(&self) -> &Arc<Facade> {
        &self.facade
    }

    /// Lifecycle manager.
    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    /// Replication manager.
    pub fn replication(&self) -> &Arc<ReplicationManager> {
        &self.replication
    }

    /// Replication scheduler, when enabled.
    pub fn scheduler(&self) -> Option<&Arc<Scheduler>> {
        self.scheduler.as_ref()
    }

    /// Token cancelled by [`AdminService::shutdown`]; on-demand runs observe it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Starts the scheduler loops. Returns how many policies were scheduled.
    pub fn start(&self) -> usize {
        self.scheduler.as_ref().map_or(0, |s| s.start())
    }

    /// Cancels in-flight runs and stops the scheduler.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(scheduler) = &self.scheduler {
            scheduler.shutdown().await;
        }
    }

    /// Adds a lifecycle policy. `archive` requires `destination_type`.
    pub async fn add_lifecycle_policy(
        &self,
        req: AddLifecyclePolicyRequest,
    ) -> ApiResult<LifecyclePolicyView> {
        let action = LifecycleAction::parse(&req.action)?;
        let destination = match (&action, &req.destination_type) {
            (LifecycleAction::Archive, Some(kind)) => Some(
                new_archiver(kind, &req.destination_settings)
                    .await
                    .map_err(PolicyError::from)?,
            ),
            (LifecycleAction::Archive, None) => {
                return Err(ApiError::bad_request(
                    "destination_type is required for archive action",
                ))
            }
            (LifecycleAction::Delete, _) => None,
        };
        let policy = LifecyclePolicy {
            id: req.id,
            prefix: req.prefix,
            retention: Duration::from_secs(req.retention_seconds),
            action,
            destination,
        };
        let view = LifecyclePolicyView::from(&policy);
        self.lifecycle.add_policy(policy)?;
        Ok(view)
    }

    /// Removes a lifecycle policy.
    pub fn remove_lifecycle_policy(&self, id: &str) -> ApiResult<()> {
        Ok(self.lifecycle.remove_policy(id)?)
    }

    /// Lifecycle policies ordered by id.
    pub fn list_lifecycle_policies(&self) -> PolicyList<LifecyclePolicyView> {
        self.lifecycle
            .get_policies()
            .iter()
            .map(LifecyclePolicyView::from)
            .collect::<Vec<_>>()
            .into()
    }

    /// Runs one lifecycle sweep now.
    pub async fn apply_lifecycle_policies(&self) -> ApiResult<SweepReport> {
        let token = self.shutdown.child_token();
        Ok(self.lifecycle.apply_policies(&token).await?)
    }

    /// Adds a replication policy and schedules it.
    pub async fn add_replication_policy(
        &self,
        req: AddReplicationPolicyRequest,
    ) -> ApiResult<ReplicationPolicy> {
        let policy = req.into_policy()?;
        let id = policy.id.clone();
        self.replication.add_policy(policy).await?;
        if let Some(scheduler) = &self.scheduler {
            if let Err(e) = scheduler.schedule(&id) {
                warn!(policy_id = %id, error = %e, "failed to schedule new policy");
            }
        }
        Ok(self.replication.get_policy(&id)?)
    }

    /// Removes a replication policy and stops its schedule.
    pub async fn remove_replication_policy(&self, id: &str) -> ApiResult<()> {
        self.replication.remove_policy(id).await?;
        if let Some(scheduler) = &self.scheduler {
            scheduler.unschedule(id);
        }
        Ok(())
    }

    /// One replication policy.
    pub fn get_replication_policy(&self, id: &str) -> ApiResult<ReplicationPolicy> {
        Ok(self.replication.get_policy(id)?)
    }

    /// Replication policies ordered by id.
    pub fn list_replication_policies(&self) -> PolicyList<ReplicationPolicy> {
        self.replication.get_policies().into()
    }

    /// Runs replication now: one policy, or every enabled policy. Incremental runs need a
    /// policy id.
    pub async fn trigger_sync(&self, req: TriggerSyncRequest) -> ApiResult<SyncResult> {
        let token = self.shutdown.child_token();
        let result = match req.policy_id.as_deref() {
            None | Some("") if req.incremental => {
                return Err(ApiError::bad_request("incremental sync requires a policy_id"))
            }
            None | Some("") => self.replication.sync_all(&token).await?,
            Some(id) if req.incremental => {
                self.replication.sync_policy_incremental(&token, id).await?
            }
            Some(id) => match req.parallel_workers {
                Some(workers) if workers > 0 => {
                    self.replication
                        .sync_policy_parallel(&token, id, workers)
                        .await?
                }
                _ => self.replication.sync_policy(&token, id).await?,
            },
        };
        Ok(result)
    }

    /// Cumulative status of a replication policy.
    pub fn replication_status(&self, id: &str) -> ApiResult<ReplicationStatus> {
        Ok(self.replication.get_replication_status(id)?)
    }

    /// Appends a source change to the change log. 400 when no change log is configured.
    pub async fn record_change(&self, req: RecordChangeRequest) -> ApiResult<ChangeEvent> {
        let log = self
            .replication
            .change_log()
            .ok_or_else(|| ApiError::bad_request("no change log is configured"))?;
        objstore_storage::validation::validate_key(&req.key).map_err(PolicyError::from)?;

        let mut event = match req.operation {
            ChangeOperation::Put => ChangeEvent::put(req.key),
            ChangeOperation::Delete => ChangeEvent::delete(req.key),
        };
        event.etag = req.etag;
        event.size = req.size;
        log.record(event.clone()).await?;
        Ok(event)
    }
}
