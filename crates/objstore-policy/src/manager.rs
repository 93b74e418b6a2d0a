//! Replication manager: policy registry, sync entry points and status.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use dashmap::DashMap;
use objstore_crypt::{EncrypterFactory, ProviderRegistry};
use objstore_storage::{new_backend, Facade, StorageBackend, StorageError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::changelog::ChangeLog;
use crate::error::{PolicyError, PolicyResult};
use crate::layers::{CopyPlan, LayerFactories};
use crate::persist::PolicyFile;
use crate::replication::{ReplicationPolicy, ReplicationStatus, SyncResult};
use crate::status::StatusAccumulator;
use crate::store::PolicyStore;
use crate::syncer::Syncer;

/// Policy id used for the aggregate result of [`ReplicationManager::sync_all`].
pub const ALL_POLICIES: &str = "all";

/// Default number of in-flight copies for parallel syncs.
pub const DEFAULT_PARALLEL_WORKERS: usize = 4;

/// Tunables for [`ReplicationManager`].
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Worker count used by `sync_policy_parallel` when the caller passes zero.
    pub parallel_workers: usize,
    /// Skip objects whose destination copy is current.
    pub skip_unchanged: bool,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            parallel_workers: DEFAULT_PARALLEL_WORKERS,
            skip_unchanged: false,
        }
    }
}

/// Owns replication policies and runs them against facade backends.
pub struct ReplicationManager {
    facade: Arc<Facade>,
    providers: Arc<ProviderRegistry>,
    policies: PolicyStore<ReplicationPolicy>,
    factories: DashMap<String, LayerFactories>,
    status: StatusAccumulator,
    policy_file: Option<PolicyFile>,
    change_log: Option<Arc<ChangeLog>>,
    options: ManagerOptions,
}

impl fmt::Debug for ReplicationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicationManager")
            .field("policies", &self.policies.len())
            .field("policy_file", &self.policy_file.as_ref().map(|p| p.path().to_path_buf()))
            .field("change_log", &self.change_log.as_ref().map(|l| l.path().to_path_buf()))
            .field("options", &self.options)
            .finish()
    }
}

enum Runner<'a> {
    Sequential,
    Parallel(usize),
    Incremental(&'a ChangeLog),
}

impl ReplicationManager {
    /// Manager resolving backends through `facade`.
    pub fn new(facade: Arc<Facade>) -> Self {
        Self {
            facade,
            providers: Arc::new(ProviderRegistry::new()),
            policies: PolicyStore::new(),
            factories: DashMap::new(),
            status: StatusAccumulator::new(),
            policy_file: None,
            change_log: None,
            options: ManagerOptions::default(),
        }
    }

    /// Uses `providers` to resolve encryption layers without an installed factory.
    pub fn with_providers(mut self, providers: Arc<ProviderRegistry>) -> Self {
        self.providers = providers;
        self
    }

    /// Replaces the tunables.
    pub fn with_options(mut self, options: ManagerOptions) -> Self {
        self.options = options;
        self
    }

    /// Loads policies from `file` and keeps it up to date from now on. Invalid stored policies
    /// are skipped.
    pub async fn with_policy_file(mut self, file: PolicyFile) -> PolicyResult<Self> {
        let loaded = file.load().await?;
        let valid = loaded.into_iter().filter(|p| match p.validate() {
            Ok(()) => true,
            Err(e) => {
                warn!(policy_id = %p.id, error = %e, "skipping invalid stored policy");
                false
            }
        });
        let added = self.policies.extend(valid);
        info!(count = added, "replication policies restored");
        self.policy_file = Some(file);
        Ok(self)
    }

    /// Source change log consumed by [`ReplicationManager::sync_policy_incremental`].
    pub fn with_change_log(mut self, log: Arc<ChangeLog>) -> Self {
        self.change_log = Some(log);
        self
    }

    /// The configured change log, if any.
    pub fn change_log(&self) -> Option<&Arc<ChangeLog>> {
        self.change_log.as_ref()
    }

    /// Current tunables.
    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    /// Provider registry used for layer resolution.
    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    async fn persist(&self) -> PolicyResult<()> {
        match &self.policy_file {
            Some(file) => file.save_with(|| self.policies.list()).await,
            None => Ok(()),
        }
    }

    /// Validates and registers a policy.
    pub async fn add_policy(&self, policy: ReplicationPolicy) -> PolicyResult<()> {
        policy.validate()?;
        let id = policy.id.clone();
        self.policies.add(policy)?;

        if let Err(e) = self.persist().await {
            let _ = self.policies.remove(&id);
            return Err(e);
        }
        info!(policy_id = %id, "replication policy added");
        Ok(())
    }

    /// Unregisters a policy and drops its factories and status.
    pub async fn remove_policy(&self, id: &str) -> PolicyResult<()> {
        let removed = self.policies.remove(id)?;

        if let Err(e) = self.persist().await {
            self.policies.extend([removed]);
            return Err(e);
        }
        self.factories.remove(id);
        self.status.remove(id);
        info!(policy_id = %id, "replication policy removed");
        Ok(())
    }

    /// One policy by id.
    pub fn get_policy(&self, id: &str) -> PolicyResult<ReplicationPolicy> {
        self.policies.get(id)
    }

    /// All policies, ordered by id.
    pub fn get_policies(&self) -> Vec<ReplicationPolicy> {
        self.policies.list()
    }

    fn install_factory<F>(&self, id: &str, set: F) -> PolicyResult<()>
    where
        F: FnOnce(&mut LayerFactories),
    {
        if !self.policies.contains(id) {
            return Err(PolicyError::not_found(id));
        }
        let mut entry = self.factories.entry(id.to_string()).or_default();
        set(entry.value_mut());
        Ok(())
    }

    /// Installs the at-rest layer factory for a policy.
    pub fn set_backend_encrypter_factory(
        &self,
        id: &str,
        factory: Arc<dyn EncrypterFactory>,
    ) -> PolicyResult<()> {
        self.install_factory(id, |f| f.backend = Some(factory))
    }

    /// Installs the source decrypt factory for a policy.
    pub fn set_source_encrypter_factory(
        &self,
        id: &str,
        factory: Arc<dyn EncrypterFactory>,
    ) -> PolicyResult<()> {
        self.install_factory(id, |f| f.source = Some(factory))
    }

    /// Installs the destination encrypt factory for a policy.
    pub fn set_destination_encrypter_factory(
        &self,
        id: &str,
        factory: Arc<dyn EncrypterFactory>,
    ) -> PolicyResult<()> {
        self.install_factory(id, |f| f.destination = Some(factory))
    }

    /// Resolves a backend: a registered facade name first, otherwise one built from `settings`.
    async fn resolve_backend(
        &self,
        name: &str,
        settings: &HashMap<String, String>,
    ) -> PolicyResult<Arc<dyn StorageBackend>> {
        match self.facade.backend(name) {
            Ok(backend) => Ok(backend),
            Err(
                StorageError::BackendNotFound { .. }
                | StorageError::NotInitialized
                | StorageError::InvalidBackendName { .. },
            ) if !settings.is_empty() => {
                debug!(backend = %name, "building backend from policy settings");
                Ok(new_backend(name, settings).await?)
            }
            Err(StorageError::BackendNotFound { .. }) => Err(PolicyError::BackendNotFound {
                name: name.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn prepare(&self, id: &str) -> PolicyResult<(ReplicationPolicy, Syncer)> {
        let policy = self.policies.get(id)?;
        let factories = self
            .factories
            .get(id)
            .map(|f| f.value().clone())
            .unwrap_or_default();
        let plan = CopyPlan::resolve(&policy, &factories, &self.providers)?;

        let source = self
            .resolve_backend(&policy.source_backend, &policy.source_settings)
            .await?;
        let dest = self
            .resolve_backend(&policy.destination_backend, &policy.destination_settings)
            .await?;

        let syncer =
            Syncer::new(&policy.id, source, dest, plan).skip_unchanged(self.options.skip_unchanged);
        Ok((policy, syncer))
    }

    async fn run_policy(
        &self,
        token: &CancellationToken,
        id: &str,
        runner: Runner<'_>,
    ) -> PolicyResult<SyncResult> {
        let (policy, syncer) = self.prepare(id).await?;
        let result = match runner {
            Runner::Sequential => syncer.run(token, &policy.source_prefix).await?,
            Runner::Parallel(workers) => {
                syncer
                    .run_parallel(token, &policy.source_prefix, workers)
                    .await?
            }
            Runner::Incremental(log) => {
                syncer
                    .run_incremental(token, &policy.source_prefix, log)
                    .await?
            }
        };
        self.complete(id, &result).await;
        Ok(result)
    }

    /// Records a finished run on the policy and its status.
    async fn complete(&self, id: &str, result: &SyncResult) {
        let now = Utc::now();
        if self
            .policies
            .modify(id, |p| p.last_sync_time = Some(now))
            .is_err()
        {
            debug!(policy_id = %id, "policy removed during sync, not recording status");
            return;
        }
        self.status.update(id, result, now);
        if let Err(e) = self.persist().await {
            warn!(policy_id = %id, error = %e, "failed to persist last sync time");
        }
    }

    /// Copies every object of one policy. Per-object failures are reported in the result.
    pub async fn sync_policy(
        &self,
        token: &CancellationToken,
        id: &str,
    ) -> PolicyResult<SyncResult> {
        self.run_policy(token, id, Runner::Sequential).await
    }

    /// Like [`ReplicationManager::sync_policy`] with up to `workers` copies in flight; zero uses
    /// the configured default.
    pub async fn sync_policy_parallel(
        &self,
        token: &CancellationToken,
        id: &str,
        workers: usize,
    ) -> PolicyResult<SyncResult> {
        let workers = if workers == 0 {
            self.options.parallel_workers
        } else {
            workers
        };
        self.run_policy(token, id, Runner::Parallel(workers)).await
    }

    /// Applies the policy's pending change log entries: puts are copied and deletes are
    /// propagated to the destination. Fails with a validation error when no change log is
    /// configured.
    pub async fn sync_policy_incremental(
        &self,
        token: &CancellationToken,
        id: &str,
    ) -> PolicyResult<SyncResult> {
        let log = self
            .change_log
            .clone()
            .ok_or_else(|| PolicyError::invalid("change_log", "no change log is configured"))?;
        self.run_policy(token, id, Runner::Incremental(&log)).await
    }

    /// Syncs every enabled policy. A policy that cannot run counts as one failure with an
    /// `"<id>: <error>"` entry; the remaining policies still run.
    pub async fn sync_all(&self, token: &CancellationToken) -> PolicyResult<SyncResult> {
        let started = Instant::now();
        let mut total = SyncResult::new(ALL_POLICIES);

        for policy in self.policies.list() {
            if !policy.enabled {
                debug!(policy_id = %policy.id, "skipping disabled policy");
                continue;
            }
            if token.is_cancelled() {
                total.cancelled = true;
                break;
            }
            match self.sync_policy(token, &policy.id).await {
                Ok(result) => total.merge(&result),
                Err(e) => {
                    warn!(policy_id = %policy.id, error = %e, "policy sync failed");
                    total.failed += 1;
                    total.errors.push(format!("{}: {}", policy.id, e));
                }
            }
        }

        total.duration = started.elapsed();
        info!(
            synced = total.synced,
            failed = total.failed,
            bytes = total.bytes_total,
            "sync of all policies finished"
        );
        Ok(total)
    }

    /// Cumulative status of a policy. NotFound until the policy has completed a run.
    pub fn get_replication_status(&self, id: &str) -> PolicyResult<ReplicationStatus> {
        let policy = self.policies.get(id)?;
        let snapshot = self
            .status
            .get(id)
            .ok_or_else(|| PolicyError::not_found(id))?;
        Ok(snapshot.into_status(&policy))
    }
}
