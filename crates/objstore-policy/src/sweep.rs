//! Lifecycle sweep engine.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use objstore_storage::{Facade, ObjectInfo, StorageBackend, StorageError};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::PolicyResult;
use crate::lifecycle::{LifecycleAction, LifecyclePolicy};
use crate::store::PolicyStore;

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Number of policies evaluated.
    pub policies_count: usize,
    /// Actions that completed.
    pub objects_processed: usize,
    /// Matching objects not acted on: age unknown, or already gone.
    pub objects_skipped: usize,
    /// Actions that failed.
    pub failed: usize,
    /// One `"<policy>: <key>: <error>"` entry per failure.
    pub errors: Vec<String>,
    /// Whether the sweep stopped early on cancellation.
    pub cancelled: bool,
}

enum Outcome {
    Done,
    Gone,
}

/// Owns the lifecycle policy store and sweeps one backend.
pub struct LifecycleManager {
    backend: Arc<dyn StorageBackend>,
    policies: PolicyStore<LifecyclePolicy>,
}

impl LifecycleManager {
    /// Manager sweeping `backend`.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            policies: PolicyStore::new(),
        }
    }

    /// Manager sweeping a facade backend: the named one, or the default.
    pub fn from_facade(facade: &Facade, backend: Option<&str>) -> PolicyResult<Self> {
        let backend = match backend {
            Some(name) => facade.backend(name)?,
            None => facade.default_backend()?,
        };
        Ok(Self::new(backend))
    }

    /// Validates and registers a policy.
    pub fn add_policy(&self, policy: LifecyclePolicy) -> PolicyResult<()> {
        policy.validate()?;
        let id = policy.id.clone();
        self.policies.add(policy)?;
        info!(policy_id = %id, "lifecycle policy added");
        Ok(())
    }

    /// Unregisters a policy.
    pub fn remove_policy(&self, id: &str) -> PolicyResult<()> {
        self.policies.remove(id)?;
        info!(policy_id = %id, "lifecycle policy removed");
        Ok(())
    }

    /// One policy by id.
    pub fn get_policy(&self, id: &str) -> PolicyResult<LifecyclePolicy> {
        self.policies.get(id)
    }

    /// All policies, ordered by id.
    pub fn get_policies(&self) -> Vec<LifecyclePolicy> {
        self.policies.list()
    }

    /// Sweeps using the current time.
    pub async fn apply_policies(&self, token: &CancellationToken) -> PolicyResult<SweepReport> {
        self.apply_policies_at(token, Utc::now()).await
    }

    /// Sweeps as if the current time were `now`.
    ///
    /// Every policy is evaluated against the full listing independently, so overlapping
    /// policies may both act on one object; an object already removed counts as skipped.
    pub async fn apply_policies_at(
        &self,
        token: &CancellationToken,
        now: DateTime<Utc>,
    ) -> PolicyResult<SweepReport> {
        let policies = self.policies.list();
        let mut report = SweepReport {
            policies_count: policies.len(),
            ..SweepReport::default()
        };
        if policies.is_empty() {
            return Ok(report);
        }

        let objects = self.list_candidates(&policies).await?;
        debug!(objects = objects.len(), policies = policies.len(), "lifecycle sweep started");

        'policies: for policy in &policies {
            for object in objects.iter().filter(|o| policy.matches(&o.key)) {
                if token.is_cancelled() {
                    report.cancelled = true;
                    break 'policies;
                }

                let Some(last_modified) = object.metadata.as_ref().and_then(|m| m.last_modified)
                else {
                    report.objects_skipped += 1;
                    continue;
                };
                if !policy.is_expired(last_modified, now) {
                    continue;
                }

                match self.apply_action(policy, &object.key).await {
                    Ok(Outcome::Done) => report.objects_processed += 1,
                    Ok(Outcome::Gone) => report.objects_skipped += 1,
                    Err(e) => {
                        warn!(policy_id = %policy.id, key = %object.key, error = %e, "lifecycle action failed");
                        report.failed += 1;
                        report.errors.push(format!("{}: {}: {}", policy.id, object.key, e));
                    }
                }
            }
        }

        info!(
            policies = report.policies_count,
            processed = report.objects_processed,
            skipped = report.objects_skipped,
            failed = report.failed,
            cancelled = report.cancelled,
            "lifecycle sweep finished"
        );
        Ok(report)
    }

    /// Sweeps every `interval` until `token` is cancelled.
    pub async fn run(&self, interval: Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = interval.as_secs_f64(), "lifecycle sweeper started");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.apply_policies(&token).await {
                        warn!(error = %e, "scheduled lifecycle sweep failed");
                    }
                }
            }
        }
        info!("lifecycle sweeper stopped");
    }

    /// Lists the union of the policies' prefixes. An empty prefix lists everything once.
    async fn list_candidates(&self, policies: &[LifecyclePolicy]) -> PolicyResult<Vec<ObjectInfo>> {
        let mut prefixes: Vec<&str> = policies.iter().map(|p| p.prefix.as_str()).collect();
        prefixes.sort_unstable();
        prefixes.dedup();
        if prefixes.contains(&"") {
            prefixes = vec![""];
        }

        let mut objects = Vec::new();
        for prefix in prefixes {
            objects.extend(self.backend.list(prefix).await?);
        }
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        objects.dedup_by(|a, b| a.key == b.key);
        Ok(objects)
    }

    async fn apply_action(&self, policy: &LifecyclePolicy, key: &str) -> Result<Outcome, StorageError> {
        let result = match policy.action {
            LifecycleAction::Delete => self.backend.delete(key).await,
            LifecycleAction::Archive => {
                let Some(archiver) = policy.destination.as_ref() else {
                    return Err(StorageError::InvalidConfig {
                        reason: "archive policy has no destination".to_string(),
                    });
                };
                match self.backend.get(key).await {
                    Ok(data) => archiver.put(key, data).await,
                    Err(e) => Err(e),
                }
            }
        };

        match result {
            Ok(()) => {
                debug!(policy_id = %policy.id, key = %key, action = %policy.action, "lifecycle action applied");
                Ok(Outcome::Done)
            }
            Err(e) if e.is_not_found() => {
                debug!(policy_id = %policy.id, key = %key, "object already gone");
                Ok(Outcome::Gone)
            }
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("backend", &self.backend.kind())
            .field("policies", &self.policies.len())
            .finish()
    }
}
