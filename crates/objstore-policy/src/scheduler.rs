//! Per-policy background sync loops.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{PolicyError, PolicyResult};
use crate::manager::ReplicationManager;

struct ScheduledTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Runs each enabled policy every `check_interval`, alongside on-demand syncs.
pub struct Scheduler {
    manager: Arc<ReplicationManager>,
    root: CancellationToken,
    tasks: Mutex<HashMap<String, ScheduledTask>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("scheduled", &self.scheduled())
            .field("cancelled", &self.root.is_cancelled())
            .finish()
    }
}

impl Scheduler {
    /// Scheduler for `manager`'s policies. Nothing runs until [`Scheduler::start`] or
    /// [`Scheduler::schedule`].
    pub fn new(manager: Arc<ReplicationManager>) -> Self {
        Self {
            manager,
            root: CancellationToken::new(),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Schedules every enabled policy. Returns how many loops were started.
    pub fn start(&self) -> usize {
        let mut started = 0;
        for policy in self.manager.get_policies() {
            match self.schedule(&policy.id) {
                Ok(true) => started += 1,
                Ok(false) => {}
                Err(e) => warn!(policy_id = %policy.id, error = %e, "failed to schedule policy"),
            }
        }
        info!(started, "replication scheduler started");
        started
    }

    /// Starts the loop for one policy. Returns false when the policy is disabled or already
    /// scheduled.
    pub fn schedule(&self, id: &str) -> PolicyResult<bool> {
        if self.root.is_cancelled() {
            return Ok(false);
        }
        let policy = self.manager.get_policy(id)?;
        if !policy.enabled {
            debug!(policy_id = %id, "not scheduling disabled policy");
            return Ok(false);
        }

        let mut tasks = self.tasks.lock();
        if let Some(task) = tasks.get(id) {
            if !task.handle.is_finished() {
                return Ok(false);
            }
        }

        let token = self.root.child_token();
        let handle = tokio::spawn(policy_loop(
            self.manager.clone(),
            policy.id.clone(),
            policy.check_interval,
            token.clone(),
        ));
        tasks.insert(policy.id, ScheduledTask { token, handle });
        Ok(true)
    }

    /// Stops one policy's loop. Returns whether a loop was running.
    pub fn unschedule(&self, id: &str) -> bool {
        match self.tasks.lock().remove(id) {
            Some(task) => {
                task.token.cancel();
                !task.handle.is_finished()
            }
            None => false,
        }
    }

    /// Ids of policies with a live loop, sorted.
    pub fn scheduled(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .tasks
            .lock()
            .iter()
            .filter(|(_, task)| !task.handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Cancels every loop and waits for in-flight runs to stop.
    pub async fn shutdown(&self) {
        self.root.cancel();
        let tasks: Vec<ScheduledTask> = self.tasks.lock().drain().map(|(_, t)| t).collect();
        for task in tasks {
            if let Err(e) = task.handle.await {
                warn!(error = %e, "scheduled sync task panicked");
            }
        }
        info!("replication scheduler stopped");
    }
}

async fn policy_loop(
    manager: Arc<ReplicationManager>,
    id: String,
    period: Duration,
    token: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(policy_id = %id, period_ms = period.as_millis() as u64, "policy loop started");

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                match manager.sync_policy(&token, &id).await {
                    Ok(result) => debug!(
                        policy_id = %id,
                        synced = result.synced,
                        failed = result.failed,
                        "scheduled sync finished"
                    ),
                    Err(PolicyError::PolicyNotFound { .. }) => {
                        info!(policy_id = %id, "policy removed, stopping its loop");
                        break;
                    }
                    Err(e) => warn!(policy_id = %id, error = %e, "scheduled sync failed"),
                }
            }
        }
    }
    debug!(policy_id = %id, "policy loop stopped");
}
