//! Copies one policy's objects from source to destination.

use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use objstore_storage::{Metadata, ObjectInfo, StorageBackend};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::changelog::{coalesce, ChangeEvent, ChangeLog, ChangeOperation};
use crate::detector::needs_copy;
use crate::error::PolicyResult;
use crate::layers::CopyPlan;
use crate::replication::SyncResult;

enum ObjectOutcome {
    Copied(u64),
    Unchanged,
    Failed(String),
    NotStarted,
}

/// A resolved sync run: both backends, the copy plan, and options.
pub struct Syncer {
    policy_id: String,
    source: Arc<dyn StorageBackend>,
    dest: Arc<dyn StorageBackend>,
    plan: CopyPlan,
    skip_unchanged: bool,
}

impl Syncer {
    /// Syncer copying every listed object.
    pub fn new(
        policy_id: impl Into<String>,
        source: Arc<dyn StorageBackend>,
        dest: Arc<dyn StorageBackend>,
        plan: CopyPlan,
    ) -> Self {
        Self {
            policy_id: policy_id.into(),
            source,
            dest,
            plan,
            skip_unchanged: false,
        }
    }

    /// Skip objects whose destination copy is current. With a destination encrypt layer every
    /// object looks changed, since ciphertexts never repeat.
    pub fn skip_unchanged(mut self, skip: bool) -> Self {
        self.skip_unchanged = skip;
        self
    }

    /// Copies one object. Returns the number of source bytes read.
    pub async fn sync_object(&self, key: &str, listed: Option<&Metadata>) -> PolicyResult<u64> {
        let data = self.source.get(key).await?;
        let metadata = match listed {
            Some(meta) => meta.clone(),
            None => self.source.metadata(key).await?,
        };
        let size = data.len() as u64;

        let (out, out_meta) = self.plan.apply(data, metadata)?;
        self.dest.put_with_metadata(key, out, out_meta).await?;
        debug!(policy_id = %self.policy_id, key = %key, size, "object synced");
        Ok(size)
    }

    async fn process(&self, token: &CancellationToken, object: &ObjectInfo) -> ObjectOutcome {
        if token.is_cancelled() {
            return ObjectOutcome::NotStarted;
        }
        if self.skip_unchanged
            && !needs_copy(self.dest.as_ref(), &object.key, object.metadata.as_ref()).await
        {
            return ObjectOutcome::Unchanged;
        }
        match self.sync_object(&object.key, object.metadata.as_ref()).await {
            Ok(size) => ObjectOutcome::Copied(size),
            Err(e) => {
                warn!(policy_id = %self.policy_id, key = %object.key, error = %e, "object sync failed");
                ObjectOutcome::Failed(e.to_string())
            }
        }
    }

    fn record(result: &mut SyncResult, key: &str, outcome: ObjectOutcome) {
        match outcome {
            ObjectOutcome::Copied(size) => result.record_success(size),
            ObjectOutcome::Failed(err) => result.record_failure(key, err),
            ObjectOutcome::Unchanged | ObjectOutcome::NotStarted => {}
        }
    }

    /// Copies every object under `prefix`, one at a time. Only a listing failure is an error.
    pub async fn run(&self, token: &CancellationToken, prefix: &str) -> PolicyResult<SyncResult> {
        let started = Instant::now();
        let mut result = SyncResult::new(&self.policy_id);
        let objects = self.source.list(prefix).await?;

        for object in &objects {
            if token.is_cancelled() {
                break;
            }
            let outcome = self.process(token, object).await;
            Self::record(&mut result, &object.key, outcome);
        }

        Ok(self.finish(result, token, started, objects.len()))
    }

    /// Like [`Syncer::run`] with up to `workers` objects in flight.
    pub async fn run_parallel(
        &self,
        token: &CancellationToken,
        prefix: &str,
        workers: usize,
    ) -> PolicyResult<SyncResult> {
        let started = Instant::now();
        let mut result = SyncResult::new(&self.policy_id);
        let objects = self.source.list(prefix).await?;
        let listed = objects.len();

        let mut outcomes = stream::iter(objects)
            .map(|object| async move {
                let outcome = self.process(token, &object).await;
                (object.key, outcome)
            })
            .buffer_unordered(workers.max(1));
        while let Some((key, outcome)) = outcomes.next().await {
            Self::record(&mut result, &key, outcome);
        }

        Ok(self.finish(result, token, started, listed))
    }

    /// Applies the changes `log` holds for this policy instead of listing the source. Puts are
    /// copied, deletes are removed from the destination. Only the newest change per key is
    /// applied; applied and superseded changes are marked processed. Changes outside `prefix`
    /// are marked processed without being applied.
    pub async fn run_incremental(
        &self,
        token: &CancellationToken,
        prefix: &str,
        log: &ChangeLog,
    ) -> PolicyResult<SyncResult> {
        let started = Instant::now();
        let mut result = SyncResult::new(&self.policy_id);
        let pending = log.unprocessed(&self.policy_id).await?;
        let listed = pending.len();
        debug!(policy_id = %self.policy_id, pending = listed, "incremental sync starting");

        let (latest, mut settled) = coalesce(pending);
        for event in latest {
            if token.is_cancelled() {
                break;
            }
            if !event.key.starts_with(prefix) {
                settled.push(event);
                continue;
            }
            if self.apply_change(&mut result, &event).await {
                settled.push(event);
            }
        }

        if let Err(e) = log.mark_processed(&self.policy_id, &settled).await {
            warn!(policy_id = %self.policy_id, error = %e, "failed to mark changes processed");
        }
        Ok(self.finish(result, token, started, listed))
    }

    /// Applies one change. Returns whether it is settled.
    async fn apply_change(&self, result: &mut SyncResult, event: &ChangeEvent) -> bool {
        match event.operation {
            ChangeOperation::Put => match self.sync_object(&event.key, None).await {
                Ok(size) => {
                    result.record_success(size);
                    true
                }
                Err(e) => {
                    warn!(policy_id = %self.policy_id, key = %event.key, error = %e, "object sync failed");
                    result.record_failure(&event.key, e);
                    false
                }
            },
            ChangeOperation::Delete => match self.dest.delete(&event.key).await {
                Ok(()) => {
                    debug!(policy_id = %self.policy_id, key = %event.key, "object deleted at destination");
                    result.record_deletion();
                    true
                }
                Err(e) if e.is_not_found() => true,
                Err(e) => {
                    warn!(policy_id = %self.policy_id, key = %event.key, error = %e, "object delete failed");
                    result.record_failure(&event.key, e);
                    false
                }
            },
        }
    }

    fn finish(
        &self,
        mut result: SyncResult,
        token: &CancellationToken,
        started: Instant,
        listed: usize,
    ) -> SyncResult {
        result.cancelled = token.is_cancelled();
        result.duration = started.elapsed();
        info!(
            policy_id = %self.policy_id,
            listed,
            synced = result.synced,
            deleted = result.deleted,
            failed = result.failed,
            bytes = result.bytes_total,
            cancelled = result.cancelled,
            duration_ms = result.duration.as_millis() as u64,
            "sync run finished"
        );
        result
    }
}
