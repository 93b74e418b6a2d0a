//! Per-policy cumulative replication counters.
//!
//! Counters are atomics, so concurrent runs of the same policy never lose an update. The
//! last-sync time is last-writer-wins.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::replication::{ReplicationPolicy, ReplicationStatus, SyncResult};

#[derive(Debug, Default)]
struct Counters {
    objects_synced: AtomicU64,
    objects_deleted: AtomicU64,
    bytes_synced: AtomicU64,
    errors: AtomicU64,
    sync_count: AtomicU64,
    total_duration_nanos: AtomicU64,
    last_sync: RwLock<Option<DateTime<Utc>>>,
}

/// Point-in-time copy of one policy's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    /// Objects copied.
    pub total_objects_synced: u64,
    /// Objects deleted.
    pub total_objects_deleted: u64,
    /// Bytes copied.
    pub total_bytes_synced: u64,
    /// Error entries.
    pub total_errors: u64,
    /// Completed runs.
    pub sync_count: u64,
    /// Running mean of run durations.
    pub average_sync_duration: Duration,
    /// Completion time of the latest recorded run.
    pub last_sync_time: Option<DateTime<Utc>>,
}

impl StatusSnapshot {
    /// Combines the counters with the policy's descriptive fields.
    pub fn into_status(self, policy: &ReplicationPolicy) -> ReplicationStatus {
        ReplicationStatus {
            policy_id: policy.id.clone(),
            source_backend: policy.source_backend.clone(),
            destination_backend: policy.destination_backend.clone(),
            enabled: policy.enabled,
            total_objects_synced: self.total_objects_synced,
            total_objects_deleted: self.total_objects_deleted,
            total_bytes_synced: self.total_bytes_synced,
            total_errors: self.total_errors,
            last_sync_time: self.last_sync_time,
            average_sync_duration: self.average_sync_duration,
            sync_count: self.sync_count,
        }
    }
}

/// Cumulative counters for every policy that has completed at least one run.
#[derive(Debug, Default)]
pub struct StatusAccumulator {
    policies: DashMap<String, Arc<Counters>>,
}

impl StatusAccumulator {
    /// Empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one run into the policy's counters.
    pub fn update(&self, policy_id: &str, result: &SyncResult, completed_at: DateTime<Utc>) {
        let counters = self
            .policies
            .entry(policy_id.to_string())
            .or_default()
            .clone();

        counters.objects_synced.fetch_add(result.synced, Ordering::Relaxed);
        counters.objects_deleted.fetch_add(result.deleted, Ordering::Relaxed);
        counters.bytes_synced.fetch_add(result.bytes_total, Ordering::Relaxed);
        counters
            .errors
            .fetch_add(result.errors.len() as u64, Ordering::Relaxed);
        let nanos = u64::try_from(result.duration.as_nanos()).unwrap_or(u64::MAX);
        counters
            .total_duration_nanos
            .fetch_add(nanos, Ordering::Relaxed);
        counters.sync_count.fetch_add(1, Ordering::Release);
        *counters.last_sync.write() = Some(completed_at);
    }

    /// Counters for a policy, or `None` if it never completed a run.
    pub fn get(&self, policy_id: &str) -> Option<StatusSnapshot> {
        let counters = self.policies.get(policy_id)?.clone();
        let sync_count = counters.sync_count.load(Ordering::Acquire);
        let total_nanos = counters.total_duration_nanos.load(Ordering::Relaxed);
        let average_sync_duration = if sync_count == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(total_nanos / sync_count)
        };
        let last_sync_time = *counters.last_sync.read();

        Some(StatusSnapshot {
            total_objects_synced: counters.objects_synced.load(Ordering::Relaxed),
            total_objects_deleted: counters.objects_deleted.load(Ordering::Relaxed),
            total_bytes_synced: counters.bytes_synced.load(Ordering::Relaxed),
            total_errors: counters.errors.load(Ordering::Relaxed),
            sync_count,
            average_sync_duration,
            last_sync_time,
        })
    }

    /// Forgets a policy.
    pub fn remove(&self, policy_id: &str) {
        self.policies.remove(policy_id);
    }
}
