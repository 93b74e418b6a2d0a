//! Lifecycle sweeps end to end over memory backends.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use bytes::Bytes;
use chrono::Duration;
use objstore_policy::{LifecycleManager, LifecyclePolicy, PolicyError};
use objstore_storage::{BackendArchiver, MemoryBackend, StorageBackend};
use tokio_util::sync::CancellationToken;

use crate::chaos::{Fault, FlakyBackend};
use crate::harness::TestEnv;

const DAY: StdDuration = StdDuration::from_secs(86_400);

#[tokio::test]
async fn test_expired_logs_deleted_and_fresh_kept() {
    let env = TestEnv::memory(&["primary"]).await.unwrap();
    env.seed("primary", &[("logs/old.log", b"old")], Duration::hours(48))
        .await
        .unwrap();
    env.seed("primary", &[("logs/new.log", b"new")], Duration::hours(1))
        .await
        .unwrap();
    env.seed("primary", &[("data/old.bin", b"keep")], Duration::hours(48))
        .await
        .unwrap();

    let manager = LifecycleManager::from_facade(&env.facade, None).unwrap();
    manager
        .add_policy(LifecyclePolicy::delete("p1", "logs/", DAY))
        .unwrap();

    let report = manager.apply_policies(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.policies_count, 1);
    assert_eq!(report.objects_processed, 1);
    assert_eq!(report.failed, 0);

    let primary = env.backend("primary");
    assert!(!primary.exists("logs/old.log").await.unwrap());
    assert!(primary.exists("logs/new.log").await.unwrap());
    assert!(primary.exists("data/old.bin").await.unwrap());
}

#[tokio::test]
async fn test_archive_copies_and_keeps_source() {
    let env = TestEnv::memory(&["primary"]).await.unwrap();
    env.seed("primary", &[("reports/q1.csv", b"a,b,c")], Duration::days(40))
        .await
        .unwrap();

    let cold = Arc::new(MemoryBackend::new());
    let manager = env.lifecycle("primary");
    manager
        .add_policy(LifecyclePolicy::archive(
            "cold",
            "reports/",
            30 * DAY,
            Arc::new(BackendArchiver::new(cold.clone())),
        ))
        .unwrap();

    let report = manager.apply_policies(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.objects_processed, 1);
    assert_eq!(cold.get("reports/q1.csv").await.unwrap(), Bytes::from_static(b"a,b,c"));
    assert!(env.backend("primary").exists("reports/q1.csv").await.unwrap());
}

#[tokio::test]
async fn test_failed_delete_does_not_abort_sweep() {
    let inner = Arc::new(MemoryBackend::new());
    let flaky = Arc::new(FlakyBackend::new(inner.clone()));
    for key in ["logs/a", "logs/b", "logs/c"] {
        inner
            .put_with_metadata(key, Bytes::from_static(b"x"), crate::harness::aged(Duration::days(3)))
            .await
            .unwrap();
    }
    flaky.inject(Fault::FailDelete("logs/b".into()));

    let manager = LifecycleManager::new(flaky);
    manager
        .add_policy(LifecyclePolicy::delete("p1", "logs/", DAY))
        .unwrap();

    let report = manager.apply_policies(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.objects_processed, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].starts_with("p1: logs/b: "));
    assert_eq!(inner.keys(), vec!["logs/b".to_string()]);
}

#[tokio::test]
async fn test_unknown_age_is_skipped() {
    let inner = Arc::new(MemoryBackend::new());
    let flaky = Arc::new(FlakyBackend::new(inner.clone()));
    inner
        .put_with_metadata("tmp/x", Bytes::from_static(b"x"), crate::harness::aged(Duration::days(9)))
        .await
        .unwrap();
    flaky.inject(Fault::HideListedMetadata);

    let manager = LifecycleManager::new(flaky);
    manager
        .add_policy(LifecyclePolicy::delete("tmp", "tmp/", DAY))
        .unwrap();

    let report = manager.apply_policies(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.objects_skipped, 1);
    assert_eq!(report.objects_processed, 0);
    assert!(inner.exists("tmp/x").await.unwrap());
}

#[tokio::test]
async fn test_listing_failure_is_an_error() {
    let flaky = Arc::new(FlakyBackend::new(Arc::new(MemoryBackend::new())));
    flaky.inject(Fault::FailList);

    let manager = LifecycleManager::new(flaky);
    manager
        .add_policy(LifecyclePolicy::delete("p1", "", DAY))
        .unwrap();
    let err = manager.apply_policies(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, PolicyError::Storage(_)));
}

#[tokio::test]
async fn test_overlapping_policies_count_gone_objects_as_skipped() {
    let env = TestEnv::memory(&["primary"]).await.unwrap();
    env.seed("primary", &[("logs/a", b"1")], Duration::days(2))
        .await
        .unwrap();

    let manager = env.lifecycle("primary");
    manager.add_policy(LifecyclePolicy::delete("all", "", DAY)).unwrap();
    manager
        .add_policy(LifecyclePolicy::delete("logs", "logs/", DAY))
        .unwrap();

    let report = manager.apply_policies(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.policies_count, 2);
    assert_eq!(report.objects_processed, 1);
    assert_eq!(report.objects_skipped, 1);
    assert_eq!(report.failed, 0);
}

#[tokio::test]
async fn test_cancelled_sweep_reports_partial_progress() {
    let env = TestEnv::memory(&["primary"]).await.unwrap();
    env.seed("primary", &[("a", b"1"), ("b", b"2")], Duration::days(2))
        .await
        .unwrap();

    let manager = env.lifecycle("primary");
    manager.add_policy(LifecyclePolicy::delete("p", "", DAY)).unwrap();

    let token = CancellationToken::new();
    token.cancel();
    let report = manager.apply_policies(&token).await.unwrap();
    assert!(report.cancelled);
    assert_eq!(report.objects_processed, 0);
    assert!(env.backend("primary").exists("a").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_periodic_sweeper_runs_until_cancelled() {
    let env = TestEnv::memory(&["primary"]).await.unwrap();
    let manager = Arc::new(env.lifecycle("primary"));
    manager.add_policy(LifecyclePolicy::delete("p", "", DAY)).unwrap();

    let token = CancellationToken::new();
    let handle = {
        let manager = manager.clone();
        let token = token.clone();
        tokio::spawn(async move { manager.run(StdDuration::from_secs(60), token).await })
    };

    env.seed("primary", &[("a", b"1")], Duration::days(2))
        .await
        .unwrap();
    tokio::time::sleep(StdDuration::from_secs(61)).await;
    assert!(!env.backend("primary").exists("a").await.unwrap());

    token.cancel();
    handle.await.unwrap();
}
