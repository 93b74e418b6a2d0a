//! Replication runs end to end: backends resolved through the facade, encryption layers,
//! partial failures and cumulative status.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use bytes::Bytes;
use chrono::Duration;
use objstore_crypt::{
    Encrypter, EncrypterFactory, ProviderRegistry, METADATA_ALGORITHM, METADATA_KEY_ID,
};
use objstore_policy::{
    EncryptionConfig, EncryptionPolicy, ErrorKind, PolicyError, ReplicationManager,
    ReplicationMode, ReplicationPolicy,
};
use objstore_storage::{LocalBackend, MemoryBackend, Metadata, StorageBackend};
use tokio_util::sync::CancellationToken;

use crate::chaos::{Fault, FlakyBackend};
use crate::harness::{keyring, TestEnv};

const INTERVAL: StdDuration = StdDuration::from_secs(300);

fn layered(source: Option<&str>, destination: Option<&str>) -> EncryptionPolicy {
    EncryptionPolicy {
        backend: None,
        source: source.map(|p| EncryptionConfig::enabled(p, "src-key")),
        destination: destination.map(|p| EncryptionConfig::enabled(p, "dst-key")),
    }
}

fn providers() -> Arc<ProviderRegistry> {
    let registry = ProviderRegistry::new();
    registry.register("src-ring", keyring("src-key", 1));
    registry.register("dst-ring", keyring("dst-key", 2));
    Arc::new(registry)
}

/// Stores `plaintext` under `key` encrypted the way a client-side layer would.
async fn put_encrypted(backend: &dyn StorageBackend, key: &str, plaintext: &'static [u8]) {
    let encrypter = keyring("src-key", 1).encrypter("src-key").unwrap();
    let ciphertext = encrypter.encrypt(Bytes::from_static(plaintext)).unwrap();
    let metadata = Metadata::with_content_type("text/plain")
        .with_custom(METADATA_ALGORITHM, encrypter.algorithm())
        .with_custom(METADATA_KEY_ID, encrypter.key_id());
    backend.put_with_metadata(key, ciphertext, metadata).await.unwrap();
}

#[tokio::test]
async fn test_local_to_s3_replication() {
    let dir = tempfile::tempdir().unwrap();
    let local: Arc<dyn StorageBackend> = Arc::new(LocalBackend::open(dir.path()).await.unwrap());
    let s3: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let env = TestEnv::with_backends(
        HashMap::from([("local".to_string(), local.clone()), ("s3".to_string(), s3.clone())]),
        Some("local"),
    )
    .await
    .unwrap();

    local
        .put_with_metadata(
            "docs/readme.md",
            Bytes::from_static(b"# objstore"),
            Metadata::with_content_type("text/markdown"),
        )
        .await
        .unwrap();
    local.put("docs/guide/intro.md", Bytes::from_static(b"intro")).await.unwrap();
    local.put("img/logo.png", Bytes::from_static(b"png")).await.unwrap();

    let manager = env.replication();
    manager
        .add_policy(ReplicationPolicy::new("r1", "local", "s3", INTERVAL).with_prefix("docs/"))
        .await
        .unwrap();

    let result = manager.sync_policy(&CancellationToken::new(), "r1").await.unwrap();
    assert_eq!(result.synced, 2);
    assert_eq!(result.failed, 0);
    assert_eq!(result.bytes_total, 15);

    assert_eq!(s3.get("docs/readme.md").await.unwrap(), Bytes::from_static(b"# objstore"));
    assert_eq!(s3.metadata("docs/readme.md").await.unwrap().content_type, "text/markdown");
    assert!(s3.exists("docs/guide/intro.md").await.unwrap());
    assert!(!s3.exists("img/logo.png").await.unwrap());
    assert!(manager.get_policy("r1").unwrap().last_sync_time.is_some());
}

#[tokio::test]
async fn test_partial_failure_reports_exact_failed_count() {
    let inner = Arc::new(MemoryBackend::new());
    let flaky = Arc::new(FlakyBackend::new(inner.clone()));
    let dst = Arc::new(MemoryBackend::new());
    let env = TestEnv::with_backends(
        HashMap::from([
            ("src".to_string(), flaky.clone() as Arc<dyn StorageBackend>),
            ("dst".to_string(), dst.clone() as Arc<dyn StorageBackend>),
        ]),
        None,
    )
    .await
    .unwrap();
    for key in ["a", "b", "c", "d", "e"] {
        inner.put(key, Bytes::from_static(b"xy")).await.unwrap();
    }
    flaky.inject(Fault::FailGet("b".into()));
    flaky.inject(Fault::FailGet("d".into()));

    let manager = env.replication();
    manager
        .add_policy(ReplicationPolicy::new("r", "src", "dst", INTERVAL))
        .await
        .unwrap();

    let result = manager
        .sync_policy_parallel(&CancellationToken::new(), "r", 2)
        .await
        .unwrap();
    assert_eq!(result.synced, 3);
    assert_eq!(result.failed, 2);
    assert_eq!(result.bytes_total, 6);
    let mut failed_keys: Vec<&str> = result
        .errors
        .iter()
        .map(|e| e.split(':').next().unwrap_or_default())
        .collect();
    failed_keys.sort_unstable();
    assert_eq!(failed_keys, vec!["b", "d"]);
    assert_eq!(dst.keys(), vec!["a", "c", "e"]);
}

#[tokio::test]
async fn test_status_accumulates_across_runs() {
    let inner = Arc::new(MemoryBackend::new());
    let flaky = Arc::new(FlakyBackend::new(inner.clone()));
    let env = TestEnv::with_backends(
        HashMap::from([
            ("src".to_string(), flaky.clone() as Arc<dyn StorageBackend>),
            ("dst".to_string(), Arc::new(MemoryBackend::new()) as Arc<dyn StorageBackend>),
        ]),
        None,
    )
    .await
    .unwrap();
    for key in ["a", "b", "c", "d"] {
        inner.put(key, Bytes::from_static(b"1")).await.unwrap();
    }

    let manager = env.replication();
    manager
        .add_policy(ReplicationPolicy::new("r", "src", "dst", INTERVAL))
        .await
        .unwrap();
    let token = CancellationToken::new();

    let handle = flaky.inject(Fault::FailGet("d".into()));
    let first = manager.sync_policy(&token, "r").await.unwrap();
    assert_eq!((first.synced, first.failed), (3, 1));

    flaky.clear(handle);
    inner.delete("a").await.unwrap();
    inner.delete("b").await.unwrap();
    let second = manager.sync_policy(&token, "r").await.unwrap();
    assert_eq!((second.synced, second.failed), (2, 0));

    let status = manager.get_replication_status("r").unwrap();
    assert_eq!(status.total_objects_synced, 5);
    assert_eq!(status.total_errors, 1);
    assert_eq!(status.total_bytes_synced, 5);
    assert_eq!(status.sync_count, 2);
    assert_eq!(status.source_backend, "src");
    assert!(status.last_sync_time.is_some());
}

#[tokio::test]
async fn test_transparent_mode_reencrypts_for_destination() {
    let env = TestEnv::memory(&["src", "dst"]).await.unwrap();
    put_encrypted(env.backend("src").as_ref(), "secret.txt", b"attack at dawn").await;

    let manager = env.replication().with_providers(providers());
    manager
        .add_policy(
            ReplicationPolicy::new("r", "src", "dst", INTERVAL)
                .with_encryption(layered(Some("src-ring"), Some("dst-ring"))),
        )
        .await
        .unwrap();

    let result = manager.sync_policy(&CancellationToken::new(), "r").await.unwrap();
    assert_eq!(result.synced, 1);

    let dst = env.backend("dst");
    let stored = dst.get("secret.txt").await.unwrap();
    assert_ne!(stored, Bytes::from_static(b"attack at dawn"));
    let meta = dst.metadata("secret.txt").await.unwrap();
    assert_eq!(meta.custom[METADATA_KEY_ID], "dst-key");
    assert_eq!(meta.content_type, "text/plain");

    let decrypter = keyring("dst-key", 2).encrypter("dst-key").unwrap();
    assert_eq!(decrypter.decrypt(stored).unwrap(), Bytes::from_static(b"attack at dawn"));
}

#[tokio::test]
async fn test_source_layer_only_writes_plaintext() {
    let env = TestEnv::memory(&["src", "dst"]).await.unwrap();
    put_encrypted(env.backend("src").as_ref(), "note", b"plain again").await;

    let manager = env.replication();
    manager
        .add_policy(
            ReplicationPolicy::new("r", "src", "dst", INTERVAL)
                .with_encryption(layered(Some("src-ring"), None)),
        )
        .await
        .unwrap();
    manager
        .set_source_encrypter_factory("r", keyring("src-key", 1))
        .unwrap();

    manager.sync_policy(&CancellationToken::new(), "r").await.unwrap();
    let dst = env.backend("dst");
    assert_eq!(dst.get("note").await.unwrap(), Bytes::from_static(b"plain again"));
    let meta = dst.metadata("note").await.unwrap();
    assert!(!meta.custom.contains_key(METADATA_KEY_ID));
    assert!(!meta.custom.contains_key(METADATA_ALGORITHM));
}

#[tokio::test]
async fn test_opaque_mode_copies_ciphertext_verbatim() {
    let env = TestEnv::memory(&["src", "dst"]).await.unwrap();
    put_encrypted(env.backend("src").as_ref(), "blob", b"do not touch").await;
    let original = env.backend("src").get("blob").await.unwrap();

    // Providers are never consulted in opaque mode, so an unknown one is harmless.
    let manager = env.replication();
    manager
        .add_policy(
            ReplicationPolicy::new("r", "src", "dst", INTERVAL)
                .with_mode(ReplicationMode::Opaque)
                .with_encryption(layered(Some("missing"), Some("missing"))),
        )
        .await
        .unwrap();

    let result = manager.sync_policy(&CancellationToken::new(), "r").await.unwrap();
    assert_eq!(result.synced, 1);
    let dst = env.backend("dst");
    assert_eq!(dst.get("blob").await.unwrap(), original);
    assert_eq!(dst.metadata("blob").await.unwrap().custom[METADATA_KEY_ID], "src-key");
}

#[tokio::test]
async fn test_unknown_provider_fails_transparent_run() {
    let env = TestEnv::memory(&["src", "dst"]).await.unwrap();
    env.backend("src").put("a", Bytes::from_static(b"1")).await.unwrap();

    let manager = env.replication();
    manager
        .add_policy(
            ReplicationPolicy::new("r", "src", "dst", INTERVAL)
                .with_encryption(layered(None, Some("missing"))),
        )
        .await
        .unwrap();

    let err = manager.sync_policy(&CancellationToken::new(), "r").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(!env.backend("dst").exists("a").await.unwrap());
    assert!(manager.get_replication_status("r").is_err());
}

#[tokio::test]
async fn test_backends_built_from_policy_settings() {
    let env = TestEnv::memory(&["src"]).await.unwrap();
    env.seed("src", &[("x/1", b"one"), ("x/2", b"two")], Duration::minutes(5))
        .await
        .unwrap();
    let dir = tempfile::tempdir().unwrap();

    let mut policy = ReplicationPolicy::new("r", "src", "local", INTERVAL);
    policy
        .destination_settings
        .insert("path".to_string(), dir.path().display().to_string());
    let manager = env.replication();
    manager.add_policy(policy).await.unwrap();

    let result = manager.sync_policy(&CancellationToken::new(), "r").await.unwrap();
    assert_eq!(result.synced, 2);

    let reopened = LocalBackend::open(dir.path()).await.unwrap();
    assert_eq!(reopened.get("x/2").await.unwrap(), Bytes::from_static(b"two"));

    manager
        .add_policy(ReplicationPolicy::new("r2", "src", "nowhere", INTERVAL))
        .await
        .unwrap();
    let err = manager.sync_policy(&CancellationToken::new(), "r2").await.unwrap_err();
    assert!(matches!(err, PolicyError::BackendNotFound { ref name } if name == "nowhere"));
}

#[tokio::test]
async fn test_cancelled_run_is_partial_and_recorded() {
    let env = TestEnv::memory(&["src", "dst"]).await.unwrap();
    env.seed("src", &[("a", b"1"), ("b", b"2")], Duration::minutes(1))
        .await
        .unwrap();
    let manager = env.replication();
    manager
        .add_policy(ReplicationPolicy::new("r", "src", "dst", INTERVAL))
        .await
        .unwrap();

    let token = CancellationToken::new();
    token.cancel();
    let result = manager.sync_policy(&token, "r").await.unwrap();
    assert!(result.cancelled);
    assert_eq!(result.synced, 0);
    assert_eq!(manager.get_replication_status("r").unwrap().sync_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_parallel_workers_bound_in_flight_copies() {
    let inner = Arc::new(MemoryBackend::new());
    let flaky = Arc::new(FlakyBackend::new(inner.clone()));
    let env = TestEnv::with_backends(
        HashMap::from([
            ("src".to_string(), flaky.clone() as Arc<dyn StorageBackend>),
            ("dst".to_string(), Arc::new(MemoryBackend::new()) as Arc<dyn StorageBackend>),
        ]),
        None,
    )
    .await
    .unwrap();
    for i in 0..10 {
        inner.put(&format!("obj-{}", i), Bytes::from_static(b"z")).await.unwrap();
    }
    flaky.inject(Fault::GetLatency(StdDuration::from_millis(10)));

    let manager = env.replication();
    manager
        .add_policy(ReplicationPolicy::new("r", "src", "dst", INTERVAL))
        .await
        .unwrap();
    let result = manager
        .sync_policy_parallel(&CancellationToken::new(), "r", 3)
        .await
        .unwrap();
    assert_eq!(result.synced, 10);
    assert_eq!(flaky.max_gets_in_flight(), 3);
}

#[tokio::test]
async fn test_sync_all_skips_disabled_and_reports_broken_policies() {
    let env = TestEnv::memory(&["src", "dst"]).await.unwrap();
    env.backend("src").put("k", Bytes::from_static(b"v")).await.unwrap();

    let manager: ReplicationManager = env.replication();
    manager
        .add_policy(ReplicationPolicy::new("good", "src", "dst", INTERVAL))
        .await
        .unwrap();
    manager
        .add_policy(ReplicationPolicy::new("broken", "src", "gone", INTERVAL))
        .await
        .unwrap();
    let mut off = ReplicationPolicy::new("off", "src", "dst", INTERVAL);
    off.enabled = false;
    manager.add_policy(off).await.unwrap();

    let total = manager.sync_all(&CancellationToken::new()).await.unwrap();
    assert_eq!(total.synced, 1);
    assert_eq!(total.failed, 1);
    assert!(total.errors[0].starts_with("broken: "));
    assert!(manager.get_replication_status("off").is_err());
}
