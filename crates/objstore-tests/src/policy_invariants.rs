//! Property-based checks over expiry, key routing, layered copies and policy registries.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use bytes::Bytes;
use chrono::{Duration, TimeZone, Utc};
use objstore_crypt::{Encrypter, EncrypterFactory, ProviderRegistry};
use objstore_policy::{
    CopyPlan, EncryptionConfig, EncryptionPolicy, LayerFactories, LifecycleManager,
    LifecyclePolicy, PolicyError, ReplicationPolicy,
};
use objstore_storage::{Facade, FacadeConfig, MemoryBackend, Metadata, StorageBackend};
use proptest::prelude::*;

use crate::harness::keyring;

fn arb_key() -> impl Strategy<Value = String> {
    "[a-z0-9_.-]{1,8}(/[a-z0-9_-]{1,8}){0,3}"
        .prop_filter("relative segments", |k| !k.split('/').any(|s| s == "." || s == ".."))
}

#[derive(Debug, Clone)]
enum Op {
    Add(u8),
    Remove(u8),
    Get(u8),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..6).prop_map(Op::Add),
        (0u8..6).prop_map(Op::Remove),
        (0u8..6).prop_map(Op::Get),
    ]
}

fn thin(backend: &Arc<dyn StorageBackend>) -> *const () {
    Arc::as_ptr(backend) as *const ()
}

proptest! {
    #[test]
    fn prop_expiry_is_strictly_older_than_retention(
        retention_secs in 0u64..1_000_000,
        age_secs in 0i64..2_000_000,
    ) {
        let policy = LifecyclePolicy::delete("p", "", StdDuration::from_secs(retention_secs));
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let expired = policy.is_expired(now - Duration::seconds(age_secs), now);
        prop_assert_eq!(expired, age_secs as u64 > retention_secs);
    }

    #[test]
    fn prop_key_refs_route_only_to_registered_backends(key in arb_key(), prefix in "[a-z]{1,6}") {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let primary: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let archive: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let facade = rt
            .block_on(Facade::with_config(
                FacadeConfig::default()
                    .with_backend("primary", primary.clone())
                    .with_backend("archive", archive.clone())
                    .with_default("primary"),
            ))
            .unwrap();

        let (backend, resolved) = facade.resolve(&format!("archive:{}", key)).unwrap();
        prop_assert_eq!(thin(&backend), thin(&archive));
        prop_assert_eq!(&resolved, &key);

        let (backend, resolved) = facade.resolve(&key).unwrap();
        prop_assert_eq!(thin(&backend), thin(&primary));
        prop_assert_eq!(&resolved, &key);

        if prefix != "archive" && prefix != "primary" {
            let whole = format!("{}:{}", prefix, key);
            let (backend, resolved) = facade.resolve(&whole).unwrap();
            prop_assert_eq!(thin(&backend), thin(&primary));
            prop_assert_eq!(resolved, whole);
        }
    }

    #[test]
    fn prop_transparent_copy_preserves_plaintext(payload in proptest::collection::vec(any::<u8>(), 0..512)) {
        let src_ring = keyring("src-key", 7);
        let dst_ring = keyring("dst-key", 9);
        let providers = ProviderRegistry::new();
        providers.register("src-ring", src_ring.clone());
        providers.register("dst-ring", dst_ring.clone());

        let policy = ReplicationPolicy::new("r", "a", "b", StdDuration::from_secs(60))
            .with_encryption(EncryptionPolicy {
                backend: None,
                source: Some(EncryptionConfig::enabled("src-ring", "src-key")),
                destination: Some(EncryptionConfig::enabled("dst-ring", "dst-key")),
            });
        let plan = CopyPlan::resolve(&policy, &LayerFactories::default(), &providers).unwrap();

        let plaintext = Bytes::from(payload);
        let src_cipher = src_ring.encrypter("src-key").unwrap().encrypt(plaintext.clone()).unwrap();
        let meta = Metadata::default().with_custom(objstore_crypt::METADATA_KEY_ID, "src-key");

        let (out, out_meta) = plan.apply(src_cipher, meta).unwrap();
        let key_id = out_meta.custom[objstore_crypt::METADATA_KEY_ID].clone();
        prop_assert_eq!(key_id.as_str(), "dst-key");
        let recovered = dst_ring.encrypter(&key_id).unwrap().decrypt(out).unwrap();
        prop_assert_eq!(recovered, plaintext);
    }

    #[test]
    fn prop_lifecycle_registry_matches_set_model(ops in proptest::collection::vec(arb_op(), 1..40)) {
        let manager = LifecycleManager::new(Arc::new(MemoryBackend::new()));
        let mut model: HashSet<u8> = HashSet::new();

        for op in ops {
            match op {
                Op::Add(n) => {
                    let result = manager.add_policy(LifecyclePolicy::delete(
                        format!("p{}", n),
                        "",
                        StdDuration::from_secs(60),
                    ));
                    if model.insert(n) {
                        prop_assert!(result.is_ok());
                    } else {
                        let duplicate = matches!(result, Err(PolicyError::PolicyAlreadyExists { .. }));
                        prop_assert!(duplicate);
                    }
                }
                Op::Remove(n) => {
                    let result = manager.remove_policy(&format!("p{}", n));
                    if model.remove(&n) {
                        prop_assert!(result.is_ok());
                    } else {
                        let missing = matches!(result, Err(PolicyError::PolicyNotFound { .. }));
                        prop_assert!(missing);
                    }
                }
                Op::Get(n) => {
                    let found = manager.get_policy(&format!("p{}", n)).is_ok();
                    prop_assert_eq!(found, model.contains(&n));
                }
            }
        }

        let mut ids: Vec<String> = manager.get_policies().into_iter().map(|p| p.id).collect();
        let mut expected: Vec<String> = model.iter().map(|n| format!("p{}", n)).collect();
        ids.sort();
        expected.sort();
        prop_assert_eq!(ids, expected);
    }
}

#[tokio::test]
async fn test_replication_registry_uniqueness_and_not_found() {
    let env = crate::harness::TestEnv::memory(&["src", "dst"]).await.unwrap();
    let manager = env.replication();
    let policy = ReplicationPolicy::new("r", "src", "dst", StdDuration::from_secs(60));

    manager.add_policy(policy.clone()).await.unwrap();
    let rival = ReplicationPolicy::new("r", "dst", "src", StdDuration::from_secs(5));
    assert!(matches!(
        manager.add_policy(rival).await,
        Err(PolicyError::PolicyAlreadyExists { .. })
    ));
    assert_eq!(manager.get_policy("r").unwrap(), policy);

    manager.remove_policy("r").await.unwrap();
    assert!(matches!(
        manager.remove_policy("r").await,
        Err(PolicyError::PolicyNotFound { .. })
    ));
    assert!(matches!(manager.get_policy("r"), Err(PolicyError::PolicyNotFound { .. })));
    assert!(matches!(
        manager.get_replication_status("r"),
        Err(PolicyError::PolicyNotFound { .. })
    ));
    assert!(manager.set_destination_encrypter_factory("r", keyring("k", 1)).is_err());
}
