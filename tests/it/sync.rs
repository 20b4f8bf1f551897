use crate::helpers::build_entry;
use mindoodb::cas::{Cas, InMemoryCas};
use mindoodb::collaborators::DefaultCrypto;
use mindoodb::sync::SyncEngine;

#[test]
fn on_disk_and_in_memory_stores_reconcile_through_the_public_api() {
    let dir = tempfile::tempdir().unwrap();
    let config = mindoodb::config::OnDiskCasConfig::new(dir.path(), "db1");
    let on_disk = mindoodb::cas::OnDiskCas::open(&config).unwrap();
    let in_memory = InMemoryCas::new("db1");

    let crypto = DefaultCrypto::new();
    let (signing_key, verifying_key) = DefaultCrypto::generate_signing_keypair();
    let public_key = DefaultCrypto::format_public_key(&verifying_key);

    let a = build_entry(&crypto, &signing_key, &public_key, "doc1", "a", 1, b"hello");
    let b = build_entry(&crypto, &signing_key, &public_key, "doc1", "b", 2, b"world");
    on_disk.put_entries(vec![a.clone(), b.clone()]).unwrap();

    let engine = SyncEngine::new();
    let stats = engine.pull(&in_memory, &on_disk).unwrap();
    assert_eq!(stats.entries_transferred, 2);

    let mut ids = in_memory.get_all_ids().unwrap();
    ids.sort();
    let mut expected = vec![a.id().clone(), b.id().clone()];
    expected.sort();
    assert_eq!(ids, expected);
}

#[test]
fn bloom_summary_pre_filters_ids_already_present_on_the_peer() {
    let remote = InMemoryCas::new("db1");

    let crypto = DefaultCrypto::new();
    let (signing_key, verifying_key) = DefaultCrypto::generate_signing_keypair();
    let public_key = DefaultCrypto::format_public_key(&verifying_key);
    let shared = build_entry(&crypto, &signing_key, &public_key, "doc1", "shared", 1, b"x");
    remote.put_entries(vec![shared.clone()]).unwrap();

    let remote_bloom = remote.get_id_bloom_summary().unwrap();
    let candidate_ids = vec![shared.id().clone(), "not-present".to_string()];
    let (missing, maybe_present) = SyncEngine::partition_by_bloom(&candidate_ids, &remote_bloom);

    assert!(maybe_present.contains(shared.id()));
    assert!(missing.contains(&"not-present".to_string()));
}
