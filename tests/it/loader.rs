use crate::helpers::{build_entry, SYMMETRIC_KEY};
use mindoodb::cas::{Cas, InMemoryCas};
use mindoodb::collaborators::{CrdtEngine, DefaultCrypto, InMemoryDirectory, InMemoryKeyBag};
use mindoodb::id;
use mindoodb::loader::DocumentLoader;
use std::collections::HashSet;
use std::sync::Arc;

struct ConcatEngine {
    applied: HashSet<String>,
    state: Vec<u8>,
}

impl ConcatEngine {
    fn new() -> Self {
        Self { applied: HashSet::new(), state: Vec::new() }
    }
}

impl CrdtEngine for ConcatEngine {
    fn change_hash(&self, change_bytes: &[u8]) -> String {
        id::sha256_hex(change_bytes)
    }

    fn apply_changes(&mut self, change_bytes: &[u8]) -> mindoodb::Result<()> {
        if self.applied.insert(self.change_hash(change_bytes)) {
            self.state.extend_from_slice(change_bytes);
        }
        Ok(())
    }

    fn snapshot(&self) -> mindoodb::Result<Vec<u8>> {
        Ok(self.state.clone())
    }
}

/// A loader replaying entries written straight through the CAS public API (no in-process
/// shortcuts), confirming loader + CAS + crypto compose correctly end to end.
#[test]
fn loader_replays_entries_written_through_the_cas() {
    let cas = Arc::new(InMemoryCas::new("db1"));
    let crypto = Arc::new(DefaultCrypto::new());
    let key_bag = Arc::new(InMemoryKeyBag::new());
    key_bag.insert("key1", SYMMETRIC_KEY.to_vec());
    let directory = Arc::new(InMemoryDirectory::new());

    let (signing_key, verifying_key) = DefaultCrypto::generate_signing_keypair();
    let public_key = DefaultCrypto::format_public_key(&verifying_key);

    let a = build_entry(&crypto, &signing_key, &public_key, "doc1", "a", 1, b"foo-");
    let b = build_entry(&crypto, &signing_key, &public_key, "doc1", "b", 2, b"bar");
    cas.put_entries(vec![a, b]).unwrap();

    let loader = DocumentLoader::new(
        cas,
        crypto as Arc<dyn mindoodb::collaborators::CryptoProvider>,
        key_bag,
        directory,
        Box::new(|| Box::new(ConcatEngine::new())),
        false,
    );

    let document = loader.load_document("doc1").unwrap();
    assert_eq!(document.state, b"foo-bar");
    assert!(!document.is_deleted);
}
