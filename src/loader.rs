//! `DocumentLoader`: resolves a `doc_id` into CRDT state by collecting, verifying, and
//! decrypting its entries and replaying them through an external `CrdtEngine`.
//!
//! The loader never lets a missing decryption key or a bad signature abort the whole store —
//! it skips what it can't trust and marks ids processed so a retry doesn't loop forever on the
//! same bad entry.

use crate::cas::Cas;
use crate::collaborators::{CryptoProvider, Directory, KeyBag};
use crate::entry::{Entry, EntryType};
use crate::id::ID;
use crate::{Error, Result};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// A fully replayed document: the CRDT engine's current snapshot bytes plus bookkeeping the
/// loader needs for incremental sync and ordered iteration.
#[derive(Clone)]
pub struct LoadedDocument {
    pub doc_id: String,
    pub state: Vec<u8>,
    pub is_deleted: bool,
    pub last_modified: i64,
    pub entry_ids: Vec<ID>,
}

/// Constructs a fresh, empty `CrdtEngine` instance for a document being loaded for the first
/// time. Factored out as a factory rather than a single shared engine because each document
/// gets its own independent CRDT state.
pub type EngineFactory = Box<dyn Fn() -> Box<dyn crate::collaborators::CrdtEngine> + Send + Sync>;

pub struct DocumentLoader {
    cas: Arc<dyn Cas>,
    crypto: Arc<dyn CryptoProvider>,
    key_bag: Arc<dyn KeyBag>,
    directory: Arc<dyn Directory>,
    engine_factory: EngineFactory,
    admin_only: bool,

    processed_ids: Mutex<HashSet<ID>>,
    crdt_hash_index: Mutex<HashMap<String, HashMap<String, ID>>>,
    documents: Mutex<HashMap<String, LoadedDocument>>,
    ordering: Mutex<BTreeSet<(i64, String)>>,
}

impl DocumentLoader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cas: Arc<dyn Cas>,
        crypto: Arc<dyn CryptoProvider>,
        key_bag: Arc<dyn KeyBag>,
        directory: Arc<dyn Directory>,
        engine_factory: EngineFactory,
        admin_only: bool,
    ) -> Self {
        Self {
            cas,
            crypto,
            key_bag,
            directory,
            engine_factory,
            admin_only,
            processed_ids: Mutex::new(HashSet::new()),
            crdt_hash_index: Mutex::new(HashMap::new()),
            documents: Mutex::new(HashMap::new()),
            ordering: Mutex::new(BTreeSet::new()),
        }
    }

    /// Resolve `doc_id` into its current CRDT state, replaying every trusted, decryptable entry
    /// in canonical order. Entries that fail to decrypt abort the load (after being marked
    /// processed); entries that fail signature verification are skipped individually.
    pub fn load_document(&self, doc_id: &str) -> Result<LoadedDocument> {
        let metadata = self.cas.find_new_entries_for_doc(&HashSet::new(), doc_id)?;
        if metadata.is_empty() {
            return Err(Error::NotFound(doc_id.to_string()));
        }

        let is_deleted = metadata.iter().any(|m| m.entry_type == EntryType::DocDelete);

        let snapshot_cutoff = metadata
            .iter()
            .filter(|m| m.entry_type == EntryType::DocSnapshot)
            .map(|m| m.created_at)
            .max();

        let mut relevant: Vec<_> = metadata
            .into_iter()
            .filter(|m| {
                if m.entry_type == EntryType::AttachmentChunk {
                    return false;
                }
                match snapshot_cutoff {
                    Some(cutoff) if m.entry_type == EntryType::DocChange => m.created_at >= cutoff,
                    _ => true,
                }
            })
            .collect();
        relevant.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        let ids: Vec<ID> = relevant.iter().map(|m| m.id.clone()).collect();
        let entries = self.cas.get_entries(&ids)?;
        let entries_by_id: HashMap<ID, Entry> =
            entries.into_iter().map(|e| (e.id().clone(), e)).collect();

        let admin_key = if self.admin_only {
            self.directory.tenant_admin_public_key()
        } else {
            None
        };

        let mut engine = (self.engine_factory)();
        let mut last_modified = 0i64;
        let mut crdt_hashes = HashMap::new();
        let mut processed = self.processed_ids.lock().unwrap();

        for meta in &relevant {
            processed.insert(meta.id.clone());
            last_modified = last_modified.max(meta.created_at);

            let Some(entry) = entries_by_id.get(&meta.id) else {
                tracing::warn!(id = %meta.id, "entry metadata present without payload, skipping");
                continue;
            };

            let verified = self
                .crypto
                .verify(&meta.created_by_public_key, entry.signing_bytes(), &meta.signature)
                .unwrap_or(false);
            if !verified {
                tracing::warn!(id = %meta.id, doc_id = %doc_id, "entry signature verification failed, skipping");
                continue;
            }
            if let Some(admin_key) = &admin_key {
                if &meta.created_by_public_key != admin_key {
                    tracing::warn!(id = %meta.id, doc_id = %doc_id, "entry signer is not the tenant admin, skipping");
                    continue;
                }
            }

            let key = self.key_bag.get(&meta.decryption_key_id).ok_or_else(|| {
                Error::KeyNotFound(meta.decryption_key_id.clone())
            })?;
            let plaintext = self.crypto.decrypt(&key, &entry.encrypted_data)?;

            let change_hash = engine.change_hash(&plaintext);
            engine.apply_changes(&plaintext)?;
            crdt_hashes.insert(change_hash, meta.id.clone());
        }
        drop(processed);

        self.crdt_hash_index.lock().unwrap().insert(doc_id.to_string(), crdt_hashes);

        let document = LoadedDocument {
            doc_id: doc_id.to_string(),
            state: engine.snapshot()?,
            is_deleted,
            last_modified,
            entry_ids: ids,
        };

        let mut documents = self.documents.lock().unwrap();
        if let Some(previous) = documents.insert(doc_id.to_string(), document.clone()) {
            self.ordering.lock().unwrap().remove(&(previous.last_modified, previous.doc_id));
        }
        self.ordering.lock().unwrap().insert((document.last_modified, document.doc_id.clone()));

        Ok(document)
    }

    /// The entry id a given CRDT change hash resolved to, for translating a new change's
    /// dependency hashes into id-level `dependency_ids`.
    pub fn entry_id_for_crdt_hash(&self, doc_id: &str, crdt_hash: &str) -> Option<ID> {
        self.crdt_hash_index
            .lock()
            .unwrap()
            .get(doc_id)
            .and_then(|map| map.get(crdt_hash))
            .cloned()
    }

    /// Pull new entries from the CAS and reload every document they affect.
    pub fn sync_store_changes(&self) -> Result<Vec<String>> {
        let known = self.processed_ids.lock().unwrap().clone();
        let new_metadata = self.cas.find_new_entries(&known)?;

        let mut affected: Vec<String> = new_metadata.iter().map(|m| m.doc_id.clone()).collect();
        affected.sort();
        affected.dedup();

        for doc_id in &affected {
            self.documents.lock().unwrap().remove(doc_id);
            self.load_document(doc_id)?;
        }
        Ok(affected)
    }

    /// Visit documents in `(last_modified, doc_id)` order, strictly after `cursor`, stopping
    /// early if `visitor` returns `false` or `limit` documents have been visited.
    pub fn process_changes_since(
        &self,
        cursor: Option<(i64, String)>,
        limit: Option<usize>,
        mut visitor: impl FnMut(&LoadedDocument) -> bool,
    ) -> (Option<(i64, String)>, bool) {
        let ordering = self.ordering.lock().unwrap();
        let documents = self.documents.lock().unwrap();
        let limit = limit.unwrap_or(usize::MAX);

        let mut visited = 0usize;
        let mut next_cursor = cursor.clone();
        let mut has_more = false;

        for key in ordering.iter().filter(|key| cursor.as_ref().map(|c| *key > c).unwrap_or(true)) {
            if visited == limit {
                has_more = true;
                break;
            }
            if let Some(document) = documents.get(&key.1) {
                visited += 1;
                next_cursor = Some(key.clone());
                if !visitor(document) {
                    has_more = ordering.iter().any(|k| k > key);
                    return (next_cursor, has_more);
                }
            }
        }

        (next_cursor, has_more)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cas::InMemoryCas;
    use crate::collaborators::{CrdtEngine, DefaultCrypto, InMemoryDirectory, InMemoryKeyBag};
    use crate::entry::DocEntryBuilder;
    use crate::id;

    /// Minimal CRDT engine for tests: concatenates applied change bytes, deduplicating by hash.
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

        fn apply_changes(&mut self, change_bytes: &[u8]) -> Result<()> {
            let hash = self.change_hash(change_bytes);
            if self.applied.insert(hash) {
                self.state.extend_from_slice(change_bytes);
            }
            Ok(())
        }

        fn snapshot(&self) -> Result<Vec<u8>> {
            Ok(self.state.clone())
        }
    }

    fn fixture() -> (
        DocumentLoader,
        Arc<InMemoryCas>,
        ed25519_dalek::SigningKey,
        String,
    ) {
        let (signing_key, verifying_key) = DefaultCrypto::generate_signing_keypair();
        let public_key = DefaultCrypto::format_public_key(&verifying_key);

        let cas = Arc::new(InMemoryCas::new("db1"));
        let crypto: Arc<dyn CryptoProvider> = Arc::new(DefaultCrypto::new());
        let key_bag = Arc::new(InMemoryKeyBag::new());
        key_bag.insert("key1", [7u8; 32].to_vec());
        let directory = Arc::new(InMemoryDirectory::new());

        let loader = DocumentLoader::new(
            cas.clone(),
            crypto,
            key_bag,
            directory,
            Box::new(|| Box::new(ConcatEngine::new())),
            false,
        );
        (loader, cas, signing_key, public_key)
    }

    fn signed_change(
        crypto: &DefaultCrypto,
        signing_key: &ed25519_dalek::SigningKey,
        public_key: &str,
        doc_id: &str,
        change_hash: &str,
        created_at: i64,
        plaintext: &[u8],
    ) -> Entry {
        let ciphertext = crypto.encrypt(&[7u8; 32], plaintext).unwrap();
        let signature = DefaultCrypto::sign(signing_key, &ciphertext);
        DocEntryBuilder::new(
            EntryType::DocChange,
            doc_id,
            change_hash,
            vec![],
            vec![],
            created_at,
            public_key,
            "key1",
        )
        .unwrap()
        .build(ciphertext, signature, plaintext.len() as u64)
    }

    #[test]
    fn loads_and_replays_changes_in_order() {
        let (loader, cas, signing_key, public_key) = fixture();
        let crypto = DefaultCrypto::new();

        let a = signed_change(&crypto, &signing_key, &public_key, "doc1", "a", 1, b"hello ");
        let b = signed_change(&crypto, &signing_key, &public_key, "doc1", "b", 2, b"world");
        cas.put_entries(vec![b.clone(), a.clone()]).unwrap();

        let doc = loader.load_document("doc1").unwrap();
        assert_eq!(doc.state, b"hello world");
        assert!(!doc.is_deleted);
    }

    #[test]
    fn skips_entries_with_bad_signature() {
        let (loader, cas, signing_key, public_key) = fixture();
        let crypto = DefaultCrypto::new();

        let mut tampered = signed_change(&crypto, &signing_key, &public_key, "doc1", "a", 1, b"hello");
        tampered.metadata.signature = vec![0u8; 64];
        cas.put_entries(vec![tampered]).unwrap();

        let doc = loader.load_document("doc1").unwrap();
        assert!(doc.state.is_empty());
    }

    #[test]
    fn missing_decryption_key_raises_key_not_found() {
        let (loader, cas, signing_key, public_key) = fixture();
        let crypto = DefaultCrypto::new();
        let ciphertext = crypto.encrypt(&[9u8; 32], b"secret").unwrap();
        let signature = DefaultCrypto::sign(&signing_key, &ciphertext);
        let entry = DocEntryBuilder::new(
            EntryType::DocChange,
            "doc1",
            "a",
            vec![],
            vec![],
            1,
            public_key,
            "unknown-key",
        )
        .unwrap()
        .build(ciphertext, signature, 6);
        cas.put_entries(vec![entry]).unwrap();

        let result = loader.load_document("doc1");
        assert!(matches!(result, Err(Error::KeyNotFound(_))));
    }

    #[test]
    fn doc_delete_marks_document_deleted() {
        let (loader, cas, signing_key, public_key) = fixture();
        let crypto = DefaultCrypto::new();
        let create = signed_change(&crypto, &signing_key, &public_key, "doc1", "create", 1, b"hi");
        let ciphertext = crypto.encrypt(&[7u8; 32], b"").unwrap();
        let signature = DefaultCrypto::sign(&signing_key, &ciphertext);
        let delete = DocEntryBuilder::new(
            EntryType::DocDelete,
            "doc1",
            "delete",
            vec![],
            vec![],
            2,
            public_key,
            "key1",
        )
        .unwrap()
        .build(ciphertext, signature, 0);

        cas.put_entries(vec![create, delete]).unwrap();
        let doc = loader.load_document("doc1").unwrap();
        assert!(doc.is_deleted);
    }

    #[test]
    fn sync_store_changes_reports_affected_docs_and_reloads() {
        let (loader, cas, signing_key, public_key) = fixture();
        let crypto = DefaultCrypto::new();
        let a = signed_change(&crypto, &signing_key, &public_key, "doc1", "a", 1, b"x");
        cas.put_entries(vec![a]).unwrap();
        loader.load_document("doc1").unwrap();

        let b = signed_change(&crypto, &signing_key, &public_key, "doc1", "b", 2, b"y");
        cas.put_entries(vec![b]).unwrap();
        let affected = loader.sync_store_changes().unwrap();
        assert_eq!(affected, vec!["doc1".to_string()]);

        let doc = loader.load_document("doc1").unwrap();
        assert_eq!(doc.state, b"xy");
    }

    #[test]
    fn process_changes_since_visits_in_last_modified_order() {
        let (loader, cas, signing_key, public_key) = fixture();
        let crypto = DefaultCrypto::new();
        let a = signed_change(&crypto, &signing_key, &public_key, "doc1", "a", 1, b"x");
        let b = signed_change(&crypto, &signing_key, &public_key, "doc2", "b", 2, b"y");
        cas.put_entries(vec![a, b]).unwrap();
        loader.load_document("doc1").unwrap();
        loader.load_document("doc2").unwrap();

        let mut visited = Vec::new();
        let (cursor, has_more) = loader.process_changes_since(None, None, |doc| {
            visited.push(doc.doc_id.clone());
            true
        });
        assert_eq!(visited, vec!["doc1".to_string(), "doc2".to_string()]);
        assert!(!has_more);
        assert!(cursor.is_some());
    }
}
