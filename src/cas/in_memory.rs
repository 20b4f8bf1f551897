//! In-memory `Cas` implementation: a `CasIndex` plus a dedup-by-content-hash payload map.
//!
//! Suitable for tests, ephemeral caches, and as the reference implementation the on-disk
//! backend's crash-recovery rebuild is checked against.

use crate::bloom::BloomSummary;
use crate::cas::index::{CasIndex, Cursor, PurgeOutcome, ResolveOptions, ScanFilters, ScanResult};
use crate::cas::{Cas, CompactionStatus};
use crate::entry::{Entry, EntryMetadata};
use crate::id::ID;
use crate::Result;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};

pub struct InMemoryCas {
    db_id: String,
    index: Mutex<CasIndex>,
    payloads: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryCas {
    pub fn new(db_id: impl Into<String>) -> Self {
        Self {
            db_id: db_id.into(),
            index: Mutex::new(CasIndex::new()),
            payloads: RwLock::new(HashMap::new()),
        }
    }

    /// Number of distinct payload blobs currently stored, for dedup assertions in tests.
    pub fn payload_count(&self) -> usize {
        self.payloads.read().unwrap().len()
    }
}

impl Cas for InMemoryCas {
    fn db_id(&self) -> &str {
        &self.db_id
    }

    fn put_entries(&self, entries: Vec<Entry>) -> Result<()> {
        for entry in entries {
            let (metadata, encrypted_data) = entry.into_parts();
            if self.index.lock().unwrap().contains(&metadata.id) {
                continue;
            }
            // Payload before metadata before index: write the payload first so a reader can
            // never observe metadata pointing at an absent blob.
            self.payloads
                .write()
                .unwrap()
                .entry(metadata.content_hash.clone())
                .or_insert(encrypted_data);
            self.index.lock().unwrap().insert(metadata);
        }
        Ok(())
    }

    fn get_entries(&self, ids: &[ID]) -> Result<Vec<Entry>> {
        let index = self.index.lock().unwrap();
        let payloads = self.payloads.read().unwrap();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(metadata) = index.get(id) else {
                continue;
            };
            let Some(payload) = payloads.get(&metadata.content_hash) else {
                tracing::warn!(id = %id, content_hash = %metadata.content_hash, "payload missing for entry metadata");
                continue;
            };
            out.push(Entry {
                metadata: metadata.clone(),
                encrypted_data: payload.clone(),
            });
        }
        Ok(out)
    }

    fn has_entries(&self, ids: &[ID]) -> Result<Vec<ID>> {
        let index = self.index.lock().unwrap();
        Ok(ids.iter().filter(|id| index.contains(id)).cloned().collect())
    }

    fn get_all_ids(&self) -> Result<Vec<ID>> {
        Ok(self.index.lock().unwrap().all_ids())
    }

    fn find_new_entries(&self, known_ids: &HashSet<ID>) -> Result<Vec<EntryMetadata>> {
        Ok(self.index.lock().unwrap().find_new(known_ids))
    }

    fn find_new_entries_for_doc(
        &self,
        known_ids: &HashSet<ID>,
        doc_id: &str,
    ) -> Result<Vec<EntryMetadata>> {
        Ok(self.index.lock().unwrap().find_new_for_doc(known_ids, doc_id))
    }

    fn find_entries(&self, filters: &ScanFilters) -> Result<Vec<EntryMetadata>> {
        Ok(self.index.lock().unwrap().find_entries(filters))
    }

    fn scan_entries_since(
        &self,
        cursor: Option<Cursor>,
        limit: Option<usize>,
        filters: Option<&ScanFilters>,
    ) -> Result<ScanResult> {
        Ok(self.index.lock().unwrap().scan_since(cursor.as_ref(), limit, filters))
    }

    fn resolve_dependencies(&self, start_id: &ID, opts: &ResolveOptions) -> Result<Vec<ID>> {
        self.index.lock().unwrap().resolve_dependencies(start_id, opts)
    }

    fn get_id_bloom_summary(&self) -> Result<BloomSummary> {
        Ok(BloomSummary::from_ids(self.index.lock().unwrap().all_ids()))
    }

    fn purge_doc_history(&self, doc_id: &str) -> Result<PurgeOutcome> {
        let outcome = self.index.lock().unwrap().purge_doc(doc_id);
        let mut payloads = self.payloads.write().unwrap();
        for content_hash in &outcome.orphaned_content_hashes {
            payloads.remove(content_hash);
        }
        Ok(outcome)
    }

    fn get_compaction_status(&self) -> Result<CompactionStatus> {
        Ok(CompactionStatus::default())
    }
}
