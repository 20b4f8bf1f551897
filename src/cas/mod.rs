//! The content-addressed store (CAS): a backend-polymorphic store for `Entry` records.
//!
//! Every backend — in-memory, on-disk, or otherwise — implements the same `Cas` trait and is
//! expected to obey: payload-before-metadata-before-index commit order, dedup-by-content-hash
//! payload storage, and the canonical `(created_at, id)` scan order. The sync engine and
//! document loader are written only against this trait.

pub mod index;
pub mod in_memory;
pub mod on_disk;

pub use index::{Cursor, PurgeOutcome, ResolveOptions, ScanFilters, ScanResult};
pub use in_memory::InMemoryCas;
pub use on_disk::OnDiskCas;

use crate::bloom::BloomSummary;
use crate::entry::Entry;
use crate::id::ID;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Whether (and how far along) an asynchronously-warmed index has finished building.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexBuildStatus {
    /// No warm-up needed; the index is immediately queryable (in-memory backend, or an
    /// on-disk backend that finished its startup validation synchronously).
    Ready,
    Building { entries_loaded: usize },
}

/// On-disk compaction statistics. Backends without a segment log report `Disabled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompactionStatus {
    pub enabled: bool,
    pub applied_segment_count: usize,
    pub applied_segment_bytes: u64,
    pub last_compaction_at: Option<i64>,
}

/// The contract every storage backend implements.
///
/// Implementations must commit `put_entries` in *payload-before-metadata-before-index* order so
/// a crash never leaves metadata pointing at an absent payload, and must keep `get_entries`,
/// `find_new_entries`, and `scan_entries_since` mutually consistent with whatever has already
/// been committed (read-your-writes within a single instance).
pub trait Cas: Send + Sync {
    /// The identifier shared by every replica of the same logical database. Sync refuses to
    /// reconcile two CAS instances whose `db_id` differ.
    fn db_id(&self) -> &str;

    /// Idempotent batch commit. An entry whose `id` already exists is a no-op; an aborted
    /// entry within the batch leaves no trace. Does not fail the whole batch for a single
    /// entry's payload duplication — dedup is expected, not an error.
    fn put_entries(&self, entries: Vec<Entry>) -> Result<()>;

    /// Returns the subset of `ids` that exist, each as a full `Entry` (metadata + payload).
    /// Metadata present without a payload is logged and omitted, never synthesized.
    fn get_entries(&self, ids: &[ID]) -> Result<Vec<Entry>>;

    /// Returns the subset of `ids` whose metadata is present.
    fn has_entries(&self, ids: &[ID]) -> Result<Vec<ID>>;

    fn get_all_ids(&self) -> Result<Vec<ID>>;

    /// Set-difference: metadata for every id the store holds that is not in `known_ids`.
    fn find_new_entries(&self, known_ids: &HashSet<ID>) -> Result<Vec<crate::entry::EntryMetadata>>;

    /// As `find_new_entries`, restricted to one document via the doc index.
    fn find_new_entries_for_doc(
        &self,
        known_ids: &HashSet<ID>,
        doc_id: &str,
    ) -> Result<Vec<crate::entry::EntryMetadata>>;

    fn find_entries(&self, filters: &ScanFilters) -> Result<Vec<crate::entry::EntryMetadata>>;

    /// Paginated forward scan in canonical order, strictly after `cursor`.
    fn scan_entries_since(
        &self,
        cursor: Option<Cursor>,
        limit: Option<usize>,
        filters: Option<&ScanFilters>,
    ) -> Result<ScanResult>;

    /// BFS over `dependency_ids` starting at `start_id`, returned deepest-first.
    fn resolve_dependencies(&self, start_id: &ID, opts: &ResolveOptions) -> Result<Vec<ID>>;

    /// A compact probabilistic digest of the id set, for sync pre-filtering.
    fn get_id_bloom_summary(&self) -> Result<BloomSummary>;

    /// GDPR purge: remove all entries for `doc_id` and reclaim orphaned payloads.
    fn purge_doc_history(&self, doc_id: &str) -> Result<PurgeOutcome>;

    /// On-disk only; other backends return a disabled/zero status.
    fn get_compaction_status(&self) -> Result<CompactionStatus> {
        Ok(CompactionStatus::default())
    }

    /// Construction progress for backends with asynchronous warm-up. In-memory and
    /// already-started on-disk backends simply report `Ready`.
    fn get_index_build_status(&self) -> IndexBuildStatus {
        IndexBuildStatus::Ready
    }
}
