//! `CasIndex`: the in-memory indexing structures shared by every CAS backend.
//!
//! Factored out so the in-memory and on-disk backends (and, eventually, a browser-IDB or
//! mobile-KV backend) implement ordered scan, per-doc lookup, and ref-counting exactly once
//! instead of each backend re-deriving its own notion of "canonical order".

use crate::entry::{EntryMetadata, EntryType};
use crate::id::ID;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// A scan position: the `(created_at, id)` sort key of the last entry returned.
pub type Cursor = (i64, ID);

/// Filters applied during `find_entries` / `scan_entries_since`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanFilters {
    pub doc_id: Option<String>,
    pub entry_types: Option<Vec<EntryType>>,
    /// Half-open range `[from, until)` over `created_at`.
    pub from: Option<i64>,
    pub until: Option<i64>,
}

impl ScanFilters {
    fn matches(&self, metadata: &EntryMetadata) -> bool {
        if let Some(doc_id) = &self.doc_id {
            if &metadata.doc_id != doc_id {
                return false;
            }
        }
        if let Some(types) = &self.entry_types {
            if !types.contains(&metadata.entry_type) {
                return false;
            }
        }
        if let Some(from) = self.from {
            if metadata.created_at < from {
                return false;
            }
        }
        if let Some(until) = self.until {
            if metadata.created_at >= until {
                return false;
            }
        }
        true
    }
}

/// Result of a `scan_entries_since` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub entries: Vec<EntryMetadata>,
    pub next_cursor: Option<Cursor>,
    pub has_more: bool,
}

/// Options controlling `resolve_dependencies` traversal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolveOptions {
    /// When traversal reaches an entry of this type, include it but do not expand its
    /// dependencies further.
    pub stop_at_entry_type: Option<EntryType>,
    pub max_depth: Option<usize>,
    /// Whether `start_id` itself is included in the result. Defaults to `true`.
    pub include_start: bool,
}

impl ResolveOptions {
    pub fn new() -> Self {
        Self {
            include_start: true,
            ..Default::default()
        }
    }
}

/// Outcome of removing a document's history: the set of content hashes whose ref-count
/// reached zero, i.e. payloads the caller should delete.
#[derive(Debug, Default)]
pub struct PurgeOutcome {
    pub removed_entry_ids: Vec<ID>,
    pub orphaned_content_hashes: Vec<String>,
}

/// Shared indexing structure: point lookup, per-doc index, content ref-counting, and an
/// ordered vector maintained in canonical `(created_at, id)` order.
#[derive(Default)]
pub struct CasIndex {
    entries: HashMap<ID, EntryMetadata>,
    doc_index: HashMap<String, HashSet<ID>>,
    content_refcount: HashMap<String, u32>,
    ordered: Vec<ID>,
}

impl CasIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &ID) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &ID) -> Option<&EntryMetadata> {
        self.entries.get(id)
    }

    /// Insert metadata for a newly-committed entry. Returns `false` (no-op) if `id` is
    /// already present — callers rely on this for `put_entries` idempotence.
    pub fn insert(&mut self, metadata: EntryMetadata) -> bool {
        if self.entries.contains_key(&metadata.id) {
            return false;
        }
        let pos = self
            .ordered
            .binary_search_by(|existing| {
                let existing_meta = &self.entries[existing];
                existing_meta.sort_key().cmp(&(metadata.created_at, metadata.id.as_str()))
            })
            .unwrap_or_else(|e| e);
        self.ordered.insert(pos, metadata.id.clone());
        self.doc_index
            .entry(metadata.doc_id.clone())
            .or_default()
            .insert(metadata.id.clone());
        *self.content_refcount.entry(metadata.content_hash.clone()).or_insert(0) += 1;
        self.entries.insert(metadata.id.clone(), metadata);
        true
    }

    pub fn all_ids(&self) -> Vec<ID> {
        self.ordered.clone()
    }

    pub fn doc_ids(&self, doc_id: &str) -> Vec<ID> {
        self.doc_index
            .get(doc_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn refcount(&self, content_hash: &str) -> u32 {
        self.content_refcount.get(content_hash).copied().unwrap_or(0)
    }

    pub fn find_new(&self, known_ids: &HashSet<ID>) -> Vec<EntryMetadata> {
        self.ordered
            .iter()
            .filter(|id| !known_ids.contains(*id))
            .map(|id| self.entries[id].clone())
            .collect()
    }

    pub fn find_new_for_doc(&self, known_ids: &HashSet<ID>, doc_id: &str) -> Vec<EntryMetadata> {
        let mut out: Vec<EntryMetadata> = self
            .doc_index
            .get(doc_id)
            .into_iter()
            .flatten()
            .filter(|id| !known_ids.contains(*id))
            .map(|id| self.entries[id].clone())
            .collect();
        out.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        out
    }

    pub fn find_entries(&self, filters: &ScanFilters) -> Vec<EntryMetadata> {
        self.ordered
            .iter()
            .map(|id| &self.entries[id])
            .filter(|m| filters.matches(m))
            .cloned()
            .collect()
    }

    /// Forward scan in canonical order, strictly after `cursor`.
    pub fn scan_since(
        &self,
        cursor: Option<&Cursor>,
        limit: Option<usize>,
        filters: Option<&ScanFilters>,
    ) -> ScanResult {
        let start = match cursor {
            None => 0,
            Some((ts, id)) => {
                let pos = self
                    .ordered
                    .binary_search_by(|existing| self.entries[existing].sort_key().cmp(&(*ts, id.as_str())));
                match pos {
                    Ok(idx) => idx + 1,
                    Err(idx) => idx,
                }
            }
        };

        let limit = limit.unwrap_or(usize::MAX);
        let mut entries = Vec::new();
        let mut next_cursor = None;
        let mut has_more = false;

        for id in self.ordered.iter().skip(start) {
            let metadata = &self.entries[id];
            if let Some(filters) = filters {
                if !filters.matches(metadata) {
                    continue;
                }
            }
            if entries.len() == limit {
                has_more = true;
                break;
            }
            entries.push(metadata.clone());
        }

        if let Some(last) = entries.last() {
            next_cursor = Some((last.created_at, last.id.clone()));
        }

        if !has_more {
            // Determine whether any further matching entry exists beyond what we collected.
            let last_id = entries.last().map(|m| m.id.clone());
            if let Some(last_id) = last_id {
                let last_pos = self.ordered.iter().position(|id| *id == last_id).unwrap_or(0);
                has_more = self.ordered.iter().skip(last_pos + 1).any(|id| {
                    filters.map(|f| f.matches(&self.entries[id])).unwrap_or(true)
                });
            }
        }

        ScanResult {
            entries,
            next_cursor,
            has_more,
        }
    }

    /// BFS over `dependency_ids`, returned with deepest dependencies first.
    pub fn resolve_dependencies(&self, start_id: &ID, opts: &ResolveOptions) -> Result<Vec<ID>> {
        if !self.entries.contains_key(start_id) {
            return Err(Error::NotFound(start_id.clone()));
        }

        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        let mut collected = Vec::new();

        visited.insert(start_id.clone());
        queue.push_back((start_id.clone(), 0usize));

        while let Some((id, depth)) = queue.pop_front() {
            let entry = match self.entries.get(&id) {
                Some(e) => e,
                None => continue,
            };
            collected.push(id.clone());

            let at_stop_type = opts
                .stop_at_entry_type
                .map(|t| entry.entry_type == t)
                .unwrap_or(false);
            let within_depth = opts.max_depth.map(|m| depth < m).unwrap_or(true);

            if !at_stop_type && within_depth {
                for dep in &entry.dependency_ids {
                    if visited.insert(dep.clone()) {
                        queue.push_back((dep.clone(), depth + 1));
                    }
                }
            }
        }

        if !opts.include_start {
            collected.retain(|id| id != start_id);
        }
        collected.reverse();
        Ok(collected)
    }

    /// Remove all entries belonging to `doc_id`. Returns the removed ids and any content
    /// hashes whose ref-count dropped to zero.
    pub fn purge_doc(&mut self, doc_id: &str) -> PurgeOutcome {
        let ids: Vec<ID> = self
            .doc_index
            .remove(doc_id)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();

        let mut orphaned = Vec::new();
        for id in &ids {
            if let Some(metadata) = self.entries.remove(id) {
                if let Some(count) = self.content_refcount.get_mut(&metadata.content_hash) {
                    *count -= 1;
                    if *count == 0 {
                        self.content_refcount.remove(&metadata.content_hash);
                        orphaned.push(metadata.content_hash.clone());
                    }
                }
            }
        }
        self.ordered.retain(|id| !ids.contains(id));

        PurgeOutcome {
            removed_entry_ids: ids,
            orphaned_content_hashes: orphaned,
        }
    }
}
