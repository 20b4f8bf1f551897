//! On-disk `Cas` implementation.
//!
//! Layout under `<base_dir>/<db_id>/`:
//!
//! ```text
//! entries/<urlencoded_id>.json          one metadata file per entry (source of truth)
//! content/<content_hash>.bin            one payload file per unique content hash
//! metadata-index.json                   compact snapshot of ordered metadata
//! metadata-segments/<ts-pid-rand>.json  append-only mutation log
//! ```
//!
//! The entry-file set is canonical; the snapshot and segment log are a pure acceleration
//! structure that may be regenerated from `entries/` at any time. Every write goes through the
//! same atomic protocol: write to a temp file, fsync it, rename over the destination, fsync the
//! parent directory, so a reader never observes a partially-written file.

use crate::bloom::BloomSummary;
use crate::cas::index::{CasIndex, Cursor, PurgeOutcome, ResolveOptions, ScanFilters, ScanResult};
use crate::cas::{Cas, CompactionStatus};
use crate::config::OnDiskCasConfig;
use crate::entry::{Entry, EntryMetadata};
use crate::id::ID;
use crate::{Error, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

const ENTRIES_DIR: &str = crate::constants::ENTRIES_DIR;
const CONTENT_DIR: &str = crate::constants::CONTENT_DIR;
const METADATA_INDEX_FILE: &str = crate::constants::METADATA_INDEX_FILE;
const METADATA_SEGMENTS_DIR: &str = crate::constants::METADATA_SEGMENTS_DIR;

#[derive(serde::Serialize, serde::Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum SegmentRecord {
    Upsert { metadata: EntryMetadata },
    /// Records a `purge_doc_history` call. Deletion in this store is always doc-scoped, so the
    /// segment log replays purges by `doc_id` rather than enumerating individual entry ids.
    Delete { doc_id: String },
}

pub struct OnDiskCas {
    db_id: String,
    root: PathBuf,
    index: Mutex<CasIndex>,
    compaction_min_files: usize,
    compaction_max_bytes: u64,
    /// Filenames under `metadata-segments/` that this process has itself applied, either by
    /// replaying them at startup or by appending them. Only these are eligible for deletion at
    /// compaction time — a segment written by a concurrent process is replayed into the index
    /// first so its content isn't lost when the log is cleared.
    applied_segments: Mutex<HashSet<String>>,
    applied_segment_count: AtomicUsize,
    applied_segment_bytes: AtomicU64,
    last_compaction_at: AtomicI64,
    write_lock: Mutex<()>,
}

impl OnDiskCas {
    /// Run the startup sequence (optional wipe, directory creation, snapshot load, segment
    /// replay, validation-and-rebuild) and return a ready-to-use store.
    pub fn open(config: &OnDiskCasConfig) -> Result<Self> {
        let root = config.base_dir.join(&config.db_id);

        if config.wipe_on_start && root.exists() {
            fs::remove_dir_all(&root).map_err(Error::Io)?;
        }

        fs::create_dir_all(root.join(ENTRIES_DIR)).map_err(Error::Io)?;
        fs::create_dir_all(root.join(CONTENT_DIR)).map_err(Error::Io)?;
        fs::create_dir_all(root.join(METADATA_SEGMENTS_DIR)).map_err(Error::Io)?;

        let mut index = Self::load_snapshot(&root)?.unwrap_or_default();
        let (applied_segments, segment_bytes) = Self::replay_segments(&root, &mut index)?;
        let segment_count = applied_segments.len();

        let store = Self {
            db_id: config.db_id.clone(),
            root,
            index: Mutex::new(index),
            compaction_min_files: config.compaction_min_files,
            compaction_max_bytes: config.compaction_max_bytes,
            applied_segments: Mutex::new(applied_segments),
            applied_segment_count: AtomicUsize::new(segment_count),
            applied_segment_bytes: AtomicU64::new(segment_bytes),
            last_compaction_at: AtomicI64::new(0),
            write_lock: Mutex::new(()),
        };

        store.validate_and_rebuild_if_needed()?;
        Ok(store)
    }

    fn entries_dir(&self) -> PathBuf {
        self.root.join(ENTRIES_DIR)
    }

    fn content_dir(&self) -> PathBuf {
        self.root.join(CONTENT_DIR)
    }

    fn segments_dir(&self) -> PathBuf {
        self.root.join(METADATA_SEGMENTS_DIR)
    }

    fn snapshot_path(&self) -> PathBuf {
        self.root.join(METADATA_INDEX_FILE)
    }

    fn load_snapshot(root: &Path) -> Result<Option<CasIndex>> {
        let path = root.join(METADATA_INDEX_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path).map_err(Error::Io)?;
        let records: Vec<EntryMetadata> = serde_json::from_slice(&bytes)?;
        let mut index = CasIndex::new();
        for metadata in records {
            index.insert(metadata);
        }
        Ok(Some(index))
    }

    /// Replay segment files in filename order, returning the filenames applied and their total
    /// byte size — used to seed the compaction trigger counters and the applied-segments set.
    fn replay_segments(root: &Path, index: &mut CasIndex) -> Result<(HashSet<String>, u64)> {
        let segments_dir = root.join(METADATA_SEGMENTS_DIR);
        let mut paths: Vec<PathBuf> = fs::read_dir(&segments_dir)
            .map_err(Error::Io)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        paths.sort();

        let mut total_bytes = 0u64;
        let mut filenames = HashSet::with_capacity(paths.len());
        for path in &paths {
            let bytes = fs::read(path).map_err(Error::Io)?;
            total_bytes += bytes.len() as u64;
            let records: Vec<SegmentRecord> = serde_json::from_slice(&bytes)?;
            apply_segment_records(index, records);
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                filenames.insert(name.to_string());
            }
        }
        Ok((filenames, total_bytes))
    }

    /// Replay any segment file currently on disk that this process hasn't applied yet — written
    /// by a concurrent process since this process's last replay — before the log is cleared, so
    /// its content is merged into the index rather than discarded.
    fn replay_foreign_segments(&self) -> Result<()> {
        let mut paths: Vec<PathBuf> = fs::read_dir(self.segments_dir())
            .map_err(Error::Io)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        paths.sort();

        let mut applied = self.applied_segments.lock().unwrap();
        for path in &paths {
            let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if applied.contains(filename) {
                continue;
            }

            let bytes = fs::read(path).map_err(Error::Io)?;
            let records: Vec<SegmentRecord> = serde_json::from_slice(&bytes)?;
            apply_segment_records(&mut self.index.lock().unwrap(), records);

            applied.insert(filename.to_string());
            self.applied_segment_count.fetch_add(1, Ordering::SeqCst);
            self.applied_segment_bytes.fetch_add(bytes.len() as u64, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Compare the loaded index against the canonical `entries/` directory. On any mismatch,
    /// discard the index, rebuild it by re-reading every metadata file, and write a fresh
    /// snapshot with the stale segments removed.
    fn validate_and_rebuild_if_needed(&self) -> Result<()> {
        let on_disk_ids = self.read_entry_ids_from_disk()?;
        let index_ids: HashSet<ID> = self.index.lock().unwrap().all_ids().into_iter().collect();

        if on_disk_ids == index_ids {
            return Ok(());
        }

        tracing::warn!(
            db_id = %self.db_id,
            on_disk = on_disk_ids.len(),
            indexed = index_ids.len(),
            "metadata index out of sync with entries/, rebuilding from disk"
        );

        let mut rebuilt = CasIndex::new();
        for entry in fs::read_dir(self.entries_dir()).map_err(Error::Io)? {
            let path = entry.map_err(Error::Io)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path).map_err(Error::Io)?;
            let metadata: EntryMetadata = serde_json::from_slice(&bytes)?;
            rebuilt.insert(metadata);
        }

        *self.index.lock().unwrap() = rebuilt;
        self.replay_foreign_segments()?;
        self.write_snapshot()?;
        self.clear_segments()?;
        Ok(())
    }

    fn read_entry_ids_from_disk(&self) -> Result<HashSet<ID>> {
        let mut ids = HashSet::new();
        for entry in fs::read_dir(self.entries_dir()).map_err(Error::Io)? {
            let path = entry.map_err(Error::Io)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path).map_err(Error::Io)?;
            let metadata: EntryMetadata = serde_json::from_slice(&bytes)?;
            ids.insert(metadata.id);
        }
        Ok(ids)
    }

    fn write_snapshot(&self) -> Result<()> {
        let entries = self.index.lock().unwrap().find_entries(&ScanFilters::default());
        let bytes = serde_json::to_vec(&entries)?;
        atomic_write(&self.snapshot_path(), &bytes)
    }

    /// Delete every segment this process has applied (via `replay_segments` at startup,
    /// `append_segment`, or `replay_foreign_segments`). Callers that need to merge concurrently
    /// written segments into the snapshot first must call `replay_foreign_segments` themselves
    /// before calling this, so the snapshot reflects them before their segment file disappears.
    fn clear_segments(&self) -> Result<()> {
        let mut applied = self.applied_segments.lock().unwrap();
        for filename in applied.drain() {
            let path = self.segments_dir().join(&filename);
            if path.exists() {
                fs::remove_file(&path).map_err(Error::Io)?;
            }
        }
        self.applied_segment_count.store(0, Ordering::SeqCst);
        self.applied_segment_bytes.store(0, Ordering::SeqCst);
        Ok(())
    }

    fn append_segment(&self, records: &[SegmentRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let bytes = serde_json::to_vec(records)?;
        let filename = format!(
            "{:013}-{}-{:08x}.json",
            chrono::Utc::now().timestamp_millis(),
            std::process::id(),
            rand::random::<u32>()
        );
        atomic_write(&self.segments_dir().join(&filename), &bytes)?;

        self.applied_segments.lock().unwrap().insert(filename);
        self.applied_segment_count.fetch_add(1, Ordering::SeqCst);
        self.applied_segment_bytes
            .fetch_add(bytes.len() as u64, Ordering::SeqCst);
        self.maybe_compact()?;
        Ok(())
    }

    fn maybe_compact(&self) -> Result<()> {
        let count = self.applied_segment_count.load(Ordering::SeqCst);
        let bytes = self.applied_segment_bytes.load(Ordering::SeqCst);
        if count >= self.compaction_min_files || bytes >= self.compaction_max_bytes {
            self.replay_foreign_segments()?;
            self.write_snapshot()?;
            self.clear_segments()?;
            self.last_compaction_at
                .store(chrono::Utc::now().timestamp_millis(), Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Cas for OnDiskCas {
    fn db_id(&self) -> &str {
        &self.db_id
    }

    fn put_entries(&self, entries: Vec<Entry>) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        let mut upserts = Vec::new();

        for entry in entries {
            let (metadata, encrypted_data) = entry.into_parts();
            if self.index.lock().unwrap().contains(&metadata.id) {
                continue;
            }

            let content_path = self.content_dir().join(format!("{}.bin", metadata.content_hash));
            if !content_path.exists() {
                atomic_write(&content_path, &encrypted_data)?;
            }

            let entry_path = self.entries_dir().join(format!("{}.json", urlencode(&metadata.id)));
            atomic_write(&entry_path, &serde_json::to_vec(&metadata)?)?;

            upserts.push(SegmentRecord::Upsert {
                metadata: metadata.clone(),
            });
            self.index.lock().unwrap().insert(metadata);
        }

        self.append_segment(&upserts)
    }

    fn get_entries(&self, ids: &[ID]) -> Result<Vec<Entry>> {
        let index = self.index.lock().unwrap();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(metadata) = index.get(id) else {
                continue;
            };
            let content_path = self.content_dir().join(format!("{}.bin", metadata.content_hash));
            match fs::read(&content_path) {
                Ok(payload) => out.push(Entry {
                    metadata: metadata.clone(),
                    encrypted_data: payload,
                }),
                Err(_) => {
                    tracing::warn!(id = %id, content_hash = %metadata.content_hash, "payload file missing on disk");
                }
            }
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
        let _guard = self.write_lock.lock().unwrap();
        let outcome = self.index.lock().unwrap().purge_doc(doc_id);

        for id in &outcome.removed_entry_ids {
            let path = self.entries_dir().join(format!("{}.json", urlencode(id)));
            let _ = fs::remove_file(path);
        }
        for content_hash in &outcome.orphaned_content_hashes {
            let path = self.content_dir().join(format!("{content_hash}.bin"));
            let _ = fs::remove_file(path);
        }

        self.append_segment(&[SegmentRecord::Delete {
            doc_id: doc_id.to_string(),
        }])?;
        Ok(outcome)
    }

    fn get_compaction_status(&self) -> Result<CompactionStatus> {
        let last = self.last_compaction_at.load(Ordering::SeqCst);
        Ok(CompactionStatus {
            enabled: true,
            applied_segment_count: self.applied_segment_count.load(Ordering::SeqCst),
            applied_segment_bytes: self.applied_segment_bytes.load(Ordering::SeqCst),
            last_compaction_at: if last == 0 { None } else { Some(last) },
        })
    }
}

fn apply_segment_records(index: &mut CasIndex, records: Vec<SegmentRecord>) {
    for record in records {
        match record {
            SegmentRecord::Upsert { metadata } => {
                index.insert(metadata);
            }
            SegmentRecord::Delete { doc_id } => {
                index.purge_doc(&doc_id);
            }
        }
    }
}

/// Write to a temp file, fsync it, rename over the destination, fsync the parent directory.
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        Error::Fatal(format!("path {} has no parent directory", path.display()))
    })?;
    let tmp_name = format!(
        "{}.tmp-{}-{}-{:08x}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("entry"),
        std::process::id(),
        chrono::Utc::now().timestamp_millis(),
        rand::random::<u32>()
    );
    let tmp_path = parent.join(tmp_name);

    {
        let file = fs::File::create(&tmp_path).map_err(Error::Io)?;
        use std::io::Write;
        let mut file = file;
        file.write_all(bytes).map_err(Error::Io)?;
        file.sync_all().map_err(Error::Io)?;
    }
    fs::rename(&tmp_path, path).map_err(Error::Io)?;

    let dir = fs::File::open(parent).map_err(Error::Io)?;
    dir.sync_all().map_err(Error::Io)?;
    Ok(())
}

/// Percent-encode everything outside `[A-Za-z0-9._-]`, since entry ids are hashes or UUIDs
/// composed almost entirely of those characters and rarely need more than a no-op pass.
fn urlencode(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
