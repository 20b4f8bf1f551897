//!
//! Defines the fundamental data unit (`Entry`) and related types.
//!
//! An `Entry` is an immutable, signed, content-addressed record in the append-only log. Every
//! mutation to a document — creation, a change, a compacting snapshot, a tombstone, or an
//! attachment chunk — is one `Entry`. Entries form a per-document DAG through
//! `dependency_ids`; the CAS never enforces that the closure exists on write, only sync
//! restores that cross-replica property.
//!
//! `EntryMetadata` is everything about an entry except its ciphertext; the CAS keeps
//! `EntryMetadata` in memory for every entry it holds and only loads `encrypted_data` payloads
//! on demand.

use crate::Error;
use crate::Result;
use crate::id::{self, ID};
use serde::{Deserialize, Serialize};

/// The kind of mutation an entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    DocCreate,
    DocChange,
    DocSnapshot,
    DocDelete,
    AttachmentChunk,
}

mod base64_bytes {
    use base64ct::{Base64, Encoding};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&Base64::encode_string(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        Base64::decode_vec(&s).map_err(serde::de::Error::custom)
    }
}

/// Everything about an `Entry` except its ciphertext payload.
///
/// This is what the CAS keeps resident in memory and what is returned from metadata-only
/// queries (`find_new_entries`, `scan_entries_since`, dependency resolution).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub entry_type: EntryType,
    pub id: ID,
    pub content_hash: String,
    pub doc_id: String,
    pub dependency_ids: Vec<ID>,
    /// Monotone millisecond timestamp assigned by the writer. Advisory — used for canonical
    /// ordering but not otherwise trusted.
    pub created_at: i64,
    /// Signing identity, formatted `ed25519:<base64>`.
    pub created_by_public_key: String,
    /// Symbolic reference into an external key bag.
    pub decryption_key_id: String,
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
    pub original_size: u64,
    pub encrypted_size: u64,
}

impl EntryMetadata {
    /// The canonical `(created_at, id)` sort key used by every cursor scan in the store.
    pub fn sort_key(&self) -> (i64, &str) {
        (self.created_at, self.id.as_str())
    }
}

/// An immutable, signed, content-addressed log record, including its ciphertext payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(flatten)]
    pub metadata: EntryMetadata,
    /// Opaque ciphertext. Only present on the full `Entry`; `EntryMetadata` omits it.
    pub encrypted_data: Vec<u8>,
}

impl Entry {
    pub fn id(&self) -> &ID {
        &self.metadata.id
    }

    pub fn doc_id(&self) -> &str {
        &self.metadata.doc_id
    }

    pub fn content_hash(&self) -> &str {
        &self.metadata.content_hash
    }

    pub fn dependency_ids(&self) -> &[ID] {
        &self.metadata.dependency_ids
    }

    pub fn entry_type(&self) -> EntryType {
        self.metadata.entry_type
    }

    /// The bytes a signature is computed over: the ciphertext itself. Verifiers recompute this
    /// independently of whatever the entry claims its own id or content_hash to be.
    pub fn signing_bytes(&self) -> &[u8] {
        &self.encrypted_data
    }

    /// Split into metadata and payload, as returned from a full `get_entries` call.
    pub fn into_parts(self) -> (EntryMetadata, Vec<u8>) {
        (self.metadata, self.encrypted_data)
    }
}

/// Builds an `Entry` for a document mutation (`doc_create` | `doc_change` | `doc_snapshot` |
/// `doc_delete`).
///
/// The id is derived from the CRDT engine's change hash and the set of dependency CRDT
/// hashes (see `id::derive_doc_entry_id`), so two writers that independently construct the
/// same logical change agree on its id without coordination.
pub struct DocEntryBuilder {
    entry_type: EntryType,
    doc_id: String,
    dependency_ids: Vec<ID>,
    crdt_change_hash: String,
    dep_crdt_hashes: Vec<String>,
    created_at: i64,
    created_by_public_key: String,
    decryption_key_id: String,
}

impl DocEntryBuilder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        entry_type: EntryType,
        doc_id: impl Into<String>,
        crdt_change_hash: impl Into<String>,
        dep_crdt_hashes: Vec<String>,
        dependency_ids: Vec<ID>,
        created_at: i64,
        created_by_public_key: impl Into<String>,
        decryption_key_id: impl Into<String>,
    ) -> Result<Self> {
        if matches!(entry_type, EntryType::AttachmentChunk) {
            return Err(Error::InvalidOperation(
                "DocEntryBuilder cannot build attachment_chunk entries; use AttachmentEntryBuilder"
                    .into(),
            ));
        }
        Ok(Self {
            entry_type,
            doc_id: doc_id.into(),
            dependency_ids,
            crdt_change_hash: crdt_change_hash.into(),
            dep_crdt_hashes,
            created_at,
            created_by_public_key: created_by_public_key.into(),
            decryption_key_id: decryption_key_id.into(),
        })
    }

    /// Finalize the entry, given the already-encrypted payload and its detached signature.
    pub fn build(self, encrypted_data: Vec<u8>, signature: Vec<u8>, original_size: u64) -> Entry {
        let id = id::derive_doc_entry_id(&self.doc_id, &self.crdt_change_hash, &self.dep_crdt_hashes);
        let content_hash = id::content_hash(&encrypted_data);
        let encrypted_size = encrypted_data.len() as u64;
        Entry {
            metadata: EntryMetadata {
                entry_type: self.entry_type,
                id,
                content_hash,
                doc_id: self.doc_id,
                dependency_ids: self.dependency_ids,
                created_at: self.created_at,
                created_by_public_key: self.created_by_public_key,
                decryption_key_id: self.decryption_key_id,
                signature,
                original_size,
                encrypted_size,
            },
            encrypted_data,
        }
    }
}

/// Builds an `attachment_chunk` entry, chained to its predecessor (if any) via
/// `dependency_ids` rather than content-addressed by position.
pub struct AttachmentEntryBuilder {
    doc_id: String,
    previous_chunk_id: Option<ID>,
    created_at: i64,
    created_by_public_key: String,
    decryption_key_id: String,
}

impl AttachmentEntryBuilder {
    pub fn new(
        doc_id: impl Into<String>,
        previous_chunk_id: Option<ID>,
        created_at: i64,
        created_by_public_key: impl Into<String>,
        decryption_key_id: impl Into<String>,
    ) -> Self {
        Self {
            doc_id: doc_id.into(),
            previous_chunk_id,
            created_at,
            created_by_public_key: created_by_public_key.into(),
            decryption_key_id: decryption_key_id.into(),
        }
    }

    pub fn build(self, encrypted_data: Vec<u8>, signature: Vec<u8>, original_size: u64) -> Entry {
        let id = id::new_attachment_id();
        let content_hash = id::content_hash(&encrypted_data);
        let encrypted_size = encrypted_data.len() as u64;
        Entry {
            metadata: EntryMetadata {
                entry_type: EntryType::AttachmentChunk,
                id,
                content_hash,
                doc_id: self.doc_id,
                dependency_ids: self.previous_chunk_id.into_iter().collect(),
                created_at: self.created_at,
                created_by_public_key: self.created_by_public_key,
                decryption_key_id: self.decryption_key_id,
                signature,
                original_size,
                encrypted_size,
            },
            encrypted_data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry(doc_id: &str, change_hash: &str, created_at: i64) -> Entry {
        let builder = DocEntryBuilder::new(
            EntryType::DocChange,
            doc_id,
            change_hash,
            vec![],
            vec![],
            created_at,
            "ed25519:test",
            "key1",
        )
        .unwrap();
        builder.build(vec![10, 20, 30, 40, 50], vec![1, 2, 3, 4], 5)
    }

    #[test]
    fn same_logical_change_yields_same_id() {
        let a = sample_entry("doc1", "change1", 100);
        let b = sample_entry("doc1", "change1", 200);
        // created_at differs but id is derived only from doc_id/crdt hash/deps.
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn different_docs_yield_different_ids() {
        let a = sample_entry("doc1", "change1", 100);
        let b = sample_entry("doc2", "change1", 100);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn content_hash_independent_of_id() {
        let a = sample_entry("doc1", "change1", 100);
        let b = sample_entry("doc2", "change2", 100);
        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn metadata_roundtrips_through_json() {
        let entry = sample_entry("doc1", "change1", 100);
        let json = serde_json::to_string(&entry.metadata).unwrap();
        let back: EntryMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(entry.metadata, back);
    }

    #[test]
    fn attachment_chunks_chain_via_dependency_ids() {
        let first = AttachmentEntryBuilder::new("doc1", None, 1, "ed25519:test", "key1")
            .build(vec![1], vec![], 1);
        let second =
            AttachmentEntryBuilder::new("doc1", Some(first.id().clone()), 2, "ed25519:test", "key1")
                .build(vec![2], vec![], 1);
        assert_eq!(second.dependency_ids(), &[first.id().clone()]);
        assert_ne!(first.id(), second.id());
    }
}
