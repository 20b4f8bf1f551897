//! ID algebra: how entry identifiers and content hashes are derived.
//!
//! An `ID` is a stable, content-derived identifier for an `Entry`. For document entries it is
//! a function of the CRDT change hash and the set of dependency CRDT hashes, so two peers that
//! independently construct the same logical change recognize it as the same entry without prior
//! coordination. For attachment chunks it is a fresh, time-ordered identifier, since chunk
//! content is not expected to collide across writers.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A content-addressable identifier for an `Entry`.
pub type ID = String;

/// Hash arbitrary bytes to a lowercase hex SHA-256 digest.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// `content_hash = H(encrypted_data)`. Independent of `id`, so multiple entries can share one
/// physical ciphertext.
pub fn content_hash(encrypted_data: &[u8]) -> String {
    sha256_hex(encrypted_data)
}

/// Derive the id of a `doc_create` / `doc_change` / `doc_snapshot` / `doc_delete` entry.
///
/// `id = H(doc_id ‖ crdt_change_hash ‖ H(sorted(dep_crdt_hashes)))`. Dependency hashes are
/// sorted before hashing so the id is independent of the order dependencies were recorded in.
pub fn derive_doc_entry_id(doc_id: &str, crdt_change_hash: &str, dep_crdt_hashes: &[String]) -> ID {
    let mut sorted_deps = dep_crdt_hashes.to_vec();
    sorted_deps.sort();
    let deps_hash = sha256_hex(sorted_deps.join(",").as_bytes());

    let mut hasher = Sha256::new();
    hasher.update(doc_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(crdt_change_hash.as_bytes());
    hasher.update(b"\0");
    hasher.update(deps_hash.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Allocate a fresh, time-ordered id for an `attachment_chunk` entry.
///
/// Attachment chunks are not content-addressed by their logical position (unlike doc entries);
/// they are chained into their document's history purely through `dependency_ids`.
pub fn new_attachment_id() -> ID {
    Uuid::now_v7().to_string()
}
