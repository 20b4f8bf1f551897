//!
//! Mindoodb: a content-addressed, end-to-end encrypted, multi-writer document store.
//!
//! This crate implements the core storage and synchronization substrate described by the
//! project specification: an append-only, content-addressed entry log (`entry`), a
//! backend-polymorphic content-addressed store (`cas`) with in-memory and on-disk
//! implementations, a bloom-filter-assisted sync engine (`sync`), an authenticated network
//! boundary with challenge-response auth and RSA transport wrapping (`network`), and a
//! document loader (`loader`) that replays entries through an external CRDT engine.
//!
//! ## Core concepts
//!
//! * **Entries (`entry::Entry`)**: immutable, signed, content-addressed records. Every
//!   mutation to a document is one `Entry`.
//! * **CAS (`cas::Cas`)**: the storage trait implemented by `cas::in_memory::InMemoryCas` and
//!   `cas::on_disk::OnDiskCas`. Backend-polymorphic by design — the sync engine and document
//!   loader never know which backend they're talking to.
//! * **Sync (`sync::SyncEngine`)**: reconciles two CAS instances using id-set diff, bloom
//!   pre-filtering, and cursor pagination.
//! * **Network boundary (`network`)**: authentication (challenge/response, HMAC tokens) and
//!   per-recipient RSA transport wrapping, so a CAS can be exposed safely over an untrusted
//!   transport.
//! * **Document loader (`loader::DocumentLoader`)**: resolves a `doc_id` into a CRDT document
//!   by collecting, verifying, and decrypting entries and feeding them to an external CRDT
//!   engine in dependency order.
//!
//! ## Out of scope (external collaborators)
//!
//! The CRDT engine, the cryptographic primitives (signing, symmetric encryption, RSA-OAEP),
//! the tenant/user directory, and the view-index subsystem are all represented as trait
//! objects in `collaborators`, injected into the concrete types rather than implemented here.

pub mod bloom;
pub mod cas;
pub mod collaborators;
pub mod config;
pub mod constants;
pub mod entry;
pub mod id;
pub mod loader;
pub mod network;
pub mod sync;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("entry not found: {0}")]
    NotFound(String),

    #[error("entry already exists: {0}")]
    AlreadyExists(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Metadata for an entry exists but its payload does not. Logged and skipped by
    /// callers, never synthesized.
    #[error("payload missing for content hash {0}")]
    PayloadMissing(String),

    /// Decryption key referenced by an entry is not available in the caller's key bag.
    /// The document load is deferred, not failed outright.
    #[error("decryption key not found: {0}")]
    KeyNotFound(String),

    #[error("invalid signature")]
    InvalidSignature,

    /// A sync or cross-store operation was attempted between stores with different `db_id`s.
    #[error("incompatible store: local db_id {local}, remote db_id {remote}")]
    IncompatibleStore { local: String, remote: String },

    /// Authentication / authorization failure at the network boundary.
    #[error("authentication failed: {0}")]
    AuthFailed(#[from] crate::network::auth::AuthError),

    /// Transport-level failure; safe to retry.
    #[error("transient error: {0}")]
    Transient(String),

    /// Data corruption discovered post-validation. The store refuses further writes.
    #[error("fatal store error: {0}")]
    Fatal(String),

    #[error("invalid key format: {0}")]
    InvalidKeyFormat(String),

    #[error("cryptographic operation failed: {0}")]
    Crypto(String),
}
