//! Request/response types for the abstract, transport-agnostic network protocol.
//!
//! These are plain data types; nothing here knows about HTTP, WebSockets, or any other wire
//! transport. A transport adapter is expected to serialize `Request`/`Response` as JSON (or
//! whatever the transport prefers) and hand bytes to `ServerCasAdapter::handle`.

use crate::bloom::BloomSummary;
use crate::cas::{Cursor, ResolveOptions, ScanFilters, ScanResult};
use crate::entry::{Entry, EntryMetadata};
use crate::id::ID;
use crate::network::capabilities::Capabilities;
use crate::network::rsa_wrap::NetworkEncryptedEntry;
use crate::cas::CompactionStatus;
use serde::{Deserialize, Serialize};

/// The boundary error taxonomy from the abstract protocol, distinct from `network::auth::AuthError`
/// so a transport can serialize a flat, stable error code without leaking internal error detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryError {
    InvalidToken,
    UserRevoked,
    InvalidSignature,
    ChallengeExpired,
    ChallengeUsed,
    UserNotFound,
    NetworkError,
    ServerError,
}

impl From<crate::network::auth::AuthError> for BoundaryError {
    fn from(err: crate::network::auth::AuthError) -> Self {
        use crate::network::auth::AuthError as A;
        match err {
            A::ChallengeNotFound => BoundaryError::UserNotFound,
            A::ChallengeExpired => BoundaryError::ChallengeExpired,
            A::ChallengeUsed => BoundaryError::ChallengeUsed,
            A::UserNotFound => BoundaryError::UserNotFound,
            A::UserRevoked => BoundaryError::UserRevoked,
            A::InvalidSignature => BoundaryError::InvalidSignature,
            A::InvalidToken | A::TokenExpired => BoundaryError::InvalidToken,
        }
    }
}

impl From<crate::Error> for BoundaryError {
    fn from(err: crate::Error) -> Self {
        match err {
            crate::Error::AuthFailed(auth_err) => auth_err.into(),
            crate::Error::Transient(_) => BoundaryError::NetworkError,
            _ => BoundaryError::ServerError,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticateResponse {
    pub success: bool,
    pub token: Option<String>,
    pub error: Option<BoundaryError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op", content = "input")]
pub enum Request {
    RequestChallenge { user: String },
    Authenticate { challenge_id: String, signature: Vec<u8> },
    FindNewEntries { token: String, known_ids: Vec<ID> },
    FindNewEntriesForDoc { token: String, known_ids: Vec<ID>, doc_id: String },
    FindEntries { token: String, filters: ScanFilters },
    GetEntries { token: String, ids: Vec<ID> },
    PutEntries { token: String, entries: Vec<Entry> },
    HasEntries { token: String, ids: Vec<ID> },
    GetAllIds { token: String },
    ResolveDependencies { token: String, start_id: ID, opts: ResolveOptions },
    ScanEntriesSince { token: String, cursor: Option<Cursor>, limit: Option<usize>, filters: Option<ScanFilters> },
    GetIdBloomSummary { token: String },
    GetCapabilities { token: String },
    GetCompactionStatus { token: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op", content = "output")]
pub enum Response {
    Challenge { challenge_id: String },
    Authenticate(AuthenticateResponse),
    Entries(Vec<EntryMetadata>),
    NetworkEntries(Vec<NetworkEncryptedEntry>),
    Ids(Vec<ID>),
    Scan(ScanResult),
    Bloom(BloomSummary),
    Capabilities(Capabilities),
    CompactionStatus(CompactionStatus),
    Ok,
    Error(BoundaryError),
}
