//! Constants used throughout the crate.

/// Default bloom filter false-positive target used when sizing a `BloomSummary`.
pub const BLOOM_DEFAULT_FP_RATE: f64 = 0.01;

/// Minimum bit count for a bloom filter, regardless of set size.
pub const BLOOM_MIN_BITS: usize = 64;

/// A bloom filter may absorb incremental inserts until its original capacity is
/// exceeded by this factor; beyond that a full rebuild is required.
pub const BLOOM_REBUILD_FACTOR: usize = 2;

/// Default challenge time-to-live for authentication.
pub const DEFAULT_CHALLENGE_TTL_SECS: i64 = 5 * 60;

/// Default token lifetime.
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 60 * 60;

/// On-disk snapshot compaction triggers: minimum number of applied segment files.
pub const DEFAULT_COMPACTION_MIN_FILES: usize = 64;

/// On-disk snapshot compaction triggers: minimum bytes of applied segments.
pub const DEFAULT_COMPACTION_MAX_BYTES: u64 = 4 * 1024 * 1024;

/// Subdirectory names within an on-disk database directory.
pub const ENTRIES_DIR: &str = "entries";
pub const CONTENT_DIR: &str = "content";
pub const METADATA_INDEX_FILE: &str = "metadata-index.json";
pub const METADATA_SEGMENTS_DIR: &str = "metadata-segments";

/// Envelope URI scheme prefix (`mdb://<type>/<base64url(json)>`).
pub const ENVELOPE_SCHEME: &str = "mdb://";

/// Current bloom summary serialization version.
pub const BLOOM_VERSION: &str = "bloom-v1";
