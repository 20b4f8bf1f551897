//! `BloomSummary`: a compact probabilistic digest of a CAS's id set, used by the sync engine
//! to avoid an O(N) id transfer before reconciling two stores.
//!
//! Sizing follows the standard optimal-bloom-filter formulas; hashing uses enhanced double
//! hashing over two independent string hashes (FNV-1a, DJB2) so only two hash passes are run
//! regardless of `hash_count`.

use crate::constants::{BLOOM_DEFAULT_FP_RATE, BLOOM_MIN_BITS, BLOOM_REBUILD_FACTOR, BLOOM_VERSION};
use base64ct::{Base64, Encoding};
use serde::{Deserialize, Serialize};

/// On-the-wire representation: `{ version, total_ids, bit_count, hash_count, salt, bits }`
/// with `bits` base64-encoded, matching the durability layer's convention for byte blobs.
#[derive(Serialize, Deserialize)]
struct Wire {
    version: String,
    total_ids: usize,
    bit_count: usize,
    hash_count: u32,
    salt: u64,
    bits: String,
}

/// A versioned bloom filter over an id set.
#[derive(Debug, Clone)]
pub struct BloomSummary {
    version: String,
    total_ids: usize,
    bit_count: usize,
    hash_count: u32,
    salt: u64,
    bits: Vec<u8>,
    /// The `n` the filter was originally sized for. Not part of the wire format — a peer that
    /// only deserializes a summary treats `total_ids` at construction time as the capacity for
    /// the purpose of deciding whether further incremental adds would need a rebuild.
    capacity: usize,
    /// `false` when deserialized from an unrecognized `version`; `might_contain` then always
    /// answers `true` rather than trusting possibly-foreign bit semantics.
    recognized: bool,
}

impl BloomSummary {
    /// Build an empty filter sized for `expected_items` insertions at false-positive rate `p`.
    pub fn with_capacity(expected_items: usize, fp_rate: f64) -> Self {
        let n = (expected_items.max(1)) as f64;
        let ln2 = std::f64::consts::LN_2;
        let bit_count = ((-n * fp_rate.ln() / (ln2 * ln2)).ceil() as usize).max(BLOOM_MIN_BITS);
        let hash_count = (((bit_count as f64 / n) * ln2).round() as u32).max(1);

        Self {
            version: BLOOM_VERSION.to_string(),
            total_ids: 0,
            bit_count,
            hash_count,
            salt: random_salt(),
            bits: vec![0u8; bit_count.div_ceil(8)],
            capacity: expected_items.max(1),
            recognized: true,
        }
    }

    /// Build a filter already populated with `ids`, sized for exactly that many items at the
    /// crate's default false-positive target.
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids: Vec<String> = ids.into_iter().map(|s| s.as_ref().to_string()).collect();
        let mut summary = Self::with_capacity(ids.len(), BLOOM_DEFAULT_FP_RATE);
        for id in &ids {
            summary.insert(id);
        }
        summary
    }

    /// Fold `id` into the filter in place. Valid until `total_ids` exceeds `capacity *
    /// BLOOM_REBUILD_FACTOR`, at which point `needs_rebuild` starts returning `true` and the
    /// caller should construct a fresh summary via `from_ids` instead of continuing to insert.
    pub fn insert(&mut self, id: &str) {
        for position in self.positions(id) {
            let byte = position / 8;
            let bit = position % 8;
            self.bits[byte] |= 1 << bit;
        }
        self.total_ids += 1;
    }

    /// `false` only if definitely absent; `true` otherwise (probable presence, or an
    /// unrecognized wire version that cannot be trusted to answer `false` safely).
    pub fn might_contain(&self, id: &str) -> bool {
        if !self.recognized {
            return true;
        }
        self.positions(id).all(|position| {
            let byte = position / 8;
            let bit = position % 8;
            self.bits[byte] & (1 << bit) != 0
        })
    }

    /// Whether this filter has absorbed enough incremental inserts since it was sized that a
    /// full rebuild (via `from_ids`) is now required to keep the false-positive rate bounded.
    pub fn needs_rebuild(&self) -> bool {
        self.total_ids > self.capacity * BLOOM_REBUILD_FACTOR
    }

    pub fn total_ids(&self) -> usize {
        self.total_ids
    }

    fn positions(&self, id: &str) -> impl Iterator<Item = usize> + '_ {
        let h1 = fnv1a(format!("{}:{}", self.salt, id).as_bytes());
        let h2 = djb2(format!("{}:{}", id, self.salt).as_bytes()) | 1;
        (0..self.hash_count).map(move |i| {
            let combined = h1.wrapping_add((i as u64).wrapping_mul(h2));
            (combined % self.bit_count as u64) as usize
        })
    }
}

fn fnv1a(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in data {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

fn djb2(data: &[u8]) -> u64 {
    let mut hash: u64 = 5381;
    for byte in data {
        hash = hash.wrapping_mul(33).wrapping_add(*byte as u64);
    }
    hash
}

fn random_salt() -> u64 {
    use rand::RngCore;
    rand::rngs::OsRng.next_u64()
}

impl Serialize for BloomSummary {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire = Wire {
            version: self.version.clone(),
            total_ids: self.total_ids,
            bit_count: self.bit_count,
            hash_count: self.hash_count,
            salt: self.salt,
            bits: Base64::encode_string(&self.bits),
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for BloomSummary {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = Wire::deserialize(deserializer)?;
        let recognized = wire.version == BLOOM_VERSION;
        let bits = if recognized {
            Base64::decode_vec(&wire.bits).map_err(serde::de::Error::custom)?
        } else {
            Vec::new()
        };
        Ok(Self {
            version: wire.version,
            total_ids: wire.total_ids,
            bit_count: wire.bit_count,
            hash_count: wire.hash_count,
            salt: wire.salt,
            bits,
            capacity: wire.total_ids.max(1),
            recognized,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_false_negatives() {
        let ids: Vec<String> = (0..500).map(|i| format!("id-{i}")).collect();
        let summary = BloomSummary::from_ids(&ids);
        for id in &ids {
            assert!(summary.might_contain(id), "false negative for {id}");
        }
    }

    #[test]
    fn empty_filter_denies_everything() {
        let summary = BloomSummary::with_capacity(100, 0.01);
        assert!(!summary.might_contain("nope"));
    }

    #[test]
    fn false_positive_rate_is_roughly_bounded() {
        let ids: Vec<String> = (0..2000).map(|i| format!("id-{i}")).collect();
        let summary = BloomSummary::from_ids(&ids);
        let mut false_positives = 0;
        let probes = 10_000;
        for i in 0..probes {
            if summary.might_contain(&format!("absent-{i}")) {
                false_positives += 1;
            }
        }
        let rate = false_positives as f64 / probes as f64;
        assert!(rate < 0.05, "false positive rate {rate} too high");
    }

    #[test]
    fn round_trips_through_json() {
        let summary = BloomSummary::from_ids(["a", "b", "c"]);
        let json = serde_json::to_string(&summary).unwrap();
        let back: BloomSummary = serde_json::from_str(&json).unwrap();
        assert!(back.might_contain("a"));
        assert!(!back.might_contain("definitely-not-present"));
    }

    #[test]
    fn unrecognized_version_is_conservative() {
        let json = serde_json::json!({
            "version": "bloom-v999",
            "total_ids": 0,
            "bit_count": 64,
            "hash_count": 1,
            "salt": 1,
            "bits": "AAAAAAAAAAA=",
        });
        let summary: BloomSummary = serde_json::from_value(json).unwrap();
        assert!(summary.might_contain("anything"));
    }

    #[test]
    fn needs_rebuild_past_rebuild_factor() {
        let mut summary = BloomSummary::with_capacity(4, 0.1);
        assert!(!summary.needs_rebuild());
        for i in 0..20 {
            summary.insert(&format!("id-{i}"));
        }
        assert!(summary.needs_rebuild());
    }
}
