//! `SyncEngine`: stateless pull/push reconciliation between any two `Cas` instances.
//!
//! Holds no long-lived state of its own — every call re-derives what it needs from the two
//! stores it's given. Both directions are symmetric; `push` is `pull` with the stores swapped.

use crate::cas::Cas;
use crate::{Error, Result};
use std::collections::HashSet;

/// Aggregate counts from one `pull` or `push` call, for logging and testing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub entries_considered: usize,
    pub entries_transferred: usize,
    pub entries_failed: usize,
}

pub struct SyncEngine;

impl SyncEngine {
    pub fn new() -> Self {
        Self
    }

    /// Pull every entry `remote` has that `local` doesn't, and commit it into `local`.
    ///
    /// Bloom summaries are consulted only as a planning hint (skipped here since `pull`
    /// doesn't decide what to push); the actual transfer set always comes from
    /// `find_new_entries`, which is exact.
    pub fn pull(&self, local: &dyn Cas, remote: &dyn Cas) -> Result<SyncStats> {
        self.check_compatible(local, remote)?;

        let local_ids: HashSet<_> = local.get_all_ids()?.into_iter().collect();
        let new_meta = remote.find_new_entries(&local_ids)?;

        let mut stats = SyncStats {
            entries_considered: new_meta.len(),
            ..SyncStats::default()
        };

        let ids: Vec<_> = new_meta.iter().map(|m| m.id.clone()).collect();
        let entries = remote.get_entries(&ids)?;
        let fetched: HashSet<_> = entries.iter().map(|e| e.id().clone()).collect();
        stats.entries_failed += ids.iter().filter(|id| !fetched.contains(*id)).count();

        for entry in entries {
            match local.put_entries(vec![entry]) {
                Ok(()) => stats.entries_transferred += 1,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to commit synced entry");
                    stats.entries_failed += 1;
                }
            }
        }

        Ok(stats)
    }

    /// Push every entry `local` has that `remote` doesn't. Symmetric to `pull` with the roles
    /// of the two stores swapped.
    pub fn push(&self, local: &dyn Cas, remote: &dyn Cas) -> Result<SyncStats> {
        self.pull(remote, local)
    }

    /// Pull then push, so both sides converge to the same id set.
    pub fn reconcile(&self, local: &dyn Cas, remote: &dyn Cas) -> Result<(SyncStats, SyncStats)> {
        let pulled = self.pull(local, remote)?;
        let pushed = self.push(local, remote)?;
        Ok((pulled, pushed))
    }

    /// Partition `ids` against a bloom summary of the peer's id set, for callers that want to
    /// plan a push without first doing an exact `find_new_entries` round-trip.
    pub fn partition_by_bloom(
        ids: &[String],
        peer_bloom: &crate::bloom::BloomSummary,
    ) -> (Vec<String>, Vec<String>) {
        let mut definitely_missing = Vec::new();
        let mut maybe_present = Vec::new();
        for id in ids {
            if peer_bloom.might_contain(id) {
                maybe_present.push(id.clone());
            } else {
                definitely_missing.push(id.clone());
            }
        }
        (definitely_missing, maybe_present)
    }

    fn check_compatible(&self, local: &dyn Cas, remote: &dyn Cas) -> Result<()> {
        if local.db_id() != remote.db_id() {
            return Err(Error::IncompatibleStore {
                local: local.db_id().to_string(),
                remote: remote.db_id().to_string(),
            });
        }
        Ok(())
    }
}

impl Default for SyncEngine {
    fn default() -> Self {
        Self::new()
    }
}
