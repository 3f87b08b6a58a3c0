use std::sync::atomic::{AtomicU64, Ordering};

use meshfile_primitives::{Digest, TreeType};

/// Returned by the publish path so a caller can log/record what was just
/// published without re-reading the metadata file back (SPEC_FULL.md §3).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PublishReceipt {
    pub cid: Digest,
    pub tree_type: TreeType,
    pub leaf_count: usize,
    pub file_size: u64,
}

/// Delivered through an optional progress callback during a download
/// (spec.md §8 scenario S6: "progress callback is invoked at least once
/// per chunk with monotonically non-decreasing `downloaded` ≤ `total`").
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DownloadProgress {
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
}

/// Aggregate operational counters owned by the `Node` facade
/// (SPEC_FULL.md §4.10). Each field is an independent atomic; snapshots
/// are not transactionally consistent with each other, which is fine for
/// counters meant to be eyeballed, not audited.
#[derive(Default)]
pub struct NodeStats {
    chunks_served: AtomicU64,
    chunks_fetched: AtomicU64,
    bytes_served: AtomicU64,
    bytes_fetched: AtomicU64,
}

/// An immutable point-in-time read of `NodeStats`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct NodeStatsSnapshot {
    pub chunks_served: u64,
    pub chunks_fetched: u64,
    pub bytes_served: u64,
    pub bytes_fetched: u64,
}

impl NodeStats {
    pub(crate) fn record_served(&self, bytes: u64) {
        self.chunks_served.fetch_add(1, Ordering::Relaxed);
        self.bytes_served.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_fetched(&self, bytes: u64) {
        self.chunks_fetched.fetch_add(1, Ordering::Relaxed);
        self.bytes_fetched.fetch_add(bytes, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> NodeStatsSnapshot {
        NodeStatsSnapshot {
            chunks_served: self.chunks_served.load(Ordering::Relaxed),
            chunks_fetched: self.chunks_fetched.load(Ordering::Relaxed),
            bytes_served: self.bytes_served.load(Ordering::Relaxed),
            bytes_fetched: self.bytes_fetched.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_accumulate_independently() {
        let stats = NodeStats::default();
        stats.record_served(100);
        stats.record_fetched(50);
        stats.record_fetched(25);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.chunks_served, 1);
        assert_eq!(snapshot.bytes_served, 100);
        assert_eq!(snapshot.chunks_fetched, 2);
        assert_eq!(snapshot.bytes_fetched, 75);
    }
}
