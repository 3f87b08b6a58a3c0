use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use libp2p_identity::PeerId;
use meshfile_primitives::{CoreError, Digest};
use rand::seq::SliceRandom;
use thiserror::Error;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum SelectionError {
    #[error("no candidate peers were supplied")]
    NoPeers,
    #[error("no candidate peer was reachable within the probe timeout")]
    NoReachablePeers,
    #[error("no provider in the candidate set actually has the chunk")]
    NoProviderHasChunk,
}

/// The liveness check `select_available` uses to confirm a candidate
/// actually holds the chunk before handing it back (spec.md §4.6). Defined
/// here rather than depending on the protocol crate, so `meshfile-network`
/// can implement it for `ChunkProtocol` without a dependency cycle.
#[async_trait]
pub trait ChunkExistenceProbe: Send + Sync {
    async fn exists(&self, peer: PeerId, chunk_hash: Digest) -> Result<bool, CoreError>;
}

/// The dummy round-trip probe `LatencyBased` selection uses.
#[async_trait]
pub trait LatencyProbe: Send + Sync {
    async fn probe_rtt(&self, peer: PeerId, timeout: Duration) -> Option<Duration>;
}

/// The three selection strategies named in spec.md §4.6. Expressed as a
/// closed set of variants rather than a trait object, per spec.md §9's
/// design note (selectors are a fixed, small capability set; the
/// anti-leecher hook, which is genuinely open-ended, is the trait-object
/// extensibility point instead).
pub enum PeerSelector {
    Random,
    RoundRobin { counter: AtomicUsize },
    LatencyBased { probe_timeout: Duration },
}

impl PeerSelector {
    #[must_use]
    pub const fn random() -> Self {
        Self::Random
    }

    #[must_use]
    pub const fn round_robin() -> Self {
        Self::RoundRobin {
            counter: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub const fn latency_based(probe_timeout: Duration) -> Self {
        Self::LatencyBased { probe_timeout }
    }

    /// Selects among `candidates` without probing (`Random`/`RoundRobin`).
    /// `LatencyBased` callers must use `select_latency` instead.
    pub fn select(&self, candidates: &[PeerId]) -> Result<PeerId, SelectionError> {
        if candidates.is_empty() {
            return Err(SelectionError::NoPeers);
        }
        match self {
            Self::Random => Ok(*candidates
                .choose(&mut rand::thread_rng())
                .expect("checked non-empty above")),
            Self::RoundRobin { counter } => {
                let i = counter.fetch_add(1, Ordering::Relaxed) % candidates.len();
                Ok(candidates[i])
            }
            Self::LatencyBased { .. } => {
                unreachable!("LatencyBased selection must go through select_latency")
            }
        }
    }

    /// Probes every candidate concurrently with a per-probe `probe_timeout`
    /// and returns the one with the smallest observed round trip.
    /// Dropping the returned future (e.g. on cancellation) drops every
    /// outstanding probe with it.
    pub async fn select_latency(
        &self,
        candidates: &[PeerId],
        probe: &dyn LatencyProbe,
    ) -> Result<PeerId, SelectionError> {
        let Self::LatencyBased { probe_timeout } = *self else {
            return self.select(candidates);
        };
        if candidates.is_empty() {
            return Err(SelectionError::NoPeers);
        }

        let mut probes: FuturesUnordered<_> = candidates
            .iter()
            .copied()
            .map(|peer| async move { probe.probe_rtt(peer, probe_timeout).await.map(|rtt| (peer, rtt)) })
            .collect();

        let mut best: Option<(PeerId, Duration)> = None;
        while let Some(outcome) = probes.next().await {
            if let Some((peer, rtt)) = outcome {
                if best.is_none_or(|(_, best_rtt)| rtt < best_rtt) {
                    best = Some((peer, rtt));
                }
            }
        }

        best.map(|(peer, _)| peer).ok_or(SelectionError::NoReachablePeers)
    }
}

/// Composes a `PeerSelector` with a liveness probe: repeatedly select a
/// candidate, confirm it actually has the chunk, and drop it from the
/// working set on a `false`/error response (spec.md §4.6
/// `select_available`).
pub async fn select_available(
    selector: &PeerSelector,
    candidates: &[PeerId],
    chunk_hash: Digest,
    existence: &dyn ChunkExistenceProbe,
    latency_probe: Option<&dyn LatencyProbe>,
) -> Result<PeerId, SelectionError> {
    let mut working_set = candidates.to_vec();

    loop {
        if working_set.is_empty() {
            return Err(SelectionError::NoProviderHasChunk);
        }

        let chosen = if matches!(selector, PeerSelector::LatencyBased { .. }) {
            let probe = latency_probe.ok_or(SelectionError::NoReachablePeers)?;
            selector.select_latency(&working_set, probe).await?
        } else {
            selector.select(&working_set)?
        };

        match existence.exists(chosen, chunk_hash).await {
            Ok(true) => return Ok(chosen),
            Ok(false) | Err(_) => working_set.retain(|&p| p != chosen),
        }
    }
}

#[cfg(test)]
mod tests {
    use libp2p_identity::Keypair;

    use super::*;

    fn peers(n: usize) -> Vec<PeerId> {
        (0..n)
            .map(|_| Keypair::generate_ed25519().public().to_peer_id())
            .collect()
    }

    #[test]
    fn round_robin_cycles_in_order() {
        let candidates = peers(3);
        let selector = PeerSelector::round_robin();
        let first = selector.select(&candidates).unwrap();
        let second = selector.select(&candidates).unwrap();
        let third = selector.select(&candidates).unwrap();
        let fourth = selector.select(&candidates).unwrap();
        assert_eq!(first, candidates[0]);
        assert_eq!(second, candidates[1]);
        assert_eq!(third, candidates[2]);
        assert_eq!(fourth, candidates[0]);
    }

    #[test]
    fn random_on_empty_candidates_fails() {
        let selector = PeerSelector::random();
        assert_eq!(selector.select(&[]), Err(SelectionError::NoPeers));
    }

    struct AllowOnly(PeerId);

    #[async_trait]
    impl ChunkExistenceProbe for AllowOnly {
        async fn exists(&self, peer: PeerId, _chunk_hash: Digest) -> Result<bool, CoreError> {
            Ok(peer == self.0)
        }
    }

    #[tokio::test]
    async fn select_available_skips_peers_without_the_chunk() {
        let candidates = peers(3);
        let selector = PeerSelector::round_robin();
        let probe = AllowOnly(candidates[2]);

        let chosen = select_available(&selector, &candidates, Digest::zero(), &probe, None)
            .await
            .unwrap();
        assert_eq!(chosen, candidates[2]);
    }

    struct NoneHaveIt;

    #[async_trait]
    impl ChunkExistenceProbe for NoneHaveIt {
        async fn exists(&self, _peer: PeerId, _chunk_hash: Digest) -> Result<bool, CoreError> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn select_available_fails_when_nobody_has_it() {
        let candidates = peers(2);
        let selector = PeerSelector::random();
        let result = select_available(&selector, &candidates, Digest::zero(), &NoneHaveIt, None).await;
        assert_eq!(result, Err(SelectionError::NoProviderHasChunk));
    }
}
