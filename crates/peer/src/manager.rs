use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use libp2p_identity::PeerId;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::stats::{PeerConnInfo, PeerRecord};

/// Tuning knobs for `ConnectionManager` (spec.md §5 "Stream quota", §4.5).
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub struct ConnectionManagerConfig {
    pub max_streams: u32,
    pub blacklist_timeout: Duration,
    pub max_idle_time: Duration,
}

impl Default for ConnectionManagerConfig {
    fn default() -> Self {
        Self {
            max_streams: 5,
            blacklist_timeout: Duration::from_secs(300),
            max_idle_time: Duration::from_secs(600),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum AdmissionError {
    #[error("peer is blacklisted")]
    Blacklisted,
    #[error("peer's stream quota is exhausted")]
    QuotaExhausted,
}

/// Per-peer concurrency admission, statistics, and blacklist lifecycle
/// (spec.md §4.5). The peer map is guarded by a reader/writer lock; each
/// peer's record has its own lock so that unrelated peers never contend.
#[derive(Default)]
pub struct ConnectionManager {
    peers: RwLock<HashMap<PeerId, Arc<Mutex<PeerRecord>>>>,
    config: ConnectionManagerConfig,
}

impl ConnectionManager {
    #[must_use]
    pub fn new(config: ConnectionManagerConfig) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            config,
        }
    }

    async fn record_for(&self, peer: PeerId) -> Arc<Mutex<PeerRecord>> {
        if let Some(record) = self.peers.read().await.get(&peer) {
            return Arc::clone(record);
        }
        Arc::clone(
            self.peers
                .write()
                .await
                .entry(peer)
                .or_insert_with(|| Arc::new(Mutex::new(PeerRecord::default()))),
        )
    }

    /// Admits a new stream for `peer`, creating its record on first contact.
    ///
    /// # Errors
    /// `Blacklisted` while the peer's blacklist timeout has not elapsed;
    /// `QuotaExhausted` once `active_streams` reaches `max_streams`.
    pub async fn acquire_stream(&self, peer: PeerId) -> Result<(), AdmissionError> {
        let record = self.record_for(peer).await;
        let mut guard = record.lock().await;

        if guard.blacklisted {
            let elapsed = guard
                .stats
                .last_failure
                .map_or(Duration::MAX, |t| t.elapsed());
            if elapsed <= self.config.blacklist_timeout {
                return Err(AdmissionError::Blacklisted);
            }
            guard.blacklisted = false;
        }

        if guard.active_streams >= self.config.max_streams {
            return Err(AdmissionError::QuotaExhausted);
        }

        guard.active_streams += 1;
        Ok(())
    }

    /// Releases a previously acquired stream slot. Unknown peers are
    /// ignored, and the counter never goes below zero.
    pub async fn release_stream(&self, peer: PeerId) {
        if let Some(record) = self.peers.read().await.get(&peer) {
            let mut guard = record.lock().await;
            guard.active_streams = guard.active_streams.saturating_sub(1);
        }
    }

    pub async fn record_success(&self, peer: PeerId, rtt: Duration) {
        let record = self.record_for(peer).await;
        record.lock().await.stats.record_success(rtt);
    }

    pub async fn record_failure(&self, peer: PeerId) {
        let record = self.record_for(peer).await;
        record.lock().await.stats.record_failure();
    }

    #[must_use = "the rate is meaningless if not compared against a threshold"]
    pub async fn success_rate(&self, peer: PeerId) -> f64 {
        match self.peers.read().await.get(&peer) {
            Some(record) => record.lock().await.stats.success_rate(),
            None => 0.0,
        }
    }

    /// If `peer` has made at least `min_requests` requests and its success
    /// rate is below `threshold`, blacklists it and returns `true`.
    pub async fn should_blacklist(&self, peer: PeerId, threshold: f64, min_requests: u64) -> bool {
        let record = self.record_for(peer).await;
        let mut guard = record.lock().await;
        if guard.stats.total >= min_requests && guard.stats.success_rate() < threshold {
            guard.blacklisted = true;
            debug!(%peer, success_rate = guard.stats.success_rate(), "peer blacklisted");
            true
        } else {
            false
        }
    }

    #[must_use]
    pub async fn info(&self, peer: PeerId) -> Option<PeerConnInfo> {
        let record = self.peers.read().await.get(&peer)?.clone();
        Some(record.lock().await.snapshot())
    }

    /// Drops any peer record with zero active streams that has been idle
    /// (by its most recent success or failure) for longer than `max_idle`.
    pub async fn cleanup_old_peers(&self, max_idle: Duration) {
        let candidates: Vec<PeerId> = self.peers.read().await.keys().copied().collect();
        let mut stale = Vec::new();

        for peer in candidates {
            let Some(record) = self.peers.read().await.get(&peer).cloned() else {
                continue;
            };
            let guard = record.lock().await;
            if guard.active_streams != 0 {
                continue;
            }
            let last_activity = match (guard.stats.last_success, guard.stats.last_failure) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (Some(a), None) | (None, Some(a)) => Some(a),
                (None, None) => None,
            };
            if last_activity.is_some_and(|t| t.elapsed() > max_idle) {
                stale.push(peer);
            }
        }

        if !stale.is_empty() {
            let mut peers = self.peers.write().await;
            for peer in stale {
                peers.remove(&peer);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use libp2p_identity::Keypair;

    use super::*;

    fn test_peer() -> PeerId {
        Keypair::generate_ed25519().public().to_peer_id()
    }

    #[tokio::test]
    async fn admission_denies_past_max_streams() {
        let manager = ConnectionManager::new(ConnectionManagerConfig {
            max_streams: 2,
            ..ConnectionManagerConfig::default()
        });
        let peer = test_peer();

        manager.acquire_stream(peer).await.unwrap();
        manager.acquire_stream(peer).await.unwrap();
        assert_eq!(
            manager.acquire_stream(peer).await,
            Err(AdmissionError::QuotaExhausted)
        );

        manager.release_stream(peer).await;
        assert!(manager.acquire_stream(peer).await.is_ok());
    }

    #[tokio::test]
    async fn blacklist_denies_until_timeout_elapses() {
        let manager = ConnectionManager::new(ConnectionManagerConfig {
            max_streams: 5,
            blacklist_timeout: Duration::from_millis(20),
            ..ConnectionManagerConfig::default()
        });
        let peer = test_peer();

        for _ in 0..10 {
            manager.record_failure(peer).await;
        }
        assert!(manager.should_blacklist(peer, 0.5, 5).await);
        assert_eq!(
            manager.acquire_stream(peer).await,
            Err(AdmissionError::Blacklisted)
        );

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(manager.acquire_stream(peer).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_peer_release_is_a_no_op() {
        let manager = ConnectionManager::new(ConnectionManagerConfig::default());
        manager.release_stream(test_peer()).await;
    }

    #[tokio::test]
    async fn cleanup_drops_idle_peers_with_no_active_streams() {
        let manager = ConnectionManager::new(ConnectionManagerConfig::default());
        let peer = test_peer();
        manager.record_success(peer, Duration::from_millis(5)).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.cleanup_old_peers(Duration::from_millis(10)).await;

        assert!(manager.info(peer).await.is_none());
    }
}
