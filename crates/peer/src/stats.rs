use std::time::{Duration, Instant};

/// An immutable snapshot of a peer's recorded interactions (spec.md §3
/// `PeerStats`). The live record is mutated under a per-peer lock; this is
/// what callers observe.
#[derive(Clone, Copy, Debug)]
pub struct PeerStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub last_success: Option<Instant>,
    pub last_failure: Option<Instant>,
    pub ema_rtt: Duration,
}

impl Default for PeerStats {
    fn default() -> Self {
        Self {
            total: 0,
            successful: 0,
            failed: 0,
            last_success: None,
            last_failure: None,
            ema_rtt: Duration::ZERO,
        }
    }
}

impl PeerStats {
    /// `successful / total`, or `0.0` when no requests have been made yet.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.successful as f64 / self.total as f64
        }
    }

    pub(crate) fn record_success(&mut self, rtt: Duration) {
        self.total += 1;
        self.successful += 1;
        self.last_success = Some(Instant::now());
        self.ema_rtt = if self.ema_rtt.is_zero() {
            rtt
        } else {
            (self.ema_rtt * 9 + rtt) / 10
        };
    }

    pub(crate) fn record_failure(&mut self) {
        self.total += 1;
        self.failed += 1;
        self.last_failure = Some(Instant::now());
    }
}

/// A peer's full connection record: stats plus live admission state
/// (spec.md §3 `PeerConnInfo`).
#[derive(Clone, Copy, Debug)]
pub struct PeerConnInfo {
    pub stats: PeerStats,
    pub active_streams: u32,
    pub blacklisted: bool,
}

#[derive(Debug)]
pub(crate) struct PeerRecord {
    pub stats: PeerStats,
    pub active_streams: u32,
    pub blacklisted: bool,
}

impl Default for PeerRecord {
    fn default() -> Self {
        Self {
            stats: PeerStats::default(),
            active_streams: 0,
            blacklisted: false,
        }
    }
}

impl PeerRecord {
    pub(crate) fn snapshot(&self) -> PeerConnInfo {
        PeerConnInfo {
            stats: self.stats,
            active_streams: self.active_streams,
            blacklisted: self.blacklisted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_adopts_first_sample() {
        let mut stats = PeerStats::default();
        stats.record_success(Duration::from_millis(100));
        assert_eq!(stats.ema_rtt, Duration::from_millis(100));
    }

    #[test]
    fn ema_weights_toward_history() {
        let mut stats = PeerStats::default();
        stats.record_success(Duration::from_millis(100));
        stats.record_success(Duration::from_millis(200));
        // (9*100 + 200) / 10 = 110
        assert_eq!(stats.ema_rtt, Duration::from_millis(110));
    }

    #[test]
    fn success_rate_is_zero_with_no_requests() {
        assert_eq!(PeerStats::default().success_rate(), 0.0);
    }
}
