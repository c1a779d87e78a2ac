//! Rate limiter (C2): a per-peer token-bucket admission check on packet
//! count, with a throttled warning signal back to the producer.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::protocol_constants::RATE_LIMIT_WARNING_WINDOW_MS;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The packet is under the ceiling for this window.
    Allow,
    /// The packet should be dropped. `warn` is set the first time a peer is
    /// dropped within a fresh warning window.
    Drop { warn: bool },
}

struct PeerBucket {
    window_start: Instant,
    count: u32,
    last_warning: Option<Instant>,
}

/// Per-peer token-bucket rate limiter.
///
/// One counter per peer with a rolling 1-second window. The ceiling is
/// shared across all peers (configured once at hub construction), matching
/// the spec's "one limit per peer" resolution of the source's ambiguity
/// between per-source and per-connection limits.
pub struct RateLimiter {
    ceiling_per_sec: u32,
    buckets: DashMap<String, PeerBucket>,
}

impl RateLimiter {
    pub fn new(ceiling_per_sec: u32) -> Self {
        Self {
            ceiling_per_sec,
            buckets: DashMap::new(),
        }
    }

    /// Checks and records admission for one packet from `peer_id`.
    pub fn admit(&self, peer_id: &str) -> Admission {
        self.admit_at(peer_id, Instant::now())
    }

    fn admit_at(&self, peer_id: &str, now: Instant) -> Admission {
        let mut entry = self.buckets.entry(peer_id.to_string()).or_insert_with(|| PeerBucket {
            window_start: now,
            count: 0,
            last_warning: None,
        });

        if now.duration_since(entry.window_start) >= Duration::from_secs(1) {
            entry.window_start = now;
            entry.count = 0;
        }

        entry.count += 1;

        if entry.count <= self.ceiling_per_sec {
            return Admission::Allow;
        }

        let warn = match entry.last_warning {
            Some(last) => now.duration_since(last) >= Duration::from_millis(RATE_LIMIT_WARNING_WINDOW_MS),
            None => true,
        };
        if warn {
            entry.last_warning = Some(now);
        }
        Admission::Drop { warn }
    }

    /// Clears all state for a disconnected peer.
    pub fn remove_peer(&self, peer_id: &str) {
        self.buckets.remove(peer_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_packets_under_ceiling() {
        let limiter = RateLimiter::new(150);
        for _ in 0..150 {
            assert_eq!(limiter.admit("peer-a"), Admission::Allow);
        }
    }

    #[test]
    fn drops_and_warns_once_over_ceiling() {
        let limiter = RateLimiter::new(2);
        assert_eq!(limiter.admit("peer-a"), Admission::Allow);
        assert_eq!(limiter.admit("peer-a"), Admission::Allow);
        assert_eq!(limiter.admit("peer-a"), Admission::Drop { warn: true });
        assert_eq!(limiter.admit("peer-a"), Admission::Drop { warn: false });
    }

    #[test]
    fn resets_after_window_elapses() {
        let limiter = RateLimiter::new(1);
        let t0 = Instant::now();
        assert_eq!(limiter.admit_at("peer-a", t0), Admission::Allow);
        assert_eq!(
            limiter.admit_at("peer-a", t0 + Duration::from_millis(100)),
            Admission::Drop { warn: true }
        );
        assert_eq!(
            limiter.admit_at("peer-a", t0 + Duration::from_millis(1_100)),
            Admission::Allow
        );
    }

    #[test]
    fn warning_window_throttles_repeat_warnings() {
        let limiter = RateLimiter::new(0);
        let t0 = Instant::now();
        assert_eq!(limiter.admit_at("peer-a", t0), Admission::Drop { warn: true });
        assert_eq!(
            limiter.admit_at("peer-a", t0 + Duration::from_millis(1_000)),
            Admission::Drop { warn: false }
        );
        assert_eq!(
            limiter.admit_at("peer-a", t0 + Duration::from_millis(5_001)),
            Admission::Drop { warn: true }
        );
    }

    #[test]
    fn peers_are_independent() {
        let limiter = RateLimiter::new(1);
        assert_eq!(limiter.admit("peer-a"), Admission::Allow);
        assert_eq!(limiter.admit("peer-b"), Admission::Allow);
    }

    #[test]
    fn remove_peer_clears_state() {
        let limiter = RateLimiter::new(1);
        limiter.admit("peer-a");
        limiter.remove_peer("peer-a");
        assert_eq!(limiter.admit("peer-a"), Admission::Allow);
    }
}
