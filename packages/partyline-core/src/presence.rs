//! Presence registry (C4): the set of connected peers, their role, and
//! (for listeners) their subscription target.
//!
//! Structured after the corpus's `WsConnectionManager`: a `DashMap` keyed by
//! peer id, a monotonic id generator, and a per-peer [`CancellationToken`]
//! derived from a hub-wide token so that `close_all` cascades to every
//! connection (§5 Cancellation).

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::state::{PeerRole, PeerSummary};

struct PeerState {
    role: PeerRole,
    listening_to: Option<String>,
    source_kind: Option<String>,
    quality: Option<String>,
    cancel_token: CancellationToken,
}

/// Tracks every connected peer and its role.
pub struct PresenceRegistry {
    peers: DashMap<String, PeerState>,
    next_id: AtomicU64,
    global_cancel: RwLock<CancellationToken>,
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            peers: DashMap::new(),
            next_id: AtomicU64::new(0),
            global_cancel: RwLock::new(CancellationToken::new()),
        }
    }

    /// Registers a new peer, returning its generated id and a cancellation
    /// token that fires when the peer disconnects or the hub shuts down.
    pub fn register(&self) -> (String, CancellationToken) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let peer_id = format!("peer-{id}");
        let cancel_token = self.global_cancel.read().child_token();
        self.peers.insert(
            peer_id.clone(),
            PeerState {
                role: PeerRole::Idle,
                listening_to: None,
                source_kind: None,
                quality: None,
                cancel_token: cancel_token.clone(),
            },
        );
        (peer_id, cancel_token)
    }

    /// Removes a peer entirely. Returns what its role/subscription were, so
    /// the caller can run the matching disconnect-cleanup side effects.
    pub fn remove(&self, peer_id: &str) -> Option<(PeerRole, Option<String>)> {
        self.peers
            .remove(peer_id)
            .map(|(_, s)| (s.role, s.listening_to))
    }

    pub fn mark_source(&self, peer_id: &str, source_kind: &str, quality: &str) {
        if let Some(mut s) = self.peers.get_mut(peer_id) {
            s.role = PeerRole::Source;
            s.source_kind = Some(source_kind.to_string());
            s.quality = Some(quality.to_string());
        }
    }

    pub fn mark_idle(&self, peer_id: &str) {
        if let Some(mut s) = self.peers.get_mut(peer_id) {
            s.role = PeerRole::Idle;
            s.listening_to = None;
            s.source_kind = None;
            s.quality = None;
        }
    }

    pub fn set_listening_to(&self, peer_id: &str, source_id: Option<String>) {
        if let Some(mut s) = self.peers.get_mut(peer_id) {
            s.role = if source_id.is_some() {
                PeerRole::Listener
            } else {
                PeerRole::Idle
            };
            s.listening_to = source_id;
        }
    }

    pub fn role_of(&self, peer_id: &str) -> Option<PeerRole> {
        self.peers.get(peer_id).map(|s| s.role)
    }

    pub fn listening_to(&self, peer_id: &str) -> Option<String> {
        self.peers.get(peer_id).and_then(|s| s.listening_to.clone())
    }

    /// Number of peers currently subscribed to `source_id` — the value
    /// reported in `listenerCounts`.
    pub fn listener_count(&self, source_id: &str) -> usize {
        self.peers
            .iter()
            .filter(|s| s.listening_to.as_deref() == Some(source_id))
            .count()
    }

    /// Ids of peers currently subscribed to `source_id`, a consistent
    /// snapshot taken for fan-out dispatch (§5: "reads for fan-out take a
    /// consistent snapshot of the listener set at dispatch time").
    pub fn listeners_of(&self, source_id: &str) -> Vec<String> {
        self.peers
            .iter()
            .filter(|e| e.listening_to.as_deref() == Some(source_id))
            .map(|e| e.key().clone())
            .collect()
    }

    /// A full presence snapshot, used for `deviceList` and the `/status`,
    /// `/devices` HTTP endpoints.
    pub fn snapshot(&self) -> Vec<PeerSummary> {
        self.peers
            .iter()
            .map(|e| PeerSummary {
                peer_id: e.key().clone(),
                role: e.role,
                listening_to: e.listening_to.clone(),
                source_kind: e.source_kind.clone(),
                quality: e.quality.clone(),
            })
            .collect()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Cancels every outstanding peer's token (cascading to their retry
    /// timers and schedulers), then installs a fresh token so subsequently
    /// registered peers aren't pre-cancelled.
    pub fn close_all(&self) -> usize {
        let count = self.peers.len();
        self.global_cancel.read().cancel();
        *self.global_cancel.write() = CancellationToken::new();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_remove_tracks_count() {
        let registry = PresenceRegistry::new();
        let (id, _token) = registry.register();
        assert_eq!(registry.peer_count(), 1);
        let removed = registry.remove(&id);
        assert!(removed.is_some());
        assert_eq!(registry.peer_count(), 0);
    }

    #[test]
    fn listener_counts_reflect_subscriptions() {
        let registry = PresenceRegistry::new();
        let (source, _) = registry.register();
        let (l1, _) = registry.register();
        let (l2, _) = registry.register();
        registry.mark_source(&source, "microphone", "high");

        registry.set_listening_to(&l1, Some(source.clone()));
        registry.set_listening_to(&l2, Some(source.clone()));
        assert_eq!(registry.listener_count(&source), 2);

        registry.set_listening_to(&l1, None);
        assert_eq!(registry.listener_count(&source), 1);
        assert_eq!(registry.listeners_of(&source), vec![l2.clone()]);
    }

    #[test]
    fn close_all_cancels_tokens_and_allows_new_registrations() {
        let registry = PresenceRegistry::new();
        let (_id, token) = registry.register();
        assert!(!token.is_cancelled());
        registry.close_all();
        assert!(token.is_cancelled());

        let (_id2, token2) = registry.register();
        assert!(!token2.is_cancelled());
    }

    #[test]
    fn snapshot_reports_roles() {
        let registry = PresenceRegistry::new();
        let (source, _) = registry.register();
        registry.mark_source(&source, "system", "medium");
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].role, PeerRole::Source);
    }
}
