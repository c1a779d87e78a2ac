//! Fan-out router (C5): deliver each admitted frame from a source to every
//! currently-subscribed listener.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::frame::Frame;
use crate::presence::PresenceRegistry;

/// Per-listener outbound channel. Bounded, so a slow listener can't make the
/// fan-out loop block on everyone else (§5: "each per-connection send
/// buffer is bounded; on overflow, the slow listener is disconnected").
pub type ListenerSender = mpsc::Sender<Arc<Frame>>;

/// Registry of outbound channels, one per connected listener peer.
///
/// Kept separate from [`PresenceRegistry`] because the channel is a
/// connection-lifetime resource owned by the WebSocket handler, whereas
/// presence tracks logical peer state.
#[derive(Default)]
pub struct ListenerSenders {
    senders: dashmap::DashMap<String, ListenerSender>,
}

impl ListenerSenders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, peer_id: String, sender: ListenerSender) {
        self.senders.insert(peer_id, sender);
    }

    pub fn remove(&self, peer_id: &str) {
        self.senders.remove(peer_id);
    }
}

/// Delivers `frame` to every peer currently subscribed to `frame.source_id`.
///
/// Delivery is best-effort: a full or closed channel disconnects that one
/// listener (by dropping it from both registries) without affecting anyone
/// else, matching §4.4's "best effort" / §5's slow-consumer policy.
pub fn fan_out(presence: &PresenceRegistry, senders: &ListenerSenders, frame: Arc<Frame>) {
    for listener_id in presence.listeners_of(&frame.source_id) {
        let Some(sender) = senders.senders.get(&listener_id).map(|s| s.clone()) else {
            continue;
        };
        if sender.try_send(frame.clone()).is_err() {
            log::warn!(
                "[Router] listener {} overflowed or closed, dropping subscription to {}",
                listener_id,
                frame.source_id
            );
            senders.remove(&listener_id);
            presence.set_listening_to(&listener_id, None);
        }
    }
}
