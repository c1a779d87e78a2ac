//! Session control (C9): the hub's composition root for admission, fan-out,
//! and presence bookkeeping, and the handlers behind every session-control
//! message a peer can send.
//!
//! This module is transport-agnostic: it takes parsed requests and returns
//! [`Outcome`]s plus whatever domain events it emitted on the shared
//! broadcast channel. The WebSocket layer owns turning wire bytes into
//! calls here and calls back out into frame delivery.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::events::{BroadcastEventBridge, EventEmitter, SessionEvent, StreamEvent};
use crate::frame::{self, Frame, FrameMeta};
use crate::history::ReplayHistory;
use crate::presence::PresenceRegistry;
use crate::protocol_constants::{MAX_RETX_RANGE, VALID_QUALITIES, VALID_SOURCE_KINDS};
use crate::rate_limiter::{Admission, RateLimiter};
use crate::router::{self, ListenerSender, ListenerSenders};
use crate::state::{HubConfig, PeerRole};

/// A directed, single-peer channel for events that §4.8 scopes to one
/// recipient (`rateLimitWarning`, `listenerJoined`) rather than every
/// connected peer. Kept separate from the shared [`BroadcastEventBridge`],
/// which is inherently one-to-many.
pub type PeerNotifier = mpsc::UnboundedSender<SessionEvent>;

/// Result of a session-control operation.
///
/// Protocol violations are reported here rather than as [`crate::error::RelayError`];
/// the WebSocket layer turns `Rejected` into a typed wire-level error reply,
/// it never becomes an HTTP error response.
#[derive(Debug, PartialEq)]
pub enum Outcome {
    /// The operation changed hub state and any events have been emitted.
    Applied,
    /// The peer was already in the requested state; nothing changed and no
    /// event was emitted (repeated `startStreaming`/`stopStreaming` on an
    /// already-in-that-state peer is a no-op, not an error).
    NoOp,
    /// The request was invalid and was silently or explicitly rejected.
    Rejected(&'static str),
}

/// The relay hub: owns every per-peer registry and wires frame admission to
/// fan-out. One instance serves the whole process; peers are looked up by
/// their generated peer id.
pub struct Hub {
    config: HubConfig,
    presence: PresenceRegistry,
    rate_limiter: RateLimiter,
    history: ReplayHistory,
    senders: ListenerSenders,
    events: Arc<dyn EventEmitter>,
    notifiers: DashMap<String, PeerNotifier>,
}

impl Hub {
    pub fn new(config: HubConfig, events: Arc<dyn EventEmitter>) -> Self {
        let rate_limiter = RateLimiter::new(config.max_packets_per_sec);
        let history = ReplayHistory::new(config.history_max, config.history_age_ms);
        Self {
            config,
            presence: PresenceRegistry::new(),
            rate_limiter,
            history,
            senders: ListenerSenders::new(),
            events,
            notifiers: DashMap::new(),
        }
    }

    /// Registers the channel a directed (single-peer) notification for
    /// `peer_id` is delivered on. Call once per connection, right after
    /// [`Hub::register_peer`].
    pub fn register_notifier(&self, peer_id: &str, notifier: PeerNotifier) {
        self.notifiers.insert(peer_id.to_string(), notifier);
    }

    /// Sends an event to one peer's own channel rather than the shared
    /// broadcast. Silently dropped if the peer has no notifier registered
    /// (e.g. it already disconnected) or its receiver was dropped.
    fn notify(&self, peer_id: &str, event: SessionEvent) {
        if let Some(notifier) = self.notifiers.get(peer_id) {
            let _ = notifier.send(event);
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    /// Registers a brand-new peer connection, in the idle role.
    pub fn register_peer(&self) -> (String, tokio_util::sync::CancellationToken) {
        self.presence.register()
    }

    /// `startStreaming`: marks the peer as a source. Idempotent for a peer
    /// already streaming the same `source_kind`. Rejects a `source_kind`
    /// or `quality` outside the enumerated wire values (§4.8) without
    /// touching any state.
    pub fn start_streaming(&self, peer_id: &str, source_kind: &str, quality: &str) -> Outcome {
        if !VALID_SOURCE_KINDS.contains(&source_kind) {
            return Outcome::Rejected("invalid source kind");
        }
        if !VALID_QUALITIES.contains(&quality) {
            return Outcome::Rejected("invalid quality");
        }
        if self.presence.role_of(peer_id) == Some(PeerRole::Source) {
            return Outcome::NoOp;
        }
        self.presence.mark_source(peer_id, source_kind, quality);
        self.events.emit_session(SessionEvent::StreamStarted {
            client_id: peer_id.to_string(),
            source: source_kind.to_string(),
            quality: quality.to_string(),
            timestamp: now_ms(),
        });
        self.emit_device_list();
        Outcome::Applied
    }

    /// `stopStreaming`: tears down the source's history and disconnects its
    /// listeners' subscriptions (the listeners themselves stay connected and
    /// idle; they receive an updated `listenerCounts`/`deviceList`).
    pub fn stop_streaming(&self, peer_id: &str) -> Outcome {
        if self.presence.role_of(peer_id) != Some(PeerRole::Source) {
            return Outcome::NoOp;
        }
        for listener_id in self.presence.listeners_of(peer_id) {
            self.senders.remove(&listener_id);
            self.presence.set_listening_to(&listener_id, None);
        }
        self.history.remove_source(peer_id);
        self.presence.mark_idle(peer_id);
        self.events.emit_session(SessionEvent::StreamStopped {
            client_id: peer_id.to_string(),
            timestamp: now_ms(),
        });
        self.emit_listener_counts();
        self.emit_device_list();
        Outcome::Applied
    }

    /// `joinAsListener`: subscribes `peer_id` to `source_id`'s fan-out.
    /// Rejected if the source doesn't currently exist.
    pub fn join_as_listener(&self, peer_id: &str, source_id: &str, sender: ListenerSender) -> Outcome {
        if self.presence.role_of(source_id) != Some(PeerRole::Source) {
            return Outcome::Rejected("unknown source");
        }
        if self.presence.listening_to(peer_id).as_deref() == Some(source_id) {
            return Outcome::NoOp;
        }
        self.senders.insert(peer_id.to_string(), sender);
        self.presence.set_listening_to(peer_id, Some(source_id.to_string()));
        // §4.8: listenerJoined goes to the source, not every connected peer.
        self.notify(
            source_id,
            SessionEvent::ListenerJoined {
                source_id: source_id.to_string(),
                listener_id: peer_id.to_string(),
                timestamp: now_ms(),
            },
        );
        self.emit_listener_counts();
        Outcome::Applied
    }

    /// `leaveAsListener`: unsubscribes the peer, if it was listening to anything.
    pub fn leave_as_listener(&self, peer_id: &str) -> Outcome {
        let Some(source_id) = self.presence.listening_to(peer_id) else {
            return Outcome::NoOp;
        };
        self.senders.remove(peer_id);
        self.presence.set_listening_to(peer_id, None);
        self.events.emit_session(SessionEvent::ListenerLeft {
            source_id,
            listener_id: peer_id.to_string(),
            timestamp: now_ms(),
        });
        self.emit_listener_counts();
        Outcome::Applied
    }

    /// `audioData`: admits and fans out one inbound frame from a source peer.
    /// Applies the rate limiter before anything else is touched.
    /// `is_retransmission` carries the wire `isRetransmission` marker through
    /// onto the decoded [`Frame`] so a listener's reliability manager (C6)
    /// can bypass its duplicate-suppression window for it.
    pub fn audio_data(
        &self,
        peer_id: &str,
        samples: Vec<f32>,
        meta: FrameMeta,
        is_retransmission: bool,
    ) -> Outcome {
        if self.presence.role_of(peer_id) != Some(PeerRole::Source) {
            return Outcome::Rejected("peer is not streaming");
        }

        match self.rate_limiter.admit(peer_id) {
            Admission::Allow => {}
            Admission::Drop { warn } => {
                if warn {
                    // §4.8: rateLimitWarning goes to the producing peer only.
                    self.notify(
                        peer_id,
                        SessionEvent::RateLimitWarning {
                            peer_id: peer_id.to_string(),
                            timestamp: now_ms(),
                        },
                    );
                }
                self.events.emit_stream(StreamEvent::PacketDropped {
                    source_id: peer_id.to_string(),
                    timestamp: now_ms(),
                });
                return Outcome::Rejected("rate limit exceeded");
            }
        }

        let mut decoded = match frame::decode(peer_id, samples, meta, now_ms()) {
            Ok(f) => f,
            Err(_) => {
                self.events.emit_stream(StreamEvent::PacketDropped {
                    source_id: peer_id.to_string(),
                    timestamp: now_ms(),
                });
                return Outcome::Rejected("malformed frame");
            }
        };
        decoded.is_retransmission = is_retransmission;

        self.history.record(peer_id, decoded.clone(), now_ms());
        router::fan_out(&self.presence, &self.senders, Arc::new(decoded));
        Outcome::Applied
    }

    /// `requestRetransmission`: silently ignores a malformed (out-of-order)
    /// range rather than erroring; an in-order but oversized range is
    /// honored and clamped by [`ReplayHistory::fetch_range`] itself.
    pub fn request_retransmission(&self, source_id: &str, start_seq: u32, end_seq: u32) -> Vec<Frame> {
        if !ReplayHistory::is_valid_request(start_seq, end_seq) {
            return Vec::new();
        }
        let frames = self.history.fetch_range(source_id, start_seq, end_seq);
        if !frames.is_empty() {
            self.events.emit_stream(StreamEvent::RetransmissionServed {
                source_id: source_id.to_string(),
                count: frames.len(),
                timestamp: now_ms(),
            });
        }
        frames
    }

    /// Disconnect cleanup: removes a peer entirely (source or listener).
    pub fn disconnect(&self, peer_id: &str) {
        let Some((role, _)) = self.presence.remove(peer_id) else {
            return;
        };
        self.senders.remove(peer_id);
        self.rate_limiter.remove_peer(peer_id);
        self.notifiers.remove(peer_id);
        match role {
            PeerRole::Source => {
                for listener_id in self.presence.listeners_of(peer_id) {
                    self.senders.remove(&listener_id);
                    self.presence.set_listening_to(&listener_id, None);
                }
                self.history.remove_source(peer_id);
                self.events.emit_session(SessionEvent::StreamStopped {
                    client_id: peer_id.to_string(),
                    timestamp: now_ms(),
                });
                self.emit_device_list();
            }
            PeerRole::Listener => {
                self.emit_listener_counts();
            }
            PeerRole::Idle => {}
        }
    }

    fn emit_listener_counts(&self) {
        let sources: Vec<String> = self
            .presence
            .snapshot()
            .into_iter()
            .filter(|p| p.role == PeerRole::Source)
            .map(|p| p.peer_id)
            .collect();
        let counts = sources
            .into_iter()
            .map(|id| {
                let n = self.presence.listener_count(&id);
                (id, n)
            })
            .collect();
        self.events.emit_session(SessionEvent::ListenerCounts {
            counts,
            timestamp: now_ms(),
        });
    }

    fn emit_device_list(&self) {
        self.events.emit_session(SessionEvent::DeviceList {
            devices: self.presence.snapshot(),
            timestamp: now_ms(),
        });
    }
}

fn now_ms() -> u64 {
    use std::sync::OnceLock;
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    Instant::now().duration_since(*epoch).as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub() -> Hub {
        let (bridge_tx, _rx) = tokio::sync::broadcast::channel(16);
        let bridge = Arc::new(BroadcastEventBridge::with_sender(bridge_tx));
        Hub::new(HubConfig::default(), bridge)
    }

    fn meta(seq: u32) -> FrameMeta {
        FrameMeta {
            seq,
            sample_rate: 48_000,
            channels: 2,
            timestamp: 0,
        }
    }

    #[test]
    fn start_streaming_is_idempotent() {
        let hub = hub();
        let (source, _) = hub.register_peer();
        assert_eq!(hub.start_streaming(&source, "microphone", "high"), Outcome::Applied);
        assert_eq!(hub.start_streaming(&source, "microphone", "high"), Outcome::NoOp);
    }

    #[test]
    fn start_streaming_rejects_unknown_source_kind() {
        let hub = hub();
        let (source, _) = hub.register_peer();
        assert_eq!(
            hub.start_streaming(&source, "mic", "high"),
            Outcome::Rejected("invalid source kind")
        );
        assert_eq!(hub.presence().role_of(&source), Some(PeerRole::Idle));
    }

    #[test]
    fn start_streaming_rejects_unknown_quality() {
        let hub = hub();
        let (source, _) = hub.register_peer();
        assert_eq!(
            hub.start_streaming(&source, "microphone", "lossless"),
            Outcome::Rejected("invalid quality")
        );
        assert_eq!(hub.presence().role_of(&source), Some(PeerRole::Idle));
    }

    #[test]
    fn stop_streaming_on_idle_peer_is_noop() {
        let hub = hub();
        let (peer, _) = hub.register_peer();
        assert_eq!(hub.stop_streaming(&peer), Outcome::NoOp);
    }

    #[test]
    fn join_unknown_source_is_rejected() {
        let hub = hub();
        let (listener, _) = hub.register_peer();
        let (tx, _rx) = mpsc::channel(8);
        assert_eq!(
            hub.join_as_listener(&listener, "nonexistent", tx),
            Outcome::Rejected("unknown source")
        );
    }

    #[test]
    fn join_then_leave_updates_listener_counts() {
        let hub = hub();
        let (source, _) = hub.register_peer();
        let (listener, _) = hub.register_peer();
        hub.start_streaming(&source, "microphone", "high");
        let (tx, _rx) = mpsc::channel(8);
        assert_eq!(hub.join_as_listener(&listener, &source, tx), Outcome::Applied);
        assert_eq!(hub.presence().listener_count(&source), 1);
        assert_eq!(hub.leave_as_listener(&listener), Outcome::Applied);
        assert_eq!(hub.presence().listener_count(&source), 0);
    }

    #[test]
    fn listener_joined_is_delivered_to_the_source_only() {
        let hub = hub();
        let (source, _) = hub.register_peer();
        let (listener, _) = hub.register_peer();
        hub.start_streaming(&source, "microphone", "high");

        let (source_notify_tx, mut source_notify_rx) = mpsc::unbounded_channel();
        hub.register_notifier(&source, source_notify_tx);
        let (listener_notify_tx, mut listener_notify_rx) = mpsc::unbounded_channel();
        hub.register_notifier(&listener, listener_notify_tx);

        let (tx, _rx) = mpsc::channel(8);
        hub.join_as_listener(&listener, &source, tx);

        assert!(matches!(
            source_notify_rx.try_recv(),
            Ok(SessionEvent::ListenerJoined { .. })
        ));
        assert!(listener_notify_rx.try_recv().is_err());
    }

    #[test]
    fn rate_limit_warning_is_delivered_to_the_producing_peer_only() {
        let hub = HubConfig {
            max_packets_per_sec: 1,
            ..HubConfig::default()
        };
        let hub = {
            let (bridge_tx, _rx) = tokio::sync::broadcast::channel(16);
            let bridge = Arc::new(BroadcastEventBridge::with_sender(bridge_tx));
            Hub::new(hub, bridge)
        };
        let (source, _) = hub.register_peer();
        hub.start_streaming(&source, "microphone", "high");

        let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
        hub.register_notifier(&source, notify_tx);

        for seq in 0..20u32 {
            hub.audio_data(&source, vec![0.1, 0.2], meta(seq), false);
        }

        assert!(matches!(
            notify_rx.try_recv(),
            Ok(SessionEvent::RateLimitWarning { .. })
        ));
    }

    #[test]
    fn audio_data_rejected_from_non_source_peer() {
        let hub = hub();
        let (peer, _) = hub.register_peer();
        let outcome = hub.audio_data(&peer, vec![0.1, 0.2], meta(0), false);
        assert_eq!(outcome, Outcome::Rejected("peer is not streaming"));
    }

    #[test]
    fn audio_data_fans_out_to_listener() {
        let hub = hub();
        let (source, _) = hub.register_peer();
        let (listener, _) = hub.register_peer();
        hub.start_streaming(&source, "microphone", "high");
        let (tx, mut rx) = mpsc::channel(8);
        hub.join_as_listener(&listener, &source, tx);

        let outcome = hub.audio_data(&source, vec![0.1, 0.2], meta(0), false);
        assert_eq!(outcome, Outcome::Applied);
        assert_eq!(rx.try_recv().unwrap().seq, 0);
    }

    #[test]
    fn audio_data_marks_retransmitted_frames() {
        let hub = hub();
        let (source, _) = hub.register_peer();
        let (listener, _) = hub.register_peer();
        hub.start_streaming(&source, "microphone", "high");
        let (tx, mut rx) = mpsc::channel(8);
        hub.join_as_listener(&listener, &source, tx);

        hub.audio_data(&source, vec![0.1, 0.2], meta(0), true);
        assert!(rx.try_recv().unwrap().is_retransmission);
    }

    #[test]
    fn stop_streaming_clears_history_and_listeners() {
        let hub = hub();
        let (source, _) = hub.register_peer();
        let (listener, _) = hub.register_peer();
        hub.start_streaming(&source, "microphone", "high");
        let (tx, _rx) = mpsc::channel(8);
        hub.join_as_listener(&listener, &source, tx);
        hub.audio_data(&source, vec![0.1, 0.2], meta(0), false);

        hub.stop_streaming(&source);
        assert!(hub.presence().listening_to(&listener).is_none());
        assert!(hub.request_retransmission(&source, 0, 0).is_empty());
    }

    #[test]
    fn disconnecting_source_stops_its_listeners() {
        let hub = hub();
        let (source, _) = hub.register_peer();
        let (listener, _) = hub.register_peer();
        hub.start_streaming(&source, "microphone", "high");
        let (tx, _rx) = mpsc::channel(8);
        hub.join_as_listener(&listener, &source, tx);

        hub.disconnect(&source);
        assert!(hub.presence().listening_to(&listener).is_none());
    }

    #[test]
    fn request_retransmission_clamps_oversized_range() {
        let hub = hub();
        let (source, _) = hub.register_peer();
        hub.start_streaming(&source, "microphone", "high");
        for seq in 0..200u32 {
            hub.audio_data(&source, vec![0.1, 0.2], meta(seq), false);
        }
        let frames = hub.request_retransmission(&source, 0, 199);
        assert_eq!(frames.len(), MAX_RETX_RANGE as usize);
    }

    #[test]
    fn request_retransmission_rejects_malformed_range() {
        let hub = hub();
        let (source, _) = hub.register_peer();
        hub.start_streaming(&source, "microphone", "high");
        hub.audio_data(&source, vec![0.1, 0.2], meta(0), false);
        // end before start, and not equal: not a valid request, so silently empty.
        assert!(hub.request_retransmission(&source, 5, 0).is_empty());
    }

    struct CountingEmitter {
        dropped: std::sync::atomic::AtomicUsize,
        served: std::sync::atomic::AtomicUsize,
    }

    impl EventEmitter for CountingEmitter {
        fn emit_session(&self, _event: SessionEvent) {}
        fn emit_stream(&self, event: StreamEvent) {
            match event {
                StreamEvent::PacketDropped { .. } => {
                    self.dropped.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                }
                StreamEvent::RetransmissionServed { .. } => {
                    self.served.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                }
            }
        }
    }

    #[test]
    fn request_retransmission_emits_retransmission_served() {
        let emitter = Arc::new(CountingEmitter {
            dropped: std::sync::atomic::AtomicUsize::new(0),
            served: std::sync::atomic::AtomicUsize::new(0),
        });
        let hub = Hub::new(HubConfig::default(), emitter.clone());
        let (source, _) = hub.register_peer();
        hub.start_streaming(&source, "microphone", "high");
        hub.audio_data(&source, vec![0.1, 0.2], meta(0), false);

        hub.request_retransmission(&source, 0, 0);
        assert_eq!(emitter.served.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn audio_data_decode_failure_emits_packet_dropped() {
        let emitter = Arc::new(CountingEmitter {
            dropped: std::sync::atomic::AtomicUsize::new(0),
            served: std::sync::atomic::AtomicUsize::new(0),
        });
        let hub = Hub::new(HubConfig::default(), emitter.clone());
        let (source, _) = hub.register_peer();
        hub.start_streaming(&source, "microphone", "high");

        // Misaligned payload (3 samples, 2 channels): decode fails.
        let outcome = hub.audio_data(&source, vec![0.1, 0.2, 0.3], meta(0), false);
        assert_eq!(outcome, Outcome::Rejected("malformed frame"));
        assert_eq!(emitter.dropped.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
