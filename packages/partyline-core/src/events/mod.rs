//! Event system for real-time client communication.
//!
//! This module provides:
//! - [`EventEmitter`] trait for domain services to emit events
//! - Event types broadcast to connected peers
//!
//! The actual transport implementation (WebSocket) is handled separately
//! in the `api` module using [`BroadcastEventBridge`].

mod bridge;
mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{CompositeEventEmitter, EventEmitter, LoggingEventEmitter};

use serde::Serialize;

/// Events broadcast to connected peers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum BroadcastEvent {
    /// Events related to session/presence state.
    Session(SessionEvent),
    /// Events related to audio streaming health.
    Stream(StreamEvent),
}

/// Events related to session control (§4.8).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// A peer started a source stream.
    StreamStarted {
        #[serde(rename = "clientId")]
        client_id: String,
        source: String,
        quality: String,
        timestamp: u64,
    },
    /// A peer stopped a source stream (explicit or via disconnect).
    StreamStopped {
        #[serde(rename = "clientId")]
        client_id: String,
        timestamp: u64,
    },
    /// A listener subscribed to a source.
    ListenerJoined {
        #[serde(rename = "sourceId")]
        source_id: String,
        #[serde(rename = "listenerId")]
        listener_id: String,
        timestamp: u64,
    },
    /// A listener unsubscribed from a source.
    ListenerLeft {
        #[serde(rename = "sourceId")]
        source_id: String,
        #[serde(rename = "listenerId")]
        listener_id: String,
        timestamp: u64,
    },
    /// Listener counts changed for one or more sources.
    ListenerCounts {
        counts: std::collections::HashMap<String, usize>,
        timestamp: u64,
    },
    /// Presence snapshot changed (join/leave/disconnect).
    DeviceList {
        devices: Vec<crate::state::PeerSummary>,
        timestamp: u64,
    },
    /// Rate limit warning delivered to a producer.
    RateLimitWarning {
        #[serde(rename = "peerId")]
        peer_id: String,
        timestamp: u64,
    },
}

/// Events related to stream/delivery health, used for diagnostics.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StreamEvent {
    /// A frame was dropped by the rate limiter.
    PacketDropped {
        #[serde(rename = "sourceId")]
        source_id: String,
        timestamp: u64,
    },
    /// A retransmission request was served.
    RetransmissionServed {
        #[serde(rename = "sourceId")]
        source_id: String,
        count: usize,
        timestamp: u64,
    },
}

impl From<SessionEvent> for BroadcastEvent {
    fn from(event: SessionEvent) -> Self {
        BroadcastEvent::Session(event)
    }
}

impl From<StreamEvent> for BroadcastEvent {
    fn from(event: StreamEvent) -> Self {
        BroadcastEvent::Stream(event)
    }
}
