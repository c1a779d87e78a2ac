//! Event emitter abstraction for decoupling services from transport.
//!
//! Services depend on the [`EventEmitter`] trait rather than a concrete
//! broadcast channel, which keeps them testable in isolation.

use super::{BroadcastEventBridge, SessionEvent, StreamEvent};

/// Trait for emitting domain events without knowledge of transport.
pub trait EventEmitter: Send + Sync {
    /// Emits a session/presence event.
    fn emit_session(&self, event: SessionEvent);

    /// Emits a stream health event.
    fn emit_stream(&self, event: StreamEvent);
}

/// Logs every event at debug level via `tracing`.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_session(&self, event: SessionEvent) {
        tracing::debug!(?event, "session_event");
    }

    fn emit_stream(&self, event: StreamEvent) {
        tracing::debug!(?event, "stream_event");
    }
}

/// Fans every domain event out to the WebSocket broadcast channel and, via
/// [`LoggingEventEmitter`], into the structured log - so an operator with no
/// WebSocket client attached still sees session/stream activity.
pub struct CompositeEventEmitter {
    broadcast: BroadcastEventBridge,
    logger: LoggingEventEmitter,
}

impl CompositeEventEmitter {
    pub fn new(broadcast: BroadcastEventBridge) -> Self {
        Self {
            broadcast,
            logger: LoggingEventEmitter,
        }
    }
}

impl EventEmitter for CompositeEventEmitter {
    fn emit_session(&self, event: SessionEvent) {
        self.logger.emit_session(event.clone());
        self.broadcast.emit_session(event);
    }

    fn emit_stream(&self, event: StreamEvent) {
        self.logger.emit_stream(event.clone());
        self.broadcast.emit_stream(event);
    }
}
