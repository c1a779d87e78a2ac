//! Partyline Core - shared library for the Partyline relay.
//!
//! This crate provides the core functionality of a local-area, many-to-many
//! real-time audio relay: a hub that routes PCM audio packets from source
//! peers to subscribed listener peers without transcoding, plus the
//! reliability and playback-scheduling pieces a listener needs to turn that
//! feed into crackle-safe audio. It is designed to back a standalone
//! headless server binary.
//!
//! # Architecture
//!
//! The crate is organized by pipeline stage:
//!
//! - [`frame`]: admission codec - normalizes and sanitizes inbound payloads (C1)
//! - [`rate_limiter`]: per-peer admission ceiling (C2)
//! - [`history`]: bounded per-source replay buffer (C3)
//! - [`presence`]: connected-peer registry and roles (C4)
//! - [`router`]: fan-out from source to subscribed listeners (C5)
//! - [`serial`]: wrap-around sequence number arithmetic, shared by C3/C6
//! - [`reliability`]: listener-side reorder/gap/retransmission state machine (C6)
//! - [`resampler`]: sample-rate conversion (C7)
//! - [`playback`]: monotonic timeline scheduling and crossfade shaping (C8)
//! - [`session`]: the hub composition root and session-control handlers (C9)
//! - [`timer`]: cancellable delayed callbacks shared by C2/C6
//! - [`events`]: domain event types and the broadcast bridge
//! - [`state`]: hub configuration and presence snapshot types
//! - [`error`]: centralized HTTP-facing error type
//! - [`bootstrap`]: composition root wiring every service together
//! - [`api`]: HTTP and WebSocket transport
//!
//! # Abstraction Traits
//!
//! - [`TaskSpawner`](runtime::TaskSpawner): spawning background tasks
//! - [`EventEmitter`](events::EventEmitter): emitting domain events

#![warn(clippy::all)]

pub mod api;
pub mod bootstrap;
pub mod error;
pub mod events;
pub mod frame;
pub mod history;
pub mod playback;
pub mod presence;
pub mod protocol_constants;
pub mod rate_limiter;
pub mod reliability;
pub mod resampler;
pub mod router;
pub mod runtime;
pub mod serial;
pub mod session;
pub mod state;
pub mod timer;

pub use bootstrap::{bootstrap_hub, BootstrappedHub};
pub use error::{ErrorCode, RelayError, RelayResult};
pub use events::{
    BroadcastEvent, BroadcastEventBridge, CompositeEventEmitter, EventEmitter, SessionEvent,
    StreamEvent,
};
pub use frame::{Frame, FrameMeta};
pub use playback::{LatencyMode, Scheduler};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use session::{Hub, Outcome};
pub use state::{HubConfig, PeerRole, PeerSummary};
