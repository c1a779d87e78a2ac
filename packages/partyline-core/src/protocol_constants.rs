//! Protocol constants fixed by the relay's wire contract.
//!
//! Values here are the defaults named directly in the session-control and
//! data-path protocol; most are also exposed as tunables on [`crate::state::HubConfig`]
//! so operators can retune them without a rebuild, but the constant here is
//! the protocol's own default, not just an arbitrary starting point.

// ─────────────────────────────────────────────────────────────────────────────
// Frame validation (C1)
// ─────────────────────────────────────────────────────────────────────────────

/// Minimum accepted channel count.
pub const MIN_CHANNELS: u16 = 1;
/// Maximum accepted channel count.
pub const MAX_CHANNELS: u16 = 32;
/// Minimum accepted sample rate (Hz).
pub const MIN_SAMPLE_RATE: u32 = 8_000;
/// Maximum accepted sample rate (Hz).
pub const MAX_SAMPLE_RATE: u32 = 384_000;
/// Sample magnitude beyond which a value is treated as corrupt and zeroed,
/// rather than merely clipped.
pub const EXTREME_SAMPLE_MAGNITUDE: f32 = 8.0;

// ─────────────────────────────────────────────────────────────────────────────
// Session control (C9) - startStreaming admission (§4.8)
// ─────────────────────────────────────────────────────────────────────────────

/// Allowed values for `startStreaming`'s `sourceKind`.
pub const VALID_SOURCE_KINDS: &[&str] = &["microphone", "system", "file"];
/// Allowed values for `startStreaming`'s `quality`.
pub const VALID_QUALITIES: &[&str] = &["low", "medium", "high", "ultra"];

// ─────────────────────────────────────────────────────────────────────────────
// Rate limiter (C2)
// ─────────────────────────────────────────────────────────────────────────────

/// Default per-source packet admission ceiling (packets/second).
pub const DEFAULT_MAX_PACKETS_PER_SEC: u32 = 150;
/// Window during which, after the first drop, no further `rateLimitWarning`
/// is emitted to the same peer.
pub const RATE_LIMIT_WARNING_WINDOW_MS: u64 = 5_000;

// ─────────────────────────────────────────────────────────────────────────────
// Replay history (C3)
// ─────────────────────────────────────────────────────────────────────────────

/// Default maximum number of retained frames per source.
pub const DEFAULT_HISTORY_MAX: usize = 400;
/// Default maximum age of a retained frame (ms).
pub const DEFAULT_HISTORY_AGE_MS: u64 = 10_000;
/// Number of oldest entries evicted per sweep once `HISTORY_MAX` is exceeded.
pub const HISTORY_EVICTION_BATCH: usize = 50;
/// Target load factor a size-triggered eviction sweep settles at.
pub const HISTORY_EVICTION_TARGET_FACTOR: f64 = 0.8;
/// Maximum span of a single `fetchRange` request.
pub const MAX_RETX_RANGE: u32 = 100;
/// Maximum total payload size a single `fetchRange` response may carry.
pub const MAX_RETX_PAYLOAD_BYTES: usize = 50 * 1024 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Reliability manager (C6)
// ─────────────────────────────────────────────────────────────────────────────

/// Duplicate suppression window per `(sourceId, seq)` pair.
pub const DUPLICATE_SUPPRESSION_WINDOW_MS: u64 = 100;
/// Default delay before a retransmission request is armed for an open gap.
pub const RETRANSMISSION_TIMEOUT_MS: u64 = 95;
/// Maximum buffered future frames retained per (listener, source) pair.
pub const MAX_BUFFERED_PER_SOURCE: usize = 400;
/// Idle timeout after which a (listener, source) reorder state is dropped.
pub const IDLE_REORDER_TIMEOUT_SECS: u64 = 15;

// ─────────────────────────────────────────────────────────────────────────────
// Playback scheduler (C8)
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed latency, in seconds, for the `ultra` mode.
pub const LATENCY_ULTRA_SECS: f64 = 0.07;
/// Fixed latency, in seconds, for the `low` mode.
pub const LATENCY_LOW_SECS: f64 = 0.12;
/// Fixed latency, in seconds, for the `stable` mode.
pub const LATENCY_STABLE_SECS: f64 = 0.15;

/// Underrun-recovery threshold: if `nextPlayTime` is within this margin of
/// `now`, the scheduler treats the queue as having starved and rebases.
pub const UNDERRUN_MARGIN_MS: f64 = 5.0;
/// Minimum forward offset applied to a scheduled buffer's start time.
pub const MIN_SCHEDULE_LEAD_MS: f64 = 1.0;

/// Transient-shaping large-jump threshold.
pub const TRANSIENT_HARD_DELTA: f32 = 0.9;
/// Transient-shaping large-jump blend toward `sign(x) * TRANSIENT_HARD_CEIL`.
pub const TRANSIENT_HARD_CEIL: f32 = 0.85;
/// Transient-shaping large-jump blend weight for the previous sample.
pub const TRANSIENT_HARD_PREV_WEIGHT: f32 = 0.25;
/// Transient-shaping large-jump blend weight for the clamped sign target.
pub const TRANSIENT_HARD_TARGET_WEIGHT: f32 = 0.75;
/// Transient-shaping moderate-jump threshold.
pub const TRANSIENT_SOFT_DELTA: f32 = 0.18;
/// Transient-shaping moderate-jump blend weight for the previous sample.
pub const TRANSIENT_SOFT_PREV_WEIGHT: f32 = 0.35;
/// Transient-shaping moderate-jump blend weight for the current sample.
pub const TRANSIENT_SOFT_CURRENT_WEIGHT: f32 = 0.65;

/// Default crossfade length with the previous buffer's tail.
pub const CROSSFADE_MS: u32 = 8;
/// Default fade-in length when there is no prior tail to crossfade against.
pub const FADE_IN_MS: u32 = 8;
/// Minimum fade-in length, in samples, regardless of sample rate.
pub const MIN_FADE_IN_SAMPLES: usize = 16;
/// Crossfade is skipped unless the computed overlap exceeds this many samples.
pub const MIN_CROSSFADE_OVERLAP_SAMPLES: usize = 8;
/// Upper bound, in samples, on how much trailing tail is captured for the
/// next crossfade.
pub const MAX_TAIL_CAPTURE_SAMPLES: usize = 128;

// ─────────────────────────────────────────────────────────────────────────────
// Session control / transport (C9)
// ─────────────────────────────────────────────────────────────────────────────

/// Capacity of the event broadcast channel shared by all WebSocket clients.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;
/// WebSocket heartbeat timeout (seconds) before a silent connection is closed.
pub const WS_HEARTBEAT_TIMEOUT_SECS: u64 = 30;
/// Interval between WebSocket heartbeat checks (seconds).
pub const WS_HEARTBEAT_CHECK_INTERVAL_SECS: u64 = 1;
/// Default hub listening port.
pub const DEFAULT_PORT: u16 = 3001;

/// Application identity string used in status endpoints.
pub const APP_NAME: &str = "partyline";
