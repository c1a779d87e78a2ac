//! Reliability manager (C6, listener side): sequence reordering, gap
//! detection, and retransmission request throttling for one
//! (listener, source) pair.
//!
//! Kept as a synchronous state machine: [`ReorderState::ingest`] and
//! [`ReorderState::on_retransmission_timer_fire`] return the actions the
//! caller should take (emit frames downstream, arm a timer, send a wire
//! request) rather than performing IO themselves. The WebSocket layer
//! drives the timers via [`crate::timer`]; this keeps the core logic
//! testable without a runtime.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use crate::frame::Frame;
use crate::protocol_constants::{
    DUPLICATE_SUPPRESSION_WINDOW_MS, MAX_BUFFERED_PER_SOURCE, RETRANSMISSION_TIMEOUT_MS,
};
use crate::serial::{is_ahead, next};

/// An open range of missing sequence numbers.
#[derive(Debug, Clone, Copy)]
pub struct Gap {
    pub start: u32,
    pub end: u32,
    pub first_seen_at: Instant,
    pub timer_armed: bool,
}

/// Action the caller should take in response to an ingest or timer event.
#[derive(Debug)]
pub enum Action {
    /// Deliver this frame downstream to the resampler/scheduler (C7/C8).
    Emit(Frame),
    /// Arm a retransmission timer for `[start, end]`. Fires
    /// `on_retransmission_timer_fire` after `retransmission_timeout`.
    ArmRetransmissionTimer { start: u32, end: u32 },
    /// Send `requestRetransmission(sourceId, start, end)` over the wire.
    RequestRetransmission { start: u32, end: u32 },
}

/// Per-(listener, source) reorder state.
pub struct ReorderState {
    expected: u32,
    buffered: BTreeMap<u32, Frame>,
    gap: Option<Gap>,
    recent_seen: HashMap<u32, Instant>,
    last_retx_request: HashMap<(u32, u32), Instant>,
    last_activity: Instant,
    retransmission_timeout: Duration,
}

impl ReorderState {
    /// Creates state for the first packet seen from a source: `expected`
    /// starts at that packet's own sequence number.
    pub fn new(initial_seq: u32, now: Instant) -> Self {
        Self {
            expected: initial_seq,
            buffered: BTreeMap::new(),
            gap: None,
            recent_seen: HashMap::new(),
            last_retx_request: HashMap::new(),
            last_activity: now,
            retransmission_timeout: Duration::from_millis(RETRANSMISSION_TIMEOUT_MS),
        }
    }

    pub fn expected(&self) -> u32 {
        self.expected
    }

    pub fn gap(&self) -> Option<Gap> {
        self.gap
    }

    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Ingests one inbound frame, returning the actions the caller must
    /// take, in order.
    pub fn ingest(&mut self, frame: Frame, now: Instant) -> Vec<Action> {
        self.last_activity = now;
        let s = frame.seq;

        // A retransmitted frame (served out of the source's replay history)
        // bypasses duplicate suppression: it is by definition a re-send of
        // something already seen, not evidence of a source retrying too fast.
        if !frame.is_retransmission {
            self.recent_seen
                .retain(|_, t| now.duration_since(*t) < Duration::from_millis(DUPLICATE_SUPPRESSION_WINDOW_MS));
            if let Some(&last) = self.recent_seen.get(&s) {
                if now.duration_since(last) < Duration::from_millis(DUPLICATE_SUPPRESSION_WINDOW_MS) {
                    return Vec::new();
                }
            }
            self.recent_seen.insert(s, now);
        }

        self.buffered.insert(s, frame);

        let expected = self.expected;
        self.buffered
            .retain(|&seq, _| !is_stale(seq, expected));

        if self.buffered.len() > MAX_BUFFERED_PER_SOURCE {
            let overflow = self.buffered.len() - MAX_BUFFERED_PER_SOURCE;
            let to_drop: Vec<u32> = self.buffered.keys().take(overflow).copied().collect();
            for k in to_drop {
                self.buffered.remove(&k);
            }
        }

        let mut actions = Vec::new();
        let mut drained = 0;
        while drained < MAX_BUFFERED_PER_SOURCE {
            let Some(frame) = self.buffered.remove(&self.expected) else {
                break;
            };
            actions.push(Action::Emit(frame));
            self.expected = next(self.expected);
            drained += 1;
        }

        if !self.buffered.contains_key(&self.expected) && is_ahead(s, self.expected) {
            let gap_end = s.wrapping_sub(1);
            let arm = match &mut self.gap {
                Some(g) if g.start == self.expected => false,
                _ => {
                    self.gap = Some(Gap {
                        start: self.expected,
                        end: gap_end,
                        first_seen_at: now,
                        timer_armed: false,
                    });
                    true
                }
            };
            if let Some(g) = &mut self.gap {
                g.end = gap_end;
            }
            if arm {
                if let Some(g) = &mut self.gap {
                    g.timer_armed = true;
                }
                actions.push(Action::ArmRetransmissionTimer {
                    start: self.expected,
                    end: gap_end,
                });
            }
        } else if self.gap.is_some() && !is_ahead(self.gap.unwrap().end, self.expected.wrapping_sub(1)) {
            // The gap closed: `expected` advanced past its end.
            self.gap = None;
        }

        actions
    }

    /// Called when a previously armed retransmission timer fires.
    pub fn on_retransmission_timer_fire(&mut self, start: u32, end: u32, now: Instant) -> Option<Action> {
        let gap = self.gap?;
        if gap.start != start {
            return None; // gap already closed or moved on
        }
        let throttled = self
            .last_retx_request
            .get(&(start, end))
            .is_some_and(|t| now.duration_since(*t) < self.retransmission_timeout);
        if throttled {
            return None;
        }
        self.last_retx_request.insert((start, end), now);
        Some(Action::RequestRetransmission { start, end })
    }

    /// User-initiated resync: advance `expected` to `up_to_seq`, discard
    /// buffered entries below it, clear gap metadata. Calling this twice in
    /// a row has the same effect as calling it once.
    pub fn skip_gap(&mut self, up_to_seq: u32) {
        self.expected = up_to_seq;
        self.buffered.retain(|&seq, _| !is_stale(seq, up_to_seq));
        self.gap = None;
    }

    pub fn is_idle(&self, now: Instant, idle_timeout: Duration) -> bool {
        now.duration_since(self.last_activity) >= idle_timeout
    }
}

fn is_stale(seq: u32, expected: u32) -> bool {
    let diff = seq.wrapping_sub(expected);
    diff != 0 && diff >= (1u32 << 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{decode, FrameMeta};

    fn frame(seq: u32) -> Frame {
        decode(
            "src-a",
            vec![0.1, 0.2],
            FrameMeta {
                seq,
                sample_rate: 48_000,
                channels: 2,
                timestamp: 0,
            },
            0,
        )
        .unwrap()
    }

    fn retransmitted_frame(seq: u32) -> Frame {
        let mut f = frame(seq);
        f.is_retransmission = true;
        f
    }

    fn emitted_seqs(actions: &[Action]) -> Vec<u32> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Emit(f) => Some(f.seq),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn in_order_delivery_e1() {
        let now = Instant::now();
        let mut state = ReorderState::new(0, now);
        let mut played = Vec::new();
        for seq in 0..4 {
            played.extend(emitted_seqs(&state.ingest(frame(seq), now)));
        }
        assert_eq!(played, vec![0, 1, 2, 3]);
    }

    #[test]
    fn small_reorder_resolves_without_retransmission_e2() {
        let now = Instant::now();
        let mut state = ReorderState::new(0, now);
        assert_eq!(emitted_seqs(&state.ingest(frame(0), now)), vec![0]);
        let actions = state.ingest(frame(2), now);
        assert!(emitted_seqs(&actions).is_empty());
        assert!(matches!(actions[0], Action::ArmRetransmissionTimer { start: 1, end: 1 }));
        let actions = state.ingest(frame(1), now);
        assert_eq!(emitted_seqs(&actions), vec![1, 2]);
        let actions = state.ingest(frame(3), now);
        assert_eq!(emitted_seqs(&actions), vec![3]);
        assert_eq!(state.expected(), 4);
    }

    #[test]
    fn gap_then_retransmission_e3() {
        let now = Instant::now();
        let mut state = ReorderState::new(0, now);
        for seq in 0..3u32 {
            state.ingest(frame(seq), now);
        }
        let actions = state.ingest(frame(5), now);
        assert!(matches!(
            actions[0],
            Action::ArmRetransmissionTimer { start: 3, end: 4 }
        ));
        let later = now + Duration::from_millis(95);
        let fire = state.on_retransmission_timer_fire(3, 4, later);
        assert!(matches!(
            fire,
            Some(Action::RequestRetransmission { start: 3, end: 4 })
        ));

        let actions = state.ingest(frame(3), later);
        assert_eq!(emitted_seqs(&actions), vec![3]);
        let actions = state.ingest(frame(4), later);
        assert_eq!(emitted_seqs(&actions), vec![4, 5]);
        assert_eq!(state.expected(), 6);
    }

    #[test]
    fn wrap_around_e4() {
        let now = Instant::now();
        let mut state = ReorderState::new(u32::MAX - 1, now);
        let mut played = Vec::new();
        for seq in [u32::MAX - 1, u32::MAX, 0, 1] {
            played.extend(emitted_seqs(&state.ingest(frame(seq), now)));
        }
        assert_eq!(played, vec![u32::MAX - 1, u32::MAX, 0, 1]);
        assert_eq!(state.expected(), 2);
    }

    #[test]
    fn duplicate_within_window_is_dropped() {
        let now = Instant::now();
        let mut state = ReorderState::new(0, now);
        state.ingest(frame(0), now);
        let actions = state.ingest(frame(0), now + Duration::from_millis(50));
        assert!(actions.is_empty());
    }

    #[test]
    fn duplicate_window_expires() {
        let now = Instant::now();
        let mut state = ReorderState::new(1, now);
        state.ingest(frame(2), now);
        // seq 2 buffered, not emitted (expected=1); re-send after window passes.
        let actions = state.ingest(frame(2), now + Duration::from_millis(150));
        // Not a duplicate anymore, but it's the same content re-stored; no new emit since still gapped.
        assert!(emitted_seqs(&actions).is_empty());
    }

    #[test]
    fn retransmitted_duplicate_bypasses_suppression_window() {
        // A fresh resend of a sequence already inside the 100ms window is
        // suppressed as a protocol duplicate...
        let now = Instant::now();
        let mut state = ReorderState::new(0, now);
        state.ingest(frame(0), now);
        state.skip_gap(0);
        let actions = state.ingest(frame(0), now);
        assert!(actions.is_empty());

        // ...but a history-served retransmission of the same sequence, in
        // the same window, must still be delivered: it is the listener's
        // own requested recovery, not a spurious resend.
        let mut state = ReorderState::new(0, now);
        state.ingest(frame(0), now);
        state.skip_gap(0);
        let actions = state.ingest(retransmitted_frame(0), now);
        assert_eq!(emitted_seqs(&actions), vec![0]);
    }

    #[test]
    fn skip_gap_keeps_the_frame_at_the_new_expected_boundary() {
        let now = Instant::now();
        let mut state = ReorderState::new(0, now);
        state.ingest(frame(5), now);
        assert_eq!(state.buffered_len(), 1);
        state.skip_gap(5);
        assert_eq!(state.expected(), 5);
        // The frame at the new expected boundary is the next deliverable one
        // and must survive the resync, not be discarded with the stale gap.
        assert_eq!(state.buffered_len(), 1);
    }

    #[test]
    fn skip_gap_is_idempotent() {
        let now = Instant::now();
        let mut state = ReorderState::new(0, now);
        state.ingest(frame(0), now);
        state.ingest(frame(5), now);
        state.skip_gap(5);
        assert_eq!(state.expected(), 5);
        assert!(state.gap().is_none());
        state.skip_gap(5);
        assert_eq!(state.expected(), 5);
        assert!(state.gap().is_none());
    }

    #[test]
    fn idle_detection() {
        let now = Instant::now();
        let state = ReorderState::new(0, now);
        assert!(!state.is_idle(now + Duration::from_secs(10), Duration::from_secs(15)));
        assert!(state.is_idle(now + Duration::from_secs(16), Duration::from_secs(15)));
    }
}
