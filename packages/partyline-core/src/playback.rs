//! Playback scheduler (C8): monotonic timeline scheduling of resampled
//! buffers through crackle-safe micro-crossfading.
//!
//! Generalizes the 16-bit linear crossfade used elsewhere in the corpus to
//! the float32 samples this relay carries end to end, and replaces the
//! linear ramp with a Hann window per the crossfade/fade-in shape called
//! for here.

use std::f32::consts::PI;

use crate::protocol_constants::{
    CROSSFADE_MS, FADE_IN_MS, MAX_TAIL_CAPTURE_SAMPLES, MIN_CROSSFADE_OVERLAP_SAMPLES,
    MIN_FADE_IN_SAMPLES, MIN_SCHEDULE_LEAD_MS, TRANSIENT_HARD_CEIL, TRANSIENT_HARD_DELTA,
    TRANSIENT_HARD_PREV_WEIGHT, TRANSIENT_HARD_TARGET_WEIGHT, TRANSIENT_SOFT_CURRENT_WEIGHT,
    TRANSIENT_SOFT_DELTA, TRANSIENT_SOFT_PREV_WEIGHT, UNDERRUN_MARGIN_MS,
};

/// Fixed-latency playback modes, selected by the listener via session
/// control (`startPlayback{latencyMode}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyMode {
    Ultra,
    Low,
    Stable,
}

impl LatencyMode {
    pub fn fixed_latency_secs(self) -> f64 {
        match self {
            LatencyMode::Ultra => 0.07,
            LatencyMode::Low => 0.12,
            LatencyMode::Stable => 0.15,
        }
    }
}

/// Outcome of scheduling one buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleResult {
    pub start_at: f64,
    pub underrun: bool,
}

/// Per-(listener) playback state, one instance per active listening
/// session.
pub struct Scheduler {
    next_play_time: f64,
    fixed_latency: f64,
    last_tail: Option<Vec<Vec<f32>>>,
    packets_played: u64,
    underruns: u64,
}

impl Scheduler {
    pub fn new(mode: LatencyMode) -> Self {
        Self {
            next_play_time: 0.0,
            fixed_latency: mode.fixed_latency_secs(),
            last_tail: None,
            packets_played: 0,
            underruns: 0,
        }
    }

    pub fn packets_played(&self) -> u64 {
        self.packets_played
    }

    pub fn underruns(&self) -> u64 {
        self.underruns
    }

    pub fn next_play_time(&self) -> f64 {
        self.next_play_time
    }

    /// `resetSync`: drops the queue conceptually (the caller owns the
    /// actual queue) and resets timeline/tail/mode state.
    pub fn reset_sync(&mut self, mode: LatencyMode) {
        self.next_play_time = 0.0;
        self.fixed_latency = mode.fixed_latency_secs();
        self.last_tail = None;
    }

    /// Applies the pre-scheduling sample work (§4.7) to `channels` in
    /// place, then returns the scheduling decision for a buffer of
    /// `duration_s` seconds arriving `now`.
    ///
    /// `reliable` bypasses all shaping except clamp/sanitation, per the
    /// pure-reliable-mode rule.
    pub fn schedule(
        &mut self,
        channels: &mut [Vec<f32>],
        sample_rate: u32,
        duration_s: f64,
        now: f64,
        reliable: bool,
    ) -> ScheduleResult {
        hard_validate(channels);

        if !reliable {
            for ch in channels.iter_mut() {
                transient_shape(ch);
            }
            if self.last_tail.is_some() {
                self.apply_crossfade(channels, sample_rate);
            } else {
                apply_fade_in(channels, sample_rate);
            }
        }

        self.capture_tail(channels);

        let underrun = self.next_play_time < now + UNDERRUN_MARGIN_MS / 1000.0;
        if underrun {
            self.next_play_time = now + self.fixed_latency;
        }
        let start_at = self.next_play_time.max(now + MIN_SCHEDULE_LEAD_MS / 1000.0);
        self.next_play_time = start_at + duration_s;

        self.packets_played += 1;
        if underrun {
            self.underruns += 1;
        }

        ScheduleResult { start_at, underrun }
    }

    fn apply_crossfade(&mut self, channels: &mut [Vec<f32>], sample_rate: u32) {
        let Some(tail) = &self.last_tail else { return };
        let frames = channels.first().map(|c| c.len()).unwrap_or(0);
        let tail_len = tail.first().map(|c| c.len()).unwrap_or(0);
        let overlap = crossfade_samples(sample_rate)
            .min(frames / 3)
            .min(tail_len);

        if overlap <= MIN_CROSSFADE_OVERLAP_SAMPLES {
            return;
        }
        if !tail.iter().all(|c| c.iter().all(|x| x.is_finite() && x.abs() <= 1.0)) {
            return;
        }

        for (ch_idx, ch) in channels.iter_mut().enumerate() {
            let tail_ch = &tail[ch_idx];
            let tail_start = tail_ch.len() - overlap;
            for i in 0..overlap {
                let w = hann(i, overlap);
                ch[i] = tail_ch[tail_start + i] * (1.0 - w) + ch[i] * w;
            }
        }
    }

    fn capture_tail(&mut self, channels: &[Vec<f32>]) {
        let frames = channels.first().map(|c| c.len()).unwrap_or(0);
        let take = MAX_TAIL_CAPTURE_SAMPLES.min(frames);
        self.last_tail = Some(
            channels
                .iter()
                .map(|c| c[c.len() - take..].to_vec())
                .collect(),
        );
    }
}

/// Hann window weight for sample `i` of an `overlap`-sample ramp.
fn hann(i: usize, overlap: usize) -> f32 {
    if overlap <= 1 {
        return 1.0;
    }
    0.5 * (1.0 - (PI * i as f32 / (overlap - 1) as f32).cos())
}

fn hard_validate(channels: &mut [Vec<f32>]) {
    for ch in channels.iter_mut() {
        for x in ch.iter_mut() {
            if !x.is_finite() {
                *x = 0.0;
            } else if *x > 1.0 {
                *x = 1.0;
            } else if *x < -1.0 {
                *x = -1.0;
            }
        }
    }
}

/// Suppresses inter-packet discontinuity clicks (standard mode only).
fn transient_shape(ch: &mut [f32]) {
    for i in 1..ch.len() {
        let prev = ch[i - 1];
        let delta = (ch[i] - prev).abs();
        if delta > TRANSIENT_HARD_DELTA {
            let target = prev.signum() * TRANSIENT_HARD_CEIL;
            ch[i] = TRANSIENT_HARD_PREV_WEIGHT * prev + TRANSIENT_HARD_TARGET_WEIGHT * target;
        } else if delta > TRANSIENT_SOFT_DELTA {
            ch[i] = TRANSIENT_SOFT_PREV_WEIGHT * prev + TRANSIENT_SOFT_CURRENT_WEIGHT * ch[i];
        }
    }
}

fn apply_fade_in(channels: &mut [Vec<f32>], sample_rate: u32) {
    let frames = channels.first().map(|c| c.len()).unwrap_or(0);
    let fade_samples = (((sample_rate as u64 * FADE_IN_MS as u64) / 1000) as usize)
        .max(MIN_FADE_IN_SAMPLES)
        .min(frames);
    if fade_samples == 0 {
        return;
    }
    for ch in channels.iter_mut() {
        for i in 0..fade_samples {
            let w = hann(i, fade_samples);
            ch[i] *= w;
        }
    }
}

fn crossfade_samples(sample_rate: u32) -> usize {
    ((sample_rate as u64 * CROSSFADE_MS as u64) / 1000) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant_buffer(value: f32, frames: usize, channels: usize) -> Vec<Vec<f32>> {
        vec![vec![value; frames]; channels]
    }

    #[test]
    fn first_buffer_schedules_at_fixed_latency_e1() {
        let mut scheduler = Scheduler::new(LatencyMode::Low);
        let mut buf = constant_buffer(0.1, 960, 2);
        let result = scheduler.schedule(&mut buf, 48_000, 0.020, 0.0, false);
        assert!(result.underrun);
        assert_eq!(result.start_at, 0.12);
        assert_eq!(scheduler.underruns(), 1);
        assert_eq!(scheduler.packets_played(), 1);
    }

    #[test]
    fn subsequent_in_time_buffers_do_not_underrun() {
        let mut scheduler = Scheduler::new(LatencyMode::Low);
        let mut buf = constant_buffer(0.1, 960, 2);
        scheduler.schedule(&mut buf, 48_000, 0.020, 0.0, false);
        let mut buf2 = constant_buffer(0.1, 960, 2);
        let result = scheduler.schedule(&mut buf2, 48_000, 0.020, 0.02, false);
        assert!(!result.underrun);
        assert_eq!(scheduler.underruns(), 1);
    }

    #[test]
    fn next_play_time_is_monotonic() {
        let mut scheduler = Scheduler::new(LatencyMode::Stable);
        let mut last = scheduler.next_play_time();
        for i in 0..5 {
            let mut buf = constant_buffer(0.0, 480, 1);
            scheduler.schedule(&mut buf, 48_000, 0.010, i as f64 * 0.010, false);
            assert!(scheduler.next_play_time() >= last);
            last = scheduler.next_play_time();
        }
    }

    #[test]
    fn reset_sync_rebase_e6() {
        let mut scheduler = Scheduler::new(LatencyMode::Low);
        let mut buf = constant_buffer(0.2, 960, 2);
        scheduler.schedule(&mut buf, 48_000, 0.020, 0.0, false);
        scheduler.reset_sync(LatencyMode::Ultra);
        assert_eq!(scheduler.next_play_time(), 0.0);
        let mut buf2 = constant_buffer(0.2, 960, 2);
        let result = scheduler.schedule(&mut buf2, 48_000, 0.020, 1.0, false);
        assert!(result.underrun);
        assert_eq!(result.start_at, 1.07);
    }

    #[test]
    fn reliable_mode_bypasses_shaping() {
        let mut scheduler = Scheduler::new(LatencyMode::Low);
        let mut buf = vec![vec![0.1, 0.9, -0.9, 0.1]];
        let original = buf.clone();
        scheduler.schedule(&mut buf, 48_000, 0.001, 0.0, true);
        assert_eq!(buf, original);
    }

    #[test]
    fn hard_validate_clips_and_replaces_non_finite() {
        let mut channels = vec![vec![f32::NAN, 2.0, -2.0, 0.5]];
        hard_validate(&mut channels);
        assert_eq!(channels[0], vec![0.0, 1.0, -1.0, 0.5]);
    }

    #[test]
    fn fade_in_reaches_full_amplitude() {
        let mut channels = vec![vec![1.0; 64]];
        apply_fade_in(&mut channels, 48_000);
        assert_eq!(channels[0][0], 0.0);
        // Computed fade length would exceed the 64-sample buffer, so
        // `apply_fade_in` clamps to the buffer length and the ramp
        // reaches full amplitude exactly at the last sample.
        assert!((channels[0][63] - 1.0).abs() < 1e-4);
    }
}
