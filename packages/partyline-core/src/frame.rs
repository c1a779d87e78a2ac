//! Frame codec (C1): normalize inbound audio payloads into one canonical
//! interleaved float32 shape, with sanitation that downstream components can
//! rely on unconditionally.

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{EXTREME_SAMPLE_MAGNITUDE, MAX_CHANNELS, MAX_SAMPLE_RATE, MIN_CHANNELS, MIN_SAMPLE_RATE};

/// Reasons a raw payload can be rejected before becoming a [`Frame`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The sample buffer's length isn't a multiple of the channel count, or
    /// there were zero frames.
    #[error("bad payload: {0}")]
    BadPayload(String),
    /// Metadata (sample rate / channel count) was out of range.
    #[error("bad meta: {0}")]
    BadMeta(String),
}

/// An immutable, validated chunk of interleaved float32 PCM.
///
/// Once constructed, a `Frame`'s `samples` never change: every consumer
/// downstream of [`decode`] can assume the invariants already hold.
#[derive(Debug, Clone)]
pub struct Frame {
    pub source_id: String,
    pub seq: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub timestamp: u64,
    pub samples: Vec<f32>,
    pub received_at: u64,
    /// Set on frames served out of the replay history (§4.3) so the listener
    /// can bypass duplicate suppression for them.
    pub is_retransmission: bool,
}

/// Wire metadata accompanying a raw audio payload.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct FrameMeta {
    pub seq: u32,
    #[serde(rename = "sampleRate")]
    pub sample_rate: u32,
    pub channels: u16,
    pub timestamp: u64,
}

/// Result of [`sanitize`]: the (possibly corrected) samples plus whether any
/// correction was applied.
pub struct Sanitized {
    pub samples: Vec<f32>,
    pub changed: bool,
}

/// Replaces non-finite values with 0, zeroes extreme-magnitude corruption,
/// and hard-clips everything else to `[-1, 1]`.
pub fn sanitize(samples: &[f32]) -> Sanitized {
    let mut changed = false;
    let mut out = Vec::with_capacity(samples.len());
    for &x in samples {
        let y = if !x.is_finite() {
            changed = true;
            0.0
        } else if x.abs() > EXTREME_SAMPLE_MAGNITUDE {
            changed = true;
            0.0
        } else if x > 1.0 {
            changed = true;
            1.0
        } else if x < -1.0 {
            changed = true;
            -1.0
        } else {
            x
        };
        out.push(y);
    }
    Sanitized {
        samples: out,
        changed,
    }
}

/// Decodes a raw interleaved sample buffer plus metadata into a validated
/// [`Frame`].
///
/// `received_at` is the hub's own wall-clock at ingest (ms); callers pass it
/// in rather than this module reaching for a clock, which keeps decoding
/// deterministic and testable.
pub fn decode(
    source_id: impl Into<String>,
    samples: Vec<f32>,
    meta: FrameMeta,
    received_at: u64,
) -> Result<Frame, DecodeError> {
    if !(MIN_CHANNELS..=MAX_CHANNELS).contains(&meta.channels) {
        return Err(DecodeError::BadMeta(format!(
            "channels {} out of range [{}, {}]",
            meta.channels, MIN_CHANNELS, MAX_CHANNELS
        )));
    }
    if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&meta.sample_rate) {
        return Err(DecodeError::BadMeta(format!(
            "sampleRate {} out of range [{}, {}]",
            meta.sample_rate, MIN_SAMPLE_RATE, MAX_SAMPLE_RATE
        )));
    }
    if samples.is_empty() {
        return Err(DecodeError::BadPayload("zero frames".to_string()));
    }
    if samples.len() % meta.channels as usize != 0 {
        return Err(DecodeError::BadPayload(format!(
            "sample count {} not a multiple of channel count {}",
            samples.len(),
            meta.channels
        )));
    }

    let sanitized = sanitize(&samples);

    Ok(Frame {
        source_id: source_id.into(),
        seq: meta.seq,
        sample_rate: meta.sample_rate,
        channels: meta.channels,
        timestamp: meta.timestamp,
        samples: sanitized.samples,
        received_at,
        is_retransmission: false,
    })
}

/// Splits an interleaved buffer into one `Vec<f32>` per channel.
pub fn deinterleave(samples: &[f32], channels: u16) -> Vec<Vec<f32>> {
    let channels = channels as usize;
    let frames = samples.len() / channels;
    let mut out = vec![Vec::with_capacity(frames); channels];
    for (i, &s) in samples.iter().enumerate() {
        out[i % channels].push(s);
    }
    out
}

/// Inverse of [`deinterleave`]: merges per-channel buffers back into one
/// interleaved buffer. All channel buffers must have equal length.
pub fn interleave(channels: &[Vec<f32>]) -> Vec<f32> {
    if channels.is_empty() {
        return Vec::new();
    }
    let frames = channels[0].len();
    let mut out = Vec::with_capacity(frames * channels.len());
    for i in 0..frames {
        for ch in channels {
            out.push(ch[i]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(seq: u32, sample_rate: u32, channels: u16) -> FrameMeta {
        FrameMeta {
            seq,
            sample_rate,
            channels,
            timestamp: 0,
        }
    }

    #[test]
    fn decode_accepts_valid_frame() {
        let samples = vec![0.1, -0.2, 0.3, -0.4];
        let frame = decode("src-a", samples.clone(), meta(0, 48_000, 2), 10).unwrap();
        assert_eq!(frame.samples, samples);
        assert_eq!(frame.seq, 0);
        assert!(!frame.is_retransmission);
    }

    #[test]
    fn decode_rejects_bad_channel_count() {
        let err = decode("src-a", vec![0.0; 4], meta(0, 48_000, 0), 0).unwrap_err();
        assert!(matches!(err, DecodeError::BadMeta(_)));
    }

    #[test]
    fn decode_rejects_sample_rate_out_of_range() {
        let err = decode("src-a", vec![0.0; 4], meta(0, 1, 2), 0).unwrap_err();
        assert!(matches!(err, DecodeError::BadMeta(_)));
    }

    #[test]
    fn decode_rejects_misaligned_payload() {
        let err = decode("src-a", vec![0.0; 3], meta(0, 48_000, 2), 0).unwrap_err();
        assert!(matches!(err, DecodeError::BadPayload(_)));
    }

    #[test]
    fn sanitize_replaces_non_finite_and_clips() {
        let result = sanitize(&[f32::NAN, f32::INFINITY, 2.0, -2.0, 0.5]);
        assert_eq!(result.samples, vec![0.0, 0.0, 1.0, -1.0, 0.5]);
        assert!(result.changed);
    }

    #[test]
    fn sanitize_zeroes_extreme_corruption() {
        let result = sanitize(&[100.0, -100.0]);
        assert_eq!(result.samples, vec![0.0, 0.0]);
        assert!(result.changed);
    }

    #[test]
    fn sanitize_leaves_clean_samples_unchanged() {
        let result = sanitize(&[0.1, -0.9, 1.0, -1.0]);
        assert_eq!(result.samples, vec![0.1, -0.9, 1.0, -1.0]);
        assert!(!result.changed);
    }

    #[test]
    fn interleave_deinterleave_roundtrip() {
        let original = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let channels = deinterleave(&original, 2);
        assert_eq!(channels, vec![vec![1.0, 3.0, 5.0], vec![2.0, 4.0, 6.0]]);
        let back = interleave(&channels);
        assert_eq!(back, original);
    }
}
