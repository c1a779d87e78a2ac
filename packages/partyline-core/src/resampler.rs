//! Resampler (C7): channel-preserving sample-rate conversion.
//!
//! Uses `rubato`'s FFT-based fixed-input resampler for genuine rate
//! changes, consistent with the design note that a naive linear resampler
//! would undermine the playback scheduler's band-limited transient shaping.
//! When source and destination rates match, this is an identity copy — no
//! resampler is constructed at all.

use rubato::{FftFixedIn, Resampler as _};

use crate::frame::sanitize;

/// Errors constructing or running the resampler.
#[derive(Debug, thiserror::Error)]
pub enum ResampleError {
    #[error("failed to build resampler: {0}")]
    Build(String),
    #[error("resampling failed: {0}")]
    Process(String),
}

/// A resampler bound to one (srcRate, dstRate, channels) triple.
///
/// Source frame counts can vary packet to packet, so this wraps a fresh
/// `FftFixedIn` per call rather than holding one with fixed chunk size;
/// `FftFixedIn`'s internal filter state does not carry usefully across
/// differently-sized chunks in this relay's packet-oriented use (unlike a
/// continuous file-decode pipeline), so there is no persistent resampler to
/// thread through calls here.
pub struct Resampler {
    src_rate: u32,
    dst_rate: u32,
    channels: u16,
}

impl Resampler {
    pub fn new(src_rate: u32, dst_rate: u32, channels: u16) -> Self {
        Self {
            src_rate,
            dst_rate,
            channels,
        }
    }

    /// Resamples one interleaved buffer, returning interleaved output at
    /// `dst_rate`. Identity when rates match. Output is sanitized per C1's
    /// rules before being returned.
    pub fn resample(&self, interleaved: &[f32]) -> Result<Vec<f32>, ResampleError> {
        if self.src_rate == self.dst_rate {
            return Ok(interleaved.to_vec());
        }

        let channels = self.channels as usize;
        if channels == 0 || interleaved.is_empty() {
            return Ok(Vec::new());
        }
        let frames = interleaved.len() / channels;

        let mut by_channel: Vec<Vec<f32>> = vec![Vec::with_capacity(frames); channels];
        for (i, &s) in interleaved.iter().enumerate() {
            by_channel[i % channels].push(s);
        }

        let mut resampler = FftFixedIn::<f32>::new(
            self.src_rate as usize,
            self.dst_rate as usize,
            frames,
            1,
            channels,
        )
        .map_err(|e| ResampleError::Build(e.to_string()))?;

        let resampled = resampler
            .process(&by_channel, None)
            .map_err(|e| ResampleError::Process(e.to_string()))?;

        let out_frames = resampled.first().map(|c| c.len()).unwrap_or(0);
        let mut out = Vec::with_capacity(out_frames * channels);
        for frame_idx in 0..out_frames {
            for ch in &resampled {
                out.push(ch[frame_idx]);
            }
        }

        let sanitized = sanitize(&out);
        Ok(sanitized.samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_when_rates_match() {
        let resampler = Resampler::new(48_000, 48_000, 2);
        let input = vec![0.1, 0.2, 0.3, 0.4];
        let output = resampler.resample(&input).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn preserves_channel_count_when_resampling() {
        let resampler = Resampler::new(44_100, 48_000, 2);
        let frames = 1024;
        let input: Vec<f32> = (0..frames * 2)
            .map(|i| ((i as f32) * 0.001).sin())
            .collect();
        let output = resampler.resample(&input).unwrap();
        assert_eq!(output.len() % 2, 0);
        assert!(!output.is_empty());
    }

    #[test]
    fn empty_input_is_empty_output() {
        let resampler = Resampler::new(44_100, 48_000, 2);
        assert!(resampler.resample(&[]).unwrap().is_empty());
    }
}
