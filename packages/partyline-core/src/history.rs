//! Replay history (C3): a per-source bounded map from sequence number to
//! retained frame, serving retransmission requests.
//!
//! Structured the way the corpus structures its per-stream registries: a
//! top-level `DashMap` keyed by source id, each entry an `Arc<RwLock<..>>`
//! of the actual per-source state so fan-out reads and history writes don't
//! contend across unrelated sources.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::frame::Frame;
use crate::protocol_constants::{
    HISTORY_EVICTION_BATCH, HISTORY_EVICTION_TARGET_FACTOR, MAX_RETX_PAYLOAD_BYTES, MAX_RETX_RANGE,
};
use crate::serial::is_ahead;

/// One source's bounded replay buffer.
///
/// Keyed by `BTreeMap<u32, Frame>` rather than a ring `VecDeque`: retransmission
/// lookups need an ordered range scan by sequence number, which a ring
/// buffer indexed by insertion order can't give without a secondary index.
struct SourceHistory {
    max_entries: usize,
    max_age_ms: u64,
    entries: BTreeMap<u32, Frame>,
}

impl SourceHistory {
    fn new(max_entries: usize, max_age_ms: u64) -> Self {
        Self {
            max_entries,
            max_age_ms,
            entries: BTreeMap::new(),
        }
    }

    fn record(&mut self, frame: Frame, now_ms: u64) {
        self.entries.insert(frame.seq, frame);
        self.evict_aged(now_ms);
        self.evict_oversized();
    }

    fn evict_aged(&mut self, now_ms: u64) {
        let max_age = self.max_age_ms;
        self.entries
            .retain(|_, f| now_ms.saturating_sub(f.received_at) <= max_age);
    }

    fn evict_oversized(&mut self) {
        if self.entries.len() <= self.max_entries {
            return;
        }
        let target = ((self.max_entries as f64) * HISTORY_EVICTION_TARGET_FACTOR) as usize;
        while self.entries.len() > target {
            let batch: Vec<u32> = self
                .entries
                .keys()
                .take(HISTORY_EVICTION_BATCH)
                .copied()
                .collect();
            if batch.is_empty() {
                break;
            }
            for k in batch {
                self.entries.remove(&k);
            }
        }
    }

    fn fetch_range(&self, start_seq: u32, end_seq: u32) -> Vec<Frame> {
        let span = end_seq.wrapping_sub(start_seq);
        let clamped_end = if span >= MAX_RETX_RANGE {
            start_seq.wrapping_add(MAX_RETX_RANGE - 1)
        } else {
            end_seq
        };

        let mut out = Vec::new();
        let mut total_bytes = 0usize;
        let mut seq = start_seq;
        loop {
            if let Some(frame) = self.entries.get(&seq) {
                let bytes = frame.samples.len() * std::mem::size_of::<f32>();
                if total_bytes + bytes > MAX_RETX_PAYLOAD_BYTES {
                    break;
                }
                total_bytes += bytes;
                let mut f = frame.clone();
                f.is_retransmission = true;
                out.push(f);
            }
            if seq == clamped_end {
                break;
            }
            seq = seq.wrapping_add(1);
        }
        out
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// The hub-wide replay history, one [`SourceHistory`] per active source.
pub struct ReplayHistory {
    default_max_entries: usize,
    default_max_age_ms: u64,
    sources: DashMap<String, Arc<RwLock<SourceHistory>>>,
}

impl ReplayHistory {
    pub fn new(max_entries: usize, max_age_ms: u64) -> Self {
        Self {
            default_max_entries: max_entries,
            default_max_age_ms: max_age_ms,
            sources: DashMap::new(),
        }
    }

    /// Records a frame for `source_id`, creating the source's history on
    /// first use. `now_ms` drives age-based eviction.
    pub fn record(&self, source_id: &str, frame: Frame, now_ms: u64) {
        let entry = self
            .sources
            .entry(source_id.to_string())
            .or_insert_with(|| {
                Arc::new(RwLock::new(SourceHistory::new(
                    self.default_max_entries,
                    self.default_max_age_ms,
                )))
            })
            .clone();
        entry.write().record(frame, now_ms);
    }

    /// Returns the frames in `[startSeq, endSeq]` for `source_id`, clamped
    /// per §4.3. Missing sequences are silently skipped rather than erroring
    /// (they may simply have been evicted already).
    pub fn fetch_range(&self, source_id: &str, start_seq: u32, end_seq: u32) -> Vec<Frame> {
        match self.sources.get(source_id) {
            Some(h) => h.read().fetch_range(start_seq, end_seq),
            None => Vec::new(),
        }
    }

    /// Whether `start..=end` is a well-formed request per §4.3/§4.8: the
    /// caller drops oversized/invalid requests silently rather than calling
    /// `fetch_range` at all.
    pub fn is_valid_request(start_seq: u32, end_seq: u32) -> bool {
        is_ahead(end_seq, start_seq) || start_seq == end_seq
    }

    /// Destroys a source's history, e.g. on `stopStreaming` or disconnect.
    pub fn remove_source(&self, source_id: &str) {
        self.sources.remove(source_id);
    }

    /// Current entry count for a source, used in tests and diagnostics.
    pub fn len(&self, source_id: &str) -> usize {
        self.sources
            .get(source_id)
            .map(|h| h.read().len())
            .unwrap_or(0)
    }
}
