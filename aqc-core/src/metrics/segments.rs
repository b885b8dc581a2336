//! Speech interval merging.
//!
//! ## Algorithm
//!
//! 1. Stable sort by start.
//! 2. Keep a running interval; absorb the next one when
//!    `next.start <= current.end + gap`, extending the end to the max.
//! 3. Otherwise close the running interval and start a new one.
//! 4. Drop anything with `end <= start` (degenerate input).

use serde::{Deserialize, Serialize};

/// One continuous speech region in milliseconds.
///
/// Serialized as a two-element array `[start_ms, end_ms]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u64; 2]", into = "[u64; 2]")]
pub struct SpeechInterval {
    pub start_ms: u64,
    pub end_ms: u64,
}

impl SpeechInterval {
    pub fn new(start_ms: u64, end_ms: u64) -> Self {
        Self { start_ms, end_ms }
    }

    /// `end - start`, zero for inverted input.
    pub fn len_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

impl From<[u64; 2]> for SpeechInterval {
    fn from([start_ms, end_ms]: [u64; 2]) -> Self {
        Self { start_ms, end_ms }
    }
}

impl From<SpeechInterval> for [u64; 2] {
    fn from(iv: SpeechInterval) -> Self {
        [iv.start_ms, iv.end_ms]
    }
}

/// Merge overlapping or near intervals into a sorted, disjoint list.
pub fn merge_segments(intervals: &[SpeechInterval], merge_gap_ms: u64) -> Vec<SpeechInterval> {
    let mut sorted = intervals.to_vec();
    // `sort_by_key` is stable, so equal starts keep input order.
    sorted.sort_by_key(|iv| iv.start_ms);

    let mut iter = sorted.into_iter();
    let Some(mut current) = iter.next() else {
        return Vec::new();
    };

    let mut merged = Vec::new();
    for next in iter {
        if next.start_ms <= current.end_ms.saturating_add(merge_gap_ms) {
            current.end_ms = current.end_ms.max(next.end_ms);
        } else {
            merged.push(current);
            current = next;
        }
    }
    merged.push(current);

    merged.retain(|iv| iv.end_ms > iv.start_ms);
    merged
}

/// Total covered milliseconds, `Σ (end - start)`.
pub fn speech_ms(intervals: &[SpeechInterval]) -> u64 {
    intervals.iter().map(SpeechInterval::len_ms).sum()
}
