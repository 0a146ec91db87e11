// SPDX-License-Identifier: GPL-3.0-only

//! Decoder counters
//!
//! Updated on every frame by both threads, so they are plain atomics
//! read without the stream lock.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct DecoderStats {
    pub(crate) frames_submitted: AtomicU64,
    pub(crate) chunks_queued: AtomicU64,
    pub(crate) frames_finished: AtomicU64,
    pub(crate) frames_dropped: AtomicU64,
    pub(crate) frames_stale: AtomicU64,
    pub(crate) standalone_buffers: AtomicU64,
    pub(crate) format_changes: AtomicU64,
    pub(crate) buffers_changes: AtomicU64,
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl DecoderStats {
    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            frames_submitted: load(&self.frames_submitted),
            chunks_queued: load(&self.chunks_queued),
            frames_finished: load(&self.frames_finished),
            frames_dropped: load(&self.frames_dropped),
            frames_stale: load(&self.frames_stale),
            standalone_buffers: load(&self.standalone_buffers),
            format_changes: load(&self.format_changes),
            buffers_changes: load(&self.buffers_changes),
        }
    }
}

/// Point-in-time copy of the decoder counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Frames whose payload was fully queued
    pub frames_submitted: u64,
    /// Input buffers queued, one frame may take several
    pub chunks_queued: u64,
    pub frames_finished: u64,
    /// Frames dropped as late, empty or unfillable
    pub frames_dropped: u64,
    /// Frames dropped because the device apparently lost them
    pub frames_stale: u64,
    /// Decoded buffers pushed without a matching frame
    pub standalone_buffers: u64,
    pub format_changes: u64,
    pub buffers_changes: u64,
}

impl StatsSnapshot {
    /// Frames accounted for downstream, one way or the other
    pub fn frames_completed(&self) -> u64 {
        self.frames_finished + self.frames_dropped + self.frames_stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let stats = DecoderStats::default();
        bump(&stats.frames_finished);
        bump(&stats.frames_finished);
        bump(&stats.frames_stale);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.frames_finished, 2);
        assert_eq!(snapshot.frames_completed(), 3);
        assert_eq!(snapshot.standalone_buffers, 0);
    }
}
