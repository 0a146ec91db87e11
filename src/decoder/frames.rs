// SPDX-License-Identifier: GPL-3.0-only

//! Frames submitted to the device and waiting for decoded output
//!
//! Devices do not always return frames in submission order, and some
//! silently drop frames. Decoded buffers are therefore matched to the
//! pending frame with the nearest timestamp, and frames left far behind
//! a match are swept out.

use std::time::Instant;

/// Timestamp tag attached when the first chunk of a frame is queued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferIdentification {
    /// Presentation time in nanoseconds, `None` when upstream had none
    pub timestamp: Option<u64>,
}

impl BufferIdentification {
    pub fn new(timestamp: Option<u64>) -> Self {
        Self { timestamp }
    }
}

/// A frame whose payload reached the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFrame {
    pub number: u64,
    pub pts: Option<u64>,
    pub duration: Option<u64>,
    /// Latest time the decoded frame is still useful downstream
    pub deadline: Option<Instant>,
    pub id: BufferIdentification,
}

impl PendingFrame {
    pub fn is_late(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now > deadline)
    }
}

/// Thresholds beyond which a skipped frame counts as lost by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalePolicy {
    pub max_age_ns: u64,
    pub max_distance: u64,
}

/// Result of matching one decoded buffer
#[derive(Debug, Default)]
pub struct FrameMatch {
    pub frame: Option<PendingFrame>,
    /// Older frames that will never be matched
    pub stale: Vec<PendingFrame>,
}

/// Pending frames in submission order
#[derive(Debug, Default)]
pub struct FrameTable {
    frames: Vec<PendingFrame>,
}

impl FrameTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, frame: PendingFrame) {
        self.frames.push(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn contains(&self, number: u64) -> bool {
        self.frames.iter().any(|f| f.number == number)
    }

    pub fn remove(&mut self, number: u64) -> Option<PendingFrame> {
        let pos = self.frames.iter().position(|f| f.number == number)?;
        Some(self.frames.remove(pos))
    }

    /// Remove every pending frame, oldest first
    pub fn drain_all(&mut self) -> Vec<PendingFrame> {
        std::mem::take(&mut self.frames)
    }

    /// Take the frame nearest to `reference_ns` plus the stale frames before it
    pub fn take_nearest(&mut self, reference_ns: u64, policy: &StalePolicy) -> FrameMatch {
        let Some(best) = self.nearest_index(reference_ns) else {
            return FrameMatch::default();
        };
        let best_ts = self.frames[best].id.timestamp;
        let best_number = self.frames[best].number;

        let mut stale_numbers = Vec::new();
        for frame in &self.frames[..best] {
            let ts = frame.id.timestamp;
            if ts.unwrap_or(0) > best_ts.unwrap_or(0) {
                break;
            }
            let age = match (ts, best_ts) {
                (Some(ts), Some(best_ts)) => best_ts - ts,
                _ => 0,
            };
            let distance = best_number.saturating_sub(frame.number);
            if age > policy.max_age_ns || distance > policy.max_distance {
                stale_numbers.push(frame.number);
            }
        }

        let frame = self.frames.remove(best);
        let mut stale = Vec::with_capacity(stale_numbers.len());
        self.frames.retain(|f| {
            if stale_numbers.contains(&f.number) {
                stale.push(f.clone());
                false
            } else {
                true
            }
        });

        FrameMatch {
            frame: Some(frame),
            stale,
        }
    }

    fn nearest_index(&self, reference_ns: u64) -> Option<usize> {
        let mut best: Option<(usize, u64)> = None;
        for (i, frame) in self.frames.iter().enumerate() {
            let ts = frame.id.timestamp.unwrap_or(0);
            let diff = ts.abs_diff(reference_ns);
            if best.is_none_or(|(_, best_diff)| diff < best_diff) {
                best = Some((i, diff));
                // Untimed streams match the oldest frame
                if diff == 0 || (reference_ns == 0 && ts == 0) {
                    break;
                }
            }
        }
        best.map(|(i, _)| i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: u64 = 1_000_000_000;

    fn frame(number: u64, ts: Option<u64>) -> PendingFrame {
        PendingFrame {
            number,
            pts: ts,
            duration: None,
            deadline: None,
            id: BufferIdentification::new(ts),
        }
    }

    fn table(timestamps: &[u64]) -> FrameTable {
        let mut table = FrameTable::new();
        for (n, ts) in timestamps.iter().enumerate() {
            table.insert(frame(n as u64, Some(*ts)));
        }
        table
    }

    fn lenient() -> StalePolicy {
        StalePolicy {
            max_age_ns: 5 * SECOND,
            max_distance: 100,
        }
    }

    #[test]
    fn test_nearest_timestamp() {
        let mut frames = table(&[100, 200, 300]);
        let m = frames.take_nearest(205, &lenient());
        assert_eq!(m.frame.unwrap().pts, Some(200));
        assert!(m.stale.is_empty());
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn test_exact_match_wins() {
        let mut frames = table(&[300, 100, 200]);
        let m = frames.take_nearest(100, &lenient());
        assert_eq!(m.frame.unwrap().number, 1);
    }

    #[test]
    fn test_stale_frames_swept() {
        let mut frames = table(&[0, 50 * SECOND / 1000, 5 * SECOND]);
        let policy = StalePolicy {
            max_age_ns: SECOND,
            max_distance: 100,
        };
        let m = frames.take_nearest(5 * SECOND, &policy);
        assert_eq!(m.frame.unwrap().number, 2);
        let stale: Vec<u64> = m.stale.iter().map(|f| f.number).collect();
        assert_eq!(stale, vec![0, 1]);
        assert!(frames.is_empty());
    }

    #[test]
    fn test_recent_frames_kept() {
        let mut frames = table(&[0, 50, 5000]);
        let m = frames.take_nearest(5000, &lenient());
        assert!(m.stale.is_empty());
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn test_distance_sweep() {
        let mut frames = FrameTable::new();
        frames.insert(frame(0, Some(10)));
        frames.insert(frame(500, Some(20)));
        let m = frames.take_nearest(20, &lenient());
        assert_eq!(m.frame.unwrap().number, 500);
        assert_eq!(m.stale.len(), 1);
    }

    #[test]
    fn test_untimed_frames_match_in_order() {
        let mut frames = FrameTable::new();
        frames.insert(frame(0, None));
        frames.insert(frame(1, None));
        let m = frames.take_nearest(0, &lenient());
        assert_eq!(m.frame.unwrap().number, 0);
        assert!(m.stale.is_empty());
    }

    #[test]
    fn test_empty_table() {
        let mut frames = FrameTable::new();
        let m = frames.take_nearest(42, &lenient());
        assert!(m.frame.is_none());
    }
}
