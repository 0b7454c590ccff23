// SPDX-License-Identifier: GPL-3.0-only

//! Acquisition counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the acquisition worker without locking
pub struct AcquisitionCounters {
    frames: Vec<AtomicU64>,
    frame_sets: AtomicU64,
    skipped_frame_sets: AtomicU64,
    wait_timeouts: AtomicU64,
    wait_errors: AtomicU64,
    unresolved_frames: AtomicU64,
}

impl AcquisitionCounters {
    pub fn new(slot_count: usize) -> Self {
        Self {
            frames: (0..slot_count).map(|_| AtomicU64::new(0)).collect(),
            frame_sets: AtomicU64::new(0),
            skipped_frame_sets: AtomicU64::new(0),
            wait_timeouts: AtomicU64::new(0),
            wait_errors: AtomicU64::new(0),
            unresolved_frames: AtomicU64::new(0),
        }
    }

    /// Record a stored frame; returns the slot's new total
    pub fn frame_stored(&self, slot: usize) -> u64 {
        self.frames
            .get(slot)
            .map(|count| count.fetch_add(1, Ordering::Relaxed) + 1)
            .unwrap_or(0)
    }

    pub fn frame_set_received(&self) {
        self.frame_sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_set_skipped(&self) {
        self.skipped_frame_sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn wait_timed_out(&self) {
        self.wait_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the running total, for rate-limited logging
    pub fn wait_failed(&self) -> u64 {
        self.wait_errors.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn frame_unresolved(&self) {
        self.unresolved_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StreamStatistics {
        StreamStatistics {
            frames_per_slot: self
                .frames
                .iter()
                .map(|count| count.load(Ordering::Relaxed))
                .collect(),
            frame_sets: self.frame_sets.load(Ordering::Relaxed),
            skipped_frame_sets: self.skipped_frame_sets.load(Ordering::Relaxed),
            wait_timeouts: self.wait_timeouts.load(Ordering::Relaxed),
            wait_errors: self.wait_errors.load(Ordering::Relaxed),
            unresolved_frames: self.unresolved_frames.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the acquisition counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamStatistics {
    /// Frames stored, indexed by slot
    pub frames_per_slot: Vec<u64>,
    /// Frame sets returned by the pipelines, including skipped ones
    pub frame_sets: u64,
    /// Frame sets dropped while an exposure change settled
    pub skipped_frame_sets: u64,
    pub wait_timeouts: u64,
    pub wait_errors: u64,
    /// Frames whose serial or stream index matched no slot
    pub unresolved_frames: u64,
}

impl StreamStatistics {
    pub fn total_frames(&self) -> u64 {
        self.frames_per_slot.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let counters = AcquisitionCounters::new(3);
        assert_eq!(counters.frame_stored(1), 1);
        assert_eq!(counters.frame_stored(1), 2);
        assert_eq!(counters.frame_stored(9), 0);
        counters.frame_set_skipped();
        counters.wait_timed_out();

        let stats = counters.snapshot();
        assert_eq!(stats.frames_per_slot, vec![0, 2, 0]);
        assert_eq!(stats.total_frames(), 2);
        assert_eq!(stats.skipped_frame_sets, 1);
        assert_eq!(stats.wait_timeouts, 1);
        assert_eq!(stats.wait_errors, 0);
    }
}
