// SPDX-License-Identifier: GPL-3.0-only

//! Latest-frame table, one independently locked cell per slot

use crate::backends::camera::VideoFrame;
use std::sync::{Arc, RwLock};

/// Most recent frame of every slot
///
/// The acquisition worker swaps a whole `Arc` into a cell, so a reader either
/// sees the previous frame or the new one, never a partial write. A write only
/// locks its own cell.
pub struct FrameTable {
    slots: Vec<RwLock<Option<Arc<VideoFrame>>>>,
}

impl FrameTable {
    pub fn new(slot_count: usize) -> Self {
        Self {
            slots: (0..slot_count).map(|_| RwLock::new(None)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Latest frame of `slot`; `None` if never captured or out of range
    pub fn get(&self, slot: usize) -> Option<Arc<VideoFrame>> {
        let cell = self.slots.get(slot)?;
        match cell.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the frame of `slot`; returns false for an out-of-range slot
    pub fn store(&self, slot: usize, frame: VideoFrame) -> bool {
        let Some(cell) = self.slots.get(slot) else {
            return false;
        };
        let frame = Arc::new(frame);
        match cell.write() {
            Ok(mut guard) => *guard = Some(frame),
            Err(poisoned) => *poisoned.into_inner() = Some(frame),
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::StreamKind;
    use crate::backends::camera::simulated::synthetic_frame;

    #[test]
    fn test_never_captured_is_none() {
        let table = FrameTable::new(3);
        assert_eq!(table.len(), 3);
        assert!(table.get(0).is_none());
        assert!(table.get(2).is_none());
        assert!(table.get(3).is_none());
    }

    #[test]
    fn test_empty_table() {
        let table = FrameTable::new(0);
        assert!(table.is_empty());
        assert!(table.get(0).is_none());
        assert!(!table.store(0, synthetic_frame("A", StreamKind::Color, 1)));
    }

    #[test]
    fn test_store_overwrites_in_place() {
        let table = FrameTable::new(3);
        assert!(table.store(1, synthetic_frame("A", StreamKind::InfraredLeft, 1)));
        assert!(table.store(1, synthetic_frame("A", StreamKind::InfraredLeft, 2)));
        assert_eq!(table.get(1).unwrap().frame_number, 2);
        assert!(table.get(0).is_none());
        assert!(!table.store(7, synthetic_frame("A", StreamKind::Color, 3)));
    }

    #[test]
    fn test_reader_keeps_old_frame_alive() {
        let table = FrameTable::new(1);
        table.store(0, synthetic_frame("A", StreamKind::Color, 1));
        let held = table.get(0).unwrap();
        table.store(0, synthetic_frame("A", StreamKind::Color, 2));
        assert_eq!(held.frame_number, 1);
        assert_eq!(table.get(0).unwrap().frame_number, 2);
    }
}
