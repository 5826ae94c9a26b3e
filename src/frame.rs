use crate::mesh::SliceId;

/// Bookkeeping for one of the `frames_in_flight` recycled frame records.
#[derive(Debug, Default)]
pub struct FrameSlot {
    frame: Option<u64>,
    /// Allocation high-water mark visible while this frame was recorded.
    slices_end: u32,
    /// Slices unpublished during this frame, freed on recycle.
    retired: Vec<SliceId>,
}

impl FrameSlot {
    pub fn frame(&self) -> Option<u64> {
        self.frame
    }

    pub fn slices_end(&self) -> u32 {
        self.slices_end
    }

    pub fn retired(&self) -> &[SliceId] {
        &self.retired
    }
}

/// What a slot held before it was taken over by a new frame.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Recycled {
    /// Frame that last used the slot; the device must be done with it.
    pub previous_frame: Option<u64>,
    pub retired: Vec<SliceId>,
}

pub struct FrameRing {
    slots: Vec<FrameSlot>,
}

impl FrameRing {
    pub fn new(frames_in_flight: u32) -> Self {
        debug_assert!(frames_in_flight >= 2);
        Self {
            slots: (0..frames_in_flight).map(|_| FrameSlot::default()).collect(),
        }
    }

    #[inline]
    pub fn slot_index(&self, frame: u64) -> usize {
        (frame % self.slots.len() as u64) as usize
    }

    pub fn slot(&self, frame: u64) -> &FrameSlot {
        &self.slots[self.slot_index(frame)]
    }

    /// Claims the slot for `frame`. Returns what the slot held when it is
    /// taken over, `None` when `frame` already owns it.
    pub fn begin(&mut self, frame: u64) -> Option<Recycled> {
        let idx = self.slot_index(frame);
        let slot = &mut self.slots[idx];
        if slot.frame == Some(frame) {
            return None;
        }
        debug_assert!(
            slot.frame.map(|f| f < frame).unwrap_or(true),
            "frame {frame} began after a later frame used its slot"
        );
        let recycled = Recycled {
            previous_frame: slot.frame,
            retired: std::mem::take(&mut slot.retired),
        };
        slot.frame = Some(frame);
        slot.slices_end = 0;
        Some(recycled)
    }

    pub fn record_slices_end(&mut self, frame: u64, slices_end: u32) {
        let idx = self.slot_index(frame);
        let slot = &mut self.slots[idx];
        slot.slices_end = slot.slices_end.max(slices_end);
    }

    pub fn retire(&mut self, frame: u64, slices: impl IntoIterator<Item = SliceId>) {
        let idx = self.slot_index(frame);
        self.slots[idx].retired.extend(slices);
    }

    /// Highest mark any tracked frame may still read.
    pub fn max_slices_end(&self) -> u32 {
        self.slots.iter().map(|s| s.slices_end).max().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_is_recycled_after_frames_in_flight() {
        let mut ring = FrameRing::new(2);
        assert_eq!(
            ring.begin(0),
            Some(Recycled {
                previous_frame: None,
                retired: vec![]
            })
        );
        ring.retire(0, [4, 5]);
        assert_eq!(ring.begin(0), None);
        ring.begin(1);
        assert_eq!(ring.slot(0).retired(), &[4, 5]);

        let recycled = ring.begin(2).unwrap();
        assert_eq!(recycled.previous_frame, Some(0));
        assert_eq!(recycled.retired, vec![4, 5]);
        assert!(ring.slot(2).retired().is_empty());
    }

    #[test]
    fn max_slices_end_spans_every_slot() {
        let mut ring = FrameRing::new(3);
        ring.begin(0);
        ring.record_slices_end(0, 20);
        ring.begin(1);
        ring.record_slices_end(1, 10);
        ring.record_slices_end(1, 4);
        assert_eq!(ring.slot(1).slices_end(), 10);
        assert_eq!(ring.max_slices_end(), 20);

        ring.begin(2);
        assert_eq!(ring.max_slices_end(), 20);
        // Frame 3 takes over frame 0's slot; its mark stops counting.
        ring.begin(3);
        ring.record_slices_end(3, 10);
        assert_eq!(ring.max_slices_end(), 10);
    }
}
