use bitvec::vec::BitVec;
use tracing::{debug, error};

use crate::error::{Result, StreamError};
use crate::mesh::SliceId;

/// First-fit allocator over a bitset of slices.
///
/// The bitset always spans `block_count * slices_per_block` bits. It grows
/// a whole block at a time when full and only shrinks when the block
/// manager hands a trailing block back.
pub struct SliceAllocator {
    used: BitVec,
    slices_per_block: u32,
    max_blocks: u32,
    alloc_end: u32,
    live: u32,
    /// No free bit lives below this index.
    search_start: usize,
}

impl SliceAllocator {
    pub fn new(slices_per_block: u32, max_blocks: u32) -> Self {
        debug_assert!(slices_per_block > 0);
        Self {
            used: BitVec::new(),
            slices_per_block,
            max_blocks,
            alloc_end: 0,
            live: 0,
            search_start: 0,
        }
    }

    pub fn alloc(&mut self) -> Result<SliceId> {
        let id = loop {
            let start = self.search_start.min(self.used.len());
            if let Some(i) = self.used[start..].first_zero() {
                break start + i;
            }
            self.grow()?;
        };

        self.used.set(id, true);
        self.live += 1;
        self.search_start = id + 1;
        self.alloc_end = self.alloc_end.max(id as u32 + 1);
        Ok(id as SliceId)
    }

    fn grow(&mut self) -> Result<()> {
        if self.block_count() >= self.max_blocks {
            error!(
                "slice allocator exhausted: {} blocks of {} slices in use",
                self.max_blocks, self.slices_per_block
            );
            return Err(StreamError::BlockCapExceeded {
                max_blocks: self.max_blocks,
            });
        }
        let len = self.used.len() + self.slices_per_block as usize;
        self.used.resize(len, false);
        debug!("slice bitset grown to {} blocks", self.block_count());
        Ok(())
    }

    pub fn free(&mut self, id: SliceId) {
        let idx = id as usize;
        debug_assert!(self.is_used(id), "slice {id} freed twice or never allocated");
        if !self.is_used(id) {
            return;
        }
        self.used.set(idx, false);
        self.live -= 1;
        self.search_start = self.search_start.min(idx);
        if id + 1 == self.alloc_end {
            self.alloc_end = self.used.last_one().map(|i| i as u32 + 1).unwrap_or(0);
        }
    }

    /// Drops the bits of every block at or above `block_count`.
    pub fn truncate_blocks(&mut self, block_count: u32) {
        let len = block_count as usize * self.slices_per_block as usize;
        if len >= self.used.len() {
            return;
        }
        debug_assert!(
            self.used[len..].not_any(),
            "truncating blocks that still own slices"
        );
        self.used.truncate(len);
        self.search_start = self.search_start.min(len);
    }

    pub fn is_used(&self, id: SliceId) -> bool {
        self.used.get(id as usize).map(|b| *b).unwrap_or(false)
    }

    /// One past the highest slice currently allocated.
    pub fn alloc_end(&self) -> u32 {
        self.alloc_end
    }

    pub fn live(&self) -> u32 {
        self.live
    }

    pub fn block_count(&self) -> u32 {
        (self.used.len() / self.slices_per_block as usize) as u32
    }

    pub fn slices_per_block(&self) -> u32 {
        self.slices_per_block
    }

    pub fn capacity(&self) -> u32 {
        self.used.len() as u32
    }
}
