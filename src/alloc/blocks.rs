use tracing::{error, info};

use super::slice::SliceAllocator;
use crate::config::StreamConfig;
use crate::device::{BufferHandle, BufferInfo, BufferUsage, GpuDevice};
use crate::error::Result;
use crate::mesh::SliceId;

/// Owns the device buffers backing every slice.
///
/// Blocks form a dense prefix `0..N`: they are created in increasing order
/// and only ever released from the top. An empty block below a used one
/// stays allocated.
pub struct BlockManager {
    blocks: Vec<BufferHandle>,
    slices_per_block: u32,
    slice_bytes: u64,
    block_bytes: u64,
}

impl BlockManager {
    pub fn new(cfg: &StreamConfig) -> Self {
        Self {
            blocks: Vec::new(),
            slices_per_block: cfg.slices_per_block(),
            slice_bytes: cfg.slice_bytes(),
            block_bytes: cfg.block_bytes(),
        }
    }

    /// `(block index, local slice index)` of a global slice id.
    #[inline]
    pub fn locate(&self, slice: SliceId) -> (u32, u32) {
        (slice / self.slices_per_block, slice % self.slices_per_block)
    }

    /// `(block index, byte offset inside the block)`.
    pub fn byte_location(&self, slice: SliceId) -> (u32, u64) {
        let (block, local) = self.locate(slice);
        (block, local as u64 * self.slice_bytes)
    }

    /// Creates blocks until the one holding `slice` exists.
    pub fn ensure_capacity(&mut self, device: &mut impl GpuDevice, slice: SliceId) -> Result<()> {
        let (block, _) = self.locate(slice);
        while self.blocks.len() as u32 <= block {
            let index = self.blocks.len();
            let debug_name = format!("[MESHI VOXEL] Allocation Block {}", index);
            let buffer = device
                .create_buffer(&BufferInfo {
                    debug_name: &debug_name,
                    byte_size: self.block_bytes,
                    usage: BufferUsage::VERTEX | BufferUsage::TRANSFER_DST,
                })
                .map_err(|err| {
                    error!("Failed to create allocation block {}: {}", index, err);
                    err
                })?;
            info!(
                "created allocation block {} ({} bytes, {} slices)",
                index, self.block_bytes, self.slices_per_block
            );
            self.blocks.push(buffer);
        }
        Ok(())
    }

    /// Releases trailing blocks whose whole slice range lies at or above
    /// `max_slices_end`, the highest mark any tracked frame may still read,
    /// and shrinks the allocator's bitset to match. Returns the number of
    /// device blocks released.
    pub fn reclaim(
        &mut self,
        device: &mut impl GpuDevice,
        allocator: &mut SliceAllocator,
        max_slices_end: u32,
    ) -> u32 {
        debug_assert!(allocator.alloc_end() <= max_slices_end);
        let keep = max_slices_end.div_ceil(self.slices_per_block);
        let mut released = 0;
        while self.blocks.len() as u32 > keep {
            let Some(buffer) = self.blocks.pop() else {
                break;
            };
            device.destroy_buffer(buffer);
            released += 1;
            info!("released allocation block {}", self.blocks.len());
        }
        allocator.truncate_blocks(keep);
        released
    }

    pub fn buffer(&self, block: u32) -> Option<BufferHandle> {
        self.blocks.get(block as usize).copied()
    }

    pub fn block_count(&self) -> u32 {
        self.blocks.len() as u32
    }

    pub fn slices_per_block(&self) -> u32 {
        self.slices_per_block
    }

    pub fn destroy(&mut self, device: &mut impl GpuDevice) {
        for buffer in self.blocks.drain(..) {
            device.destroy_buffer(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HeadlessDevice;

    fn config() -> StreamConfig {
        StreamConfig {
            slice_capacity: 4,
            alloc_block_bytes: 4 * 16 * 8,
            ..Default::default()
        }
    }

    #[test]
    fn slices_never_cross_block_boundaries() {
        let cfg = config();
        let blocks = BlockManager::new(&cfg);
        for slice in 0..64 {
            let (block, offset) = blocks.byte_location(slice);
            assert_eq!(block, slice / 8);
            assert!(offset + cfg.slice_bytes() <= cfg.block_bytes());
        }
    }

    #[test]
    fn ensure_capacity_creates_missing_prefix() {
        let mut device = HeadlessDevice::new();
        let mut blocks = BlockManager::new(&config());
        blocks.ensure_capacity(&mut device, 17).unwrap();
        assert_eq!(blocks.block_count(), 3);
        blocks.ensure_capacity(&mut device, 3).unwrap();
        assert_eq!(blocks.block_count(), 3);
        assert_eq!(device.live_buffers(), 3);
        assert_eq!(
            device.buffer_name(blocks.buffer(2).unwrap()),
            Some("[MESHI VOXEL] Allocation Block 2")
        );
    }

    #[test]
    fn reclaim_stops_at_referenced_block() {
        let mut device = HeadlessDevice::new();
        let mut alloc = SliceAllocator::new(8, 8);
        let mut blocks = BlockManager::new(&config());
        let ids: Vec<_> = (0..20).map(|_| alloc.alloc().unwrap()).collect();
        blocks.ensure_capacity(&mut device, *ids.last().unwrap()).unwrap();
        for id in &ids[10..] {
            alloc.free(*id);
        }
        assert_eq!(alloc.alloc_end(), 10);

        // A frame still references slices up to 20: nothing goes.
        assert_eq!(blocks.reclaim(&mut device, &mut alloc, 20), 0);
        assert_eq!(blocks.block_count(), 3);

        assert_eq!(blocks.reclaim(&mut device, &mut alloc, 10), 1);
        assert_eq!(blocks.block_count(), 2);
        assert_eq!(alloc.block_count(), 2);
        // Nothing new happened: a second pass is a no-op.
        assert_eq!(blocks.reclaim(&mut device, &mut alloc, 10), 0);
        assert_eq!(device.live_buffers(), 2);
    }

    #[test]
    fn device_failure_propagates() {
        let cfg = config();
        let mut device = HeadlessDevice::with_memory_budget(cfg.block_bytes());
        let mut blocks = BlockManager::new(&cfg);
        blocks.ensure_capacity(&mut device, 0).unwrap();
        let err = blocks.ensure_capacity(&mut device, 8).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(blocks.block_count(), 1);
    }
}
