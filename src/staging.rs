use tracing::{debug, error};

use crate::config::StreamConfig;
use crate::device::{BufferHandle, BufferInfo, BufferUsage, GpuDevice};
use crate::error::Result;

#[derive(Default)]
struct StagingPool {
    buffers: Vec<BufferHandle>,
    /// Buffers opened this frame; the last one is being filled.
    used: usize,
    /// Bytes written into the buffer being filled.
    cursor: u64,
}

/// Per-frame-slot pools of host-visible transfer buffers.
///
/// A slot's buffers are only touched again once the frame that last used
/// the slot has finished on the device, so writing into them never races
/// an in-flight copy.
pub struct StagingPipeline {
    pools: Vec<StagingPool>,
    buf_bytes: u64,
    min_bufs: usize,
}

impl StagingPipeline {
    pub fn new(cfg: &StreamConfig) -> Self {
        Self {
            pools: (0..cfg.frames_in_flight)
                .map(|_| StagingPool::default())
                .collect(),
            buf_bytes: cfg.staging_buf_bytes,
            min_bufs: cfg.min_staging_bufs.max(1) as usize,
        }
    }

    fn open_buffer(
        &mut self,
        device: &mut impl GpuDevice,
        slot: usize,
    ) -> Result<()> {
        let buf_bytes = self.buf_bytes;
        let pool = &mut self.pools[slot];
        if pool.used == pool.buffers.len() {
            let debug_name = format!(
                "[MESHI VOXEL] Staging Buffer {}:{}",
                slot,
                pool.buffers.len()
            );
            let buffer = device
                .create_buffer(&BufferInfo {
                    debug_name: &debug_name,
                    byte_size: buf_bytes,
                    usage: BufferUsage::TRANSFER_SRC | BufferUsage::HOST_VISIBLE,
                })
                .map_err(|err| {
                    error!("Failed to grow staging pool {}: {}", slot, err);
                    err
                })?;
            pool.buffers.push(buffer);
            debug!(
                "staging pool {} grown to {} buffers",
                slot,
                pool.buffers.len()
            );
        }
        pool.used += 1;
        pool.cursor = 0;
        Ok(())
    }

    /// Writes `data` into the slot's active staging buffer and records one
    /// copy into `dst` at `dst_offset`. Moves to the next buffer of the
    /// pool when the active one cannot fit `data`.
    pub fn stage_copy(
        &mut self,
        device: &mut impl GpuDevice,
        slot: usize,
        data: &[u8],
        dst: BufferHandle,
        dst_offset: u64,
    ) -> Result<()> {
        let size = data.len() as u64;
        debug_assert!(size <= self.buf_bytes, "copy larger than a staging buffer");
        if size == 0 {
            return Ok(());
        }
        let needs_buffer = {
            let pool = &self.pools[slot];
            pool.used == 0 || pool.cursor + size > self.buf_bytes
        };
        if needs_buffer {
            self.open_buffer(device, slot)?;
        }

        let pool = &mut self.pools[slot];
        let src = pool.buffers[pool.used - 1];
        let src_offset = pool.cursor;
        device.write_buffer(src, src_offset, data);
        device.copy_buffer(src, src_offset, dst, dst_offset, size);
        pool.cursor += size;
        Ok(())
    }

    /// Ends the slot's uploads for this frame: releases pool buffers past
    /// those used so far (never below the configured floor). Returns how
    /// many buffers the frame has used.
    ///
    /// The write position is kept, so a later upload in the same frame
    /// appends behind copies that are still in flight.
    pub fn update_buffer_alloc(&mut self, device: &mut impl GpuDevice, slot: usize) -> usize {
        let min_bufs = self.min_bufs;
        let pool = &mut self.pools[slot];
        let keep = pool.used.max(min_bufs);
        if pool.buffers.len() > keep {
            for buffer in pool.buffers.drain(keep..) {
                device.destroy_buffer(buffer);
            }
            debug!("staging pool {} shrunk to {} buffers", slot, keep);
        }
        pool.used
    }

    /// Rewinds the slot's pool once the frame that last filled it has
    /// finished on the device.
    pub fn recycle(&mut self, slot: usize) {
        let pool = &mut self.pools[slot];
        pool.used = 0;
        pool.cursor = 0;
    }

    pub fn buffer_count(&self, slot: usize) -> usize {
        self.pools[slot].buffers.len()
    }

    pub fn destroy(&mut self, device: &mut impl GpuDevice) {
        for pool in &mut self.pools {
            for buffer in pool.buffers.drain(..) {
                device.destroy_buffer(buffer);
            }
            pool.used = 0;
            pool.cursor = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceCommand, HeadlessDevice};

    fn setup(min_bufs: u32) -> (StagingPipeline, HeadlessDevice, BufferHandle) {
        let cfg = StreamConfig {
            slice_capacity: 1,
            staging_buf_bytes: 64,
            min_staging_bufs: min_bufs,
            ..Default::default()
        };
        let mut device = HeadlessDevice::new();
        let dst = device
            .create_buffer(&BufferInfo {
                debug_name: "dst",
                byte_size: 1024,
                usage: BufferUsage::VERTEX | BufferUsage::TRANSFER_DST,
            })
            .unwrap();
        (StagingPipeline::new(&cfg), device, dst)
    }

    fn copies(device: &HeadlessDevice) -> usize {
        device
            .commands()
            .iter()
            .filter(|c| matches!(c, DeviceCommand::Copy { .. }))
            .count()
    }

    #[test]
    fn small_copies_share_a_buffer() {
        let (mut staging, mut device, dst) = setup(1);
        for i in 0..4u64 {
            staging
                .stage_copy(&mut device, 0, &[i as u8; 16], dst, i * 16)
                .unwrap();
        }
        assert_eq!(staging.buffer_count(0), 1);
        assert_eq!(copies(&device), 4);
        assert_eq!(&device.buffer_data(dst).unwrap()[48..64], &[3u8; 16]);
    }

    #[test]
    fn overflow_opens_next_buffer_and_shrinks_later() {
        let (mut staging, mut device, dst) = setup(1);
        for i in 0..5u64 {
            staging
                .stage_copy(&mut device, 0, &[7u8; 48], dst, i * 48)
                .unwrap();
        }
        assert_eq!(staging.buffer_count(0), 5);
        assert_eq!(staging.update_buffer_alloc(&mut device, 0), 5);
        assert_eq!(staging.buffer_count(0), 5);

        staging.recycle(0);
        staging.stage_copy(&mut device, 0, &[1u8; 48], dst, 0).unwrap();
        staging.stage_copy(&mut device, 0, &[2u8; 48], dst, 48).unwrap();
        let created_before = device.live_buffers();
        assert_eq!(staging.update_buffer_alloc(&mut device, 0), 2);
        assert_eq!(staging.buffer_count(0), 2);
        assert_eq!(device.live_buffers(), created_before - 3);
    }

    #[test]
    fn idle_frame_keeps_floor() {
        let (mut staging, mut device, dst) = setup(2);
        for i in 0..3u64 {
            staging
                .stage_copy(&mut device, 1, &[1u8; 64], dst, i * 64)
                .unwrap();
        }
        staging.update_buffer_alloc(&mut device, 1);
        staging.recycle(1);
        assert_eq!(staging.update_buffer_alloc(&mut device, 1), 0);
        assert_eq!(staging.buffer_count(1), 2);
        assert_eq!(staging.buffer_count(0), 0);
    }

    #[test]
    fn second_upload_in_a_frame_appends() {
        let (mut staging, mut device, dst) = setup(1);
        staging.stage_copy(&mut device, 0, &[1u8; 16], dst, 0).unwrap();
        assert_eq!(staging.update_buffer_alloc(&mut device, 0), 1);
        staging.stage_copy(&mut device, 0, &[2u8; 16], dst, 16).unwrap();
        assert_eq!(staging.update_buffer_alloc(&mut device, 0), 1);

        let sources: Vec<_> = device
            .commands()
            .iter()
            .filter_map(|c| match c {
                DeviceCommand::Copy {
                    src, src_offset, ..
                } => Some((*src, *src_offset)),
                _ => None,
            })
            .collect();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].0, sources[1].0);
        assert_eq!(sources[0].1, 0);
        assert_eq!(sources[1].1, 16);

        staging.recycle(0);
        staging.stage_copy(&mut device, 0, &[3u8; 16], dst, 32).unwrap();
        assert!(matches!(
            device.commands().last(),
            Some(DeviceCommand::Copy { src_offset: 0, .. })
        ));
    }
}
