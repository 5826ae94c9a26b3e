pub mod headless;

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::error::Result;
use crate::mesh::MeshType;

pub use headless::{DeviceCommand, HeadlessDevice};

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX = 1 << 0;
        const TRANSFER_SRC = 1 << 1;
        const TRANSFER_DST = 1 << 2;
        const HOST_VISIBLE = 1 << 3;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u32);

pub struct BufferInfo<'a> {
    pub debug_name: &'a str,
    pub byte_size: u64,
    pub usage: BufferUsage,
}

/// Per-draw parameter pushed alongside each slice draw.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ChunkPush {
    /// World-space chunk origin, `w` unused.
    pub chunk_offset: [f32; 4],
}

impl ChunkPush {
    pub fn new(offset: Vec3) -> Self {
        Self {
            chunk_offset: offset.extend(0.0).to_array(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawCall {
    pub vertex_count: u32,
    pub first_vertex: u32,
    pub push: ChunkPush,
}

/// What the streamer needs from a graphics backend.
///
/// All calls happen on the main/render thread. Commands issued between
/// two [`GpuDevice::wait_frame`] calls belong to the same frame.
pub trait GpuDevice {
    fn create_buffer(&mut self, info: &BufferInfo) -> Result<BufferHandle>;
    fn destroy_buffer(&mut self, buffer: BufferHandle);
    /// Maps a host-visible buffer and copies `data` in at `offset`.
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]);
    fn copy_buffer(
        &mut self,
        src: BufferHandle,
        src_offset: u64,
        dst: BufferHandle,
        dst_offset: u64,
        size: u64,
    );
    /// Makes every earlier transfer visible to later vertex reads.
    fn transfer_barrier(&mut self);
    fn bind_pipeline(&mut self, ty: MeshType);
    fn bind_vertex_buffer(&mut self, buffer: BufferHandle);
    fn draw(&mut self, call: &DrawCall);
    /// Blocks until the GPU has finished the frame `frame_index`.
    fn wait_frame(&mut self, frame_index: u64);
}
