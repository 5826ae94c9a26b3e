use tracing::trace;

use crate::alloc::BlockManager;
use crate::config::StreamConfig;
use crate::cull::{Aabb, View};
use crate::device::{ChunkPush, DrawCall, GpuDevice};
use crate::mesh::MeshType;
use crate::world::{ChunkId, ChunkTable};

/// One slice draw: `vertex_count` vertices starting at
/// `local_slice * slice_capacity` in the owning block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawEntry {
    pub vertex_count: u32,
    pub local_slice: u32,
    pub chunk: ChunkId,
}

#[derive(Default)]
struct BlockDrawLists {
    lists: [Vec<DrawEntry>; 2],
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrawStats {
    pub visible_chunks: u32,
    pub culled_chunks: u32,
    /// Chunks the camera frustum accepts. Differs from `visible_chunks`
    /// only while a debug frustum drives culling.
    pub camera_visible_chunks: u32,
    pub draw_calls: u32,
    pub vertices: [u64; 2],
}

impl DrawStats {
    pub fn vertices(&self, ty: MeshType) -> u64 {
        self.vertices[ty.index()]
    }
}

/// Builds per-block, per-type draw lists each frame and replays them
/// against the device.
///
/// Lists are cleared, not reallocated, between frames.
pub struct DrawBatcher {
    blocks: Vec<BlockDrawLists>,
    slice_capacity: u32,
    slices_per_block: u32,
}

impl DrawBatcher {
    pub fn new(cfg: &StreamConfig) -> Self {
        Self {
            blocks: Vec::new(),
            slice_capacity: cfg.slice_capacity,
            slices_per_block: cfg.slices_per_block(),
        }
    }

    fn reset(&mut self, block_count: u32) {
        self.blocks
            .resize_with(block_count as usize, BlockDrawLists::default);
        for block in &mut self.blocks {
            for list in &mut block.lists {
                list.clear();
            }
        }
    }

    /// Culls every loaded, non-empty chunk and files the slices of the
    /// survivors under their owning block.
    pub fn build(&mut self, world: &ChunkTable, view: &View, block_count: u32) -> DrawStats {
        self.reset(block_count);
        let mut stats = DrawStats::default();
        let frustum = view.culling_frustum();

        for chunk in world.iter() {
            if !chunk.loaded || chunk.is_empty() {
                continue;
            }
            let (min, max) = chunk.bounds();
            let aabb = Aabb::new(min, max);
            if view.frustum.intersects_aabb(&aabb) {
                stats.camera_visible_chunks += 1;
            }
            if !frustum.intersects_aabb(&aabb) {
                stats.culled_chunks += 1;
                continue;
            }
            stats.visible_chunks += 1;

            for ty in MeshType::ALL {
                for (slice, vertex_count) in chunk.mesh(ty).slice_counts(self.slice_capacity) {
                    let block = slice / self.slices_per_block;
                    debug_assert!(
                        block < block_count,
                        "chunk {} draws slice {} past block {}",
                        chunk.id,
                        slice,
                        block_count
                    );
                    let Some(lists) = self.blocks.get_mut(block as usize) else {
                        continue;
                    };
                    lists.lists[ty.index()].push(DrawEntry {
                        vertex_count,
                        local_slice: slice % self.slices_per_block,
                        chunk: chunk.id,
                    });
                }
            }
        }
        stats
    }

    pub fn list(&self, block: u32, ty: MeshType) -> &[DrawEntry] {
        self.blocks
            .get(block as usize)
            .map(|b| b.lists[ty.index()].as_slice())
            .unwrap_or(&[])
    }

    /// Opaque pass then transparent pass; per pass one pipeline bind, one
    /// buffer bind per non-empty block and one draw per entry.
    pub fn emit(
        &self,
        device: &mut impl GpuDevice,
        blocks: &BlockManager,
        world: &ChunkTable,
        stats: &mut DrawStats,
    ) {
        for ty in MeshType::ALL {
            let mut pipeline_bound = false;
            for (index, lists) in self.blocks.iter().enumerate() {
                let list = &lists.lists[ty.index()];
                if list.is_empty() {
                    continue;
                }
                let Some(buffer) = blocks.buffer(index as u32) else {
                    continue;
                };
                if !pipeline_bound {
                    device.bind_pipeline(ty);
                    pipeline_bound = true;
                }
                device.bind_vertex_buffer(buffer);
                trace!("block {} {:?}: {} draws", index, ty, list.len());

                for entry in list {
                    let Some(chunk) = world.get(entry.chunk) else {
                        continue;
                    };
                    device.draw(&DrawCall {
                        vertex_count: entry.vertex_count,
                        first_vertex: entry.local_slice * self.slice_capacity,
                        push: ChunkPush::new(chunk.world_origin()),
                    });
                    stats.draw_calls += 1;
                    stats.vertices[ty.index()] += entry.vertex_count as u64;
                }
            }
        }
    }
}
