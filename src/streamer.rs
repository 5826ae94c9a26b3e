use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, error, trace};

use crate::alloc::{BlockManager, SliceAllocator};
use crate::batch::{DrawBatcher, DrawStats};
use crate::config::StreamConfig;
use crate::cull::View;
use crate::device::GpuDevice;
use crate::error::Result;
use crate::frame::FrameRing;
use crate::mesh::{MeshDescriptor, MeshType, UploadSlice};
use crate::mesher::{ChunkMesh, MeshInput, MeshOutput, MeshWorkerPool};
use crate::staging::StagingPipeline;
use crate::world::{BlockRegistry, ChunkId, ChunkTable};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UploadStats {
    /// Meshes published into their chunk this frame.
    pub published: u32,
    /// Results dropped because the chunk was unloaded or remeshed again.
    pub dropped: u32,
    pub slices_uploaded: u32,
    pub bytes_uploaded: u64,
    pub staging_buffers: u32,
    pub blocks_created: u32,
    pub blocks_released: u32,
    /// Retired slices returned to the allocator when the slot recycled.
    pub slices_freed: u32,
}

/// A mesh waiting to be published at the next upload.
struct ReadyMesh {
    chunk: ChunkId,
    /// `None` for meshes handed in directly.
    ticket: Option<u64>,
    mesh: ChunkMesh,
}

/// Owns every piece of the chunk streaming path: slice allocation, the
/// allocation blocks, staging, frame tracking, mesh workers and draw
/// batching.
///
/// Per frame the renderer waits for the slot's previous frame, then calls
/// [`ChunkStreamer::upload_remeshed`] followed by [`ChunkStreamer::draw`]
/// with the same `frame_index`. Frame indices must increase.
pub struct ChunkStreamer {
    cfg: StreamConfig,
    slices: SliceAllocator,
    blocks: BlockManager,
    staging: StagingPipeline,
    batcher: DrawBatcher,
    frames: FrameRing,
    workers: MeshWorkerPool,
    ready: VecDeque<ReadyMesh>,
    pending: VecDeque<UploadSlice>,
    current_frame: u64,
    next_ticket: u64,
}

impl ChunkStreamer {
    pub fn new(cfg: StreamConfig) -> Result<Self> {
        cfg.validate()?;
        let workers = MeshWorkerPool::new(cfg.worker_threads as usize, cfg.slice_capacity)?;
        debug!(
            "chunk streamer: {} vertices per slice, {} slices per block, {} frames in flight",
            cfg.slice_capacity,
            cfg.slices_per_block(),
            cfg.frames_in_flight
        );
        Ok(Self {
            slices: SliceAllocator::new(cfg.slices_per_block(), cfg.max_blocks),
            blocks: BlockManager::new(&cfg),
            staging: StagingPipeline::new(&cfg),
            batcher: DrawBatcher::new(&cfg),
            frames: FrameRing::new(cfg.frames_in_flight),
            workers,
            ready: VecDeque::new(),
            pending: VecDeque::new(),
            current_frame: 0,
            next_ticket: 1,
            cfg,
        })
    }

    pub fn config(&self) -> &StreamConfig {
        &self.cfg
    }

    /// Submits queued remeshes to the worker pool, at most
    /// `max_dispatch_per_frame` of them. A chunk whose previous task is
    /// still running stays queued. Returns the number submitted.
    pub fn dispatch_remesh(&mut self, world: &mut ChunkTable, registry: &Arc<BlockRegistry>) -> u32 {
        let mut deferred = Vec::new();
        let mut submitted = 0;
        while submitted < self.cfg.max_dispatch_per_frame {
            let Some(id) = world.pop_remesh() else {
                break;
            };
            let Some(chunk) = world.get(id) else {
                continue;
            };
            if chunk.remesh_outstanding() {
                deferred.push(id);
                continue;
            }

            let ticket = self.next_ticket;
            let Some(input) = MeshInput::capture(world, id, ticket) else {
                continue;
            };
            self.next_ticket += 1;
            if let Some(chunk) = world.get_mut(id) {
                chunk.mesh_ticket = Some(ticket);
            }
            self.workers.submit(input, registry.clone());
            submitted += 1;
        }
        for id in deferred {
            world.request_remesh(id);
        }
        if submitted > 0 {
            debug!("dispatched {} remesh tasks", submitted);
        }
        submitted
    }

    /// Hands in a mesh built outside the worker pool. It is published at
    /// the next [`ChunkStreamer::upload_remeshed`].
    pub fn submit_mesh(&mut self, chunk: ChunkId, mesh: ChunkMesh) {
        self.ready.push_back(ReadyMesh {
            chunk,
            ticket: None,
            mesh,
        });
    }

    /// Blocks until every dispatched task has finished meshing.
    pub fn wait_idle(&self) {
        self.workers.wait_idle();
    }

    /// Removes a chunk. Its slices are retired, its queued uploads dropped
    /// and any task still meshing it is discarded when it completes.
    pub fn unload_chunk(&mut self, world: &mut ChunkTable, id: ChunkId) -> bool {
        let Some(chunk) = world.remove(id) else {
            return false;
        };
        let [opaque, transparent] = chunk.meshes;
        self.retire(opaque);
        self.retire(transparent);
        self.pending.retain(|u| u.chunk != id);
        self.ready.retain(|r| r.chunk != id);
        true
    }

    fn retire(&mut self, desc: MeshDescriptor) {
        self.frames.retire(self.current_frame, desc.slices);
    }

    fn begin_frame(&mut self, device: &mut impl GpuDevice, frame: u64) -> u32 {
        self.current_frame = frame;
        let Some(recycled) = self.frames.begin(frame) else {
            return 0;
        };
        if let Some(previous) = recycled.previous_frame {
            device.wait_frame(previous);
        }
        self.staging.recycle(self.frames.slot_index(frame));
        for id in &recycled.retired {
            self.slices.free(*id);
        }
        recycled.retired.len() as u32
    }

    /// Moves finished worker results into the ready queue. A failed task
    /// is fatal and stops collection.
    fn collect_completed(&mut self) -> Result<()> {
        while let Some(MeshOutput {
            chunk,
            ticket,
            mesh,
        }) = self.workers.try_recv()
        {
            let mesh = mesh.map_err(|err| {
                error!("Failed to mesh chunk {}: {}", chunk, err);
                err
            })?;
            self.ready.push_back(ReadyMesh {
                chunk,
                ticket: Some(ticket),
                mesh,
            });
        }
        Ok(())
    }

    /// Publishes one mesh into its chunk. Returns `false` when the result
    /// is stale or the chunk is gone.
    fn publish(&mut self, world: &mut ChunkTable, ready: ReadyMesh) -> Result<bool> {
        let Some(chunk) = world.get_mut(ready.chunk) else {
            trace!("chunk {} unloaded before its mesh finished", ready.chunk);
            return Ok(false);
        };
        if let Some(ticket) = ready.ticket {
            if chunk.mesh_ticket != Some(ticket) {
                return Ok(false);
            }
            chunk.mesh_ticket = None;
        }

        let mut meshes: [MeshDescriptor; 2] = Default::default();
        let mut uploads = Vec::new();
        let [opaque, transparent] = ready.mesh.streams;
        for (ty, stream) in MeshType::ALL.into_iter().zip([opaque, transparent]) {
            let desc = &mut meshes[ty.index()];
            desc.vertex_count = stream.vertex_count;
            for data in stream.slices {
                let slice = self.slices.alloc()?;
                desc.slices.push(slice);
                uploads.push(UploadSlice {
                    slice,
                    chunk: ready.chunk,
                    data,
                });
            }
        }

        let [old_opaque, old_transparent] = std::mem::replace(&mut chunk.meshes, meshes);
        self.retire(old_opaque);
        self.retire(old_transparent);
        self.pending.retain(|u| u.chunk != ready.chunk);
        self.pending.extend(uploads);
        Ok(true)
    }

    /// Publishes finished meshes, copies every pending slice into its
    /// allocation block (creating blocks as needed) and releases trailing
    /// blocks no tracked frame can still read.
    ///
    /// The caller must already have waited on the fence of the frame that
    /// previously used `frame_index`'s slot; the device is told again via
    /// [`GpuDevice::wait_frame`].
    pub fn upload_remeshed(
        &mut self,
        device: &mut impl GpuDevice,
        world: &mut ChunkTable,
        frame_index: u64,
    ) -> Result<UploadStats> {
        let mut stats = UploadStats {
            slices_freed: self.begin_frame(device, frame_index),
            ..Default::default()
        };

        self.collect_completed()?;
        while let Some(ready) = self.ready.pop_front() {
            if self.publish(world, ready)? {
                stats.published += 1;
            } else {
                stats.dropped += 1;
            }
        }

        let slot = self.frames.slot_index(frame_index);
        while let Some(upload) = self.pending.pop_front() {
            let before = self.blocks.block_count();
            self.blocks.ensure_capacity(device, upload.slice)?;
            stats.blocks_created += self.blocks.block_count() - before;

            let (block, offset) = self.blocks.byte_location(upload.slice);
            let Some(dst) = self.blocks.buffer(block) else {
                continue;
            };
            self.staging
                .stage_copy(device, slot, upload.bytes(), dst, offset)?;
            stats.slices_uploaded += 1;
            stats.bytes_uploaded += upload.bytes().len() as u64;
        }
        if stats.slices_uploaded > 0 {
            device.transfer_barrier();
        }
        stats.staging_buffers = self.staging.update_buffer_alloc(device, slot) as u32;

        self.frames
            .record_slices_end(frame_index, self.slices.alloc_end());
        stats.blocks_released =
            self.blocks
                .reclaim(device, &mut self.slices, self.frames.max_slices_end());

        if stats != UploadStats::default() {
            debug!("frame {} upload: {:?}", frame_index, stats);
        }
        Ok(stats)
    }

    /// Culls, batches and issues the opaque then transparent passes.
    pub fn draw(
        &mut self,
        device: &mut impl GpuDevice,
        world: &ChunkTable,
        frame_index: u64,
        view: &View,
    ) -> DrawStats {
        self.begin_frame(device, frame_index);
        self.frames
            .record_slices_end(frame_index, self.slices.alloc_end());

        let mut stats = self
            .batcher
            .build(world, view, self.blocks.block_count());
        self.batcher
            .emit(device, &self.blocks, world, &mut stats);
        trace!("frame {} draw: {:?}", frame_index, stats);
        stats
    }

    /// Releases every device buffer the streamer owns. Published mesh
    /// descriptors are meaningless afterwards.
    pub fn destroy(&mut self, device: &mut impl GpuDevice) {
        self.workers.wait_idle();
        while self.workers.try_recv().is_some() {}
        self.pending.clear();
        self.ready.clear();
        self.blocks.destroy(device);
        self.staging.destroy(device);
        self.slices = SliceAllocator::new(self.cfg.slices_per_block(), self.cfg.max_blocks);
        self.frames = FrameRing::new(self.cfg.frames_in_flight);
    }

    pub fn slices(&self) -> &SliceAllocator {
        &self.slices
    }

    pub fn blocks(&self) -> &BlockManager {
        &self.blocks
    }

    pub fn batcher(&self) -> &DrawBatcher {
        &self.batcher
    }

    pub fn frames(&self) -> &FrameRing {
        &self.frames
    }

    pub fn staging(&self) -> &StagingPipeline {
        &self.staging
    }

    pub fn pending_uploads(&self) -> usize {
        self.pending.len()
    }

    pub fn outstanding_tasks(&self) -> usize {
        self.workers.outstanding()
    }
}
