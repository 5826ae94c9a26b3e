use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use tracing::info;

use super::{mesh_chunk, ChunkMesh, MeshInput};
use crate::error::Result;
use crate::world::{BlockRegistry, ChunkId};

/// A finished mesh task, handed back to the main thread.
pub struct MeshOutput {
    pub chunk: ChunkId,
    pub ticket: u64,
    pub mesh: Result<ChunkMesh>,
}

/// Fixed-size pool running mesh tasks off the main thread.
///
/// Workers touch only their own snapshot and output; results wait in a
/// completion queue until the main thread polls them.
pub struct MeshWorkerPool {
    pool: rayon::ThreadPool,
    completed: Arc<SegQueue<MeshOutput>>,
    outstanding: Arc<AtomicUsize>,
    /// Signalled by a worker after it pushes a result.
    finished: Arc<(Mutex<()>, Condvar)>,
    slice_capacity: u32,
}

impl MeshWorkerPool {
    pub fn new(threads: usize, slice_capacity: u32) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("meshi-voxel-mesher-{i}"))
            .build()?;
        info!(
            "mesh worker pool started with {} threads",
            pool.current_num_threads()
        );
        Ok(Self {
            pool,
            completed: Arc::new(SegQueue::new()),
            outstanding: Arc::new(AtomicUsize::new(0)),
            finished: Arc::new((Mutex::new(()), Condvar::new())),
            slice_capacity,
        })
    }

    pub fn submit(&self, input: MeshInput, registry: Arc<BlockRegistry>) {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        let completed = self.completed.clone();
        let finished = self.finished.clone();
        let slice_capacity = self.slice_capacity;
        self.pool.spawn(move || {
            let mesh = mesh_chunk(&input, &registry, slice_capacity);
            completed.push(MeshOutput {
                chunk: input.chunk,
                ticket: input.ticket,
                mesh,
            });
            let (lock, signal) = &*finished;
            let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            signal.notify_all();
        });
    }

    /// Pops one finished task without blocking.
    pub fn try_recv(&self) -> Option<MeshOutput> {
        let output = self.completed.pop()?;
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        Some(output)
    }

    /// Tasks submitted but not yet received.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Finished tasks waiting in the completion queue.
    pub fn completed(&self) -> usize {
        self.completed.len()
    }

    /// Blocks until every submitted task has finished. Results stay queued.
    ///
    /// Only the owning thread submits and receives, so `outstanding` is
    /// fixed while this waits.
    pub fn wait_idle(&self) {
        let (lock, signal) = &*self.finished;
        let mut guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        while self.completed() < self.outstanding() {
            guard = signal
                .wait(guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}
