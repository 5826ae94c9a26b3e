//! Streaming chunk mesh engine for the meshi voxel renderer.
//!
//! Chunks are meshed on a worker pool, their vertices packed into
//! fixed-size slices inside large device buffers, and drawn per buffer
//! after frustum culling. [`ChunkStreamer`] owns the whole path and is
//! driven once per frame through [`ChunkStreamer::upload_remeshed`] and
//! [`ChunkStreamer::draw`].

pub mod alloc;
pub mod batch;
pub mod config;
pub mod cull;
pub mod device;
pub mod error;
pub mod frame;
pub mod mesh;
pub mod mesher;
pub mod staging;
pub mod streamer;
pub mod world;

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

pub use batch::{DrawBatcher, DrawEntry, DrawStats};
pub use config::StreamConfig;
pub use cull::{Aabb, Frustum, View};
pub use device::{GpuDevice, HeadlessDevice};
pub use error::{Result, StreamError};
pub use mesh::{ChunkVertex, MeshDescriptor, MeshType, SliceId};
pub use mesher::{mesh_chunk, ChunkMesh, MeshInput};
pub use streamer::{ChunkStreamer, UploadStats};
pub use world::{BlockInfo, BlockRegistry, ChunkId, ChunkTable, ChunkVoxels, Voxel};

/// Installs a stdout subscriber capped at `level`.
///
/// Returns `false` when a global subscriber is already set, so hosts and
/// tests may call it more than once.
pub fn init_tracing(level: Level) -> bool {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .finish();

    tracing::subscriber::set_global_default(subscriber).is_ok()
}
