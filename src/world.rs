use glam::{IVec3, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::mesh::{MeshDescriptor, MeshType};

pub const CHUNK_SIZE: i32 = 16;
pub const CHUNK_VOLUME: usize = (CHUNK_SIZE * CHUNK_SIZE * CHUNK_SIZE) as usize;

/// Stable chunk id. Ids are never reused within one table.
pub type ChunkId = u32;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Voxel(pub u16);

impl Voxel {
    pub const AIR: Voxel = Voxel(0);

    #[inline]
    pub fn is_air(self) -> bool {
        self.0 == 0
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub name: String,
    /// Texture index per face, in [`crate::mesher::Face`] order.
    pub textures: [u16; 6],
    #[serde(default)]
    pub transparent: bool,
}

impl BlockInfo {
    pub fn uniform(name: &str, texture: u16, transparent: bool) -> Self {
        Self {
            name: name.to_string(),
            textures: [texture; 6],
            transparent,
        }
    }
}

/// Read-only block-to-geometry table the mesher resolves voxels against.
///
/// Voxel `0` is always air. Ids without an entry mesh as opaque with
/// texture `0`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockRegistry {
    blocks: Vec<BlockInfo>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self {
            blocks: vec![BlockInfo::uniform("air", 0, true)],
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let blocks: Vec<BlockInfo> = serde_json::from_str(json)?;
        let mut registry = Self::new();
        for block in blocks {
            registry.register(block);
        }
        Ok(registry)
    }

    pub fn register(&mut self, info: BlockInfo) -> Voxel {
        let id = self.blocks.len() as u16;
        self.blocks.push(info);
        Voxel(id)
    }

    pub fn get(&self, voxel: Voxel) -> Option<&BlockInfo> {
        self.blocks.get(voxel.0 as usize)
    }

    pub fn is_transparent(&self, voxel: Voxel) -> bool {
        self.get(voxel).map(|b| b.transparent).unwrap_or(false)
    }

    pub fn texture(&self, voxel: Voxel, face: usize) -> u16 {
        self.get(voxel).map(|b| b.textures[face]).unwrap_or(0)
    }
}

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Advisory fill classification of a chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Density {
    Empty,
    Sparse,
    Dense,
}

#[derive(Clone, Debug)]
pub struct ChunkVoxels {
    voxels: Box<[Voxel]>,
    solid: u32,
}

impl ChunkVoxels {
    pub fn new() -> Self {
        Self {
            voxels: vec![Voxel::AIR; CHUNK_VOLUME].into_boxed_slice(),
            solid: 0,
        }
    }

    pub fn filled(voxel: Voxel) -> Self {
        let solid = if voxel.is_air() { 0 } else { CHUNK_VOLUME as u32 };
        Self {
            voxels: vec![voxel; CHUNK_VOLUME].into_boxed_slice(),
            solid,
        }
    }

    #[inline]
    fn index(local: IVec3) -> usize {
        (local.x + local.z * CHUNK_SIZE + local.y * CHUNK_SIZE * CHUNK_SIZE) as usize
    }

    #[inline]
    pub fn in_bounds(local: IVec3) -> bool {
        local.cmpge(IVec3::ZERO).all() && local.cmplt(IVec3::splat(CHUNK_SIZE)).all()
    }

    /// Out-of-bounds reads are air.
    #[inline]
    pub fn get(&self, local: IVec3) -> Voxel {
        if Self::in_bounds(local) {
            self.voxels[Self::index(local)]
        } else {
            Voxel::AIR
        }
    }

    pub fn set(&mut self, local: IVec3, voxel: Voxel) {
        debug_assert!(Self::in_bounds(local), "voxel {local} outside chunk");
        let slot = &mut self.voxels[Self::index(local)];
        match (slot.is_air(), voxel.is_air()) {
            (true, false) => self.solid += 1,
            (false, true) => self.solid -= 1,
            _ => {}
        }
        *slot = voxel;
    }

    pub fn solid_count(&self) -> u32 {
        self.solid
    }

    pub fn density(&self) -> Density {
        if self.solid == 0 {
            Density::Empty
        } else if self.solid as usize * 2 >= CHUNK_VOLUME {
            Density::Dense
        } else {
            Density::Sparse
        }
    }
}

impl Default for ChunkVoxels {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct Chunk {
    pub id: ChunkId,
    pub coord: IVec3,
    pub loaded: bool,
    /// Shared with in-flight mesh tasks; edits go through `Arc::make_mut`.
    pub voxels: Arc<ChunkVoxels>,
    pub meshes: [MeshDescriptor; 2],
    /// Ticket of the outstanding remesh task, if any.
    pub(crate) mesh_ticket: Option<u64>,
}

impl Chunk {
    fn new(id: ChunkId, coord: IVec3, voxels: ChunkVoxels) -> Self {
        Self {
            id,
            coord,
            loaded: true,
            voxels: Arc::new(voxels),
            meshes: Default::default(),
            mesh_ticket: None,
        }
    }

    pub fn mesh(&self, ty: MeshType) -> &MeshDescriptor {
        &self.meshes[ty.index()]
    }

    pub fn density(&self) -> Density {
        self.voxels.density()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.iter().all(MeshDescriptor::is_empty)
    }

    pub fn remesh_outstanding(&self) -> bool {
        self.mesh_ticket.is_some()
    }

    pub fn world_origin(&self) -> Vec3 {
        (self.coord * CHUNK_SIZE).as_vec3()
    }

    /// World-space `(min, max)` corners.
    pub fn bounds(&self) -> (Vec3, Vec3) {
        let min = self.world_origin();
        (min, min + Vec3::splat(CHUNK_SIZE as f32))
    }
}

pub fn chunk_coord_of(world: IVec3) -> IVec3 {
    world.div_euclid(IVec3::splat(CHUNK_SIZE))
}

/// Chunks the renderer knows about, keyed by id and by chunk coordinate,
/// plus the queue of chunks whose geometry is stale.
#[derive(Default)]
pub struct ChunkTable {
    chunks: HashMap<ChunkId, Chunk>,
    by_coord: HashMap<IVec3, ChunkId>,
    next_id: ChunkId,
    remesh_queue: VecDeque<ChunkId>,
    queued: HashSet<ChunkId>,
}

fn neighbor_offsets() -> impl Iterator<Item = IVec3> {
    (-1..=1).flat_map(|y| {
        (-1..=1).flat_map(move |z| (-1..=1).map(move |x| IVec3::new(x, y, z)))
    })
}

impl ChunkTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads `voxels` at `coord`, replacing the voxels of an already
    /// loaded chunk. The chunk and its loaded neighbors are queued for
    /// remeshing.
    pub fn insert(&mut self, coord: IVec3, voxels: ChunkVoxels) -> ChunkId {
        if let Some(&id) = self.by_coord.get(&coord) {
            if let Some(chunk) = self.chunks.get_mut(&id) {
                chunk.voxels = Arc::new(voxels);
            }
            self.request_remesh_around(coord);
            return id;
        }

        let id = self.next_id;
        self.next_id += 1;
        self.chunks.insert(id, Chunk::new(id, coord, voxels));
        self.by_coord.insert(coord, id);
        debug!("loaded chunk {} at {}", id, coord);
        self.request_remesh_around(coord);
        id
    }

    /// Removes the chunk from the table. Its mesh descriptors travel with
    /// the returned value so their slices can be released.
    pub fn remove(&mut self, id: ChunkId) -> Option<Chunk> {
        let mut chunk = self.chunks.remove(&id)?;
        self.by_coord.remove(&chunk.coord);
        self.queued.remove(&id);
        chunk.loaded = false;
        for offset in neighbor_offsets().filter(|o| *o != IVec3::ZERO) {
            if let Some(&n) = self.by_coord.get(&(chunk.coord + offset)) {
                self.request_remesh(n);
            }
        }
        debug!("unloaded chunk {} at {}", id, chunk.coord);
        Some(chunk)
    }

    pub fn get(&self, id: ChunkId) -> Option<&Chunk> {
        self.chunks.get(&id)
    }

    pub fn get_mut(&mut self, id: ChunkId) -> Option<&mut Chunk> {
        self.chunks.get_mut(&id)
    }

    pub fn id_at(&self, coord: IVec3) -> Option<ChunkId> {
        self.by_coord.get(&coord).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn voxel(&self, world: IVec3) -> Voxel {
        let coord = chunk_coord_of(world);
        self.id_at(coord)
            .and_then(|id| self.chunks.get(&id))
            .map(|c| c.voxels.get(world - coord * CHUNK_SIZE))
            .unwrap_or(Voxel::AIR)
    }

    /// Writes one voxel. Returns `false` when no chunk covers `world`.
    ///
    /// Every chunk whose 26-neighborhood contains the voxel is queued.
    pub fn set_voxel(&mut self, world: IVec3, voxel: Voxel) -> bool {
        let coord = chunk_coord_of(world);
        let Some(id) = self.id_at(coord) else {
            return false;
        };
        let local = world - coord * CHUNK_SIZE;
        if let Some(chunk) = self.chunks.get_mut(&id) {
            Arc::make_mut(&mut chunk.voxels).set(local, voxel);
        }

        let axis = |v: i32| -> &'static [i32] {
            if v == 0 {
                &[0, -1]
            } else if v == CHUNK_SIZE - 1 {
                &[0, 1]
            } else {
                &[0]
            }
        };
        for &dx in axis(local.x) {
            for &dy in axis(local.y) {
                for &dz in axis(local.z) {
                    if let Some(n) = self.id_at(coord + IVec3::new(dx, dy, dz)) {
                        self.request_remesh(n);
                    }
                }
            }
        }
        true
    }

    pub fn request_remesh(&mut self, id: ChunkId) {
        if self.chunks.contains_key(&id) && self.queued.insert(id) {
            self.remesh_queue.push_back(id);
        }
    }

    fn request_remesh_around(&mut self, coord: IVec3) {
        for offset in neighbor_offsets() {
            if let Some(id) = self.id_at(coord + offset) {
                self.request_remesh(id);
            }
        }
    }

    /// Next chunk needing a remesh. Unloaded chunks are skipped.
    pub fn pop_remesh(&mut self) -> Option<ChunkId> {
        while let Some(id) = self.remesh_queue.pop_front() {
            if self.queued.remove(&id) {
                return Some(id);
            }
        }
        None
    }

    pub fn remesh_pending(&self) -> usize {
        self.queued.len()
    }
}
