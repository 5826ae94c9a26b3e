pub mod pool;

use glam::{IVec3, Vec3};
use std::sync::Arc;

use crate::error::{Result, StreamError};
use crate::mesh::{ChunkVertex, MeshType, SlicedMesh};
use crate::world::{
    BlockRegistry, ChunkId, ChunkTable, ChunkVoxels, Density, Voxel, CHUNK_SIZE,
};

pub use pool::{MeshOutput, MeshWorkerPool};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Face {
    PosX = 0,
    NegX = 1,
    PosY = 2,
    NegY = 3,
    PosZ = 4,
    NegZ = 5,
}

impl Face {
    pub const ALL: [Face; 6] = [
        Face::PosX,
        Face::NegX,
        Face::PosY,
        Face::NegY,
        Face::PosZ,
        Face::NegZ,
    ];

    pub fn normal(self) -> IVec3 {
        match self {
            Face::PosX => IVec3::X,
            Face::NegX => IVec3::NEG_X,
            Face::PosY => IVec3::Y,
            Face::NegY => IVec3::NEG_Y,
            Face::PosZ => IVec3::Z,
            Face::NegZ => IVec3::NEG_Z,
        }
    }

    /// Tangents with `u x v == normal`, so corners walk counter-clockwise
    /// seen from outside.
    fn tangents(self) -> (IVec3, IVec3) {
        match self {
            Face::PosX => (IVec3::Y, IVec3::Z),
            Face::NegX => (IVec3::Z, IVec3::Y),
            Face::PosY => (IVec3::Z, IVec3::X),
            Face::NegY => (IVec3::X, IVec3::Z),
            Face::PosZ => (IVec3::X, IVec3::Y),
            Face::NegZ => (IVec3::Y, IVec3::X),
        }
    }

    fn is_positive(self) -> bool {
        matches!(self, Face::PosX | Face::PosY | Face::PosZ)
    }
}

/// Immutable snapshot of one chunk and its 26 neighbors.
///
/// Voxel arrays are shared with the chunk table; edits made after capture
/// copy on write and never reach the snapshot.
#[derive(Clone, Debug)]
pub struct MeshInput {
    pub chunk: ChunkId,
    pub ticket: u64,
    pub coord: IVec3,
    neighborhood: [Option<Arc<ChunkVoxels>>; 27],
}

impl MeshInput {
    const CENTER: usize = 13;

    #[inline]
    fn slot(offset: IVec3) -> usize {
        ((offset.x + 1) + (offset.z + 1) * 3 + (offset.y + 1) * 9) as usize
    }

    pub fn capture(world: &ChunkTable, chunk: ChunkId, ticket: u64) -> Option<Self> {
        let center = world.get(chunk)?;
        let coord = center.coord;
        let mut neighborhood: [Option<Arc<ChunkVoxels>>; 27] = Default::default();
        for y in -1..=1 {
            for z in -1..=1 {
                for x in -1..=1 {
                    let offset = IVec3::new(x, y, z);
                    neighborhood[Self::slot(offset)] = world
                        .id_at(coord + offset)
                        .and_then(|id| world.get(id))
                        .map(|c| c.voxels.clone());
                }
            }
        }
        Some(Self {
            chunk,
            ticket,
            coord,
            neighborhood,
        })
    }

    /// Builds a snapshot from loose voxel data, center only.
    pub fn isolated(chunk: ChunkId, coord: IVec3, voxels: ChunkVoxels) -> Self {
        let mut neighborhood: [Option<Arc<ChunkVoxels>>; 27] = Default::default();
        neighborhood[Self::CENTER] = Some(Arc::new(voxels));
        Self {
            chunk,
            ticket: 0,
            coord,
            neighborhood,
        }
    }

    pub fn with_neighbor(mut self, offset: IVec3, voxels: ChunkVoxels) -> Self {
        debug_assert!(offset.abs().max_element() <= 1 && offset != IVec3::ZERO);
        self.neighborhood[Self::slot(offset)] = Some(Arc::new(voxels));
        self
    }

    /// Samples a voxel in chunk-local coordinates, `-1..=CHUNK_SIZE` per axis.
    /// Missing neighbors read as air.
    #[inline]
    pub fn sample(&self, local: IVec3) -> Voxel {
        let size = IVec3::splat(CHUNK_SIZE);
        let offset = local.div_euclid(size);
        if offset.abs().max_element() > 1 {
            return Voxel::AIR;
        }
        match &self.neighborhood[Self::slot(offset)] {
            Some(voxels) => voxels.get(local.rem_euclid(size)),
            None => Voxel::AIR,
        }
    }

    fn center_density(&self) -> Density {
        self.neighborhood[Self::CENTER]
            .as_ref()
            .map(|v| v.density())
            .unwrap_or(Density::Empty)
    }
}

/// Both vertex streams of one chunk, indexed by [`MeshType`].
#[derive(Clone, Debug, Default)]
pub struct ChunkMesh {
    pub streams: [SlicedMesh; 2],
}

impl ChunkMesh {
    pub fn stream(&self, ty: MeshType) -> &SlicedMesh {
        &self.streams[ty.index()]
    }

    pub fn is_empty(&self) -> bool {
        self.streams.iter().all(SlicedMesh::is_empty)
    }
}

struct SliceWriter {
    capacity: usize,
    mesh: SlicedMesh,
}

impl SliceWriter {
    fn new(capacity: u32) -> Self {
        Self {
            capacity: capacity as usize,
            mesh: SlicedMesh::default(),
        }
    }

    fn push(&mut self, vertex: ChunkVertex) -> Result<()> {
        let needs_slice = self
            .mesh
            .slices
            .last()
            .map(|s| s.len() == self.capacity)
            .unwrap_or(true);
        if needs_slice {
            let mut slice = Vec::new();
            slice.try_reserve_exact(self.capacity).map_err(|_| {
                StreamError::HostOutOfMemory {
                    bytes: self.capacity * std::mem::size_of::<ChunkVertex>(),
                }
            })?;
            self.mesh.slices.push(slice);
        }
        if let Some(slice) = self.mesh.slices.last_mut() {
            slice.push(vertex);
        }
        self.mesh.vertex_count += 1;
        Ok(())
    }

    fn finish(self) -> SlicedMesh {
        self.mesh
    }
}

fn occludes(registry: &BlockRegistry, voxel: Voxel) -> bool {
    !voxel.is_air() && !registry.is_transparent(voxel)
}

fn face_visible(registry: &BlockRegistry, voxel: Voxel, neighbor: Voxel) -> bool {
    neighbor.is_air() || (registry.is_transparent(neighbor) && neighbor != voxel)
}

/// 3 is fully lit, 0 is a corner boxed in on both sides.
fn corner_occlusion(side_a: bool, side_b: bool, corner: bool) -> u8 {
    if side_a && side_b {
        0
    } else {
        3 - (side_a as u8 + side_b as u8 + corner as u8)
    }
}

fn emit_face(
    out: &mut SliceWriter,
    input: &MeshInput,
    registry: &BlockRegistry,
    pos: IVec3,
    voxel: Voxel,
    face: Face,
) -> Result<()> {
    let normal = face.normal();
    let (u, v) = face.tangents();
    let origin = if face.is_positive() { pos + normal } else { pos };
    let texture = registry.texture(voxel, face as usize);
    let front = pos + normal;

    let corners = [(0, 0), (1, 0), (1, 1), (0, 1)];
    let mut occlusion = [3u8; 4];
    for (i, (a, b)) in corners.iter().enumerate() {
        let su = if *a == 1 { u } else { -u };
        let sv = if *b == 1 { v } else { -v };
        occlusion[i] = corner_occlusion(
            occludes(registry, input.sample(front + su)),
            occludes(registry, input.sample(front + sv)),
            occludes(registry, input.sample(front + su + sv)),
        );
    }

    // Split along the brighter diagonal to keep occlusion gradients smooth.
    let order: [usize; 6] =
        if occlusion[0] as u32 + occlusion[2] as u32 >= occlusion[1] as u32 + occlusion[3] as u32 {
            [0, 1, 2, 0, 2, 3]
        } else {
            [1, 2, 3, 1, 3, 0]
        };
    for i in order {
        let (a, b) = corners[i];
        let p = origin + u * a + v * b;
        out.push(ChunkVertex::new(
            Vec3::new(p.x as f32, p.y as f32, p.z as f32),
            texture,
            face as u8,
            occlusion[i],
        ))?;
    }
    Ok(())
}

/// Converts a chunk snapshot into opaque and transparent vertex streams,
/// cut into slices of `slice_capacity` vertices.
///
/// Pure apart from its own output. An empty chunk yields an empty mesh.
pub fn mesh_chunk(
    input: &MeshInput,
    registry: &BlockRegistry,
    slice_capacity: u32,
) -> Result<ChunkMesh> {
    let mut opaque = SliceWriter::new(slice_capacity);
    let mut transparent = SliceWriter::new(slice_capacity);

    if input.center_density() == Density::Empty {
        return Ok(ChunkMesh::default());
    }

    for y in 0..CHUNK_SIZE {
        for z in 0..CHUNK_SIZE {
            for x in 0..CHUNK_SIZE {
                let pos = IVec3::new(x, y, z);
                let voxel = input.sample(pos);
                if voxel.is_air() {
                    continue;
                }
                let out = if registry.is_transparent(voxel) {
                    &mut transparent
                } else {
                    &mut opaque
                };
                for face in Face::ALL {
                    let neighbor = input.sample(pos + face.normal());
                    if face_visible(registry, voxel, neighbor) {
                        emit_face(out, input, registry, pos, voxel, face)?;
                    }
                }
            }
        }
    }

    Ok(ChunkMesh {
        streams: [opaque.finish(), transparent.finish()],
    })
}
