use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::world::ChunkId;

/// Global slice id: `block_index * slices_per_block + local_index`.
pub type SliceId = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MeshType {
    Opaque = 0,
    Transparent = 1,
}

impl MeshType {
    /// Draw order: opaque first.
    pub const ALL: [MeshType; 2] = [MeshType::Opaque, MeshType::Transparent];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ChunkVertex {
    /// Chunk-local position. The chunk offset arrives as a per-draw push.
    pub position: [f32; 3],
    /// `texture` in bits 0..16, face in 16..19, occlusion in 19..21.
    pub packed: u32,
}

impl ChunkVertex {
    pub fn new(position: Vec3, texture: u16, face: u8, occlusion: u8) -> Self {
        Self {
            position: position.to_array(),
            packed: texture as u32 | ((face as u32 & 0x7) << 16) | ((occlusion as u32 & 0x3) << 19),
        }
    }

    #[inline]
    pub fn texture(&self) -> u16 {
        (self.packed & 0xFFFF) as u16
    }

    #[inline]
    pub fn face(&self) -> u8 {
        ((self.packed >> 16) & 0x7) as u8
    }

    #[inline]
    pub fn occlusion(&self) -> u8 {
        ((self.packed >> 19) & 0x3) as u8
    }
}

/// Where one chunk's vertices of one [`MeshType`] live on the device.
///
/// Every slice is full except possibly the last; only `vertex_count`
/// vertices are ever drawn.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MeshDescriptor {
    pub vertex_count: u32,
    pub slices: Vec<SliceId>,
}

impl MeshDescriptor {
    pub fn is_empty(&self) -> bool {
        self.vertex_count == 0
    }

    /// Vertices held by the `index`-th slice of the chain.
    pub fn slice_vertex_count(&self, index: usize, slice_capacity: u32) -> u32 {
        let start = index as u32 * slice_capacity;
        self.vertex_count.saturating_sub(start).min(slice_capacity)
    }

    /// `(slice id, vertices in that slice)` along the chain.
    pub fn slice_counts(&self, slice_capacity: u32) -> impl Iterator<Item = (SliceId, u32)> + '_ {
        self.slices
            .iter()
            .enumerate()
            .map(move |(i, id)| (*id, self.slice_vertex_count(i, slice_capacity)))
    }
}

/// CPU-side vertex stream produced by the mesher, already cut into slices.
#[derive(Clone, Debug, Default)]
pub struct SlicedMesh {
    pub vertex_count: u32,
    pub slices: Vec<Vec<ChunkVertex>>,
}

impl SlicedMesh {
    pub fn is_empty(&self) -> bool {
        self.vertex_count == 0
    }
}

/// Freshly meshed slice waiting to be copied into its allocation block.
#[derive(Debug)]
pub struct UploadSlice {
    pub slice: SliceId,
    pub chunk: ChunkId,
    pub data: Vec<ChunkVertex>,
}

impl UploadSlice {
    pub fn vertex_count(&self) -> u32 {
        self.data.len() as u32
    }

    pub fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_is_sixteen_bytes() {
        assert_eq!(std::mem::size_of::<ChunkVertex>(), 16);
    }

    #[test]
    fn packed_fields_round_trip() {
        let v = ChunkVertex::new(Vec3::new(1.0, 2.0, 3.0), 513, 5, 3);
        assert_eq!(v.texture(), 513);
        assert_eq!(v.face(), 5);
        assert_eq!(v.occlusion(), 3);
        assert_eq!(v.position, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn last_slice_holds_the_remainder() {
        let desc = MeshDescriptor {
            vertex_count: 10_000,
            slices: vec![7, 8, 9],
        };
        let counts: Vec<_> = desc.slice_counts(4096).collect();
        assert_eq!(counts, vec![(7, 4096), (8, 4096), (9, 1808)]);
    }
}
