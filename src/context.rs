//! Immutable meshing configuration and the Morton addressing shared by every
//! stage.
//!
//! Corner and octant indices use the same bit layout everywhere in the crate:
//! bit 0 is the X offset, bit 1 is Y and bit 2 is Z.

use crate::{
    error::{MeshError, Result},
    simplify::SimplifyOptions,
    ChunkCode, MaterialId,
};
use glam::{IVec3, Vec3A};

/// Morton code of a voxel inside one chunk.
pub type VoxelCode = u32;

/// Configuration passed explicitly to every meshing entry point.
#[derive(Clone, Debug)]
pub struct MeshGenerationContext {
    /// Cells along each axis of a chunk. Must be a power of two.
    pub voxels_per_chunk: i32,
    /// World units covered by one voxel of the finest level of detail.
    pub leaf_size_scale: f32,
    /// Edge length of the chunk octree root, in finest voxels.
    pub world_size: i32,
    /// Minimum corner of the chunk octree root, in finest voxels.
    pub world_origin: IVec3,
    /// Chunk nodes larger than this are never meshed or edited directly.
    pub lod_max_node_size: i32,
    pub air_material: MaterialId,
    pub default_solid_material: MaterialId,
    /// Leaf construction workers. `None` uses half of the logical CPUs.
    pub worker_threads: Option<usize>,
    /// Bisection steps used to locate an edge crossing.
    pub edge_search_steps: u32,
    /// Central difference step, relative to the cell size.
    pub gradient_step: f32,
    /// Post-process simplification. `None` disables it.
    pub simplify: Option<SimplifyOptions>,
}

impl Default for MeshGenerationContext {
    fn default() -> Self {
        Self {
            voxels_per_chunk: 64,
            leaf_size_scale: 1.0,
            world_size: 1024,
            world_origin: IVec3::splat(-512),
            lod_max_node_size: 512,
            air_material: 0,
            default_solid_material: 1,
            worker_threads: None,
            edge_search_steps: 8,
            gradient_step: 0.05,
            simplify: None,
        }
    }
}

/// Deepest chunk octree `validate` accepts. Every node down to the minimum
/// chunk size is allocated up front, about `8^depth` of them.
pub const MAX_CHUNK_OCTREE_DEPTH: u32 = 6;

/// Extra voxels added around a brush when looking for touched chunks.
pub const CSG_BOUNDS_FUDGE: f32 = 2.0;

impl MeshGenerationContext {
    pub fn validate(&self) -> Result<()> {
        if !is_power_of_two(self.voxels_per_chunk) || !(2..=1024).contains(&self.voxels_per_chunk)
        {
            return Err(MeshError::invalid_config(format!(
                "voxels_per_chunk must be a power of two in 2..=1024, got {}",
                self.voxels_per_chunk
            )));
        }
        if !(self.leaf_size_scale > 0.0) {
            return Err(MeshError::invalid_config("leaf_size_scale must be positive"));
        }
        if !is_power_of_two(self.world_size) || self.world_size < self.min_chunk_size() {
            return Err(MeshError::invalid_config(format!(
                "world_size must be a power of two no smaller than {}, got {}",
                self.min_chunk_size(),
                self.world_size
            )));
        }
        let depth = (self.world_size / self.min_chunk_size()).trailing_zeros();
        if depth > MAX_CHUNK_OCTREE_DEPTH {
            return Err(MeshError::invalid_config(format!(
                "world octree depth {depth} exceeds {MAX_CHUNK_OCTREE_DEPTH}"
            )));
        }
        if !is_power_of_two(self.lod_max_node_size)
            || self.lod_max_node_size < self.min_chunk_size()
            || self.lod_max_node_size > self.world_size
        {
            return Err(MeshError::invalid_config(format!(
                "lod_max_node_size must be a power of two in {}..={}, got {}",
                self.min_chunk_size(),
                self.world_size,
                self.lod_max_node_size
            )));
        }
        if self.edge_search_steps == 0 {
            return Err(MeshError::invalid_config("edge_search_steps must be nonzero"));
        }
        if self.worker_threads == Some(0) {
            return Err(MeshError::invalid_config("worker_threads must be nonzero"));
        }
        Ok(())
    }

    /// `log2(voxels_per_chunk)`: bits per axis in a [`VoxelCode`].
    #[inline]
    pub fn index_bits(&self) -> u32 {
        self.voxels_per_chunk.trailing_zeros()
    }

    #[inline]
    pub fn cells_per_chunk(&self) -> usize {
        let n = self.voxels_per_chunk as usize;
        n * n * n
    }

    /// Edge length of the finest chunks, in voxels.
    #[inline]
    pub fn min_chunk_size(&self) -> i32 {
        self.voxels_per_chunk
    }

    pub fn worker_count(&self) -> usize {
        self.worker_threads
            .unwrap_or_else(|| (num_cpus::get() / 2).max(1))
    }

    #[inline]
    pub fn code_for_position(&self, p: IVec3) -> VoxelCode {
        debug_assert!(
            p.cmpge(IVec3::ZERO).all() && p.cmplt(IVec3::splat(self.voxels_per_chunk)).all()
        );
        interleave3(p.x as u32, p.y as u32, p.z as u32, self.index_bits()) as VoxelCode
    }

    #[inline]
    pub fn position_for_code(&self, code: VoxelCode) -> IVec3 {
        let [x, y, z] = deinterleave3(code as u64, self.index_bits());
        IVec3::new(x as i32, y as i32, z as i32)
    }

    /// Octree path code of the aligned node `(min, size)` below the world
    /// root. Chunk codes and seam node codes share this addressing.
    pub fn node_code(&self, min: IVec3, size: i32) -> ChunkCode {
        debug_assert!(is_power_of_two(size) && size <= self.world_size);
        let depth = (self.world_size / size).trailing_zeros();
        let rel = (min - self.world_origin) / size;
        (1 << (3 * depth)) | interleave3(rel.x as u32, rel.y as u32, rel.z as u32, depth)
    }

    /// Inverse of [`Self::node_code`].
    pub fn node_for_code(&self, code: ChunkCode) -> (IVec3, i32) {
        let depth = (63 - code.leading_zeros()) / 3;
        let size = self.world_size >> depth;
        let [x, y, z] = deinterleave3(code & !(1 << (3 * depth)), depth);
        let min = self.world_origin + IVec3::new(x as i32, y as i32, z as i32) * size;
        (min, size)
    }

    /// World-space position of a point given in voxel coordinates.
    #[inline]
    pub fn voxel_to_world(&self, p: Vec3A) -> Vec3A {
        p * self.leaf_size_scale
    }

    #[inline]
    pub fn world_to_voxel(&self, p: Vec3A) -> Vec3A {
        p / self.leaf_size_scale
    }

    /// Shift from voxel space into CSG space, where the world root starts at
    /// zero and every coordinate inside the world is non-negative.
    #[inline]
    pub fn csg_offset(&self) -> Vec3A {
        -self.world_origin.as_vec3a()
    }
}

#[inline]
pub(crate) fn is_power_of_two(v: i32) -> bool {
    v > 0 && (v & (v - 1)) == 0
}

/// Spreads the low `bits` bits of each coordinate so that bit `i` of x lands on
/// bit `3i`, y on `3i + 1` and z on `3i + 2`.
pub(crate) fn interleave3(x: u32, y: u32, z: u32, bits: u32) -> u64 {
    let mut code = 0u64;
    for i in 0..bits {
        code |= (((x >> i) & 1) as u64) << (3 * i);
        code |= (((y >> i) & 1) as u64) << (3 * i + 1);
        code |= (((z >> i) & 1) as u64) << (3 * i + 2);
    }
    code
}

pub(crate) fn deinterleave3(code: u64, bits: u32) -> [u32; 3] {
    let mut out = [0u32; 3];
    for i in 0..bits {
        for (axis, v) in out.iter_mut().enumerate() {
            *v |= (((code >> (3 * i + axis as u32)) & 1) as u32) << i;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_context() -> MeshGenerationContext {
        MeshGenerationContext {
            voxels_per_chunk: 8,
            world_size: 64,
            world_origin: IVec3::splat(-32),
            lod_max_node_size: 32,
            ..Default::default()
        }
    }

    #[test]
    fn position_code_round_trip() {
        let ctx = small_context();
        let n = ctx.voxels_per_chunk;
        let mut seen = rustc_hash::FxHashSet::default();
        for z in 0..n {
            for y in 0..n {
                for x in 0..n {
                    let p = IVec3::new(x, y, z);
                    let code = ctx.code_for_position(p);
                    assert_eq!(ctx.position_for_code(code), p);
                    assert!(seen.insert(code), "duplicate code {code} for {p}");
                }
            }
        }
        assert_eq!(seen.len(), ctx.cells_per_chunk());
    }

    #[test]
    fn default_context_round_trip_covers_corners() {
        let ctx = MeshGenerationContext::default();
        let max = ctx.voxels_per_chunk - 1;
        for p in [
            IVec3::ZERO,
            IVec3::new(max, 0, 0),
            IVec3::new(0, max, 0),
            IVec3::new(0, 0, max),
            IVec3::splat(max),
            IVec3::new(17, 42, 63),
        ] {
            assert_eq!(ctx.position_for_code(ctx.code_for_position(p)), p);
        }
    }

    #[test]
    fn code_bit_layout_is_x_then_y_then_z() {
        let ctx = small_context();
        assert_eq!(ctx.code_for_position(IVec3::X), 0b001);
        assert_eq!(ctx.code_for_position(IVec3::Y), 0b010);
        assert_eq!(ctx.code_for_position(IVec3::Z), 0b100);
        assert_eq!(ctx.code_for_position(IVec3::new(2, 0, 0)), 0b001_000);
    }

    #[test]
    fn node_codes_match_parent_child_derivation() {
        let ctx = small_context();
        assert_eq!(ctx.node_code(ctx.world_origin, ctx.world_size), 1);

        let half = ctx.world_size / 2;
        for child in 0..8u64 {
            let offset = IVec3::new(
                (child & 1) as i32,
                ((child >> 1) & 1) as i32,
                ((child >> 2) & 1) as i32,
            ) * half;
            let code = ctx.node_code(ctx.world_origin + offset, half);
            assert_eq!(code, (1 << 3) | child);
            assert_eq!(ctx.node_for_code(code), (ctx.world_origin + offset, half));
        }

        let leaf_min = IVec3::new(8, -16, 24);
        let code = ctx.node_code(leaf_min, 8);
        assert_eq!(ctx.node_for_code(code), (leaf_min, 8));
        assert_eq!(
            ctx.node_code(IVec3::new(0, -16, 16), 16),
            code >> 3,
            "dropping the last octant gives the parent"
        );
    }

    #[test]
    fn validate_rejects_bad_sizes() {
        let mut ctx = small_context();
        assert!(ctx.validate().is_ok());

        ctx.voxels_per_chunk = 12;
        assert!(ctx.validate().is_err());

        let mut ctx = small_context();
        ctx.lod_max_node_size = 4;
        assert!(ctx.validate().is_err());

        let mut ctx = small_context();
        ctx.worker_threads = Some(0);
        assert!(ctx.validate().is_err());
    }

    #[test]
    fn validate_caps_the_chunk_octree_depth() {
        let deepest = MeshGenerationContext {
            voxels_per_chunk: 8,
            world_size: 8 << MAX_CHUNK_OCTREE_DEPTH,
            world_origin: IVec3::ZERO,
            lod_max_node_size: 64,
            ..Default::default()
        };
        assert!(deepest.validate().is_ok());

        let too_deep = MeshGenerationContext {
            world_size: 65536,
            ..deepest.clone()
        };
        assert!(too_deep.validate().is_err());
    }

    #[test]
    fn default_worker_count_is_at_least_one() {
        assert!(MeshGenerationContext::default().worker_count() >= 1);
        let ctx = MeshGenerationContext {
            worker_threads: Some(3),
            ..Default::default()
        };
        assert_eq!(ctx.worker_count(), 3);
    }
}
