//! Chunk meshing backends.
//!
//! A backend turns one chunk region of a density field into leaf voxels and a
//! "free" (not yet stitched) chunk mesh. Only the CPU backends live here; the
//! parallel one is the reference, the serial one exists for comparison.

use crate::{
    construct_leaf_range,
    contour::generate_mesh_from_leaves,
    error::{MeshError, Result},
    seam::{find_seam_nodes, SeamNode},
    ChunkCode, DensityField, LeafVoxelNode, MeshBuffer, MeshGenerationContext, VoxelCode,
};
use glam::IVec3;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Leaves of one chunk keyed by [`MeshGenerationContext::code_for_position`].
pub type LeafMap = FxHashMap<VoxelCode, LeafVoxelNode>;

/// The voxel-space box a chunk covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkRegion {
    pub code: ChunkCode,
    pub min: IVec3,
    pub size: i32,
}

impl ChunkRegion {
    /// Edge length of one cell of this chunk, in finest voxels.
    #[inline]
    pub fn cell_size(&self, ctx: &MeshGenerationContext) -> i32 {
        (self.size / ctx.voxels_per_chunk).max(1)
    }

    #[inline]
    pub fn max(&self) -> IVec3 {
        self.min + IVec3::splat(self.size)
    }

    #[inline]
    pub fn contains(&self, p: IVec3) -> bool {
        p.cmpge(self.min).all() && p.cmplt(self.max()).all()
    }
}

/// Generated content of one chunk.
#[derive(Clone, Debug, Default)]
pub struct ChunkContent {
    pub mesh: MeshBuffer,
    pub seam_nodes: Vec<SeamNode>,
    /// Stitching mesh towards the chunk's positive neighbours.
    pub seam_mesh: MeshBuffer,
    pub num_leaves: usize,
}

pub trait VoxelOctree: Send + Sync {
    fn create_leaf_voxel_nodes(
        &self,
        ctx: &MeshGenerationContext,
        region: &ChunkRegion,
        field: &dyn DensityField,
    ) -> Result<LeafMap>;

    /// Builds the leaves, seam nodes and interior mesh of a chunk. Returns
    /// `None` when the surface does not cross the chunk.
    fn compute_free_chunk_octree(
        &self,
        ctx: &MeshGenerationContext,
        region: &ChunkRegion,
        field: &dyn DensityField,
    ) -> Result<Option<ChunkContent>> {
        let leaves = self.create_leaf_voxel_nodes(ctx, region, field)?;
        if leaves.is_empty() {
            return Ok(None);
        }
        Ok(Some(ChunkContent {
            mesh: generate_mesh_from_leaves(ctx, &leaves),
            seam_nodes: find_seam_nodes(ctx, region, &leaves),
            seam_mesh: MeshBuffer::default(),
            num_leaves: leaves.len(),
        }))
    }
}

/// Splits the cell range into one contiguous block per worker on a dedicated
/// rayon pool and merges the blocks once all of them finished.
pub struct ParallelVoxelOctree {
    pool: rayon::ThreadPool,
    workers: usize,
}

impl ParallelVoxelOctree {
    pub fn new(ctx: &MeshGenerationContext) -> Result<Self> {
        let workers = ctx.worker_count();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("leaf-voxels-{i}"))
            .build()?;
        log::debug!("leaf construction pool started with {workers} workers");
        Ok(Self { pool, workers })
    }

    pub fn num_workers(&self) -> usize {
        self.workers
    }
}

impl VoxelOctree for ParallelVoxelOctree {
    fn create_leaf_voxel_nodes(
        &self,
        ctx: &MeshGenerationContext,
        region: &ChunkRegion,
        field: &dyn DensityField,
    ) -> Result<LeafMap> {
        let total = ctx.cells_per_chunk();
        let blocks = self.workers.clamp(1, total);
        let block_len = (total + blocks - 1) / blocks;

        let results: Vec<Result<Vec<LeafVoxelNode>>> = self.pool.install(|| {
            (0..blocks)
                .into_par_iter()
                .map(|block| {
                    let range = block * block_len..((block + 1) * block_len).min(total);
                    catch_unwind(AssertUnwindSafe(|| {
                        construct_leaf_range(ctx, field, region, range)
                    }))
                    .map_err(|_| MeshError::WorkerFailed {
                        chunk: region.code,
                        block,
                    })
                })
                .collect()
        });

        // Nothing is merged unless every block succeeded.
        let blocks = results.into_iter().collect::<Result<Vec<_>>>()?;
        Ok(merge_blocks(blocks))
    }
}

/// Single-threaded backend with the same contract as
/// [`ParallelVoxelOctree`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SerialVoxelOctree;

impl VoxelOctree for SerialVoxelOctree {
    fn create_leaf_voxel_nodes(
        &self,
        ctx: &MeshGenerationContext,
        region: &ChunkRegion,
        field: &dyn DensityField,
    ) -> Result<LeafMap> {
        let leaves = catch_unwind(AssertUnwindSafe(|| {
            construct_leaf_range(ctx, field, region, 0..ctx.cells_per_chunk())
        }))
        .map_err(|_| MeshError::WorkerFailed {
            chunk: region.code,
            block: 0,
        })?;
        Ok(merge_blocks(vec![leaves]))
    }
}

fn merge_blocks(blocks: Vec<Vec<LeafVoxelNode>>) -> LeafMap {
    let len = blocks.iter().map(Vec::len).sum();
    let mut leaves = LeafMap::with_capacity_and_hasher(len, Default::default());
    for leaf in blocks.into_iter().flatten() {
        let previous = leaves.insert(leaf.code, leaf);
        debug_assert!(previous.is_none(), "blocks must be disjoint");
    }
    leaves
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdf_primitives::{sphere, torus};
    use glam::{Vec2, Vec3A, Vec3Swizzles};

    fn ctx(workers: usize) -> MeshGenerationContext {
        MeshGenerationContext {
            voxels_per_chunk: 16,
            world_size: 64,
            world_origin: IVec3::ZERO,
            lod_max_node_size: 64,
            worker_threads: Some(workers),
            ..Default::default()
        }
    }

    fn region() -> ChunkRegion {
        ChunkRegion {
            code: 1,
            min: IVec3::ZERO,
            size: 16,
        }
    }

    #[test]
    fn parallel_matches_serial() {
        let ball = |p: Vec3A| sphere(5.3, p - Vec3A::splat(8.0));
        let ring = |p: Vec3A| torus(Vec2::new(4.5, 1.5), p - Vec3A::splat(8.0));
        let fields: [&dyn DensityField; 2] = [&ball, &ring];
        for field in fields {
            for workers in [1, 3, 7] {
                let ctx = ctx(workers);
                let parallel = ParallelVoxelOctree::new(&ctx)
                    .unwrap()
                    .create_leaf_voxel_nodes(&ctx, &region(), field)
                    .unwrap();
                let serial = SerialVoxelOctree
                    .create_leaf_voxel_nodes(&ctx, &region(), field)
                    .unwrap();
                assert!(!serial.is_empty());
                assert_eq!(parallel, serial, "{workers} workers");
            }
        }
    }

    #[test]
    fn empty_field_produces_no_content() {
        let ctx = ctx(2);
        let air = |_: Vec3A| 1.0;
        let content = ParallelVoxelOctree::new(&ctx)
            .unwrap()
            .compute_free_chunk_octree(&ctx, &region(), &air)
            .unwrap();
        assert!(content.is_none());
    }

    #[test]
    fn worker_panic_is_reported_as_failure() {
        struct Exploding;
        impl DensityField for Exploding {
            fn density(&self, p: Vec3A) -> f32 {
                if p.x > 12.0 {
                    panic!("sampler failure");
                }
                p.y - 4.5
            }
        }
        let ctx = ctx(2);
        let err = ParallelVoxelOctree::new(&ctx)
            .unwrap()
            .create_leaf_voxel_nodes(&ctx, &region(), &Exploding)
            .unwrap_err();
        assert!(matches!(err, MeshError::WorkerFailed { chunk: 1, .. }));
    }

    #[test]
    fn sphere_chunk_content_has_mesh_and_seams() {
        let ctx = ctx(4);
        let field = |p: Vec3A| sphere(6.0, p - Vec3A::splat(8.0));
        let content = ParallelVoxelOctree::new(&ctx)
            .unwrap()
            .compute_free_chunk_octree(&ctx, &region(), &field)
            .unwrap()
            .unwrap();
        assert!(content.num_leaves > 0);
        assert!(content.mesh.num_triangles() > 0);
        assert!(content.mesh.indices_in_bounds());
        // The sphere stays inside the chunk, so no face cell crosses it.
        assert!(content.seam_nodes.is_empty());
    }

    #[test]
    fn torus_mesh_keeps_its_hole() {
        let ctx = ctx(4);
        let center = Vec3A::splat(8.0);
        let field = |p: Vec3A| torus(Vec2::new(4.5, 1.5), p - center);
        let content = ParallelVoxelOctree::new(&ctx)
            .unwrap()
            .compute_free_chunk_octree(&ctx, &region(), &field)
            .unwrap()
            .unwrap();
        assert!(content.mesh.num_triangles() > 0);
        assert!(content.seam_nodes.is_empty());
        for v in &content.mesh.vertices {
            let radial = (Vec3A::from(v.position) - center).xz().length();
            assert!((2.0..7.5).contains(&radial), "{v:?}");
        }
    }
}
