use crate::{
    cell_is_bipolar, central_gradient, corner_is_solid, corner_mask, find_edge_crossing,
    qef::QefData, ChunkRegion, DensityField, MaterialId, MeshGenerationContext, VoxelCode,
};
use glam::{IVec3, Vec3A};
use ilattice::prelude::Extent;
use std::ops::Range;

/// A surface-crossing cell of a chunk with its solved vertex.
#[derive(Clone, Debug, PartialEq)]
pub struct LeafVoxelNode {
    /// [`MeshGenerationContext::code_for_position`] of `local`.
    pub code: VoxelCode,
    /// Cell coordinate inside the chunk.
    pub local: IVec3,
    /// Minimum corner in voxel space.
    pub min: IVec3,
    pub size: i32,
    pub corners: u8,
    /// Solved vertex in voxel space.
    pub vertex: Vec3A,
    pub normal: Vec3A,
    pub material: MaterialId,
    pub qef_error: f32,
    /// Lies on one of the chunk's faces.
    pub is_seam: bool,
}

/// Samples one cell and, if the surface crosses it, solves its vertex.
pub fn construct_leaf(
    ctx: &MeshGenerationContext,
    field: &dyn DensityField,
    region: &ChunkRegion,
    local: IVec3,
) -> Option<LeafVoxelNode> {
    let size = region.cell_size(ctx);
    let min = region.min + local * size;
    let sdf = |p: Vec3A| field.density(ctx.voxel_to_world(p));

    let extent = Extent::<Vec3A>::from_min_and_shape(min.as_vec3a(), Vec3A::splat(size as f32));
    let corner_positions = extent.corners3();
    let samples = corner_positions.map(&sdf);
    let corners = corner_mask(&samples);
    if !cell_is_bipolar(corners) {
        return None;
    }

    let gradient_step = ctx.gradient_step * size as f32;
    let mut qef = QefData::new();
    let mut normal_sum = Vec3A::ZERO;
    for [e1, e2] in Extent::<Vec3A>::EDGES3 {
        if corner_is_solid(corners, e1) == corner_is_solid(corners, e2) {
            continue;
        }
        let p = find_edge_crossing(
            &sdf,
            corner_positions[e1],
            samples[e1],
            corner_positions[e2],
            samples[e2],
            ctx.edge_search_steps,
        );
        let n = central_gradient(&sdf, p, gradient_step).normalize_or_zero();
        qef.add(p, n);
        normal_sum += n;
    }

    let (mut vertex, qef_error) = qef.solve();
    // The mass point always lies inside the cell; a solve that lands more than
    // a cell away from it is noise.
    let max_drift = Vec3A::splat(size as f32);
    if (vertex - extent.minimum).cmplt(-max_drift).any()
        || (vertex - (extent.minimum + extent.shape)).cmpgt(max_drift).any()
    {
        vertex = qef.mass_point();
    }

    let n = ctx.voxels_per_chunk;
    Some(LeafVoxelNode {
        code: ctx.code_for_position(local),
        local,
        min,
        size,
        corners,
        vertex,
        normal: normal_sum.normalize_or_zero(),
        material: dominant_material(ctx, field, &corner_positions, corners),
        qef_error,
        is_seam: local.cmpeq(IVec3::ZERO).any() || local.cmpeq(IVec3::splat(n - 1)).any(),
    })
}

/// Constructs the leaves for a contiguous range of cell codes.
pub fn construct_leaf_range(
    ctx: &MeshGenerationContext,
    field: &dyn DensityField,
    region: &ChunkRegion,
    codes: Range<usize>,
) -> Vec<LeafVoxelNode> {
    codes
        .filter_map(|code| {
            let local = ctx.position_for_code(code as VoxelCode);
            construct_leaf(ctx, field, region, local)
        })
        .collect()
}

/// Most common material among the solid corners; ties go to the lowest
/// corner index.
fn dominant_material(
    ctx: &MeshGenerationContext,
    field: &dyn DensityField,
    corner_positions: &[Vec3A; 8],
    corners: u8,
) -> MaterialId {
    let mut counts: [(MaterialId, u8); 8] = [(ctx.air_material, 0); 8];
    let mut num_distinct = 0;
    for (i, &p) in corner_positions.iter().enumerate() {
        if !corner_is_solid(corners, i) {
            continue;
        }
        let material = field
            .material(ctx.voxel_to_world(p))
            .unwrap_or(ctx.default_solid_material);
        match counts[..num_distinct].iter_mut().find(|(m, _)| *m == material) {
            Some((_, count)) => *count += 1,
            None => {
                counts[num_distinct] = (material, 1);
                num_distinct += 1;
            }
        }
    }
    let mut best = (ctx.default_solid_material, 0);
    for &(material, count) in &counts[..num_distinct] {
        if count > best.1 {
            best = (material, count);
        }
    }
    best.0
}
