use crate::{
    corner_is_solid,
    tables::{QUAD_EDGE_CORNERS, QUAD_NEIGHBOUR_AXES, QUAD_WINDING, QUAD_WINDING_FLIPPED},
    LeafMap, MeshBuffer, MeshGenerationContext, MeshVertex, MeshVertexId, VoxelCode,
};
use glam::{IVec3, Vec3};
use rustc_hash::FxHashMap;

/// Dual contours the interior of one chunk.
///
/// Every leaf owns one vertex. For each axis, the leaf and its three
/// neighbours around the edge parallel to that axis form a quad when the
/// edge changes sign. Quads needing a cell outside the chunk are left to the
/// seam stitcher.
pub fn generate_mesh_from_leaves(ctx: &MeshGenerationContext, leaves: &LeafMap) -> MeshBuffer {
    // Deterministic vertex order regardless of how the map was filled.
    let mut codes: Vec<VoxelCode> = leaves.keys().copied().collect();
    codes.sort_unstable();

    let mut vertex_ids: FxHashMap<VoxelCode, MeshVertexId> =
        FxHashMap::with_capacity_and_hasher(codes.len(), Default::default());
    let mut mesh = MeshBuffer::with_capacity(codes.len(), 0);
    for &code in &codes {
        let leaf = &leaves[&code];
        vertex_ids.insert(code, mesh.vertices.len() as MeshVertexId);
        mesh.vertices.push(MeshVertex {
            position: Vec3::from(ctx.voxel_to_world(leaf.vertex)),
            normal: Vec3::from(leaf.normal),
            material: leaf.material,
        });
    }

    // One slot of 6 indices per leaf and axis, compacted afterwards.
    let mut slots = vec![0 as MeshVertexId; codes.len() * 3 * 6];
    let mut valid = vec![false; codes.len() * 3];
    let n = ctx.voxels_per_chunk;
    for (i, &code) in codes.iter().enumerate() {
        let leaf = &leaves[&code];
        for axis in 0..3 {
            let [b, c] = QUAD_NEIGHBOUR_AXES[axis].map(IVec3::from_array);
            let cells = [leaf.local, leaf.local + b, leaf.local + c, leaf.local + b + c];
            if cells.iter().any(|p| p.cmpge(IVec3::splat(n)).any()) {
                continue;
            }
            let Some(ids) = quad_vertex_ids(ctx, &vertex_ids, cells) else { continue };

            let [lo, hi] = QUAD_EDGE_CORNERS[axis];
            let lo_solid = corner_is_solid(leaf.corners, lo);
            if lo_solid == corner_is_solid(leaf.corners, hi) {
                continue;
            }
            let winding = if lo_solid {
                QUAD_WINDING
            } else {
                QUAD_WINDING_FLIPPED
            };

            let slot = i * 3 + axis;
            for (dst, &w) in slots[slot * 6..slot * 6 + 6].iter_mut().zip(&winding) {
                *dst = ids[w];
            }
            valid[slot] = true;
        }
    }

    mesh.indices = slots
        .chunks_exact(6)
        .zip(&valid)
        .filter(|(_, &valid)| valid)
        .flat_map(|(slot, _)| slot.iter().copied())
        .collect();
    mesh
}

fn quad_vertex_ids(
    ctx: &MeshGenerationContext,
    vertex_ids: &FxHashMap<VoxelCode, MeshVertexId>,
    cells: [IVec3; 4],
) -> Option<[MeshVertexId; 4]> {
    let mut ids = [0; 4];
    for (id, cell) in ids.iter_mut().zip(cells) {
        *id = *vertex_ids.get(&ctx.code_for_position(cell))?;
    }
    Some(ids)
}
