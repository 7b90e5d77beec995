//! Stitching between neighbouring chunks, possibly at different levels of
//! detail.
//!
//! Each chunk's interior mesh stops one cell short of its positive faces. The
//! seam mesh of a chunk fills that gap using the seam nodes of the chunk and of
//! its positive neighbours, contoured on a [`SeamOctree`].

use crate::{
    chunk::ChunkOctree,
    seam_octree::{SeamLeaf, SeamNodeId, SeamOctree},
    ChunkCode, ChunkRegion, LeafMap, MaterialId, MeshBuffer, MeshGenerationContext, MeshVertex,
    MeshVertexId, NULL_MESH_VERTEX_ID,
};
use glam::{IVec3, Vec3, Vec3A};
use ilattice::prelude::Extent;
use rustc_hash::FxHashSet;

/// A leaf on a chunk face, kept after the chunk's leaves are dropped.
#[derive(Clone, Debug, PartialEq)]
pub struct SeamNode {
    /// World octree code of `(min, size)`.
    pub code: ChunkCode,
    pub min: IVec3,
    pub size: i32,
    pub corners: u8,
    /// Voxel space.
    pub vertex: Vec3A,
    pub normal: Vec3A,
    pub material: MaterialId,
    /// Chunk the node belongs to.
    pub chunk: ChunkCode,
    /// Synthesized on behalf of a coarser neighbour.
    pub is_border: bool,
}

impl SeamNode {
    #[inline]
    pub fn max(&self) -> IVec3 {
        self.min + IVec3::splat(self.size)
    }

    #[inline]
    pub fn contains(&self, p: IVec3) -> bool {
        p.cmpge(self.min).all() && p.cmplt(self.max()).all()
    }
}

/// Seam nodes of a chunk, sorted by code.
pub fn find_seam_nodes(
    ctx: &MeshGenerationContext,
    region: &ChunkRegion,
    leaves: &LeafMap,
) -> Vec<SeamNode> {
    let mut nodes: Vec<SeamNode> = leaves
        .values()
        .filter(|leaf| leaf.is_seam)
        .map(|leaf| SeamNode {
            code: ctx.node_code(leaf.min, leaf.size),
            min: leaf.min,
            size: leaf.size,
            corners: leaf.corners,
            vertex: leaf.vertex,
            normal: leaf.normal,
            material: leaf.material,
            chunk: region.code,
            is_border: false,
        })
        .collect();
    nodes.sort_unstable_by_key(|n| n.code);
    nodes
}

/// Nodes touching one of the positive faces of `region`.
pub fn max_face_nodes<'a>(
    region: &'a ChunkRegion,
    nodes: &'a [SeamNode],
) -> impl Iterator<Item = &'a SeamNode> + 'a {
    let max = region.max();
    nodes.iter().filter(move |n| n.max().cmpeq(max).any())
}

/// Synthesizes nodes standing in for a coarser neighbour that recorded no seam
/// node next to one of `own` max-face nodes.
///
/// `neighbour_codes` are the codes of all seam nodes of the neighbours. Nothing
/// is synthesized where no active chunk lies across the face.
pub fn synthesize_border_nodes(
    ctx: &MeshGenerationContext,
    octree: &ChunkOctree,
    region: &ChunkRegion,
    own: &[SeamNode],
    neighbour_codes: &FxHashSet<ChunkCode>,
) -> Vec<SeamNode> {
    let region_max = region.max();
    let mut seen = FxHashSet::default();
    let mut border = Vec::new();
    for node in max_face_nodes(region, own) {
        for axis in 0..3 {
            if node.max()[axis] != region_max[axis] {
                continue;
            }
            let mut q = node.min;
            q[axis] += node.size;

            let Some(neighbour) = octree.find_active_containing(q) else { continue };
            if neighbour.size <= region.size {
                continue;
            }
            let leaf_size = neighbour.region().cell_size(ctx);
            if is_covered(ctx, q, leaf_size, neighbour_codes) {
                continue;
            }

            let min = align_down(ctx, q, leaf_size);
            let code = ctx.node_code(min, leaf_size);
            if !seen.insert(code) {
                continue;
            }
            border.push(SeamNode {
                code,
                min,
                size: leaf_size,
                chunk: neighbour.code,
                is_border: true,
                ..node.clone()
            });
        }
    }
    border
}

/// True if a recorded node no larger than `max_size` contains `q`.
fn is_covered(
    ctx: &MeshGenerationContext,
    q: IVec3,
    max_size: i32,
    codes: &FxHashSet<ChunkCode>,
) -> bool {
    let mut size = 1;
    while size <= max_size {
        if codes.contains(&ctx.node_code(align_down(ctx, q, size), size)) {
            return true;
        }
        size *= 2;
    }
    false
}

#[inline]
fn align_down(ctx: &MeshGenerationContext, p: IVec3, size: i32) -> IVec3 {
    let rel = p - ctx.world_origin;
    ctx.world_origin + IVec3::new(
        rel.x.div_euclid(size),
        rel.y.div_euclid(size),
        rel.z.div_euclid(size),
    ) * size
}

/// Gathers everything the seam mesh of `region` is built from: its own
/// max-face nodes, the seam nodes of active neighbours inside
/// `[min, min + 2 * size)`, and synthesized border nodes.
pub fn collect_seam_nodes(
    ctx: &MeshGenerationContext,
    octree: &ChunkOctree,
    region: &ChunkRegion,
    own: &[SeamNode],
) -> Vec<SeamNode> {
    let box_min = region.min;
    let box_max = region.min + IVec3::splat(2 * region.size);
    let search = Extent::from_min_and_lub(box_min, box_max);

    let mut nodes: Vec<SeamNode> = max_face_nodes(region, own).cloned().collect();
    let mut neighbour_codes = FxHashSet::default();
    for code in octree.find_active_in_aabb(&search) {
        if code == region.code {
            continue;
        }
        let Some(content) = octree.get(code).and_then(|n| n.content.as_ref()) else { continue };
        for node in &content.seam_nodes {
            neighbour_codes.insert(node.code);
            if node.min.cmpge(box_min).all() && node.max().cmple(box_max).all() {
                nodes.push(node.clone());
            }
        }
    }

    nodes.extend(synthesize_border_nodes(ctx, octree, region, own, &neighbour_codes));
    nodes
}

/// Contours `nodes` inside `[min, min + 2 * size)` and keeps the faces that
/// join `region` to another chunk.
pub fn generate_seam_mesh(
    ctx: &MeshGenerationContext,
    region: &ChunkRegion,
    nodes: &[SeamNode],
) -> MeshBuffer {
    let leaves = nodes.iter().enumerate().map(|(i, n)| SeamLeaf {
        min: n.min,
        size: n.size,
        corners: n.corners,
        node: i as SeamNodeId,
    });
    let Some(mut octree) = SeamOctree::build(region.min, 2 * region.size, leaves) else {
        return MeshBuffer::default();
    };

    let joins_chunks = |ids: &[SeamNodeId]| {
        let mut own = false;
        let mut other = false;
        for &id in ids {
            let node = &nodes[id as usize];
            if node.chunk == region.code && !node.is_border {
                own = true;
            } else {
                other = true;
            }
        }
        own && other
    };

    let mut quads: Vec<[SeamNodeId; 4]> = Vec::new();
    let mut tris: Vec<[SeamNodeId; 3]> = Vec::new();
    octree.dual_contour(|q| quads.push(q), |t| tris.push(t));

    let triangles = quads
        .into_iter()
        .filter(|q| joins_chunks(&q[..]))
        .flat_map(|q| [[q[0], q[2], q[1]], [q[1], q[2], q[3]]])
        .chain(tris.into_iter().filter(|t| joins_chunks(&t[..])));

    let mut mesh = MeshBuffer::default();
    let mut vertex_ids = vec![NULL_MESH_VERTEX_ID; nodes.len()];
    let mut index_of = |id: SeamNodeId, mesh: &mut MeshBuffer| -> MeshVertexId {
        let slot = &mut vertex_ids[id as usize];
        if *slot == NULL_MESH_VERTEX_ID {
            let node = &nodes[id as usize];
            *slot = mesh.vertices.len() as MeshVertexId;
            mesh.vertices.push(MeshVertex {
                position: Vec3::from(ctx.voxel_to_world(node.vertex)),
                normal: Vec3::from(node.normal),
                material: node.material,
            });
        }
        *slot
    };
    for tri in triangles {
        if tri[0] == tri[1] || tri[1] == tri[2] || tri[0] == tri[2] {
            continue;
        }
        for id in tri {
            let index = index_of(id, &mut mesh);
            mesh.indices.push(index);
        }
    }
    mesh
}
