//! Randomized edge-collapse simplification driven by 2-point QEFs.

use crate::{qef::QefData, MeshBuffer, MeshVertexId};
use glam::Vec3A;
use rand::{rngs::StdRng, SeedableRng};
use rustc_hash::FxHashMap;

/// Meshes smaller than this (in triangles or vertices) are left alone.
pub const MIN_SIMPLIFY_ELEMENTS: usize = 100;

/// Edges whose endpoints have more incident edges than this are never
/// collapsed.
pub const MAX_COLLAPSE_DEGREE: u32 = 16;

/// Incident edges above this count make a collapse more expensive.
const DEGREE_PENALTY_START: u32 = 10;

#[derive(Clone, Debug, PartialEq)]
pub struct SimplifyOptions {
    pub max_iterations: usize,
    /// Stop once the triangle count drops to this fraction of the input.
    pub target_percentage: f32,
    /// Fraction of the remaining edges examined per iteration.
    pub edge_fraction: f32,
    /// World units.
    pub max_edge_size: f32,
    pub max_error: f32,
    /// Endpoint normals must agree at least this much.
    pub min_angle_cosine: f32,
    pub seed: u64,
}

impl Default for SimplifyOptions {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            target_percentage: 0.05,
            edge_fraction: 0.125,
            max_edge_size: 2.5,
            max_error: 1.0,
            min_angle_cosine: 0.8,
            seed: 0x5eed,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SimplifyStats {
    pub input_triangles: usize,
    pub output_triangles: usize,
    pub iterations: usize,
    pub collapses: usize,
}

#[derive(Clone, Copy)]
struct Candidate {
    edge: usize,
    error: f32,
    position: Vec3A,
}

/// Collapses edges of `mesh` in place and compacts its vertices.
pub fn simplify_mesh(mesh: &mut MeshBuffer, options: &SimplifyOptions) -> SimplifyStats {
    let input_triangles = mesh.num_triangles();
    let mut stats = SimplifyStats {
        input_triangles,
        output_triangles: input_triangles,
        ..Default::default()
    };
    if input_triangles < MIN_SIMPLIFY_ELEMENTS || mesh.num_vertices() < MIN_SIMPLIFY_ELEMENTS {
        return stats;
    }

    let (mut edges, locked) = collect_edges(mesh);
    let target = (input_triangles as f32 * options.target_percentage) as usize;
    let mut rng = StdRng::seed_from_u64(options.seed);
    let num_vertices = mesh.num_vertices();
    let mut degree = vec![0u32; num_vertices];
    let mut best: Vec<Option<Candidate>> = vec![None; num_vertices];
    let mut remap: Vec<MeshVertexId> = (0..num_vertices as MeshVertexId).collect();

    while stats.iterations < options.max_iterations && mesh.num_triangles() > target {
        stats.iterations += 1;
        if edges.is_empty() {
            break;
        }

        degree.iter_mut().for_each(|d| *d = 0);
        for &[a, b] in &edges {
            degree[a as usize] += 1;
            degree[b as usize] += 1;
        }

        let num_samples = ((edges.len() as f32 * options.edge_fraction).ceil() as usize)
            .clamp(1, edges.len());
        best.iter_mut().for_each(|b| *b = None);
        for edge in rand::seq::index::sample(&mut rng, edges.len(), num_samples).into_iter() {
            let [a, b] = edges[edge];
            if locked[a as usize] || locked[b as usize] {
                continue;
            }
            let Some(candidate) = evaluate_edge(mesh, &degree, options, edge, a, b) else {
                continue;
            };
            for v in [a, b] {
                let slot = &mut best[v as usize];
                if slot.map_or(true, |c| candidate.error < c.error) {
                    *slot = Some(candidate);
                }
            }
        }

        // An edge collapses only if it is the best choice of both endpoints,
        // so each vertex takes part in at most one collapse per iteration.
        let mut collapsed = 0;
        for v in 0..num_vertices {
            let Some(candidate) = best[v] else { continue };
            let [a, b] = edges[candidate.edge];
            if a as usize != v {
                continue;
            }
            if best[b as usize].map_or(true, |c| c.edge != candidate.edge) {
                continue;
            }
            let (keep, gone) = (a.min(b), a.max(b));
            let normal = (Vec3A::from(mesh.vertices[keep as usize].normal)
                + Vec3A::from(mesh.vertices[gone as usize].normal))
            .normalize_or_zero();
            let kept = &mut mesh.vertices[keep as usize];
            kept.position = candidate.position.into();
            kept.normal = normal.into();
            remap[gone as usize] = keep;
            collapsed += 1;
        }
        if collapsed == 0 {
            continue;
        }
        stats.collapses += collapsed;

        // Collapses within one iteration are disjoint, so one level of
        // indirection is enough.
        for index in mesh.indices.iter_mut() {
            *index = remap[*index as usize];
        }
        let mut kept = Vec::with_capacity(mesh.indices.len());
        for t in mesh.indices.chunks_exact(3) {
            if t[0] != t[1] && t[1] != t[2] && t[0] != t[2] {
                kept.extend_from_slice(t);
            }
        }
        mesh.indices = kept;

        for edge in edges.iter_mut() {
            *edge = ordered(remap[edge[0] as usize], remap[edge[1] as usize]);
        }
        edges.retain(|[a, b]| a != b);
        edges.sort_unstable();
        edges.dedup();

        for (v, r) in remap.iter_mut().enumerate() {
            *r = v as MeshVertexId;
        }
    }

    mesh.remove_unused_vertices();
    stats.output_triangles = mesh.num_triangles();
    log::debug!(
        "simplified {} -> {} triangles in {} iterations",
        stats.input_triangles,
        stats.output_triangles,
        stats.iterations
    );
    stats
}

/// Unique edges in sorted order, and per vertex whether it lies on the mesh
/// boundary (an edge used by a single triangle).
fn collect_edges(mesh: &MeshBuffer) -> (Vec<[MeshVertexId; 2]>, Vec<bool>) {
    let mut uses: FxHashMap<[MeshVertexId; 2], u32> = FxHashMap::default();
    for [a, b, c] in mesh.triangles() {
        for (u, v) in [(a, b), (b, c), (c, a)] {
            *uses.entry(ordered(u, v)).or_default() += 1;
        }
    }
    let mut locked = vec![false; mesh.num_vertices()];
    let mut edges = Vec::with_capacity(uses.len());
    for (edge, count) in uses {
        if count == 1 {
            locked[edge[0] as usize] = true;
            locked[edge[1] as usize] = true;
        }
        if edge[0] != edge[1] {
            edges.push(edge);
        }
    }
    edges.sort_unstable();
    (edges, locked)
}

fn evaluate_edge(
    mesh: &MeshBuffer,
    degree: &[u32],
    options: &SimplifyOptions,
    edge: usize,
    a: MeshVertexId,
    b: MeshVertexId,
) -> Option<Candidate> {
    let va = &mesh.vertices[a as usize];
    let vb = &mesh.vertices[b as usize];
    let (pa, pb) = (Vec3A::from(va.position), Vec3A::from(vb.position));
    let (na, nb) = (Vec3A::from(va.normal), Vec3A::from(vb.normal));

    if na.dot(nb) < options.min_angle_cosine
        || pa.distance(pb) > options.max_edge_size
        || va.material != vb.material
    {
        return None;
    }
    let combined_degree = degree[a as usize] + degree[b as usize];
    if combined_degree > MAX_COLLAPSE_DEGREE {
        return None;
    }

    let qef = QefData::from_samples([(pa, na)]) + QefData::from_samples([(pb, nb)]);
    let (position, error) = qef.solve();
    let penalty =
        combined_degree.saturating_sub(DEGREE_PENALTY_START) as f32 * 0.1 * options.max_error;
    let error = error + penalty;
    (error <= options.max_error).then_some(Candidate {
        edge,
        error,
        position,
    })
}

#[inline]
fn ordered(a: MeshVertexId, b: MeshVertexId) -> [MeshVertexId; 2] {
    if a <= b {
        [a, b]
    } else {
        [b, a]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MeshVertex;
    use glam::Vec3;

    /// Flat `n x n` quad grid in the XZ plane, facing +Y.
    fn grid(n: u32) -> MeshBuffer {
        let mut mesh = MeshBuffer::default();
        for z in 0..=n {
            for x in 0..=n {
                mesh.vertices.push(MeshVertex {
                    position: Vec3::new(x as f32, 0.0, z as f32),
                    normal: Vec3::Y,
                    material: 1,
                });
            }
        }
        let id = |x: u32, z: u32| z * (n + 1) + x;
        for z in 0..n {
            for x in 0..n {
                let (v00, v10, v01, v11) = (id(x, z), id(x + 1, z), id(x, z + 1), id(x + 1, z + 1));
                mesh.indices.extend_from_slice(&[v00, v11, v10, v00, v01, v11]);
            }
        }
        mesh
    }

    fn options() -> SimplifyOptions {
        SimplifyOptions {
            edge_fraction: 0.5,
            target_percentage: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn small_meshes_are_untouched() {
        let mut mesh = grid(5);
        let before = mesh.clone();
        let stats = simplify_mesh(&mut mesh, &options());
        assert_eq!(mesh, before);
        assert_eq!(stats.iterations, 0);
    }

    #[test]
    fn boundary_vertices_survive() {
        let n = 20;
        let mut mesh = grid(n);
        let boundary: Vec<Vec3> = mesh
            .vertices
            .iter()
            .map(|v| v.position)
            .filter(|p| p.x == 0.0 || p.z == 0.0 || p.x == n as f32 || p.z == n as f32)
            .collect();
        assert_eq!(boundary.len(), 4 * n as usize);

        let stats = simplify_mesh(&mut mesh, &options());

        assert!(stats.collapses > 0);
        assert!(stats.output_triangles < stats.input_triangles);
        assert_eq!(stats.output_triangles, mesh.num_triangles());
        assert!(mesh.indices_in_bounds());
        for p in boundary {
            assert!(
                mesh.vertices.iter().any(|v| v.position == p),
                "boundary vertex {p} moved or vanished"
            );
        }
        // Still flat and facing up.
        for tri in mesh.triangles() {
            assert!(tri[0] != tri[1] && tri[1] != tri[2] && tri[0] != tri[2]);
            assert!(mesh.vertices[tri[0] as usize].position.y.abs() < 1e-4);
        }
    }

    #[test]
    fn same_seed_same_result() {
        let mut a = grid(16);
        let mut b = grid(16);
        simplify_mesh(&mut a, &options());
        simplify_mesh(&mut b, &options());
        assert_eq!(a, b);
    }

    #[test]
    fn mismatched_materials_never_collapse() {
        let mut mesh = grid(16);
        for (i, v) in mesh.vertices.iter_mut().enumerate() {
            v.material = i as u32;
        }
        let before = mesh.num_triangles();
        let stats = simplify_mesh(&mut mesh, &options());
        assert_eq!(stats.collapses, 0);
        assert_eq!(mesh.num_triangles(), before);
    }
}
