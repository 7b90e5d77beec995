use crate::MaterialId;
use glam::Vec3;

pub type MeshVertexId = u32;
pub const NULL_MESH_VERTEX_ID: MeshVertexId = MeshVertexId::MAX;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshVertex {
    /// We don't use `Vec3A` because it's 16-byte-aligned.
    pub position: Vec3,
    pub normal: Vec3,
    pub material: MaterialId,
}

/// Indexed triangle list handed to the renderer.
///
/// Vertex and index counts are always the lengths of the arrays.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshBuffer {
    pub vertices: Vec<MeshVertex>,
    pub indices: Vec<MeshVertexId>,
}

impl MeshBuffer {
    pub fn with_capacity(vertices: usize, indices: usize) -> Self {
        Self {
            vertices: Vec::with_capacity(vertices),
            indices: Vec::with_capacity(indices),
        }
    }

    #[inline]
    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    pub fn num_indices(&self) -> usize {
        self.indices.len()
    }

    #[inline]
    pub fn num_triangles(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn triangles(&self) -> impl Iterator<Item = [MeshVertexId; 3]> + '_ {
        self.indices.chunks_exact(3).map(|t| [t[0], t[1], t[2]])
    }

    /// Geometric normal of triangle `tri`, not normalized.
    pub fn triangle_normal(&self, tri: [MeshVertexId; 3]) -> Vec3 {
        let p = tri.map(|v| self.vertices[v as usize].position);
        (p[1] - p[0]).cross(p[2] - p[0])
    }

    /// Appends `other`, offsetting its indices.
    pub fn append(&mut self, other: &MeshBuffer) {
        let base = self.vertices.len() as MeshVertexId;
        self.vertices.extend_from_slice(&other.vertices);
        self.indices.extend(other.indices.iter().map(|&i| i + base));
    }

    /// Drops vertices no triangle references and rewrites the indices to the
    /// compacted range.
    pub fn remove_unused_vertices(&mut self) {
        let mut remap = vec![NULL_MESH_VERTEX_ID; self.vertices.len()];
        let mut compacted = Vec::with_capacity(self.vertices.len());
        for index in self.indices.iter_mut() {
            let slot = &mut remap[*index as usize];
            if *slot == NULL_MESH_VERTEX_ID {
                *slot = compacted.len() as MeshVertexId;
                compacted.push(self.vertices[*index as usize]);
            }
            *index = *slot;
        }
        self.vertices = compacted;
    }

    /// True if every index refers to an existing vertex.
    pub fn indices_in_bounds(&self) -> bool {
        self.indices.iter().all(|&i| (i as usize) < self.vertices.len())
    }
}
