//! Mixed-resolution octree over the seam nodes around one chunk, contoured
//! with the non-recursive cell/face/edge traversal of Ju et al.

use crate::{corner_is_solid, tables::*};
use glam::IVec3;
use rustc_hash::FxHashMap;

pub type SeamCellId = u32;

/// Index of a seam node in the list the octree was built from.
pub type SeamNodeId = u32;
pub const NULL_SEAM_NODE: SeamNodeId = SeamNodeId::MAX;

/// A leaf handed to [`SeamOctree::build`].
#[derive(Clone, Copy, Debug)]
pub struct SeamLeaf {
    pub min: IVec3,
    pub size: i32,
    pub corners: u8,
    pub node: SeamNodeId,
}

#[derive(Clone, Debug)]
pub struct SeamCell {
    pub min: IVec3,
    pub size: i32,
    pub corners: u8,
    pub children: [Option<SeamCellId>; 8],
    pub node: SeamNodeId,
    pub is_leaf: bool,
}

#[derive(Debug, Default)]
pub struct SeamOctree {
    root_id: SeamCellId,
    all_cells: Vec<SeamCell>,

    cell_stack: Vec<SeamCellId>,
    face_stack: Vec<Face>,
    edge_stack: Vec<Edge>,
}

impl SeamOctree {
    /// Builds the octree bottom-up inside the cube `(root_min, root_size)`.
    ///
    /// Leaves outside the cube are ignored. A leaf whose box already holds
    /// finer leaves is dropped in favour of the finer ones, and of two leaves
    /// with the same box the first one wins.
    pub fn build(
        root_min: IVec3,
        root_size: i32,
        leaves: impl IntoIterator<Item = SeamLeaf>,
    ) -> Option<Self> {
        let root_max = root_min + IVec3::splat(root_size);
        let mut by_size: Vec<SeamLeaf> = leaves
            .into_iter()
            .filter(|l| {
                l.size > 0
                    && l.size <= root_size
                    && l.min.cmpge(root_min).all()
                    && (l.min + IVec3::splat(l.size)).cmple(root_max).all()
            })
            .collect();
        if by_size.is_empty() {
            return None;
        }
        // Stable, so "first one wins" holds within a size.
        by_size.sort_by_key(|l| l.size);

        let mut me = Self::default();
        let mut level: FxHashMap<IVec3, SeamCellId> = FxHashMap::default();
        let mut size = by_size[0].size;
        let mut next_leaf = 0;
        loop {
            while next_leaf < by_size.len() && by_size[next_leaf].size == size {
                let leaf = by_size[next_leaf];
                next_leaf += 1;
                if level.contains_key(&leaf.min) {
                    continue;
                }
                let id = me.push(SeamCell {
                    min: leaf.min,
                    size,
                    corners: leaf.corners,
                    children: [None; 8],
                    node: leaf.node,
                    is_leaf: true,
                });
                level.insert(leaf.min, id);
            }

            if size >= root_size {
                break;
            }

            let parent_size = 2 * size;
            let mut parents: FxHashMap<IVec3, SeamCellId> = FxHashMap::default();
            let mut cells: Vec<(IVec3, SeamCellId)> = level.drain().collect();
            // Deterministic cell ids.
            cells.sort_unstable_by_key(|(min, _)| min.to_array());
            for (min, child_id) in cells {
                let rel = min - root_min;
                let parent_min = root_min + (rel / parent_size) * parent_size;
                let offset = (min - parent_min) / size;
                let octant = octant_index(offset.to_array());
                let parent_id = match parents.get(&parent_min) {
                    Some(&id) => id,
                    None => {
                        let id = me.push(SeamCell {
                            min: parent_min,
                            size: parent_size,
                            corners: 0,
                            children: [None; 8],
                            node: NULL_SEAM_NODE,
                            is_leaf: false,
                        });
                        parents.insert(parent_min, id);
                        id
                    }
                };
                me.all_cells[parent_id as usize].children[octant] = Some(child_id);
            }
            level = parents;
            size = parent_size;
        }

        me.root_id = *level.get(&root_min)?;
        Some(me)
    }

    fn push(&mut self, cell: SeamCell) -> SeamCellId {
        let id = self.all_cells.len() as SeamCellId;
        self.all_cells.push(cell);
        id
    }

    pub fn all_cells(&self) -> &[SeamCell] {
        &self.all_cells
    }

    pub fn num_leaves(&self) -> usize {
        self.all_cells.iter().filter(|c| c.is_leaf).count()
    }

    fn clear_stacks(&mut self) {
        self.cell_stack.clear();
        self.face_stack.clear();
        self.edge_stack.clear();
    }

    /// Visits every sign-changing edge interior to the root cube.
    ///
    /// Quads are given as 4 seam nodes in Z order around the edge, to be
    /// split into `[q0, q2, q1]` and `[q1, q2, q3]`. Both quads and triangles
    /// face the air side of the edge.
    pub fn dual_contour(
        &mut self,
        mut visit_quad: impl FnMut([SeamNodeId; 4]),
        mut visit_triangle: impl FnMut([SeamNodeId; 3]),
    ) {
        self.clear_stacks();

        // Cells first, then faces, then edges. The face and edge stacks may
        // get large while all cells are traversed first.
        self.cell_stack.push(self.root_id);
        while let Some(cell) = self.cell_stack.pop() {
            contour_cell_interior(self, cell);
        }

        while let Some(face) = self.face_stack.pop() {
            contour_face_interior(self, face);
        }

        while let Some(edge) = self.edge_stack.pop() {
            contour_edge_interior(self, edge, &mut visit_quad, &mut visit_triangle);
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Face {
    axis: usize,
    cells: [SeamCellId; 2],
}

#[derive(Clone, Copy, Debug)]
struct Edge {
    axis: usize,
    cells: [SeamCellId; 4],
    /// True if the corresponding cell appears twice on this edge.
    is_duplicate: [bool; 4],
}

// 8 cells, 12 faces, 6 edges
fn contour_cell_interior(octree: &mut SeamOctree, cell_id: SeamCellId) {
    let cell = &octree.all_cells[cell_id as usize];
    if cell.is_leaf {
        return;
    }

    for &child in cell.children.iter().flatten() {
        octree.cell_stack.push(child);
    }

    // What remains of the interior of the parent is found in the face and
    // edge interiors between its children.
    for axis in 0..3 {
        for face in 0..4 {
            let face_cell_ids =
                FACE_ADJACENT_OCTANTS[axis][face].map(|o| cell.children[o as usize]);
            if let [Some(f0), Some(f1)] = face_cell_ids {
                octree.face_stack.push(Face {
                    axis,
                    cells: [f0, f1],
                });
            }
        }

        for edge in 0..2 {
            let edge_cells = EDGE_ADJACENT_OCTANTS[axis][edge].map(|o| cell.children[o as usize]);
            if let [Some(e0), Some(e1), Some(e2), Some(e3)] = edge_cells {
                octree.edge_stack.push(Edge {
                    axis,
                    cells: [e0, e1, e2, e3],
                    is_duplicate: [false; 4],
                });
            }
        }
    }
}

/// The child at `octant`, or the cell itself (flagged as a duplicate) once it
/// is a leaf.
fn child_or_self(
    octree: &SeamOctree,
    parent: SeamCellId,
    octant: u8,
) -> (Option<SeamCellId>, bool) {
    let cell = &octree.all_cells[parent as usize];
    if cell.is_leaf {
        (Some(parent), true)
    } else {
        (cell.children[octant as usize], false)
    }
}

// 4 faces and 4 edges
fn contour_face_interior(octree: &mut SeamOctree, face: Face) {
    // PRECONDITION: `face` cells are ordered from the - side to the + side.
    let [c0, c1] = face.cells.map(|i| &octree.all_cells[i as usize]);
    if c0.is_leaf && c1.is_leaf {
        return;
    }

    // Octants are mirrored across the face since the two sides have
    // different parents.
    for face_i in 0..4 {
        let o = FACE_ADJACENT_OCTANTS[face.axis][face_i];
        if let [(Some(f0), _), (Some(f1), _)] = [
            child_or_self(octree, face.cells[0], o[1]),
            child_or_self(octree, face.cells[1], o[0]),
        ] {
            octree.face_stack.push(Face {
                axis: face.axis,
                cells: [f0, f1],
            });
        }
    }

    for edge_i in 0..4 {
        let o = FACE_TO_EDGE_ADJACENT_OCTANTS[face.axis][edge_i];
        // Selection order and mirroring depend on how the Z curve runs across
        // the face.
        let order = FACE_TO_EDGE_NODE_ORDERS[edge_i];
        let mirror = FACE_TO_EDGE_MIRRORS[edge_i];

        let mut is_duplicate = [false; 4];
        let next_edge = [0, 1, 2, 3].map(|i| {
            let (child, is_dup) = child_or_self(octree, face.cells[order[i]], o[mirror[i]]);
            is_duplicate[i] = is_dup;
            child
        });

        if let [Some(e0), Some(e1), Some(e2), Some(e3)] = next_edge {
            octree.edge_stack.push(Edge {
                axis: FACE_TO_EDGE_AXIS[face.axis][edge_i],
                cells: [e0, e1, e2, e3],
                is_duplicate,
            });
        }
    }
}

// 2 edges
fn contour_edge_interior(
    octree: &mut SeamOctree,
    edge: Edge,
    visit_quad: &mut impl FnMut([SeamNodeId; 4]),
    visit_triangle: &mut impl FnMut([SeamNodeId; 3]),
) {
    // PRECONDITION: `edge` cells are in Z order.
    //
    //     e0 e1
    //     e2 e3
    let axis = edge.axis;
    let edge_cells = edge.cells.map(|i| &octree.all_cells[i as usize]);
    if edge_cells.iter().all(|c| c.is_leaf) {
        visit_leaf_edge(edge, edge_cells, visit_quad, visit_triangle);
        return;
    }

    for edge_i in 0..2 {
        let o = EDGE_ADJACENT_OCTANTS[axis][edge_i];
        // Diagonal octants swap because they have different parents.
        let next_edge = [0, 1, 2, 3].map(|i| child_or_self(octree, edge.cells[i], o[3 - i]).0);
        if let [Some(e0), Some(e1), Some(e2), Some(e3)] = next_edge {
            octree.edge_stack.push(Edge {
                axis,
                cells: [e0, e1, e2, e3],
                is_duplicate: [false; 4],
            });
        }
    }
}

fn visit_leaf_edge(
    edge: Edge,
    edge_cells: [&SeamCell; 4],
    visit_quad: &mut impl FnMut([SeamNodeId; 4]),
    visit_triangle: &mut impl FnMut([SeamNodeId; 3]),
) {
    // The smallest cell holds the whole edge.
    let mut min_cell = 0;
    for (i, cell) in edge_cells.iter().enumerate() {
        if cell.size < edge_cells[min_cell].size {
            min_cell = i;
        }
    }
    // The edge sits at the corner of that cell opposite to its position
    // around the edge.
    let octants = EDGE_ADJACENT_OCTANTS[edge.axis];
    let opposite_corner = [3, 2, 1, 0][min_cell];
    let c0 = octants[0][opposite_corner] as usize;
    let c1 = octants[1][opposite_corner] as usize;
    let corners = edge_cells[min_cell].corners;

    let flip = match (corner_is_solid(corners, c0), corner_is_solid(corners, c1)) {
        (true, false) => true,
        (false, true) => false,
        _ => return,
    };

    let nodes = edge_cells.map(|c| c.node);

    // A duplicated cell appears twice around the edge and can only
    // degenerate one of the two triangles, which share a diagonal.
    let tris = [[0, 2, 1], [1, 2, 3]];
    let first_tri_num_dups = tris[0]
        .iter()
        .map(|&t| edge.is_duplicate[t] as u8)
        .sum::<u8>();
    if first_tri_num_dups > 0 {
        let use_tri = if first_tri_num_dups == 1 {
            tris[0]
        } else {
            tris[1]
        };
        if flip {
            visit_triangle([use_tri[0], use_tri[2], use_tri[1]].map(|i| nodes[i]));
        } else {
            visit_triangle(use_tri.map(|i| nodes[i]));
        }
    } else if flip {
        visit_quad([nodes[2], nodes[3], nodes[0], nodes[1]]);
    } else {
        visit_quad(nodes);
    }
}
