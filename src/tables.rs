//! Lookup tables. Corner and octant indices use bit 0 for X, bit 1 for Y and
//! bit 2 for Z.

// ---------------------------------------------------------------------------
// Uniform grid (chunk interior)
// ---------------------------------------------------------------------------

/// For each axis `a`, the unit offsets along the other two axes `(b, c)` in
/// cyclic order, so that `b x c = a`.
pub const QUAD_NEIGHBOUR_AXES: [[[i32; 3]; 2]; 3] = [
    [[0, 1, 0], [0, 0, 1]],
    [[0, 0, 1], [1, 0, 0]],
    [[1, 0, 0], [0, 1, 0]],
];

/// The edge parallel to each axis that the cell shares with its three
/// `QUAD_NEIGHBOUR_AXES` neighbours, as `[lower corner, upper corner]`.
pub const QUAD_EDGE_CORNERS: [[usize; 2]; 3] = [[0b110, 0b111], [0b101, 0b111], [0b011, 0b111]];

/// Triangles over the quad `[cell, cell + b, cell + c, cell + b + c]` facing
/// `+a`. Used when the lower end of the shared edge is solid.
pub const QUAD_WINDING: [usize; 6] = [0, 1, 3, 0, 3, 2];

/// Same quad facing `-a`.
pub const QUAD_WINDING_FLIPPED: [usize; 6] = [0, 3, 1, 0, 2, 3];

// ---------------------------------------------------------------------------
// Octree (seam stitching)
// ---------------------------------------------------------------------------

/// Pairs of octants (o0, o1) where o0 and o1 are face-adjacent.
pub const FACE_ADJACENT_OCTANTS: [[[u8; 2]; 4]; 3] = [
    [
        //  -X     +X
        [0b000, 0b001],
        [0b010, 0b011],
        [0b100, 0b101],
        [0b110, 0b111],
    ],
    [
        //  -Y     +Y
        [0b000, 0b010],
        [0b001, 0b011],
        [0b100, 0b110],
        [0b101, 0b111],
    ],
    [
        //  -Z     +Z
        [0b000, 0b100],
        [0b001, 0b101],
        [0b010, 0b110],
        [0b011, 0b111],
    ],
];

// Quartets of octants sharing an edge, always in Z order.
const EDGE_QUARTET_NEG_X: [u8; 4] = [0b000, 0b010, 0b100, 0b110];
const EDGE_QUARTET_POS_X: [u8; 4] = [0b001, 0b011, 0b101, 0b111];
const EDGE_QUARTET_NEG_Y: [u8; 4] = [0b000, 0b100, 0b001, 0b101];
const EDGE_QUARTET_POS_Y: [u8; 4] = [0b010, 0b110, 0b011, 0b111];
const EDGE_QUARTET_NEG_Z: [u8; 4] = [0b000, 0b001, 0b010, 0b011];
const EDGE_QUARTET_POS_Z: [u8; 4] = [0b100, 0b101, 0b110, 0b111];

/// Indexed by edge axis, then by which half of the parent the edge is in.
pub const EDGE_ADJACENT_OCTANTS: [[[u8; 4]; 2]; 3] = [
    [EDGE_QUARTET_NEG_X, EDGE_QUARTET_POS_X],
    [EDGE_QUARTET_NEG_Y, EDGE_QUARTET_POS_Y],
    [EDGE_QUARTET_NEG_Z, EDGE_QUARTET_POS_Z],
];

/// Octant quartets for the 4 edges lying in a face, indexed by face axis.
pub const FACE_TO_EDGE_ADJACENT_OCTANTS: [[[u8; 4]; 4]; 3] = [
    [
        EDGE_QUARTET_NEG_Y,
        EDGE_QUARTET_POS_Y,
        EDGE_QUARTET_NEG_Z,
        EDGE_QUARTET_POS_Z,
    ],
    [
        EDGE_QUARTET_NEG_Z,
        EDGE_QUARTET_POS_Z,
        EDGE_QUARTET_NEG_X,
        EDGE_QUARTET_POS_X,
    ],
    [
        EDGE_QUARTET_NEG_X,
        EDGE_QUARTET_POS_X,
        EDGE_QUARTET_NEG_Y,
        EDGE_QUARTET_POS_Y,
    ],
];
pub const FACE_TO_EDGE_AXIS: [[usize; 4]; 3] = [[1, 1, 2, 2], [2, 2, 0, 0], [0, 0, 1, 1]];
pub const FACE_TO_EDGE_NODE_ORDERS: [[usize; 4]; 4] =
    [[0, 0, 1, 1], [0, 0, 1, 1], [0, 1, 0, 1], [0, 1, 0, 1]];
pub const FACE_TO_EDGE_MIRRORS: [[usize; 4]; 4] =
    [[2, 3, 0, 1], [2, 3, 0, 1], [1, 0, 3, 2], [1, 0, 3, 2]];

/// Bit offset of the octant containing `offset` (each component 0 or 1).
#[inline]
pub fn octant_index(offset: [i32; 3]) -> usize {
    (offset[0] | (offset[1] << 1) | (offset[2] << 2)) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quad_edge_is_shared_by_all_four_cells() {
        for axis in 0..3 {
            let [b, c] = QUAD_NEIGHBOUR_AXES[axis];
            let [lo, hi] = QUAD_EDGE_CORNERS[axis];
            // The edge runs along `axis`.
            assert_eq!(lo ^ hi, 1 << axis);
            // Its position in the other two axes is the far corner (b + c).
            let bc = octant_index([b[0] + c[0], b[1] + c[1], b[2] + c[2]]);
            assert_eq!(lo, bc);
        }
    }

    #[test]
    fn windings_are_mirror_images() {
        for t in 0..2 {
            let a = &QUAD_WINDING[3 * t..3 * t + 3];
            let b = &QUAD_WINDING_FLIPPED[3 * t..3 * t + 3];
            assert_eq!([a[0], a[2], a[1]], [b[0], b[1], b[2]]);
        }
    }
}
