//! Chunked Dual Contouring
//!
//! Meshes a sparse signed distance field one chunk at a time. Chunks are nodes
//! of a world octree chosen by a level of detail selector; each one is
//! contoured on a flat grid of cells, and the cracks between neighbouring
//! chunks (possibly of different sizes) are closed by a separate seam mesh
//! built from the cells on their shared faces.
//!
//! Boolean brush edits are queued from any thread and replayed on top of the
//! base field whenever a touched chunk is regenerated.
//!
//! # References
//!
//! - Tao Ju, Frank Losasso, Scott Schaefer, Joe Warren ["Dual Contouring of
//!   Hermite Data"](https://www.cs.rice.edu/~jwarren/papers/dualcontour.pdf)
//! - Nick Gildea ["Implementing Dual
//!   Contouring"](https://github.com/nickgildea/DualContouringSample) for the
//!   Jacobi SVD QEF solver
//!
//! # Pipeline
//!
//! 1. [`VoxelEngine::queue_csg_operation`] queues edits.
//! 2. [`VoxelEngine::process_csg_operations`] invalidates the touched chunks.
//! 3. [`VoxelEngine::update`] selects the active chunks, rebuilds the
//!    invalidated ones through a [`VoxelOctree`] backend, stitches their seams
//!    and optionally simplifies the result.

mod chunk;
mod context;
mod contour;
mod csg;
mod engine;
mod error;
mod leaf;
mod mesh;
mod qef;
mod sdf;
mod seam;
mod seam_octree;
mod simplify;
mod tables;
mod voxel_octree;

pub mod sdf_primitives;

/// World octree path code of a chunk (or of any aligned node). The root is 1.
pub type ChunkCode = u64;
pub type MaterialId = u32;

pub use chunk::*;
pub use context::*;
pub use contour::*;
pub use csg::*;
pub use engine::*;
pub use error::*;
pub use leaf::*;
pub use mesh::*;
pub use qef::QefData;
pub use sdf::*;
pub use seam::*;
pub use seam_octree::*;
pub use simplify::*;
pub use voxel_octree::*;
