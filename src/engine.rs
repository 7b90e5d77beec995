use crate::{
    chunk::{ChunkOctree, LodSelector, ReduceStatus},
    csg::{
        process_csg_operations, reduce_edits, BrushShape, CsgFlushReport, CsgOperation, CsgQueue,
        EditedField,
    },
    error::Result,
    seam::{collect_seam_nodes, generate_seam_mesh},
    simplify::simplify_mesh,
    ChunkCode, DensityField, MaterialId, MeshBuffer, MeshGenerationContext, ParallelVoxelOctree,
    VoxelOctree,
};
use glam::{IVec3, Vec3A};
use ilattice::prelude::Extent;
use parking_lot::{RwLock, RwLockReadGuard};
use rustc_hash::FxHashSet;
use std::sync::Arc;

/// New geometry for one chunk. Ownership passes to the renderer.
#[derive(Clone, Debug, Default)]
pub struct ChunkMeshUpdate {
    pub code: ChunkCode,
    pub min: IVec3,
    pub size: i32,
    /// False when the chunk left the active set. Its meshes are then empty and
    /// whatever was drawn for it should be dropped.
    pub active: bool,
    pub mesh: MeshBuffer,
    pub seam_mesh: MeshBuffer,
}

/// Owns the chunk index and the edit queue and turns both into meshes.
///
/// Edits may be queued from any thread. [`Self::process_csg_operations`] and
/// [`Self::update`] take the chunk index exclusively.
pub struct VoxelEngine {
    ctx: Arc<MeshGenerationContext>,
    chunks: RwLock<ChunkOctree>,
    csg: CsgQueue,
    field: Arc<dyn DensityField>,
    backend: Box<dyn VoxelOctree>,
}

impl VoxelEngine {
    pub fn new(ctx: MeshGenerationContext, field: Arc<dyn DensityField>) -> Result<Self> {
        let backend = ParallelVoxelOctree::new(&ctx)?;
        Self::with_backend(ctx, field, Box::new(backend))
    }

    pub fn with_backend(
        ctx: MeshGenerationContext,
        field: Arc<dyn DensityField>,
        backend: Box<dyn VoxelOctree>,
    ) -> Result<Self> {
        let chunks = ChunkOctree::new(&ctx)?;
        log::info!(
            "voxel engine ready: world {} voxels, chunks of {} cells",
            ctx.world_size,
            ctx.voxels_per_chunk
        );
        Ok(Self {
            ctx: Arc::new(ctx),
            chunks: RwLock::new(chunks),
            csg: CsgQueue::new(),
            field,
            backend,
        })
    }

    pub fn context(&self) -> &Arc<MeshGenerationContext> {
        &self.ctx
    }

    pub fn chunks(&self) -> RwLockReadGuard<'_, ChunkOctree> {
        self.chunks.read()
    }

    pub fn csg_queue(&self) -> &CsgQueue {
        &self.csg
    }

    /// Queues a brush edit. `origin` and `brush_size` (half extents) are in
    /// world units. Returns the edit's sequence number.
    pub fn queue_csg_operation(
        &self,
        origin: Vec3A,
        brush_size: Vec3A,
        shape: BrushShape,
        material: MaterialId,
        is_add: bool,
    ) -> u64 {
        let op = if is_add {
            CsgOperation::Add
        } else {
            CsgOperation::Remove
        };
        self.csg.push(&self.ctx, origin, brush_size, shape, material, op)
    }

    /// Flushes the edit queue into the chunk index.
    pub fn process_csg_operations(&self, selector: &dyn LodSelector) -> Option<CsgFlushReport> {
        let mut chunks = self.chunks.write();
        process_csg_operations(&self.ctx, &mut chunks, &self.csg, selector)
    }

    /// Selects the active chunks, regenerates the invalidated ones and
    /// re-stitches the seams around every chunk whose neighbourhood changed.
    ///
    /// Chunks that became active again with cached content are reported like
    /// rebuilt ones. Chunks that left the active set are reported with
    /// `active: false` and empty meshes.
    ///
    /// A chunk that fails to regenerate is logged and stays invalidated, so it
    /// is retried on the next update.
    pub fn update(&self, selector: &dyn LodSelector) -> Vec<ChunkMeshUpdate> {
        let ctx = &*self.ctx;
        let mut chunks = self.chunks.write();
        let previous: FxHashSet<ChunkCode> = chunks
            .nodes()
            .filter(|n| n.active)
            .map(|n| n.code)
            .collect();
        let active = chunks.select_active_nodes(ctx, selector);
        let activated: Vec<ChunkCode> = active
            .iter()
            .copied()
            .filter(|code| !previous.contains(code))
            .collect();
        let mut deactivated: Vec<ChunkCode> = {
            let current: FxHashSet<ChunkCode> = active.iter().copied().collect();
            previous.difference(&current).copied().collect()
        };
        deactivated.sort_unstable();

        let dirty: Vec<ChunkCode> = active
            .iter()
            .copied()
            .filter(|&code| chunks.get(code).is_some_and(|n| n.needs_generation()))
            .collect();

        let mut shown = FxHashSet::default();
        for code in dirty {
            if self.regenerate_chunk(&mut chunks, code) {
                shown.insert(code);
            }
        }
        let num_regenerated = shown.len();
        // Cached content is valid again as is.
        shown.extend(
            activated
                .iter()
                .copied()
                .filter(|&code| chunks.get(code).is_some_and(|n| !n.invalidated)),
        );

        let changed: Vec<Extent<IVec3>> = shown
            .iter()
            .chain(&deactivated)
            .filter_map(|&code| chunks.get(code).map(|n| n.extent()))
            .collect();
        if !changed.is_empty() {
            for &code in &active {
                let Some(node) = chunks.get(code) else { continue };
                if node.content.is_none() {
                    continue;
                }
                let seam_box = Extent::from_min_and_shape(node.min, IVec3::splat(2 * node.size));
                if !changed.iter().any(|e| !e.intersection(&seam_box).is_empty()) {
                    continue;
                }

                let region = node.region();
                let seam_mesh = node.content.as_ref().map(|content| {
                    let nodes = collect_seam_nodes(ctx, &chunks, &region, &content.seam_nodes);
                    generate_seam_mesh(ctx, &region, &nodes)
                });
                if let (Some(seam_mesh), Some(content)) = (
                    seam_mesh,
                    chunks.get_mut(code).and_then(|n| n.content.as_mut()),
                ) {
                    content.seam_mesh = seam_mesh;
                    shown.insert(code);
                }
            }
        }

        let mut shown: Vec<ChunkCode> = shown.into_iter().collect();
        shown.sort_unstable();
        let mut updates: Vec<ChunkMeshUpdate> = shown
            .into_iter()
            .filter_map(|code| {
                let node = chunks.get(code)?;
                let (mesh, seam_mesh) = node
                    .content
                    .as_ref()
                    .map(|c| (c.mesh.clone(), c.seam_mesh.clone()))
                    .unwrap_or_default();
                Some(ChunkMeshUpdate {
                    code,
                    min: node.min,
                    size: node.size,
                    active: true,
                    mesh,
                    seam_mesh,
                })
            })
            .collect();
        let num_shown = updates.len();
        updates.extend(deactivated.into_iter().filter_map(|code| {
            let node = chunks.get(code)?;
            Some(ChunkMeshUpdate {
                code,
                min: node.min,
                size: node.size,
                ..Default::default()
            })
        }));
        if !updates.is_empty() {
            log::debug!(
                "{num_shown} chunk meshes updated ({num_regenerated} rebuilt), {} chunks hidden",
                updates.len() - num_shown
            );
        }
        updates
    }

    /// Rebuilds one chunk from the base field and its edits. Returns false if
    /// the chunk is left invalidated.
    fn regenerate_chunk(&self, chunks: &mut ChunkOctree, code: ChunkCode) -> bool {
        let ctx = &*self.ctx;
        let Some(node) = chunks.get(code) else { return false };
        let region = node.region();
        let edits = if node.reduce_status == ReduceStatus::NeedToReduce {
            reduce_edits(chunks, code)
        } else {
            node.edits.clone()
        };

        let field = EditedField::new(ctx, self.field.as_ref(), &edits);
        let result = self.backend.compute_free_chunk_octree(ctx, &region, &field);
        let Some(node) = chunks.get_mut(code) else { return false };
        match result {
            Ok(mut content) => {
                if let (Some(options), Some(content)) = (&ctx.simplify, content.as_mut()) {
                    simplify_mesh(&mut content.mesh, options);
                }
                node.empty = content.is_none();
                node.content = content;
                node.edits = edits;
                node.reduce_status = ReduceStatus::None;
                node.invalidated = false;
                true
            }
            Err(e) => {
                log::warn!("failed to regenerate chunk {code:#x}: {e}");
                false
            }
        }
    }

    /// Inserts the aligned chunk `(min, size)` and its subtree.
    pub fn insert_chunk_subtree(&self, min: IVec3, size: i32) -> Result<ChunkCode> {
        self.chunks.write().insert_subtree(&self.ctx, min, size)
    }

    /// Removes a chunk and its subtree, returning how many nodes were dropped.
    pub fn remove_chunk_subtree(&self, code: ChunkCode) -> Result<usize> {
        Ok(self.chunks.write().remove_subtree(code)?.len())
    }
}
