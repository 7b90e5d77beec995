//! Boolean brush edits: the multi-producer edit queue, the flush that marks
//! touched chunks, and the density field that replays a chunk's edits.

use crate::{
    chunk::{ChunkOctree, LodSelector, ReduceStatus},
    context::CSG_BOUNDS_FUDGE,
    sdf_primitives::{cube, sphere, subtract, union},
    ChunkCode, DensityField, MaterialId, MeshGenerationContext,
};
use glam::{IVec3, Vec3A};
use ilattice::prelude::Extent;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CsgOperation {
    Add,
    Remove,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BrushShape {
    Cube,
    Sphere,
}

/// One queued edit. Positions and extents are in voxel space.
#[derive(Clone, Debug, PartialEq)]
pub struct CsgOperationInfo {
    pub op: CsgOperation,
    pub shape: BrushShape,
    pub material: MaterialId,
    /// Brush center in CSG space (voxel space shifted by
    /// [`MeshGenerationContext::csg_offset`]).
    pub origin: Vec3A,
    pub half_extent: Vec3A,
    /// Assigned at queue time, strictly increasing.
    pub sequence: u64,
}

impl CsgOperationInfo {
    /// Brush center in voxel space.
    #[inline]
    pub fn center(&self, ctx: &MeshGenerationContext) -> Vec3A {
        self.origin - ctx.csg_offset()
    }

    /// Signed distance to the brush surface from `p_csg`, in voxels.
    pub fn brush_density(&self, p_csg: Vec3A) -> f32 {
        let local = p_csg - self.origin;
        match self.shape {
            BrushShape::Cube => cube(self.half_extent, local),
            BrushShape::Sphere => sphere(self.half_extent.max_element(), local),
        }
    }

    /// Integer box of voxels the brush may affect.
    pub fn aabb(&self, ctx: &MeshGenerationContext) -> Extent<IVec3> {
        let center = self.center(ctx);
        let reach = self.half_extent + Vec3A::splat(CSG_BOUNDS_FUDGE);
        let min = (center - reach).floor().as_ivec3();
        let lub = (center + reach).ceil().as_ivec3();
        Extent::from_min_and_lub(min, lub)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CsgBatchState {
    /// Queued, not yet drained.
    Pending,
    Flushing,
    Applied,
}

/// Multi-producer edit queue. At most one flush drains it at a time; edits
/// queued during a flush go to the next one.
#[derive(Debug, Default)]
pub struct CsgQueue {
    pending: Mutex<Vec<CsgOperationInfo>>,
    flushing: AtomicBool,
    next_sequence: AtomicU64,
}

impl CsgQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an edit. `origin` and `half_extent` are in world units.
    pub fn push(
        &self,
        ctx: &MeshGenerationContext,
        origin: Vec3A,
        half_extent: Vec3A,
        shape: BrushShape,
        material: MaterialId,
        op: CsgOperation,
    ) -> u64 {
        let mut pending = self.pending.lock();
        // Numbered under the lock so that queue order and sequence order agree.
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        pending.push(CsgOperationInfo {
            op,
            shape,
            material,
            origin: ctx.world_to_voxel(origin) + ctx.csg_offset(),
            half_extent: ctx.world_to_voxel(half_extent).abs(),
            sequence,
        });
        sequence
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::Acquire)
    }

    /// State of the batch the queue is working on, if any.
    pub fn state(&self) -> Option<CsgBatchState> {
        if self.is_flushing() {
            Some(CsgBatchState::Flushing)
        } else if !self.is_empty() {
            Some(CsgBatchState::Pending)
        } else {
            None
        }
    }

    /// Takes every pending edit, unless another flush is in flight or there
    /// is nothing to do.
    pub fn begin_flush(&self) -> Option<CsgFlush<'_>> {
        if self
            .flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        let operations = std::mem::take(&mut *self.pending.lock());
        let flush = CsgFlush {
            queue: self,
            operations,
            state: CsgBatchState::Flushing,
        };
        if flush.operations.is_empty() {
            // Dropping releases the in-flight flag.
            return None;
        }
        Some(flush)
    }
}

/// A drained batch. Holds the queue's in-flight flag until dropped.
#[derive(Debug)]
pub struct CsgFlush<'a> {
    queue: &'a CsgQueue,
    operations: Vec<CsgOperationInfo>,
    state: CsgBatchState,
}

impl<'a> CsgFlush<'a> {
    pub fn operations(&self) -> &[CsgOperationInfo] {
        &self.operations
    }

    pub fn state(&self) -> CsgBatchState {
        self.state
    }
}

impl Drop for CsgFlush<'_> {
    fn drop(&mut self) {
        self.queue.flushing.store(false, Ordering::Release);
    }
}

/// What a flush did to the chunk index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CsgFlushReport {
    pub state: CsgBatchState,
    pub num_operations: usize,
    /// Every node whose content was dropped, sorted by code.
    pub touched: Vec<ChunkCode>,
    /// Nodes that received the batch's edit, sorted by code.
    pub edited: Vec<ChunkCode>,
}

/// Drains `queue` and marks every chunk the batch touches.
///
/// A batch coalesces to its last operation: every touched node is
/// invalidated, but only the last operation is recorded in the edit lists of
/// the nodes at the edit's level of detail. Returns `None` when nothing was
/// flushed.
pub fn process_csg_operations(
    ctx: &MeshGenerationContext,
    octree: &mut ChunkOctree,
    queue: &CsgQueue,
    selector: &dyn LodSelector,
) -> Option<CsgFlushReport> {
    let mut flush = queue.begin_flush()?;

    let mut touched_set = FxHashSet::default();
    for op in flush.operations() {
        touched_set.extend(octree.find_nodes_in_aabb(ctx, &op.aabb(ctx)));
    }
    let mut touched: Vec<(i32, ChunkCode)> = touched_set
        .into_iter()
        .filter_map(|code| octree.get(code).map(|n| (n.size, code)))
        .collect();
    touched.sort_unstable();

    // Largest first: the first node near the viewer, or already as fine as it
    // gets, bounds the level of detail the edit lands on.
    let boundary = touched.iter().rposition(|&(size, code)| {
        size <= ctx.min_chunk_size()
            || octree
                .get(code)
                .is_some_and(|node| selector.is_proximate(ctx, node))
    });
    let active_len = boundary.map_or(0, |i| i + 1);

    for (i, &(_, code)) in touched.iter().enumerate() {
        let Some(node) = octree.get_mut(code) else { continue };
        let is_active = i < active_len;
        if !is_active {
            node.reduce_status = ReduceStatus::NeedToReduce;
        }
        node.content = None;
        node.invalidated = true;
        node.empty = false;
    }

    let mut edited = Vec::with_capacity(active_len);
    if let Some(last) = flush.operations().last() {
        for &(_, code) in &touched[..active_len] {
            if let Some(node) = octree.get_mut(code) {
                node.edits.push(last.clone());
                edited.push(code);
            }
        }
    }

    let num_operations = flush.operations().len();
    flush.state = CsgBatchState::Applied;
    log::debug!(
        "flushed {num_operations} CSG operations: {} chunks touched, {} edited",
        touched.len(),
        edited.len()
    );

    let mut touched: Vec<ChunkCode> = touched.into_iter().map(|(_, code)| code).collect();
    touched.sort_unstable();
    edited.sort_unstable();
    Some(CsgFlushReport {
        state: flush.state(),
        num_operations,
        touched,
        edited,
    })
}

/// The edits of `code` merged with those of all its descendants, in sequence
/// order without duplicates.
pub fn reduce_edits(octree: &ChunkOctree, code: ChunkCode) -> Vec<CsgOperationInfo> {
    let mut edits: Vec<CsgOperationInfo> = std::iter::once(code)
        .chain(octree.descendant_codes(code))
        .filter_map(|c| octree.get(c))
        .flat_map(|node| node.edits.iter().cloned())
        .collect();
    edits.sort_by_key(|e| e.sequence);
    edits.dedup_by_key(|e| e.sequence);
    edits
}

/// A base density field with a sequence of brush edits replayed on top.
pub struct EditedField<'a> {
    base: &'a dyn DensityField,
    edits: &'a [CsgOperationInfo],
    leaf_size_scale: f32,
    csg_offset: Vec3A,
}

impl<'a> EditedField<'a> {
    pub fn new(
        ctx: &MeshGenerationContext,
        base: &'a dyn DensityField,
        edits: &'a [CsgOperationInfo],
    ) -> Self {
        Self {
            base,
            edits,
            leaf_size_scale: ctx.leaf_size_scale,
            csg_offset: ctx.csg_offset(),
        }
    }

    #[inline]
    fn to_csg_space(&self, p: Vec3A) -> Vec3A {
        p / self.leaf_size_scale + self.csg_offset
    }
}

impl DensityField for EditedField<'_> {
    fn density(&self, p: Vec3A) -> f32 {
        let p_csg = self.to_csg_space(p);
        self.edits.iter().fold(self.base.density(p), |d, edit| {
            let brush = edit.brush_density(p_csg) * self.leaf_size_scale;
            match edit.op {
                CsgOperation::Add => union(d, brush),
                CsgOperation::Remove => subtract(d, brush),
            }
        })
    }

    fn material(&self, p: Vec3A) -> Option<MaterialId> {
        let p_csg = self.to_csg_space(p);
        self.edits
            .iter()
            .rev()
            .find(|edit| edit.op == CsgOperation::Add && edit.brush_density(p_csg) <= 0.0)
            .map(|edit| edit.material)
            .or_else(|| self.base.material(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkNode;

    fn ctx() -> MeshGenerationContext {
        MeshGenerationContext {
            voxels_per_chunk: 8,
            world_size: 64,
            world_origin: IVec3::splat(-32),
            lod_max_node_size: 32,
            ..Default::default()
        }
    }

    struct Nowhere;
    impl LodSelector for Nowhere {
        fn should_split(&self, _: &MeshGenerationContext, _: &ChunkNode) -> bool {
            false
        }
    }

    fn queue_sphere(
        queue: &CsgQueue,
        ctx: &MeshGenerationContext,
        center: Vec3A,
        op: CsgOperation,
    ) -> u64 {
        queue.push(ctx, center, Vec3A::splat(2.0), BrushShape::Sphere, 5, op)
    }

    #[test]
    fn brush_bounds_include_fudge() {
        let ctx = ctx();
        let queue = CsgQueue::new();
        queue_sphere(&queue, &ctx, Vec3A::new(4.0, 4.0, 4.0), CsgOperation::Add);
        let flush = queue.begin_flush().unwrap();
        let op = &flush.operations()[0];
        assert_eq!(op.center(&ctx), Vec3A::splat(4.0));
        let aabb = op.aabb(&ctx);
        assert_eq!(aabb.minimum, IVec3::splat(0));
        assert_eq!(aabb.shape, IVec3::splat(8));
        let offset = ctx.csg_offset();
        assert!(op.brush_density(Vec3A::splat(4.0) + offset) < 0.0);
        assert!(op.brush_density(Vec3A::new(7.0, 4.0, 4.0) + offset) > 0.0);
    }

    #[test]
    fn brush_origins_are_non_negative_inside_the_world() {
        let ctx = ctx();
        let queue = CsgQueue::new();
        let corner = ctx.world_origin.as_vec3a();
        queue_sphere(&queue, &ctx, corner, CsgOperation::Add);
        queue_sphere(&queue, &ctx, Vec3A::new(-10.0, 3.0, 31.0), CsgOperation::Remove);
        let flush = queue.begin_flush().unwrap();
        let ops = flush.operations();
        assert_eq!(ops[0].origin, Vec3A::ZERO);
        assert_eq!(ops[1].origin, Vec3A::new(22.0, 35.0, 63.0));
        assert!(ops.iter().all(|op| op.origin.cmpge(Vec3A::ZERO).all()));
        // The query box stays in voxel space.
        assert_eq!(ops[0].aabb(&ctx).minimum, IVec3::splat(-36));
    }

    #[test]
    fn only_one_flush_at_a_time() {
        let ctx = ctx();
        let queue = CsgQueue::new();
        assert!(queue.begin_flush().is_none());
        assert!(!queue.is_flushing());
        assert_eq!(queue.state(), None);

        queue_sphere(&queue, &ctx, Vec3A::ZERO, CsgOperation::Add);
        assert_eq!(queue.state(), Some(CsgBatchState::Pending));
        let flush = queue.begin_flush().unwrap();
        assert_eq!(flush.state(), CsgBatchState::Flushing);
        assert_eq!(queue.state(), Some(CsgBatchState::Flushing));

        // Queued during the flush: stays pending for the next one.
        queue_sphere(&queue, &ctx, Vec3A::ONE, CsgOperation::Remove);
        assert!(queue.begin_flush().is_none());
        assert_eq!(queue.len(), 1);

        drop(flush);
        let next = queue.begin_flush().unwrap();
        assert_eq!(next.operations().len(), 1);
        assert_eq!(next.operations()[0].op, CsgOperation::Remove);
        assert_eq!(next.operations()[0].sequence, 1);
    }

    #[test]
    fn concurrent_producers_drain_in_sequence_order() {
        const PRODUCERS: u64 = 4;
        const PER_PRODUCER: u64 = 250;
        let ctx = ctx();
        let queue = CsgQueue::new();
        let mut drained = Vec::new();
        std::thread::scope(|s| {
            let producers: Vec<_> = (0..PRODUCERS)
                .map(|i| {
                    let (queue, ctx) = (&queue, &ctx);
                    s.spawn(move || {
                        let op = if i % 2 == 0 {
                            CsgOperation::Add
                        } else {
                            CsgOperation::Remove
                        };
                        for _ in 0..PER_PRODUCER {
                            queue_sphere(queue, ctx, Vec3A::splat(4.0), op);
                        }
                    })
                })
                .collect();
            while !producers.iter().all(|p| p.is_finished()) {
                if let Some(flush) = queue.begin_flush() {
                    drained.extend(flush.operations().iter().map(|op| op.sequence));
                }
            }
        });
        if let Some(flush) = queue.begin_flush() {
            drained.extend(flush.operations().iter().map(|op| op.sequence));
        }
        assert_eq!(drained, (0..PRODUCERS * PER_PRODUCER).collect::<Vec<_>>());
    }

    #[test]
    fn concurrent_flushes_apply_every_edit_once() {
        let ctx = ctx();
        let queue = CsgQueue::new();
        let mut octree = ChunkOctree::new(&ctx).unwrap();
        let mut applied = 0;
        std::thread::scope(|s| {
            let producers: Vec<_> = (0..4)
                .map(|_| {
                    s.spawn(|| {
                        for _ in 0..250 {
                            queue_sphere(&queue, &ctx, Vec3A::splat(4.0), CsgOperation::Add);
                        }
                    })
                })
                .collect();
            while !producers.iter().all(|p| p.is_finished()) {
                if let Some(report) = process_csg_operations(&ctx, &mut octree, &queue, &Nowhere) {
                    applied += report.num_operations;
                }
            }
        });
        while let Some(report) = process_csg_operations(&ctx, &mut octree, &queue, &Nowhere) {
            applied += report.num_operations;
        }
        assert_eq!(applied, 1000);
        assert!(queue.is_empty() && !queue.is_flushing());

        let edited = octree.get(ctx.node_code(IVec3::ZERO, 8)).unwrap();
        assert!(!edited.edits.is_empty());
        assert!(edited.edits.windows(2).all(|w| w[0].sequence < w[1].sequence));
        assert_eq!(edited.edits.last().map(|e| e.sequence), Some(999));
    }

    #[test]
    fn flush_marks_touched_and_edits_finest_nodes() {
        let ctx = ctx();
        let mut octree = ChunkOctree::new(&ctx).unwrap();
        let queue = CsgQueue::new();
        queue_sphere(&queue, &ctx, Vec3A::splat(4.0), CsgOperation::Add);

        let report = process_csg_operations(&ctx, &mut octree, &queue, &Nowhere).unwrap();
        assert_eq!(report.num_operations, 1);
        assert_eq!(report.state, CsgBatchState::Applied);
        // One node per size from 8 up to lod_max_node_size.
        assert_eq!(report.touched.len(), 3);
        assert_eq!(report.edited.len(), 1);
        assert!(!queue.is_flushing());

        let edited = octree.get(report.edited[0]).unwrap();
        assert_eq!(edited.size, 8);
        assert_eq!(edited.edits.len(), 1);
        assert_eq!(edited.reduce_status, ReduceStatus::None);
        for &code in &report.touched {
            let node = octree.get(code).unwrap();
            assert!(node.invalidated && !node.empty && node.content.is_none());
            if node.size > 8 {
                assert_eq!(node.reduce_status, ReduceStatus::NeedToReduce);
                assert!(node.edits.is_empty());
            }
        }

        assert!(process_csg_operations(&ctx, &mut octree, &queue, &Nowhere).is_none());
    }

    #[test]
    fn batch_coalesces_to_last_operation() {
        let ctx = ctx();
        let mut once = ChunkOctree::new(&ctx).unwrap();
        let mut twice = ChunkOctree::new(&ctx).unwrap();
        let queue = CsgQueue::new();

        queue_sphere(&queue, &ctx, Vec3A::splat(4.0), CsgOperation::Add);
        let a = process_csg_operations(&ctx, &mut once, &queue, &Nowhere).unwrap();

        queue_sphere(&queue, &ctx, Vec3A::splat(4.0), CsgOperation::Add);
        queue_sphere(&queue, &ctx, Vec3A::splat(4.0), CsgOperation::Add);
        let b = process_csg_operations(&ctx, &mut twice, &queue, &Nowhere).unwrap();

        assert_eq!(a.touched, b.touched);
        assert_eq!(a.edited, b.edited);
        for &code in &a.touched {
            let (x, y) = (once.get(code).unwrap(), twice.get(code).unwrap());
            assert_eq!(x.edits.len(), y.edits.len());
            assert_eq!(x.invalidated, y.invalidated);
            assert_eq!(x.reduce_status, y.reduce_status);
        }
    }

    #[test]
    fn reduce_merges_descendant_edits_in_order() {
        let ctx = ctx();
        let mut octree = ChunkOctree::new(&ctx).unwrap();
        let queue = CsgQueue::new();
        queue_sphere(&queue, &ctx, Vec3A::splat(4.0), CsgOperation::Add);
        process_csg_operations(&ctx, &mut octree, &queue, &Nowhere).unwrap();
        queue_sphere(&queue, &ctx, Vec3A::splat(12.0), CsgOperation::Remove);
        process_csg_operations(&ctx, &mut octree, &queue, &Nowhere).unwrap();

        let parent = ctx.node_code(IVec3::ZERO, 32);
        let edits = reduce_edits(&octree, parent);
        assert_eq!(
            edits.iter().map(|e| e.sequence).collect::<Vec<_>>(),
            vec![0, 1]
        );
    }

    #[test]
    fn edited_field_replays_brushes() {
        let ctx = ctx();
        let ground = |p: Vec3A| p.y;
        let queue = CsgQueue::new();
        let (block, ball) = (BrushShape::Cube, BrushShape::Sphere);
        queue.push(&ctx, Vec3A::ZERO, Vec3A::splat(2.0), block, 3, CsgOperation::Remove);
        queue.push(&ctx, Vec3A::new(0.0, 4.0, 0.0), Vec3A::ONE, ball, 7, CsgOperation::Add);
        let flush = queue.begin_flush().unwrap();
        let field = EditedField::new(&ctx, &ground, flush.operations());

        // Carved out of the ground.
        assert!(field.density(Vec3A::new(0.0, -1.0, 0.0)) > 0.0);
        // Untouched ground.
        assert!(field.density(Vec3A::new(10.0, -1.0, 0.0)) < 0.0);
        // Added blob floating in the air, with its own material.
        let blob = Vec3A::new(0.0, 4.0, 0.0);
        assert!(field.density(blob) < 0.0);
        assert_eq!(field.material(blob), Some(7));
        assert_eq!(field.material(Vec3A::new(10.0, -1.0, 0.0)), None);
    }
}
