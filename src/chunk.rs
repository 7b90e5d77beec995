//! Chunk index: every node of the world octree down to the finest chunk size,
//! addressed by its octree path code.

use crate::{
    csg::CsgOperationInfo,
    error::{MeshError, Result},
    ChunkCode, ChunkContent, ChunkRegion, MeshGenerationContext,
};
use glam::{IVec3, Vec3A};
use ilattice::prelude::Extent;
use rustc_hash::FxHashMap;

pub const ROOT_CHUNK_CODE: ChunkCode = 1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReduceStatus {
    #[default]
    None,
    /// Must inherit its descendants' edits before it is regenerated.
    NeedToReduce,
}

#[derive(Clone, Debug)]
pub struct ChunkNode {
    pub code: ChunkCode,
    pub min: IVec3,
    pub size: i32,
    /// Selected for meshing at the current level of detail.
    pub active: bool,
    /// Generated and found to contain no surface.
    pub empty: bool,
    /// Content is stale and must be regenerated.
    pub invalidated: bool,
    pub reduce_status: ReduceStatus,
    /// Edits in sequence order.
    pub edits: Vec<CsgOperationInfo>,
    pub content: Option<ChunkContent>,
}

impl ChunkNode {
    fn new(code: ChunkCode, min: IVec3, size: i32) -> Self {
        Self {
            code,
            min,
            size,
            active: false,
            empty: false,
            invalidated: true,
            reduce_status: ReduceStatus::None,
            edits: Vec::new(),
            content: None,
        }
    }

    pub fn region(&self) -> ChunkRegion {
        ChunkRegion {
            code: self.code,
            min: self.min,
            size: self.size,
        }
    }

    pub fn extent(&self) -> Extent<IVec3> {
        Extent::from_min_and_shape(self.min, IVec3::splat(self.size))
    }

    /// Center of the node in world units.
    pub fn world_center(&self, ctx: &MeshGenerationContext) -> Vec3A {
        ctx.voxel_to_world(self.min.as_vec3a() + Vec3A::splat(self.size as f32 / 2.0))
    }

    pub fn needs_generation(&self) -> bool {
        self.active && self.invalidated
    }
}

/// Decides how finely the world is meshed.
pub trait LodSelector {
    /// True if `node` should be replaced by its children.
    fn should_split(&self, ctx: &MeshGenerationContext, node: &ChunkNode) -> bool;

    /// True if `node` is close enough to the viewer for an edit on it to be
    /// applied at its own level of detail.
    fn is_proximate(&self, ctx: &MeshGenerationContext, node: &ChunkNode) -> bool {
        self.should_split(ctx, node)
    }
}

/// Splits nodes whose center is closer to the camera than
/// `split_distance_factor` times their world size.
#[derive(Clone, Copy, Debug)]
pub struct CameraSelector {
    /// World-space camera position.
    pub position: Vec3A,
    pub split_distance_factor: f32,
}

impl CameraSelector {
    pub fn new(position: Vec3A) -> Self {
        Self {
            position,
            split_distance_factor: 1.5,
        }
    }
}

impl LodSelector for CameraSelector {
    fn should_split(&self, ctx: &MeshGenerationContext, node: &ChunkNode) -> bool {
        let world_size = node.size as f32 * ctx.leaf_size_scale;
        node.world_center(ctx).distance(self.position) < world_size * self.split_distance_factor
    }
}

#[derive(Clone, Debug, Default)]
pub struct ChunkOctree {
    nodes: FxHashMap<ChunkCode, ChunkNode>,
}

impl ChunkOctree {
    /// Builds every node from the world root down to the minimum chunk size.
    pub fn new(ctx: &MeshGenerationContext) -> Result<Self> {
        ctx.validate()?;
        let mut me = Self::default();
        me.build_recursive(ctx, ROOT_CHUNK_CODE, ctx.world_origin, ctx.world_size);
        log::debug!("chunk octree built with {} nodes", me.nodes.len());
        Ok(me)
    }

    fn build_recursive(
        &mut self,
        ctx: &MeshGenerationContext,
        code: ChunkCode,
        min: IVec3,
        size: i32,
    ) {
        self.nodes
            .entry(code)
            .or_insert_with(|| ChunkNode::new(code, min, size));
        if size <= ctx.min_chunk_size() {
            return;
        }
        let half = size / 2;
        for i in 0..8 {
            let child_min = min + child_offset(i) * half;
            self.build_recursive(ctx, child_code(code, i), child_min, half);
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, code: ChunkCode) -> Option<&ChunkNode> {
        self.nodes.get(&code)
    }

    pub fn get_mut(&mut self, code: ChunkCode) -> Option<&mut ChunkNode> {
        self.nodes.get_mut(&code)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ChunkNode> {
        self.nodes.values()
    }

    /// Existing children of `code`.
    pub fn children(&self, code: ChunkCode) -> impl Iterator<Item = &ChunkNode> + '_ {
        (0..8).filter_map(move |i| self.nodes.get(&child_code(code, i)))
    }

    /// Codes of all nodes strictly below `code`.
    pub fn descendant_codes(&self, code: ChunkCode) -> Vec<ChunkCode> {
        let mut out = Vec::new();
        let mut stack: Vec<ChunkCode> = self.children(code).map(|c| c.code).collect();
        while let Some(c) = stack.pop() {
            out.push(c);
            stack.extend(self.children(c).map(|n| n.code));
        }
        out
    }

    /// Nodes no larger than `lod_max_node_size` overlapping `aabb`.
    pub fn find_nodes_in_aabb(
        &self,
        ctx: &MeshGenerationContext,
        aabb: &Extent<IVec3>,
    ) -> Vec<ChunkCode> {
        let mut out = Vec::new();
        self.visit_overlapping(ROOT_CHUNK_CODE, aabb, &mut |node| {
            if node.size <= ctx.lod_max_node_size {
                out.push(node.code);
            }
            true
        });
        out
    }

    /// Active nodes overlapping `aabb`.
    pub fn find_active_in_aabb(&self, aabb: &Extent<IVec3>) -> Vec<ChunkCode> {
        let mut out = Vec::new();
        self.visit_overlapping(ROOT_CHUNK_CODE, aabb, &mut |node| {
            if node.active {
                out.push(node.code);
                // Active nodes form a cut through the tree.
                return false;
            }
            true
        });
        out
    }

    /// The active node containing voxel `p`, if any.
    pub fn find_active_containing(&self, p: IVec3) -> Option<&ChunkNode> {
        let mut node = self.nodes.get(&ROOT_CHUNK_CODE)?;
        if !node.region().contains(p) {
            return None;
        }
        loop {
            if node.active {
                return Some(node);
            }
            node = self.children(node.code).find(|c| c.region().contains(p))?;
        }
    }

    fn visit_overlapping(
        &self,
        code: ChunkCode,
        aabb: &Extent<IVec3>,
        visit: &mut impl FnMut(&ChunkNode) -> bool,
    ) {
        let Some(node) = self.nodes.get(&code) else { return };
        if node.extent().intersection(aabb).is_empty() {
            return;
        }
        if !visit(node) {
            return;
        }
        for i in 0..8 {
            self.visit_overlapping(child_code(code, i), aabb, visit);
        }
    }

    /// Recomputes the active set. A node is split while it is larger than
    /// `lod_max_node_size`, or while the selector asks for more detail and it
    /// is larger than the minimum chunk size. Newly activated nodes without
    /// content are invalidated.
    pub fn select_active_nodes(
        &mut self,
        ctx: &MeshGenerationContext,
        selector: &dyn LodSelector,
    ) -> Vec<ChunkCode> {
        let mut active = Vec::new();
        let mut stack = vec![ROOT_CHUNK_CODE];
        while let Some(code) = stack.pop() {
            let Some(node) = self.nodes.get(&code) else { continue };
            let split = node.size > ctx.lod_max_node_size
                || (node.size > ctx.min_chunk_size() && selector.should_split(ctx, node));
            let has_children = self.children(code).next().is_some();
            if split && has_children {
                stack.extend(self.children(code).map(|c| c.code));
            } else {
                active.push(code);
            }
        }
        active.sort_unstable();

        for node in self.nodes.values_mut() {
            node.active = false;
        }
        for code in &active {
            if let Some(node) = self.nodes.get_mut(code) {
                node.active = true;
                if node.content.is_none() && !node.empty {
                    node.invalidated = true;
                }
            }
        }
        active
    }

    /// Inserts the aligned node `(min, size)`, its missing ancestors and all
    /// its descendants down to the minimum chunk size.
    pub fn insert_subtree(
        &mut self,
        ctx: &MeshGenerationContext,
        min: IVec3,
        size: i32,
    ) -> Result<ChunkCode> {
        let rel = min - ctx.world_origin;
        if !crate::context::is_power_of_two(size)
            || size < ctx.min_chunk_size()
            || size > ctx.world_size
            || rel.cmplt(IVec3::ZERO).any()
            || (rel + IVec3::splat(size)).cmpgt(IVec3::splat(ctx.world_size)).any()
            || rel % size != IVec3::ZERO
        {
            return Err(MeshError::invalid_config(format!(
                "chunk ({min}, {size}) is not an aligned node of the world octree"
            )));
        }
        let code = ctx.node_code(min, size);
        let mut ancestor = code;
        while let Some(parent) = parent_code(ancestor) {
            ancestor = parent;
            let (a_min, a_size) = ctx.node_for_code(ancestor);
            self.nodes
                .entry(ancestor)
                .or_insert_with(|| ChunkNode::new(ancestor, a_min, a_size));
        }
        self.build_recursive(ctx, code, min, size);
        Ok(code)
    }

    /// Removes `code` and all its descendants, returning them.
    pub fn remove_subtree(&mut self, code: ChunkCode) -> Result<Vec<ChunkNode>> {
        if !self.nodes.contains_key(&code) {
            return Err(MeshError::UnknownChunk(code));
        }
        let mut codes = self.descendant_codes(code);
        codes.push(code);
        Ok(codes
            .into_iter()
            .filter_map(|c| self.nodes.remove(&c))
            .collect())
    }
}

#[inline]
pub fn child_code(code: ChunkCode, child: usize) -> ChunkCode {
    (code << 3) | child as ChunkCode
}

#[inline]
pub fn parent_code(code: ChunkCode) -> Option<ChunkCode> {
    (code > ROOT_CHUNK_CODE).then_some(code >> 3)
}

#[inline]
fn child_offset(child: usize) -> IVec3 {
    IVec3::new(
        (child & 1) as i32,
        ((child >> 1) & 1) as i32,
        ((child >> 2) & 1) as i32,
    )
}
