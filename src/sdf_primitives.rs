//! Signed distance functions for CSG brushes and test fields. Negative inside.

use glam::{Vec2, Vec3A, Vec3Swizzles};

pub fn sphere(r: f32, p: Vec3A) -> f32 {
    p.length() - r
}

pub fn plane(o: Vec3A, n: Vec3A, p: Vec3A) -> f32 {
    (p - o).dot(n)
}

/// Axis-aligned box with half extents `b`.
pub fn cube(b: Vec3A, p: Vec3A) -> f32 {
    let q = p.abs() - b;
    q.max(Vec3A::ZERO).length() + q.max_element().min(0.0)
}

pub fn torus(t: Vec2, p: Vec3A) -> f32 {
    let q = Vec2::new(p.xz().length() - t.x, p.y);
    q.length() - t.y
}

#[inline]
pub fn union(a: f32, b: f32) -> f32 {
    a.min(b)
}

/// `a` with `b` carved out of it.
#[inline]
pub fn subtract(a: f32, b: f32) -> f32 {
    a.max(-b)
}
