use crate::MaterialId;
use glam::Vec3A;

/// External density/material sampler.
///
/// Negative density is solid. Sampling must be deterministic for a fixed
/// position so that regenerating a chunk is idempotent.
pub trait DensityField: Send + Sync {
    /// Signed distance at world position `p`.
    fn density(&self, p: Vec3A) -> f32;

    /// Material of the solid at `p`. `None` uses the context's default solid
    /// material.
    fn material(&self, _p: Vec3A) -> Option<MaterialId> {
        None
    }
}

impl<F> DensityField for F
where
    F: Fn(Vec3A) -> f32 + Send + Sync,
{
    #[inline]
    fn density(&self, p: Vec3A) -> f32 {
        self(p)
    }
}

/// Bit `i` is set when corner `i` is solid.
#[inline]
pub fn corner_mask(samples: &[f32; 8]) -> u8 {
    let mut mask = 0;
    for (i, &d) in samples.iter().enumerate() {
        if d < 0.0 {
            mask |= 1 << i;
        }
    }
    mask
}

/// Homogeneous cells (all solid or all air) produce no surface.
#[inline]
pub fn cell_is_bipolar(corners: u8) -> bool {
    corners != 0 && corners != u8::MAX
}

#[inline]
pub fn corner_is_solid(corners: u8, corner: usize) -> bool {
    (corners >> corner) & 1 == 1
}

pub fn central_gradient(sdf: impl Fn(Vec3A) -> f32, p: Vec3A, delta: f32) -> Vec3A {
    let h = 0.5 * delta;
    let dx = Vec3A::new(h, 0.0, 0.0);
    let dy = Vec3A::new(0.0, h, 0.0);
    let dz = Vec3A::new(0.0, 0.0, h);
    Vec3A::new(
        sdf(p + dx) - sdf(p - dx),
        sdf(p + dy) - sdf(p - dy),
        sdf(p + dz) - sdf(p - dz),
    ) / delta
}

/// Locates the zero crossing on the edge `p0 -> p1`, whose endpoints must
/// have opposite signs. Bisects `steps` times, then interpolates linearly
/// inside the final bracket.
pub fn find_edge_crossing(
    sdf: impl Fn(Vec3A) -> f32,
    mut p0: Vec3A,
    mut d0: f32,
    mut p1: Vec3A,
    mut d1: f32,
    steps: u32,
) -> Vec3A {
    let solid0 = d0 < 0.0;
    debug_assert_ne!(solid0, d1 < 0.0);
    for _ in 0..steps {
        let mid = 0.5 * (p0 + p1);
        let d = sdf(mid);
        if (d < 0.0) == solid0 {
            p0 = mid;
            d0 = d;
        } else {
            p1 = mid;
            d1 = d;
        }
    }
    let diff = d0 - d1;
    if diff.abs() <= f32::EPSILON {
        return 0.5 * (p0 + p1);
    }
    let t = (d0 / diff).clamp(0.0, 1.0);
    p0 + t * (p1 - p0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corner_mask_marks_negative_corners() {
        assert_eq!(corner_mask(&[1.0; 8]), 0);
        assert_eq!(corner_mask(&[-1.0; 8]), 0xff);
        assert_eq!(
            corner_mask(&[-1.0, 1.0, -1.0, 1.0, -1.0, 1.0, -1.0, 1.0]),
            0b0101_0101
        );
        // Zero density is air.
        assert_eq!(corner_mask(&[0.0; 8]), 0);
    }

    #[test]
    fn homogeneous_cells_are_not_bipolar() {
        assert!(!cell_is_bipolar(0));
        assert!(!cell_is_bipolar(255));
        assert!(cell_is_bipolar(0b0000_0001));
        assert!(cell_is_bipolar(0b0111_1111));
    }

    #[test]
    fn edge_crossing_on_plane() {
        let sdf = |p: Vec3A| p.y - 10.25;
        let p0 = Vec3A::new(3.0, 10.0, 1.0);
        let p1 = Vec3A::new(3.0, 11.0, 1.0);
        let x = find_edge_crossing(sdf, p0, sdf(p0), p1, sdf(p1), 8);
        assert!((x - Vec3A::new(3.0, 10.25, 1.0)).length() < 1e-4, "{x:?}");
    }

    #[test]
    fn edge_crossing_on_sphere() {
        let sdf = |p: Vec3A| p.length() - 2.5;
        let p0 = Vec3A::new(2.0, 0.0, 0.0);
        let p1 = Vec3A::new(3.0, 0.0, 0.0);
        let x = find_edge_crossing(sdf, p1, sdf(p1), p0, sdf(p0), 12);
        assert!((x.x - 2.5).abs() < 1e-3, "{x:?}");
    }

    #[test]
    fn gradient_of_plane_is_its_normal() {
        let n = Vec3A::new(1.0, -2.0, 0.5).normalize();
        let sdf = |p: Vec3A| p.dot(n) - 1.0;
        let g = central_gradient(sdf, Vec3A::new(0.3, 4.0, -2.0), 0.01);
        assert!((g - n).length() < 1e-3, "{g:?}");
    }

    #[test]
    fn closures_are_density_fields() {
        fn sample(field: &dyn DensityField) -> (f32, Option<MaterialId>) {
            let p = Vec3A::new(0.0, 1.0, 0.0);
            (field.density(p), field.material(p))
        }
        assert_eq!(sample(&|p: Vec3A| p.y - 3.0), (-2.0, None));
    }
}
