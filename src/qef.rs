use glam::{Mat3, Vec3A, Vec4};
use std::ops::Add;

/// Jacobi sweeps used to diagonalize `A^T A`.
pub const SVD_SWEEPS: usize = 10;

/// Singular values (or their reciprocals) below this are dropped from the
/// pseudo-inverse.
pub const PSEUDO_INVERSE_THRESHOLD: f32 = 0.1;

/// Quadric Error Function accumulated from hermite samples.
///
/// `x^T A^T A x - 2 x^T A^T b + b^T b`
///
/// Each `(p, n)` sample contributes the plane `n · (x - p) = 0`. The minimizer
/// is found with a truncated SVD pseudo-inverse around the mass point of all
/// samples, so rank-deficient systems (flat or single-plane cells) collapse
/// onto the mass point instead of diverging.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QefData {
    ata: SymMat3,
    atb: Vec3A,
    btb: f32,
    /// `xyz` is the running sum of sample positions, `w` the sample count.
    mass_point: Vec4,
}

impl QefData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_samples(samples: impl IntoIterator<Item = (Vec3A, Vec3A)>) -> Self {
        let mut qef = Self::default();
        for (p, n) in samples {
            QefData::add(&mut qef, p, n);
        }
        qef
    }

    pub fn add(&mut self, p: Vec3A, n: Vec3A) {
        let d = n.dot(p);
        self.ata.add_outer_product(n);
        self.atb += n * d;
        self.btb += d * d;
        self.mass_point += Vec4::new(p.x, p.y, p.z, 1.0);
    }

    /// Number of samples accumulated.
    pub fn num_samples(&self) -> f32 {
        self.mass_point.w
    }

    pub fn mass_point(&self) -> Vec3A {
        Vec3A::from(self.mass_point.truncate()) / self.mass_point.w.max(1.0)
    }

    /// Residual error `x^T A^T A x - 2 x^T A^T b + b^T b`, clamped at zero.
    pub fn error(&self, x: Vec3A) -> f32 {
        let ax = self.ata.mul_vec3a(x);
        (x.dot(ax) - 2.0 * x.dot(self.atb) + self.btb).max(0.0)
    }

    /// Returns the minimizing position and its error.
    pub fn solve(&self) -> (Vec3A, f32) {
        let mass_point = self.mass_point();

        // Re-center so the pseudo-inverse only has to resolve the offset from
        // the mass point.
        let atb = self.atb - self.ata.mul_vec3a(mass_point);

        let x = solve_svd(&self.ata, atb) + mass_point;
        (x, self.error(x))
    }
}

impl Add for QefData {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            ata: SymMat3 {
                m00: self.ata.m00 + rhs.ata.m00,
                m01: self.ata.m01 + rhs.ata.m01,
                m02: self.ata.m02 + rhs.ata.m02,
                m11: self.ata.m11 + rhs.ata.m11,
                m12: self.ata.m12 + rhs.ata.m12,
                m22: self.ata.m22 + rhs.ata.m22,
            },
            atb: self.atb + rhs.atb,
            btb: self.btb + rhs.btb,
            mass_point: self.mass_point + rhs.mass_point,
        }
    }
}

/// Upper triangle of a symmetric 3x3 matrix.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct SymMat3 {
    m00: f32,
    m01: f32,
    m02: f32,
    m11: f32,
    m12: f32,
    m22: f32,
}

impl SymMat3 {
    fn add_outer_product(&mut self, n: Vec3A) {
        self.m00 += n.x * n.x;
        self.m01 += n.x * n.y;
        self.m02 += n.x * n.z;
        self.m11 += n.y * n.y;
        self.m12 += n.y * n.z;
        self.m22 += n.z * n.z;
    }

    fn mul_vec3a(&self, v: Vec3A) -> Vec3A {
        Vec3A::new(
            self.m00 * v.x + self.m01 * v.y + self.m02 * v.z,
            self.m01 * v.x + self.m11 * v.y + self.m12 * v.z,
            self.m02 * v.x + self.m12 * v.y + self.m22 * v.z,
        )
    }

    fn diagonal(&self) -> Vec3A {
        Vec3A::new(self.m00, self.m11, self.m22)
    }
}

fn solve_svd(ata: &SymMat3, atb: Vec3A) -> Vec3A {
    let (sigma, v) = jacobi_eigen(*ata);
    pseudo_inverse(sigma, &v).mul_vec3a(atb)
}

/// Diagonalizes `m` with cyclic Jacobi rotations. Returns the diagonal and the
/// accumulated rotation `V` (columns are the eigenvectors).
fn jacobi_eigen(mut m: SymMat3) -> (Vec3A, Mat3) {
    let mut v = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
    for _ in 0..SVD_SWEEPS {
        rotate_01(&mut m, &mut v);
        rotate_02(&mut m, &mut v);
        rotate_12(&mut m, &mut v);
    }
    // `v` is stored row-major.
    let v = Mat3::from_cols_array_2d(&v).transpose();
    (m.diagonal(), v)
}

/// Cosine and sine of the rotation that zeroes `a_pq`.
fn givens_coeffs_sym(a_pp: f32, a_pq: f32, a_qq: f32) -> (f32, f32) {
    if a_pq == 0.0 {
        return (1.0, 0.0);
    }
    let tau = (a_qq - a_pp) / (2.0 * a_pq);
    let stt = (1.0 + tau * tau).sqrt();
    let tan = 1.0 / if tau >= 0.0 { tau + stt } else { tau - stt };
    let c = 1.0 / (1.0 + tan * tan).sqrt();
    (c, tan * c)
}

#[inline]
fn rotate_xy(x: &mut f32, y: &mut f32, c: f32, s: f32) {
    let (u, v) = (*x, *y);
    *x = c * u - s * v;
    *y = s * u + c * v;
}

/// Applies the rotation to the diagonal pair `(a_pp, a_qq)` given `a_pq`.
#[inline]
fn rotateq_xy(x: &mut f32, y: &mut f32, a: f32, c: f32, s: f32) {
    let cc = c * c;
    let ss = s * s;
    let mx = 2.0 * c * s * a;
    let (u, v) = (*x, *y);
    *x = cc * u - mx + ss * v;
    *y = ss * u + mx + cc * v;
}

fn rotate_v(v: &mut [[f32; 3]; 3], p: usize, q: usize, c: f32, s: f32) {
    for row in v.iter_mut() {
        let (mut a, mut b) = (row[p], row[q]);
        rotate_xy(&mut a, &mut b, c, s);
        row[p] = a;
        row[q] = b;
    }
}

fn rotate_01(m: &mut SymMat3, v: &mut [[f32; 3]; 3]) {
    if m.m01 == 0.0 {
        return;
    }
    let (c, s) = givens_coeffs_sym(m.m00, m.m01, m.m11);
    rotateq_xy(&mut m.m00, &mut m.m11, m.m01, c, s);
    rotate_xy(&mut m.m02, &mut m.m12, c, s);
    m.m01 = 0.0;
    rotate_v(v, 0, 1, c, s);
}

fn rotate_02(m: &mut SymMat3, v: &mut [[f32; 3]; 3]) {
    if m.m02 == 0.0 {
        return;
    }
    let (c, s) = givens_coeffs_sym(m.m00, m.m02, m.m22);
    rotateq_xy(&mut m.m00, &mut m.m22, m.m02, c, s);
    rotate_xy(&mut m.m01, &mut m.m12, c, s);
    m.m02 = 0.0;
    rotate_v(v, 0, 2, c, s);
}

fn rotate_12(m: &mut SymMat3, v: &mut [[f32; 3]; 3]) {
    if m.m12 == 0.0 {
        return;
    }
    let (c, s) = givens_coeffs_sym(m.m11, m.m12, m.m22);
    rotateq_xy(&mut m.m11, &mut m.m22, m.m12, c, s);
    rotate_xy(&mut m.m01, &mut m.m02, c, s);
    m.m12 = 0.0;
    rotate_v(v, 1, 2, c, s);
}

#[inline]
fn truncated_inverse(x: f32) -> f32 {
    if x.abs() < PSEUDO_INVERSE_THRESHOLD || (1.0 / x).abs() < PSEUDO_INVERSE_THRESHOLD {
        0.0
    } else {
        1.0 / x
    }
}

/// `V diag(1/sigma) V^T` with small terms dropped.
fn pseudo_inverse(sigma: Vec3A, v: &Mat3) -> Mat3 {
    let inv = Mat3::from_diagonal(glam::Vec3::new(
        truncated_inverse(sigma.x),
        truncated_inverse(sigma.y),
        truncated_inverse(sigma.z),
    ));
    *v * inv * v.transpose()
}
