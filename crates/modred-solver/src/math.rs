//! Small dense/sparse helpers shared by the reduction modules.
//!
//! Rotations use unit quaternions stored as `[w, x, y, z]` inside position
//! vectors. Angular increments and velocities are rotation vectors
//! (angle times unit axis).

use nalgebra::{DMatrix, DVector, Matrix3, Quaternion, UnitQuaternion, Vector3};
use nalgebra_sparse::{CooMatrix, CsrMatrix};

/// Cross-product matrix: `skew(a) * b == a × b`.
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    v.cross_matrix()
}

pub fn read_vec3(v: &DVector<f64>, offset: usize) -> Vector3<f64> {
    Vector3::new(v[offset], v[offset + 1], v[offset + 2])
}

pub fn write_vec3(v: &mut DVector<f64>, offset: usize, value: &Vector3<f64>) {
    v.fixed_rows_mut::<3>(offset).copy_from(value);
}

pub fn read_quat(v: &DVector<f64>, offset: usize) -> UnitQuaternion<f64> {
    UnitQuaternion::from_quaternion(Quaternion::new(
        v[offset],
        v[offset + 1],
        v[offset + 2],
        v[offset + 3],
    ))
}

pub fn write_quat(v: &mut DVector<f64>, offset: usize, q: &UnitQuaternion<f64>) {
    v[offset] = q.w;
    v[offset + 1] = q.i;
    v[offset + 2] = q.j;
    v[offset + 3] = q.k;
}

/// Angle times axis of `q`, with the angle taken in `[0, π]`.
///
/// Uses `atan2` so that tiny rotations keep full relative precision.
pub fn rotation_vector(q: &UnitQuaternion<f64>) -> Vector3<f64> {
    let (w, v) = if q.w < 0.0 {
        (-q.w, -q.imag())
    } else {
        (q.w, q.imag())
    };
    let s = v.norm();
    if s < 1e-300 {
        return Vector3::zeros();
    }
    v * (2.0 * s.atan2(w) / s)
}

pub fn quat_from_rotation_vector(v: &Vector3<f64>) -> UnitQuaternion<f64> {
    UnitQuaternion::from_scaled_axis(*v)
}

pub fn block3(m: &DMatrix<f64>, row: usize, col: usize) -> Matrix3<f64> {
    m.fixed_view::<3, 3>(row, col).into_owned()
}

pub fn set_block3(m: &mut DMatrix<f64>, row: usize, col: usize, b: &Matrix3<f64>) {
    m.fixed_view_mut::<3, 3>(row, col).copy_from(b);
}

pub fn add_block3(m: &mut DMatrix<f64>, row: usize, col: usize, b: &Matrix3<f64>) {
    let mut view = m.fixed_view_mut::<3, 3>(row, col);
    view += b;
}

/// Copies a rectangular block out of a CSR matrix.
pub fn csr_block(
    m: &CsrMatrix<f64>,
    row0: usize,
    col0: usize,
    nrows: usize,
    ncols: usize,
) -> CsrMatrix<f64> {
    let mut coo = CooMatrix::new(nrows, ncols);
    for (i, j, v) in m.triplet_iter() {
        if i >= row0 && i < row0 + nrows && j >= col0 && j < col0 + ncols {
            coo.push(i - row0, j - col0, *v);
        }
    }
    CsrMatrix::from(&coo)
}

/// Symmetric bordered matrix `[[K, Cqᵗ], [Cq, 0]]`.
pub fn bordered_symmetric(k: &CsrMatrix<f64>, cq: &CsrMatrix<f64>) -> CsrMatrix<f64> {
    let n = k.nrows();
    let m = cq.nrows();
    let mut coo = CooMatrix::new(n + m, n + m);
    for (i, j, v) in k.triplet_iter() {
        coo.push(i, j, *v);
    }
    for (i, j, v) in cq.triplet_iter() {
        coo.push(n + i, j, *v);
        coo.push(j, n + i, *v);
    }
    CsrMatrix::from(&coo)
}

pub fn csr_to_dense(m: &CsrMatrix<f64>) -> DMatrix<f64> {
    DMatrix::from(m)
}

/// Stacks `top` over `bottom` (equal column counts).
pub fn vstack(top: &DMatrix<f64>, bottom: &DMatrix<f64>) -> DMatrix<f64> {
    let mut out = DMatrix::zeros(top.nrows() + bottom.nrows(), top.ncols());
    out.rows_mut(0, top.nrows()).copy_from(top);
    out.rows_mut(top.nrows(), bottom.nrows()).copy_from(bottom);
    out
}

/// Mean of the first `n` diagonal entries.
pub fn diagonal_head_mean(m: &DMatrix<f64>, n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    (0..n).map(|i| m[(i, i)]).sum::<f64>() / n as f64
}
