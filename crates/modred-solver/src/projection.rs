//! Frame-dependent transformation matrices and rigid/elastic projectors.
//!
//! `P_B1`/`P_I1` map a frame twist to item velocities, `P_B2`/`P_I2` rotate
//! item velocities from frame axes to absolute axes (translations only),
//! `P_W` is `P_B2` padded with identity over the modal coordinates.
//! `U = [P_B2ᵗ P_B1; 0]` spans rigid motion in the reduced local basis and
//! `Q` extracts its mass-weighted best fit.

use nalgebra::{DMatrix, DVector, UnitQuaternion, Vector3};

use crate::error::{ModalError, Result};
use crate::frame::FrameMoving;
use crate::items::PhysicsItem;
use crate::math::{read_quat, read_vec3, set_block3, skew};
use crate::partition::CoordinatePartition;

#[derive(Debug, Clone, Default)]
pub struct TransformationMatrices {
    pub p_b1: DMatrix<f64>,
    pub p_b2: DMatrix<f64>,
    pub p_i1: DMatrix<f64>,
    pub p_i2: DMatrix<f64>,
    pub p_w: DMatrix<f64>,
}

/// `P_1` (twist map) for items laid out consecutively in `x` from `offset`.
fn twist_map(frame: &FrameMoving, x: &DVector<f64>, offset: usize, n_items: usize) -> DMatrix<f64> {
    let a_f = frame.a();
    let mut p = DMatrix::zeros(n_items * PhysicsItem::DOF_W, 6);
    for i in 0..n_items {
        let off_x = offset + i * PhysicsItem::DOF;
        let r = read_vec3(x, off_x);
        let q = read_quat(x, off_x + 3);
        let rel: UnitQuaternion<f64> = q.conjugate() * frame.rot;
        set_block3(&mut p, 6 * i, 0, &nalgebra::Matrix3::identity());
        set_block3(&mut p, 6 * i, 3, &(-skew(&(r - frame.pos)) * a_f));
        set_block3(&mut p, 6 * i + 3, 3, rel.to_rotation_matrix().matrix());
    }
    p
}

/// `P_2` (frame rotation on translational blocks).
fn rotation_map(frame: &FrameMoving, n_items: usize) -> DMatrix<f64> {
    let a_f = frame.a();
    let mut p = DMatrix::identity(n_items * PhysicsItem::DOF_W, n_items * PhysicsItem::DOF_W);
    for i in 0..n_items {
        set_block3(&mut p, 6 * i, 6 * i, &a_f);
    }
    p
}

impl TransformationMatrices {
    /// Builds the transforms from the boundary positions `x_boundary` and the
    /// last reconstructed full positions `x_full_old` (internal part only).
    ///
    /// `P_I2` only depends on the frame and is always built. `with_internal`
    /// skips `P_I1`, which needs reconstructed internal positions.
    pub fn compute(
        p: &CoordinatePartition,
        frame: &FrameMoving,
        x_boundary: &DVector<f64>,
        x_full_old: &DVector<f64>,
        with_internal: bool,
    ) -> Result<Self> {
        if x_boundary.len() < p.n_boundary_coords {
            return Err(ModalError::dimension(
                "boundary positions",
                (p.n_boundary_coords, 1),
                (x_boundary.len(), 1),
            ));
        }
        let n_b = p.n_boundary_items();
        let p_b1 = twist_map(frame, x_boundary, 0, n_b);
        let p_b2 = rotation_map(frame, n_b);

        let n_i = p.n_internal_items();
        let p_i2 = rotation_map(frame, n_i);
        let p_i1 = if with_internal {
            if x_full_old.len() != p.n_full_coords() {
                return Err(ModalError::dimension(
                    "full positions",
                    (p.n_full_coords(), 1),
                    (x_full_old.len(), 1),
                ));
            }
            twist_map(frame, x_full_old, p.n_boundary_coords, n_i)
        } else {
            DMatrix::zeros(p.n_internal_coords_w, 6)
        };

        let n_red = p.n_reduced_w();
        let mut p_w = DMatrix::identity(n_red, n_red);
        p_w.view_mut((0, 0), (p.n_boundary_coords_w, p.n_boundary_coords_w))
            .copy_from(&p_b2);

        Ok(Self {
            p_b1,
            p_b2,
            p_i1,
            p_i2,
            p_w,
        })
    }
}

/// Rigid-body null space `U` and the projectors derived from it.
#[derive(Debug, Clone)]
pub struct Projectors {
    pub u: DMatrix<f64>,
    /// `Uᵗ M_red U`
    pub utmu: DMatrix<f64>,
    /// `UTMU⁻¹ Uᵗ M_red`
    pub q: DMatrix<f64>,
    pub p_par: DMatrix<f64>,
    pub p_perp: DMatrix<f64>,
}

impl Projectors {
    pub fn compute(
        p: &CoordinatePartition,
        t: &TransformationMatrices,
        m_red: &DMatrix<f64>,
    ) -> Result<Self> {
        let n_red = p.n_reduced_w();
        if m_red.shape() != (n_red, n_red) {
            return Err(ModalError::dimension("M_red", (n_red, n_red), m_red.shape()));
        }
        let mut u = DMatrix::zeros(n_red, 6);
        u.rows_mut(0, p.n_boundary_coords_w)
            .copy_from(&(t.p_b2.transpose() * &t.p_b1));

        let utm = u.transpose() * m_red;
        let utmu = &utm * &u;
        let q = solve_utmu(&utmu, &utm)?;
        let p_par = &u * &q;
        let p_perp = DMatrix::identity(n_red, n_red) - &p_par;
        Ok(Self {
            u,
            utmu,
            q,
            p_par,
            p_perp,
        })
    }

    /// `UTMU⁻¹ · rhs`.
    pub fn utmu_solve(&self, rhs: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        solve_utmu(&self.utmu, rhs)
    }

    pub fn utmu_solve_vector(&self, rhs: &DVector<f64>) -> Result<DVector<f64>> {
        self.utmu
            .clone()
            .col_piv_qr()
            .solve(rhs)
            .ok_or_else(utmu_singular)
    }
}

fn utmu_singular() -> ModalError {
    ModalError::Singular {
        which: "Uᵗ M_red U".to_string(),
        detail: "reduced mass does not resolve rigid motion".to_string(),
    }
}

fn solve_utmu(utmu: &DMatrix<f64>, rhs: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    utmu.clone().col_piv_qr().solve(rhs).ok_or_else(utmu_singular)
}

/// Best-fit frame twist `Q u` of a reduced local vector, split into
/// translation and rotation.
pub fn frame_part(proj: &Projectors, u_loc: &DVector<f64>) -> (Vector3<f64>, Vector3<f64>) {
    let twist = &proj.q * u_loc;
    (
        Vector3::new(twist[0], twist[1], twist[2]),
        Vector3::new(twist[3], twist[4], twist[5]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::write_quat;
    use approx::assert_relative_eq;

    fn two_items() -> (CoordinatePartition, DVector<f64>) {
        let p = CoordinatePartition {
            n_boundary_coords: 14,
            n_boundary_coords_w: 12,
            n_modes_coords_w: 2,
            ..Default::default()
        };
        let mut x = DVector::zeros(14);
        x.fixed_rows_mut::<3>(0).copy_from(&Vector3::new(-1.0, 0.2, 0.0));
        write_quat(&mut x, 3, &UnitQuaternion::from_euler_angles(0.1, 0.0, 0.3));
        x.fixed_rows_mut::<3>(7).copy_from(&Vector3::new(1.0, -0.1, 0.4));
        write_quat(&mut x, 10, &UnitQuaternion::from_euler_angles(0.0, -0.2, 0.0));
        (p, x)
    }

    fn mass(n: usize) -> DMatrix<f64> {
        let a = DMatrix::from_fn(n, n, |i, j| ((i * 7 + j * 3) % 5) as f64 * 0.1);
        &a * a.transpose() + DMatrix::identity(n, n)
    }

    #[test]
    fn projectors_are_complementary_and_idempotent() {
        let (p, x) = two_items();
        let rot = UnitQuaternion::from_euler_angles(0.4, -0.3, 0.9);
        let frame = FrameMoving::at(Vector3::new(0.1, 0.0, 0.2), rot);
        let t = TransformationMatrices::compute(&p, &frame, &x, &DVector::zeros(14), false)
            .unwrap();
        let proj = Projectors::compute(&p, &t, &mass(14)).unwrap();

        let n = p.n_reduced_w();
        assert_relative_eq!(&proj.p_perp * &proj.p_perp, proj.p_perp.clone(), epsilon = 1e-10);
        assert_relative_eq!(&proj.p_par + &proj.p_perp, DMatrix::identity(n, n), epsilon = 1e-12);
        assert!((&proj.p_perp * &proj.u).norm() < 1e-10);
        assert_relative_eq!(&proj.q * &proj.u, DMatrix::identity(6, 6), epsilon = 1e-10);
    }

    #[test]
    fn twist_map_reproduces_rigid_velocity() {
        let (p, x) = two_items();
        let frame =
            FrameMoving::at(Vector3::zeros(), UnitQuaternion::from_euler_angles(0.0, 0.5, 0.0));
        let t = TransformationMatrices::compute(&p, &frame, &x, &DVector::zeros(14), false)
            .unwrap();

        // frame spins about its local z; item velocity is w_abs × r
        let mut twist = DVector::zeros(6);
        twist[5] = 1.0;
        let v = &t.p_b1 * twist;
        let r0 = read_vec3(&x, 0);
        let w_abs = frame.rot * Vector3::z();
        assert_relative_eq!(Vector3::new(v[0], v[1], v[2]), w_abs.cross(&r0), epsilon = 1e-12);
        // the item sees the same spin in its own axes
        let q0 = read_quat(&x, 3);
        assert_relative_eq!(Vector3::new(v[3], v[4], v[5]), q0.inverse() * w_abs, epsilon = 1e-12);
    }

    #[test]
    fn p_w_pads_modal_identity() {
        let (p, x) = two_items();
        let frame =
            FrameMoving::at(Vector3::zeros(), UnitQuaternion::from_euler_angles(0.3, 0.0, 0.0));
        let t = TransformationMatrices::compute(&p, &frame, &x, &DVector::zeros(14), false)
            .unwrap();
        assert_eq!(t.p_w.shape(), (14, 14));
        assert_eq!(t.p_w[(12, 12)], 1.0);
        assert_eq!(t.p_w[(13, 13)], 1.0);
        assert_relative_eq!(
            t.p_w.view((0, 0), (3, 3)).into_owned(),
            DMatrix::from_column_slice(3, 3, frame.a().as_slice()),
            epsilon = 1e-15
        );
    }

    #[test]
    fn internal_rotation_map_ignores_the_reconstruction_flag() {
        let p = CoordinatePartition {
            n_boundary_coords: 14,
            n_boundary_coords_w: 12,
            n_internal_coords: 7,
            n_internal_coords_w: 6,
            n_modes_coords_w: 2,
            ..Default::default()
        };
        let (_, x_b) = two_items();
        let mut x_full = DVector::zeros(21);
        x_full.rows_mut(0, 14).copy_from(&x_b);
        write_quat(&mut x_full, 17, &UnitQuaternion::identity());
        let frame =
            FrameMoving::at(Vector3::zeros(), UnitQuaternion::from_euler_angles(0.0, 0.0, 1.0));

        let with = TransformationMatrices::compute(&p, &frame, &x_b, &x_full, true).unwrap();
        let without = TransformationMatrices::compute(&p, &frame, &x_b, &x_full, false).unwrap();
        assert_relative_eq!(with.p_i2, without.p_i2, epsilon = 1e-15);
        assert_relative_eq!(
            without.p_i2.view((0, 0), (3, 3)).into_owned(),
            DMatrix::from_column_slice(3, 3, frame.a().as_slice()),
            epsilon = 1e-15
        );
        assert_eq!(without.p_i1, DMatrix::zeros(6, 6));
    }

    #[test]
    fn wrong_mass_size_is_rejected() {
        let (p, x) = two_items();
        let frame = FrameMoving::default();
        let t = TransformationMatrices::compute(&p, &frame, &x, &DVector::zeros(14), false)
            .unwrap();
        assert!(matches!(
            Projectors::compute(&p, &t, &mass(12)),
            Err(ModalError::Dimension(_))
        ));
    }
}
