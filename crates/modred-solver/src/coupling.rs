//! Frame-coupling operators of a reduced subassembly.
//!
//! These are pure functions of one reduced state snapshot: boundary
//! positions, reduced velocities `[v_B; q_dt]`, the floating frame, the
//! transforms and projectors at that frame, and `M_red`. The engine calls
//! them from the residual and tangent loads.
//!
//! Notation (all `n × n` or `n × 6` with `n = n_B + n_modes`):
//!
//! ```text
//! V    block(6i, 3)      = skew(A_Fᵗ v_B,i)
//! O_B  block(6i+3, 6i+3) = skew(w_B,i)
//! O_F  block(6i, 6i)     = skew(w_F,loc)
//! ```

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};

use crate::error::{ModalError, Result};
use crate::frame::FrameMoving;
use crate::items::PhysicsItem;
use crate::math::{read_quat, read_vec3, set_block3, skew};
use crate::partition::CoordinatePartition;
use crate::projection::{Projectors, TransformationMatrices};
use crate::reduction::ReducedSystem;

/// One reduced-state snapshot.
pub struct ReducedKinematics<'a> {
    pub partition: &'a CoordinatePartition,
    pub frame: &'a FrameMoving,
    /// Boundary positions, 7 coordinates per item.
    pub x_boundary: &'a DVector<f64>,
    /// `[v_B; q_dt]`
    pub v: &'a DVector<f64>,
    pub transforms: &'a TransformationMatrices,
    pub projectors: &'a Projectors,
    pub m_red: &'a DMatrix<f64>,
}

/// Velocity-dependent block operators `V`, `O_B` and `O_F`.
pub struct VelocityOperators {
    pub v: DMatrix<f64>,
    pub o_b: DMatrix<f64>,
    pub o_f: DMatrix<f64>,
}

/// Mass, inertial damping and inertial stiffness in absolute boundary
/// coordinates.
#[derive(Debug, Clone)]
pub struct InertialTerms {
    /// `P_W M_red P_Wᵗ`
    pub m_sup: DMatrix<f64>,
    pub r_i: Option<DMatrix<f64>>,
    pub k_i: Option<DMatrix<f64>>,
}

impl<'a> ReducedKinematics<'a> {
    fn n(&self) -> usize {
        self.partition.n_reduced_w()
    }

    fn n_boundary_items(&self) -> usize {
        self.partition.n_boundary_items()
    }

    /// Position and rotation matrix of boundary item `i`.
    fn boundary_pose(&self, i: usize) -> (Vector3<f64>, Matrix3<f64>) {
        let off = i * PhysicsItem::DOF;
        let r = read_vec3(self.x_boundary, off);
        let rot = read_quat(self.x_boundary, off + 3);
        (r, *rot.to_rotation_matrix().matrix())
    }

    fn check_len(&self, what: &str, v: &DVector<f64>, n: usize) -> Result<()> {
        if v.len() != n {
            return Err(ModalError::dimension(what, (n, 1), (v.len(), 1)));
        }
        Ok(())
    }

    /// `P_Wᵗ v`, the reduced velocity in the floating frame.
    pub fn local_velocity(&self) -> DVector<f64> {
        self.transforms.p_w.transpose() * self.v
    }

    pub fn velocity_operators(&self) -> VelocityOperators {
        let n = self.n();
        let a_ft = self.frame.a().transpose();
        let w_f = skew(&self.frame.wvel_loc);
        let mut v = DMatrix::zeros(n, 6);
        let mut o_b = DMatrix::zeros(n, n);
        let mut o_f = DMatrix::zeros(n, n);
        for i in 0..self.n_boundary_items() {
            set_block3(&mut v, 6 * i, 3, &skew(&(a_ft * read_vec3(self.v, 6 * i))));
            set_block3(&mut o_b, 6 * i + 3, 6 * i + 3, &skew(&read_vec3(self.v, 6 * i + 3)));
            set_block3(&mut o_f, 6 * i, 6 * i, &w_f);
        }
        VelocityOperators { v, o_b, o_f }
    }

    /// Variation of the local displacement under a frame twist, loaded by
    /// the 6-vector `mv = [F; M]`. Returns an `n × n` matrix.
    pub fn xi_uloc_vd(&self, mv: &DVector<f64>) -> Result<DMatrix<f64>> {
        self.check_len("Xi_VD load", mv, 6)?;
        let n = self.n();
        let a_f = self.frame.a();
        let a_ft = a_f.transpose();
        let f = read_vec3(mv, 0);
        let m = read_vec3(mv, 3);
        let s_m = skew(&m);

        let mut v_ext = DMatrix::zeros(n, 6);
        let mut d_ext = DMatrix::zeros(n, n);
        for i in 0..self.n_boundary_items() {
            let (r_b, rot_b) = self.boundary_pose(i);
            let arm = a_ft * skew(&(r_b - self.frame.pos)) * a_f;
            set_block3(&mut v_ext, 6 * i, 0, &(-s_m * a_ft));
            set_block3(&mut v_ext, 6 * i, 3, &(skew(&(a_ft * f)) + s_m * arm));
            set_block3(&mut v_ext, 6 * i + 3, 3, &(-rot_b.transpose() * a_f * s_m));
            set_block3(&mut d_ext, 6 * i, 6 * i, &(s_m * a_ft));
            set_block3(&mut d_ext, 6 * i + 3, 6 * i + 3, &skew(&(rot_b.transpose() * (a_f * m))));
        }
        Ok(v_ext * &self.projectors.q * self.transforms.p_w.transpose() + d_ext)
    }

    /// Transposed counterpart of [`Self::xi_uloc_vd`], loaded by an
    /// `n`-vector of boundary forces and moments. Returns a `6 × n` matrix.
    pub fn xi_uloct_fh(&self, mv: &DVector<f64>) -> Result<DMatrix<f64>> {
        let n = self.n();
        self.check_len("Xi_FH load", mv, n)?;
        let a_f = self.frame.a();
        let a_ft = a_f.transpose();

        let mut f1 = Matrix3::zeros();
        let mut f3 = Matrix3::zeros();
        let mut h_ext = DMatrix::zeros(6, n);
        for i in 0..self.n_boundary_items() {
            let f = read_vec3(mv, 6 * i);
            let m = read_vec3(mv, 6 * i + 3);
            let (r_b, rot_b) = self.boundary_pose(i);
            let s_f = skew(&f);
            f1 += a_f * s_f;
            f3 += s_f * (a_ft * skew(&(r_b - self.frame.pos)) * a_f) - skew(&(a_ft * (rot_b * m)));
            set_block3(&mut h_ext, 3, 6 * i, &(s_f * a_ft));
            set_block3(&mut h_ext, 3, 6 * i + 3, &(a_ft * rot_b * skew(&m)));
        }
        let mut xi_f = DMatrix::zeros(6, 6);
        set_block3(&mut xi_f, 0, 3, &f1);
        set_block3(&mut xi_f, 3, 0, &f1.transpose());
        set_block3(&mut xi_f, 3, 3, &f3);
        Ok(xi_f * &self.projectors.q * self.transforms.p_w.transpose() + h_ext)
    }

    /// Quadratic velocity force
    /// `g = (P_W (O_F + O_B) M P_Wᵗ + M_V - M_Vᵗ) v` with `M_V = P_W M V Q P_Wᵗ`.
    pub fn quadratic_velocity_force(&self) -> DVector<f64> {
        let p_w = &self.transforms.p_w;
        let p_wt = p_w.transpose();
        let ops = self.velocity_operators();
        let mat_o = p_w * (&ops.o_f + &ops.o_b) * self.m_red * &p_wt;
        let mat_m = p_w * self.m_red * &ops.v * &self.projectors.q * &p_wt;
        (mat_o + &mat_m - mat_m.transpose()) * self.v
    }

    /// Mass plus the optional inertial damping and stiffness corrections.
    ///
    /// `a` holds the reduced accelerations `[a_B; q_dtdt]`.
    pub fn inertial_terms(
        &self,
        a: &DVector<f64>,
        damping: bool,
        stiffness: bool,
    ) -> Result<InertialTerms> {
        let n = self.n();
        self.check_len("reduced acceleration", a, n)?;
        let p_w = &self.transforms.p_w;
        let p_wt = p_w.transpose();
        let m = self.m_red;
        let q = &self.projectors.q;

        let m_sup = p_w * m * &p_wt;
        if !(damping || stiffness) {
            return Ok(InertialTerms {
                m_sup,
                r_i: None,
                k_i: None,
            });
        }

        let a_ft = self.frame.a().transpose();
        let ops = self.velocity_operators();
        let v_loc = &p_wt * self.v;
        let a_loc = &p_wt * a;
        let mv = m * &ops.v;
        let mvq = &mv * q;
        let mvq_skew = &mvq - mvq.transpose();
        let o_fb = &ops.o_f + &ops.o_b;

        let f_loc_c = m * &a_loc + (&o_fb * m + &mvq_skew) * &v_loc;
        let momen = m * &v_loc;

        let mut v_iner = DMatrix::zeros(n, 6);
        let mut v_acc = DMatrix::zeros(n, 6);
        let mut v_rmom = DMatrix::zeros(n, 6);
        let mut o_thetamom = DMatrix::zeros(n, n);
        for i in 0..self.n_boundary_items() {
            set_block3(&mut v_iner, 6 * i, 3, &skew(&read_vec3(&f_loc_c, 6 * i)));
            set_block3(&mut v_acc, 6 * i, 3, &skew(&(a_ft * read_vec3(a, 6 * i))));
            set_block3(&mut v_rmom, 6 * i, 3, &skew(&read_vec3(&momen, 6 * i)));
            set_block3(&mut o_thetamom, 6 * i + 3, 6 * i + 3, &skew(&read_vec3(&momen, 6 * i + 3)));
        }
        let rmom_q = &v_rmom * q;
        // Qᵗ V_rmomᵗ - V_rmom Q
        let rmom_skew = rmom_q.transpose() - &rmom_q;

        let r_i = damping.then(|| {
            p_w * (&ops.o_f * m - m * &ops.o_f) * &p_wt
                + p_w * &mvq_skew * &p_wt
                + p_w * &rmom_skew * &p_wt
                + &ops.o_b * m * &p_wt
                - &o_thetamom
        });

        let k_i = if stiffness {
            let p_perp = &self.projectors.p_perp;
            let m_v_loc = m * &v_loc;

            let h_alpha = m * (p_perp * &v_loc);
            let xi_fh_alpha = self.xi_uloct_fh(&h_alpha)?;
            let h_beta = q * &v_loc;
            let xi_vd_beta = self.xi_uloc_vd(&h_beta)?;
            let h_gamma = q.transpose() * (ops.v.transpose() * &m_v_loc);
            let xi_fh_gamma = self.xi_uloct_fh(&h_gamma)?;
            let h_eps = self.projectors.utmu_solve_vector(&(ops.v.transpose() * &m_v_loc))?;
            let xi_vd_eps = self.xi_uloc_vd(&h_eps)?;

            let rmom_mv = &v_rmom - &mv;
            let vq_pwt = &ops.v * q * &p_wt;
            Some(
                p_w * &rmom_mv * self.projectors.utmu_solve(&xi_fh_alpha)?
                    + p_w * &rmom_mv * q * &xi_vd_beta
                    - p_w * q.transpose() * &xi_fh_gamma
                    - p_w * p_perp.transpose() * m * &xi_vd_eps
                    + p_w * (m * &v_acc - &v_iner) * q * &p_wt
                    + p_w * (&o_fb * m - m * &ops.o_f + &mvq_skew) * &vq_pwt
                    + p_w * &rmom_skew * &vq_pwt,
            )
        } else {
            None
        };

        Ok(InertialTerms { m_sup, r_i, k_i })
    }

    /// Geometric stiffness from the elastic state `e` and the local
    /// displacement `u`.
    pub fn geometric_stiffness(
        &self,
        k_red: &DMatrix<f64>,
        e: &DVector<f64>,
        u: &DVector<f64>,
    ) -> Result<DMatrix<f64>> {
        let n = self.n();
        self.check_len("local elastic state", e, n)?;
        self.check_len("local displacement", u, n)?;
        let p_w = &self.transforms.p_w;
        let p_wt = p_w.transpose();
        let m = self.m_red;
        let q = &self.projectors.q;
        let p_perp = &self.projectors.p_perp;
        let p_perp_t = p_perp.transpose();

        let g = k_red * e;
        let g_alpha = &p_perp_t * &g;
        let g_beta = self.projectors.utmu_solve_vector(&(self.projectors.u.transpose() * &g))?;
        let h_gamma = q * u;
        let h_eps = m * (p_perp * u);

        let mut v_f1 = DMatrix::zeros(n, 6);
        let mut v_f2 = DMatrix::zeros(n, 6);
        for i in 0..self.n_boundary_items() {
            set_block3(&mut v_f1, 6 * i, 3, &(-skew(&read_vec3(&g_alpha, 6 * i))));
            set_block3(&mut v_f2, 6 * i, 3, &skew(&read_vec3(u, 6 * i)));
        }

        let k_perp = &p_perp_t * k_red * p_perp;
        let kg1 = -(p_w * &v_f1 * q * &p_wt);
        let kg2 = p_w * q.transpose() * self.xi_uloct_fh(&g_alpha)?;
        let kg3 = -(p_w * &p_perp_t * m * self.xi_uloc_vd(&g_beta)?);
        let kg4 = -(p_w * &k_perp * self.xi_uloc_vd(&h_gamma)?);
        let h_solved = self.projectors.utmu_solve(&self.xi_uloct_fh(&h_eps)?)?;
        let kg5 = p_w * &p_perp_t * k_red * &self.projectors.u * h_solved;
        let kg6 = p_w * &k_perp * &v_f2 * q * &p_wt;
        Ok(kg1 + kg2 + kg3 + kg4 + kg5 + kg6)
    }
}

/// Projects a force on the full coordinates `[F_B; F_I]` onto the reduced
/// coordinates: `[F_B + P_B2 Psi_Sᵗ P_I2ᵗ F_I; Psi_Dᵗ P_I2ᵗ F_I]`.
pub fn project_full_force(
    p: &CoordinatePartition,
    t: &TransformationMatrices,
    reduced: &ReducedSystem,
    f_full: &DVector<f64>,
) -> Result<DVector<f64>> {
    let (nb, ni, nm) = (p.n_boundary_coords_w, p.n_internal_coords_w, p.n_modes_coords_w);
    if f_full.len() != nb + ni {
        return Err(ModalError::dimension("full force", (nb + ni, 1), (f_full.len(), 1)));
    }
    let f_i_loc = t.p_i2.transpose() * f_full.rows(nb, ni);
    let mut out = DVector::zeros(nb + nm);
    out.rows_mut(0, nb)
        .copy_from(&(f_full.rows(0, nb) + &t.p_b2 * (reduced.psi_s.transpose() * &f_i_loc)));
    out.rows_mut(nb, nm).copy_from(&(reduced.psi_d.transpose() * &f_i_loc));
    Ok(out)
}
