//! Floating frame of reference.
//!
//! The frame `F` follows the mean rigid motion of a reduced subassembly. It
//! starts at the center-of-mass frame and is then corrected by Newton-Raphson
//! on the six conditions `Uᵗ M_red e(F) = 0`.

use nalgebra::{DMatrix, DVector, Matrix3, Rotation3, SymmetricEigen, UnitQuaternion, Vector3};
use tracing::{debug, warn};

use crate::error::{ModalError, Result};
use crate::items::Partition;
use crate::math::quat_from_rotation_vector;
use crate::subassembly::Subassembly;

/// Pose of the floating frame plus its velocities.
///
/// `pos_dt` is absolute, `wvel_loc` is expressed in the frame's own axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameMoving {
    pub pos: Vector3<f64>,
    pub rot: UnitQuaternion<f64>,
    pub pos_dt: Vector3<f64>,
    pub wvel_loc: Vector3<f64>,
}

impl Default for FrameMoving {
    fn default() -> Self {
        Self::at(Vector3::zeros(), UnitQuaternion::identity())
    }
}

impl FrameMoving {
    pub fn at(pos: Vector3<f64>, rot: UnitQuaternion<f64>) -> Self {
        Self {
            pos,
            rot,
            pos_dt: Vector3::zeros(),
            wvel_loc: Vector3::zeros(),
        }
    }

    /// Rotation matrix `A_F` (local to absolute).
    pub fn a(&self) -> Matrix3<f64> {
        *self.rot.to_rotation_matrix().matrix()
    }

    /// Angular velocity in absolute axes.
    pub fn wvel_abs(&self) -> Vector3<f64> {
        self.rot * self.wvel_loc
    }

    /// Applies a Newton increment: translation in absolute axes, rotation
    /// composed on the right (local axes).
    pub fn apply_increment(&mut self, delta: &DVector<f64>) {
        self.pos += Vector3::new(delta[0], delta[1], delta[2]);
        self.rot *= quat_from_rotation_vector(&Vector3::new(delta[3], delta[4], delta[5]));
    }
}

/// Center-of-mass frame of the whole subassembly.
///
/// The origin is the mass-weighted centroid of items and beams, the axes are
/// the principal axes of inertia (ascending moments, right-handed). With no
/// mass at all, the frame sits on the first boundary item.
pub fn com_frame(sub: &Subassembly) -> Result<FrameMoving> {
    let props = sub.mass_properties();
    if props.mass <= 0.0 {
        let first = sub.items(Partition::Boundary).first().ok_or_else(|| {
            ModalError::Precondition("no boundary item to anchor the frame".to_string())
        })?;
        debug!("massless subassembly, frame placed on first boundary item");
        return Ok(FrameMoving::at(first.position(), first.rotation()));
    }
    Ok(FrameMoving::at(props.center, principal_axes(&props.inertia)))
}

fn principal_axes(inertia: &Matrix3<f64>) -> UnitQuaternion<f64> {
    let eig = SymmetricEigen::new(*inertia);
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| eig.eigenvalues[a].total_cmp(&eig.eigenvalues[b]));

    let mut axes = Matrix3::zeros();
    for (col, &k) in order.iter().enumerate() {
        axes.set_column(col, &eig.eigenvectors.column(k));
    }
    if axes.determinant() < 0.0 {
        let flipped = -axes.column(2);
        axes.set_column(2, &flipped);
    }
    UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix(&axes))
}

/// Newton-Raphson controls for the frame update.
#[derive(Debug, Clone, Copy)]
pub struct FrameSolverSettings {
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for FrameSolverSettings {
    fn default() -> Self {
        Self {
            max_iterations: 6,
            tolerance: 1e-16,
        }
    }
}

/// Outcome of one floating-frame update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameUpdateReport {
    pub iterations: usize,
    /// `‖C(F)‖` evaluated before the last increment.
    pub residual_norm: f64,
    pub converged: bool,
    /// `‖C(F)‖` per iteration.
    pub history: Vec<f64>,
}

impl FrameUpdateReport {
    pub(crate) fn initialized() -> Self {
        Self {
            converged: true,
            ..Default::default()
        }
    }
}

/// Six-component frame constraint and its Jacobian at a given frame pose.
pub struct FrameConstraint {
    pub residual: DVector<f64>,
    pub jacobian: DMatrix<f64>,
}

/// Newton iterations on `frame`; `eval` returns `C(F)` and `∂C/∂F`.
///
/// The iteration cap is not an error: the last estimate is kept and the
/// residual norm is reported.
pub fn solve_frame<E>(
    frame: &mut FrameMoving,
    settings: &FrameSolverSettings,
    mut eval: E,
) -> Result<FrameUpdateReport>
where
    E: FnMut(&FrameMoving) -> Result<FrameConstraint>,
{
    let mut report = FrameUpdateReport::default();
    while !report.converged && report.iterations < settings.max_iterations {
        let FrameConstraint { residual, jacobian } = eval(frame)?;
        let norm = residual.norm();
        let delta = jacobian
            .col_piv_qr()
            .solve(&(-&residual))
            .ok_or_else(|| ModalError::Singular {
                which: "floating frame Jacobian".to_string(),
                detail: format!("residual norm {:.3e}", norm),
            })?;
        frame.apply_increment(&delta);

        report.history.push(norm);
        report.residual_norm = norm;
        report.converged = norm < settings.tolerance;
        report.iterations += 1;
    }

    if report.converged {
        debug!(
            iterations = report.iterations,
            residual = report.residual_norm,
            "floating frame converged"
        );
    } else {
        warn!(
            iterations = report.iterations,
            residual = report.residual_norm,
            "floating frame did not reach tolerance"
        );
    }
    Ok(report)
}

/// Forward-difference Jacobian of the frame constraint.
///
/// Positions are perturbed in absolute axes, rotations by right-multiplied
/// increments, matching [`FrameMoving::apply_increment`].
pub fn numerical_frame_jacobian<R>(
    frame: &FrameMoving,
    delta: f64,
    mut residual: R,
) -> Result<DMatrix<f64>>
where
    R: FnMut(&FrameMoving) -> Result<DVector<f64>>,
{
    let c0 = residual(frame)?;
    let mut jac = DMatrix::zeros(c0.len(), 6);
    for i in 0..6 {
        let mut step = DVector::zeros(6);
        step[i] = delta;
        let mut perturbed = *frame;
        perturbed.apply_increment(&step);
        let ci = residual(&perturbed)?;
        jac.set_column(i, &((ci - &c0) / delta));
    }
    Ok(jac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::{FeaNode, PhysicsItem, RigidBody, RigidState};
    use approx::assert_relative_eq;

    #[test]
    fn increment_composes_rotation_on_the_right() {
        let rot = UnitQuaternion::from_euler_angles(0.0, 0.0, 0.5);
        let mut f = FrameMoving::at(Vector3::new(1.0, 0.0, 0.0), rot);
        let delta = DVector::from_vec(vec![0.0, 1.0, 0.0, 0.0, 0.0, 0.25]);
        f.apply_increment(&delta);
        assert_relative_eq!(f.pos, Vector3::new(1.0, 1.0, 0.0));
        assert_relative_eq!(f.rot.angle(), 0.75, epsilon = 1e-12);
    }

    #[test]
    fn com_frame_uses_weighted_centroid_and_principal_axes() {
        let mut sub = Subassembly::new("bodies");
        let origin = RigidState::at(Vector3::zeros(), UnitQuaternion::identity());
        let heavy = RigidBody::new(1, origin, 3.0, Vector3::zeros());
        let light = RigidBody::new(
            2,
            RigidState::at(Vector3::new(0.0, 4.0, 0.0), UnitQuaternion::identity()),
            1.0,
            Vector3::zeros(),
        );
        sub.add_item(Partition::Boundary, PhysicsItem::Body(heavy));
        sub.add_item(Partition::Internal, PhysicsItem::Body(light));
        sub.setup().unwrap();

        let f = com_frame(&sub).unwrap();
        assert_relative_eq!(f.pos, Vector3::new(0.0, 1.0, 0.0), epsilon = 1e-12);
        // the smallest moment is about the line joining the masses
        let axis = f.a().column(0).into_owned();
        assert_relative_eq!(axis.y.abs(), 1.0, epsilon = 1e-9);
        assert!(f.a().determinant() > 0.0);
    }

    #[test]
    fn massless_frame_sits_on_first_boundary_item() {
        let mut sub = Subassembly::new("massless");
        let rot = UnitQuaternion::from_euler_angles(0.2, 0.0, 0.0);
        let node = FeaNode::new(1, RigidState::at(Vector3::new(2.0, 0.0, 1.0), rot));
        sub.add_item(Partition::Boundary, PhysicsItem::Node(node));
        sub.setup().unwrap();
        let f = com_frame(&sub).unwrap();
        assert_eq!(f.pos, Vector3::new(2.0, 0.0, 1.0));
        assert_relative_eq!(f.rot.angle_to(&rot), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn newton_solves_linear_constraint_in_one_step() {
        let target = Vector3::new(0.5, -1.0, 2.0);
        let eval = |f: &FrameMoving| -> Result<FrameConstraint> {
            let mut c = DVector::zeros(6);
            c.rows_mut(0, 3).copy_from(&(f.pos - target));
            Ok(FrameConstraint {
                residual: c,
                jacobian: DMatrix::identity(6, 6),
            })
        };
        let mut frame = FrameMoving::default();
        let report = solve_frame(&mut frame, &FrameSolverSettings::default(), eval).unwrap();
        assert_relative_eq!(frame.pos, target, epsilon = 1e-14);
        assert_eq!(report.iterations, 2);
        assert!(report.converged);
        assert_eq!(report.history.len(), 2);
    }

    #[test]
    fn iteration_cap_is_reported_not_raised() {
        // residual never vanishes
        let eval = |_: &FrameMoving| -> Result<FrameConstraint> {
            Ok(FrameConstraint {
                residual: DVector::from_element(6, 1.0),
                jacobian: DMatrix::identity(6, 6) * 1e12,
            })
        };
        let mut frame = FrameMoving::default();
        let report = solve_frame(&mut frame, &FrameSolverSettings::default(), eval).unwrap();
        assert_eq!(report.iterations, 6);
        assert!(!report.converged);
        assert_relative_eq!(report.residual_norm, 6f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn numerical_jacobian_of_affine_map() {
        let a = DMatrix::from_fn(6, 6, |i, j| if i == j { 2.0 } else { 0.1 * (i + j) as f64 });
        let residual = |f: &FrameMoving| -> Result<DVector<f64>> {
            let mut x = DVector::zeros(6);
            x.rows_mut(0, 3).copy_from(&f.pos);
            x.rows_mut(3, 3).copy_from(&(f.rot.imag() * 2.0));
            Ok(&a * x)
        };
        let jac = numerical_frame_jacobian(&FrameMoving::default(), 1e-7, residual).unwrap();
        assert_relative_eq!(jac, a, epsilon = 1e-5);
    }
}
