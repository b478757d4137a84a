//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use modred_solver::math::{read_quat, read_vec3, write_quat, write_vec3};
use modred_solver::{
    BeamSection, FeaNode, Material, ModalAssembly, Partition, PhysicsItem, RigidState, Subassembly,
};
use nalgebra::{DVector, UnitQuaternion, Vector3};

pub const LENGTH: f64 = 1.0;
pub const RADIUS: f64 = 0.01;

/// Free-free steel beam along x with its two end nodes on the boundary.
pub fn free_beam(n_elements: usize) -> Subassembly {
    let mut sub = Subassembly::new("free_beam");
    let steel = sub
        .add_material(Material::new("steel", 210e9, 0.3, 7800.0))
        .unwrap();
    let mut handles = Vec::new();
    for k in 0..=n_elements {
        let x = LENGTH * k as f64 / n_elements as f64;
        let partition = if k == 0 || k == n_elements {
            Partition::Boundary
        } else {
            Partition::Internal
        };
        let node = FeaNode::new(
            k as u32 + 1,
            RigidState::at(Vector3::new(x, 0.0, 0.0), UnitQuaternion::identity()),
        );
        handles.push(sub.add_item(partition, PhysicsItem::Node(node)));
    }
    for k in 0..n_elements {
        sub.add_beam(
            k as u32 + 1,
            [handles[k], handles[k + 1]],
            BeamSection::circular(RADIUS),
            steel,
        )
        .unwrap();
    }
    sub
}

/// A rigid placement: rotation `rot` about `center`, then translation `shift`.
#[derive(Debug, Clone, Copy)]
pub struct RigidMotion {
    pub center: Vector3<f64>,
    pub rot: UnitQuaternion<f64>,
    pub shift: Vector3<f64>,
    /// Absolute velocity of the moved center.
    pub velocity: Vector3<f64>,
    /// Absolute angular velocity.
    pub omega: Vector3<f64>,
}

impl RigidMotion {
    pub fn place(&self, r: &Vector3<f64>) -> Vector3<f64> {
        self.center + self.rot * (r - self.center) + self.shift
    }

    /// Velocity of the material point now at `r`.
    pub fn velocity_at(&self, r: &Vector3<f64>) -> Vector3<f64> {
        self.velocity + self.omega.cross(&(r - self.center - self.shift))
    }
}

/// Moves the boundary items of a reduced assembly rigidly, leaving the
/// modal coordinates untouched. `x0` holds the reference reduced positions.
pub fn drive_boundary(asm: &mut ModalAssembly, x0: &DVector<f64>, motion: &RigidMotion) {
    let (mut x, mut v) = asm.gather_state();
    let n_b = asm.partition().n_boundary_items();
    for i in 0..n_b {
        let (ox, ow) = (7 * i, 6 * i);
        let r = motion.place(&read_vec3(x0, ox));
        let q = motion.rot * read_quat(x0, ox + 3);
        write_vec3(&mut x, ox, &r);
        write_quat(&mut x, ox + 3, &q);
        write_vec3(&mut v, ow, &motion.velocity_at(&r));
        write_vec3(&mut v, ow + 3, &q.inverse_transform_vector(&motion.omega));
    }
    asm.scatter_state(&x, &v).unwrap();
}

pub fn identity_motion() -> RigidMotion {
    RigidMotion {
        center: Vector3::new(0.5 * LENGTH, 0.0, 0.0),
        rot: UnitQuaternion::identity(),
        shift: Vector3::zeros(),
        velocity: Vector3::zeros(),
        omega: Vector3::zeros(),
    }
}
