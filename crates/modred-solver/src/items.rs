//! Physics items owned by a subassembly: rigid bodies and 6-DOF FE nodes.
//!
//! Both kinds share the same coordinate layout (7 position coordinates,
//! 6 velocity coordinates) and are dispatched through [`PhysicsItem`].
//! Linear velocity is absolute; angular velocity is expressed in the
//! item's own frame.

use nalgebra::{DVector, Matrix3, UnitQuaternion, Vector3};

use crate::math::{read_quat, read_vec3, write_quat, write_vec3};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Partition {
    Boundary,
    Internal,
}

/// Arena address of an item inside its partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemHandle {
    pub partition: Partition,
    pub index: usize,
}

impl ItemHandle {
    pub fn boundary(index: usize) -> Self {
        Self {
            partition: Partition::Boundary,
            index,
        }
    }

    pub fn internal(index: usize) -> Self {
        Self {
            partition: Partition::Internal,
            index,
        }
    }
}

/// Position and orientation of an item.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub pos: Vector3<f64>,
    pub rot: UnitQuaternion<f64>,
}

/// Pose and time derivatives of a 6-DOF item.
#[derive(Debug, Clone, PartialEq)]
pub struct RigidState {
    pub pos: Vector3<f64>,
    pub rot: UnitQuaternion<f64>,
    pub pos_dt: Vector3<f64>,
    pub wvel_loc: Vector3<f64>,
    pub pos_dtdt: Vector3<f64>,
    pub wacc_loc: Vector3<f64>,
}

impl RigidState {
    pub fn at(pos: Vector3<f64>, rot: UnitQuaternion<f64>) -> Self {
        Self {
            pos,
            rot,
            pos_dt: Vector3::zeros(),
            wvel_loc: Vector3::zeros(),
            pos_dtdt: Vector3::zeros(),
            wacc_loc: Vector3::zeros(),
        }
    }

    fn gather_state(&self, x: &mut DVector<f64>, off_x: usize, v: &mut DVector<f64>, off_v: usize) {
        write_vec3(x, off_x, &self.pos);
        write_quat(x, off_x + 3, &self.rot);
        write_vec3(v, off_v, &self.pos_dt);
        write_vec3(v, off_v + 3, &self.wvel_loc);
    }

    fn scatter_state(&mut self, x: &DVector<f64>, off_x: usize, v: &DVector<f64>, off_v: usize) {
        self.pos = read_vec3(x, off_x);
        self.rot = read_quat(x, off_x + 3);
        self.pos_dt = read_vec3(v, off_v);
        self.wvel_loc = read_vec3(v, off_v + 3);
    }

    fn gather_acceleration(&self, a: &mut DVector<f64>, off_a: usize) {
        write_vec3(a, off_a, &self.pos_dtdt);
        write_vec3(a, off_a + 3, &self.wacc_loc);
    }

    fn scatter_acceleration(&mut self, a: &DVector<f64>, off_a: usize) {
        self.pos_dtdt = read_vec3(a, off_a);
        self.wacc_loc = read_vec3(a, off_a + 3);
    }
}

/// A rigid body with mass and principal inertia in body axes.
#[derive(Debug, Clone, PartialEq)]
pub struct RigidBody {
    pub id: u32,
    pub state: RigidState,
    pub mass: f64,
    pub inertia: Vector3<f64>,
}

impl RigidBody {
    pub fn new(id: u32, state: RigidState, mass: f64, inertia: Vector3<f64>) -> Self {
        Self {
            id,
            state,
            mass,
            inertia,
        }
    }
}

/// A finite-element node with translations and rotations.
///
/// `mass` and `inertia` are optional lumped (point) contributions added on
/// top of the element mass matrices.
#[derive(Debug, Clone, PartialEq)]
pub struct FeaNode {
    pub id: u32,
    pub state: RigidState,
    pub mass: f64,
    pub inertia: Vector3<f64>,
}

impl FeaNode {
    pub fn new(id: u32, state: RigidState) -> Self {
        Self {
            id,
            state,
            mass: 0.0,
            inertia: Vector3::zeros(),
        }
    }

    pub fn with_lumped_mass(mut self, mass: f64, inertia: Vector3<f64>) -> Self {
        self.mass = mass;
        self.inertia = inertia;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PhysicsItem {
    Body(RigidBody),
    Node(FeaNode),
}

impl PhysicsItem {
    pub const DOF: usize = 7;
    pub const DOF_W: usize = 6;

    pub fn id(&self) -> u32 {
        match self {
            PhysicsItem::Body(b) => b.id,
            PhysicsItem::Node(n) => n.id,
        }
    }

    pub fn dof(&self) -> usize {
        Self::DOF
    }

    pub fn dof_w(&self) -> usize {
        Self::DOF_W
    }

    pub fn state(&self) -> &RigidState {
        match self {
            PhysicsItem::Body(b) => &b.state,
            PhysicsItem::Node(n) => &n.state,
        }
    }

    pub fn state_mut(&mut self) -> &mut RigidState {
        match self {
            PhysicsItem::Body(b) => &mut b.state,
            PhysicsItem::Node(n) => &mut n.state,
        }
    }

    pub fn position(&self) -> Vector3<f64> {
        self.state().pos
    }

    pub fn rotation(&self) -> UnitQuaternion<f64> {
        self.state().rot
    }

    pub fn pose(&self) -> Pose {
        Pose {
            pos: self.state().pos,
            rot: self.state().rot,
        }
    }

    pub fn mass(&self) -> f64 {
        match self {
            PhysicsItem::Body(b) => b.mass,
            PhysicsItem::Node(n) => n.mass,
        }
    }

    /// Local principal inertia.
    pub fn inertia(&self) -> Vector3<f64> {
        match self {
            PhysicsItem::Body(b) => b.inertia,
            PhysicsItem::Node(n) => n.inertia,
        }
    }

    /// Inertia tensor about the item's own center, in absolute axes.
    pub fn inertia_abs(&self) -> Matrix3<f64> {
        let r = self.rotation().to_rotation_matrix();
        r.matrix() * Matrix3::from_diagonal(&self.inertia()) * r.matrix().transpose()
    }

    /// Drops the atomic mass once it is represented by the reduced matrices.
    pub fn remove_mass(&mut self) {
        match self {
            PhysicsItem::Body(b) => {
                b.mass = 0.0;
                b.inertia = Vector3::zeros();
            }
            PhysicsItem::Node(n) => {
                n.mass = 0.0;
                n.inertia = Vector3::zeros();
            }
        }
    }

    pub fn gather_state(
        &self,
        x: &mut DVector<f64>,
        off_x: usize,
        v: &mut DVector<f64>,
        off_v: usize,
    ) {
        self.state().gather_state(x, off_x, v, off_v);
    }

    pub fn scatter_state(
        &mut self,
        x: &DVector<f64>,
        off_x: usize,
        v: &DVector<f64>,
        off_v: usize,
    ) {
        self.state_mut().scatter_state(x, off_x, v, off_v);
    }

    pub fn gather_acceleration(&self, a: &mut DVector<f64>, off_a: usize) {
        self.state().gather_acceleration(a, off_a);
    }

    pub fn scatter_acceleration(&mut self, a: &DVector<f64>, off_a: usize) {
        self.state_mut().scatter_acceleration(a, off_a);
    }
}
