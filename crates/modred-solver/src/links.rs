//! Kinematic joints between two items.
//!
//! Jacobians are taken with respect to the velocity coordinates of each
//! item (absolute linear velocity, local angular velocity).

use nalgebra::{DMatrix, UnitQuaternion, Vector3};

use crate::items::{ItemHandle, Partition, Pose};
use crate::math::{rotation_vector, skew};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Coincident points, free relative rotation (3 rows).
    Spherical,
    /// Coincident points and frozen relative rotation (6 rows).
    Lock,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub id: u32,
    pub kind: LinkKind,
    /// Partition of the constraint rows.
    pub partition: Partition,
    pub items: [ItemHandle; 2],
    /// Joint point in each item's local frame.
    pub local_points: [Vector3<f64>; 2],
    /// `q_aᶜ q_b` at creation.
    pub relative_rotation0: UnitQuaternion<f64>,
    /// Offset of the first row inside its partition's constraint block.
    pub offset_doc: usize,
}

impl Link {
    /// Creates a link through the absolute point `point` with both items in
    /// their current poses.
    pub fn new(
        id: u32,
        kind: LinkKind,
        partition: Partition,
        items: [ItemHandle; 2],
        ends: [Pose; 2],
        point: Vector3<f64>,
    ) -> Self {
        let local = |end: &Pose| end.rot.inverse_transform_vector(&(point - end.pos));
        Self {
            id,
            kind,
            partition,
            items,
            local_points: [local(&ends[0]), local(&ends[1])],
            relative_rotation0: ends[0].rot.inverse() * ends[1].rot,
            offset_doc: 0,
        }
    }

    pub fn n_constraints(&self) -> usize {
        match self.kind {
            LinkKind::Spherical => 3,
            LinkKind::Lock => 6,
        }
    }

    /// Constraint residual `C(q)`; zero in the assembled configuration.
    pub fn violation(&self, ends: [Pose; 2]) -> Vec<f64> {
        let pa = ends[0].pos + ends[0].rot * self.local_points[0];
        let pb = ends[1].pos + ends[1].rot * self.local_points[1];
        let mut c: Vec<f64> = (pa - pb).iter().copied().collect();
        if self.kind == LinkKind::Lock {
            let err = ends[0].rot.inverse() * ends[1].rot * self.relative_rotation0.inverse();
            let c_rot = -(ends[0].rot * rotation_vector(&err));
            c.extend(c_rot.iter().copied());
        }
        c
    }

    /// Jacobian blocks `(Cq_a, Cq_b)`, each `n_constraints x 6`.
    pub fn jacobian(&self, ends: [Pose; 2]) -> (DMatrix<f64>, DMatrix<f64>) {
        let n = self.n_constraints();
        let mut cq_a = DMatrix::zeros(n, 6);
        let mut cq_b = DMatrix::zeros(n, 6);
        let a_a = *ends[0].rot.to_rotation_matrix().matrix();
        let a_b = *ends[1].rot.to_rotation_matrix().matrix();

        cq_a.fixed_view_mut::<3, 3>(0, 0).fill_with_identity();
        cq_a.fixed_view_mut::<3, 3>(0, 3)
            .copy_from(&(-a_a * skew(&self.local_points[0])));
        cq_b.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&(-nalgebra::Matrix3::identity()));
        cq_b.fixed_view_mut::<3, 3>(0, 3)
            .copy_from(&(a_b * skew(&self.local_points[1])));

        if self.kind == LinkKind::Lock {
            cq_a.fixed_view_mut::<3, 3>(3, 3).copy_from(&a_a);
            cq_b.fixed_view_mut::<3, 3>(3, 3).copy_from(&(-a_b));
        }
        (cq_a, cq_b)
    }
}
