//! Finite element library for the flexible parts of a subassembly.

use crate::items::Pose;
use crate::materials::Material;
use nalgebra::DMatrix;

pub mod beam;

pub use beam::{Beam31, BeamSection};

/// Element interface for finite element calculations.
///
/// Matrices are returned in the velocity coordinates of the attached items:
/// absolute translations and rotations about each item's own axes.
pub trait Element {
    /// Compute the element stiffness matrix
    ///
    /// # Arguments
    /// * `nodes` - Current poses of the element's items
    /// * `material` - Material properties
    fn stiffness_matrix(&self, nodes: &[Pose], material: &Material) -> Result<DMatrix<f64>, String>;

    /// Compute the consistent element mass matrix
    fn mass_matrix(&self, nodes: &[Pose], material: &Material) -> Result<DMatrix<f64>, String>;

    /// Rayleigh damping `α M + β K` from the material coefficients
    fn damping_matrix(&self, nodes: &[Pose], material: &Material) -> Result<DMatrix<f64>, String> {
        let mut r = self.mass_matrix(nodes, material)? * material.rayleigh_alpha;
        if material.rayleigh_beta != 0.0 {
            r += self.stiffness_matrix(nodes, material)? * material.rayleigh_beta;
        }
        Ok(r)
    }

    /// Get the number of nodes for this element type
    fn num_nodes(&self) -> usize;

    /// Get the number of degrees of freedom per node
    fn dofs_per_node(&self) -> usize;
}
