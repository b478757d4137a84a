/// Two-node Euler-Bernoulli beam for flexible subassemblies.
///
/// Each node has 6 velocity degrees of freedom:
/// - 3 absolute translations (ux, uy, uz)
/// - 3 rotations about the node's own axes
///
/// The element is linear about the configuration it is evaluated in, which
/// is what the floating-frame reduction needs: matrices are assembled once
/// in the reference pose and then carried by the moving frame.
///
/// References:
/// - "Finite Element Procedures" by K.J. Bathe
/// - Przemieniecki, "Theory of Matrix Structural Analysis" (consistent mass)
use nalgebra::{DMatrix, Matrix3, SMatrix, Vector3};

use modred_io::{SectionDoc, SectionShapeDoc};

use crate::elements::Element;
use crate::items::{ItemHandle, Pose};
use crate::materials::Material;

/// Beam section properties for various cross-section shapes
#[derive(Debug, Clone, PartialEq)]
pub struct BeamSection {
    /// Cross-sectional area
    pub area: f64,
    /// Second moment of area about local y-axis (Iyy)
    pub iyy: f64,
    /// Second moment of area about local z-axis (Izz)
    pub izz: f64,
    /// Torsional constant (J)
    pub torsion_constant: f64,
}

impl BeamSection {
    /// Create a circular beam section
    ///
    /// # Example
    /// ```
    /// use modred_solver::elements::beam::BeamSection;
    ///
    /// let section = BeamSection::circular(0.05); // 5cm radius
    /// assert!((section.area - std::f64::consts::PI * 0.05_f64.powi(2)).abs() < 1e-10);
    /// ```
    pub fn circular(radius: f64) -> Self {
        let area = std::f64::consts::PI * radius.powi(2);
        let i = std::f64::consts::PI * radius.powi(4) / 4.0;
        let j = std::f64::consts::PI * radius.powi(4) / 2.0;

        Self {
            area,
            iyy: i,
            izz: i,
            torsion_constant: j,
        }
    }

    /// Create a rectangular beam section
    ///
    /// # Arguments
    /// * `width` - Width of the rectangle (in local y-direction)
    /// * `height` - Height of the rectangle (in local z-direction)
    pub fn rectangular(width: f64, height: f64) -> Self {
        let area = width * height;
        let iyy = width * height.powi(3) / 12.0;
        let izz = height * width.powi(3) / 12.0;

        // Torsional constant for rectangle (approximate formula)
        let a = width.max(height);
        let b = width.min(height);
        let ratio = b / a;
        let j = (a * b.powi(3)) * (1.0 / 3.0 - 0.21 * ratio * (1.0 - ratio.powi(4) / 12.0));

        Self {
            area,
            iyy,
            izz,
            torsion_constant: j,
        }
    }

    /// Create a custom beam section with explicit properties
    pub fn custom(area: f64, iyy: f64, izz: f64, j: f64) -> Self {
        Self {
            area,
            iyy,
            izz,
            torsion_constant: j,
        }
    }

    /// Polar second moment used for the torsional inertia.
    pub fn polar_moment(&self) -> f64 {
        self.iyy + self.izz
    }
}

impl From<&SectionDoc> for BeamSection {
    fn from(doc: &SectionDoc) -> Self {
        match doc.shape {
            SectionShapeDoc::Circular { radius } => BeamSection::circular(radius),
            SectionShapeDoc::Rectangular { width, height } => {
                BeamSection::rectangular(width, height)
            }
            SectionShapeDoc::Custom {
                area,
                iyy,
                izz,
                torsion_constant,
            } => BeamSection::custom(area, iyy, izz, torsion_constant),
        }
    }
}

/// B31 - 2-node 3D Euler-Bernoulli beam element
#[derive(Debug, Clone)]
pub struct Beam31 {
    pub id: u32,
    pub items: [ItemHandle; 2],
    pub section: BeamSection,
    /// Index into the subassembly material table.
    pub material: usize,
}

impl Beam31 {
    /// Create a new B31 beam element
    pub fn new(id: u32, items: [ItemHandle; 2], section: BeamSection, material: usize) -> Self {
        Self {
            id,
            items,
            section,
            material,
        }
    }

    fn check_nodes(nodes: &[Pose]) -> Result<(), String> {
        if nodes.len() != 2 {
            return Err(format!("B31 element requires exactly 2 nodes, got {}", nodes.len()));
        }
        Ok(())
    }

    /// Calculate the length of the beam element
    fn length(&self, nodes: &[Pose]) -> Result<f64, String> {
        Self::check_nodes(nodes)?;
        let length = (nodes[1].pos - nodes[0].pos).norm();
        if length < 1e-12 {
            return Err(format!("Beam element {} has zero length", self.id));
        }
        Ok(length)
    }

    /// Rows of the element frame: x along the beam axis, y and z perpendicular.
    fn element_axes(&self, nodes: &[Pose]) -> Result<Matrix3<f64>, String> {
        let length = self.length(nodes)?;
        let ex = (nodes[1].pos - nodes[0].pos) / length;

        // Choose a reference vector not parallel to the beam axis
        let reference = if ex.x.abs() < 0.9 {
            Vector3::new(1.0, 0.0, 0.0)
        } else {
            Vector3::new(0.0, 1.0, 0.0)
        };
        let ez = ex.cross(&reference).normalize();
        let ey = ez.cross(&ex);

        Ok(Matrix3::from_rows(&[ex.transpose(), ey.transpose(), ez.transpose()]))
    }

    /// Maps item velocity coordinates to element-local DOFs.
    ///
    /// Translations are absolute, so they only need the element axes `R_e`;
    /// rotations are in item axes and pick up the item orientation `R_e A`.
    fn transformation_matrix(&self, nodes: &[Pose]) -> Result<DMatrix<f64>, String> {
        let r = self.element_axes(nodes)?;
        let mut t = DMatrix::zeros(12, 12);
        for (n, node) in nodes.iter().enumerate() {
            let a = node.rot.to_rotation_matrix();
            t.fixed_view_mut::<3, 3>(6 * n, 6 * n).copy_from(&r);
            t.fixed_view_mut::<3, 3>(6 * n + 3, 6 * n + 3)
                .copy_from(&(r * a.matrix()));
        }
        Ok(t)
    }

    /// Compute the local stiffness matrix (12x12) in the element frame
    fn local_stiffness(&self, length: f64, material: &Material) -> SMatrix<f64, 12, 12> {
        let e = material.elastic_modulus;
        let g = material.shear_modulus();
        let a = self.section.area;
        let iyy = self.section.iyy;
        let izz = self.section.izz;
        let j = self.section.torsion_constant;
        let l = length;

        let mut k = SMatrix::<f64, 12, 12>::zeros();

        // Axial stiffness (DOFs 0, 6)
        let k_axial = e * a / l;
        k[(0, 0)] = k_axial;
        k[(0, 6)] = -k_axial;
        k[(6, 0)] = -k_axial;
        k[(6, 6)] = k_axial;

        // Bending in XY plane (DOFs 1, 5, 7, 11)
        let k_bend_y = 12.0 * e * izz / l.powi(3);
        let k_rot_y = 6.0 * e * izz / l.powi(2);
        let k_rot_rot_y = 4.0 * e * izz / l;
        let k_rot_rot_y2 = 2.0 * e * izz / l;

        k[(1, 1)] = k_bend_y;
        k[(1, 5)] = k_rot_y;
        k[(1, 7)] = -k_bend_y;
        k[(1, 11)] = k_rot_y;

        k[(5, 1)] = k_rot_y;
        k[(5, 5)] = k_rot_rot_y;
        k[(5, 7)] = -k_rot_y;
        k[(5, 11)] = k_rot_rot_y2;

        k[(7, 1)] = -k_bend_y;
        k[(7, 5)] = -k_rot_y;
        k[(7, 7)] = k_bend_y;
        k[(7, 11)] = -k_rot_y;

        k[(11, 1)] = k_rot_y;
        k[(11, 5)] = k_rot_rot_y2;
        k[(11, 7)] = -k_rot_y;
        k[(11, 11)] = k_rot_rot_y;

        // Bending in XZ plane (DOFs 2, 4, 8, 10)
        let k_bend_z = 12.0 * e * iyy / l.powi(3);
        let k_rot_z = 6.0 * e * iyy / l.powi(2);
        let k_rot_rot_z = 4.0 * e * iyy / l;
        let k_rot_rot_z2 = 2.0 * e * iyy / l;

        k[(2, 2)] = k_bend_z;
        k[(2, 4)] = -k_rot_z;
        k[(2, 8)] = -k_bend_z;
        k[(2, 10)] = -k_rot_z;

        k[(4, 2)] = -k_rot_z;
        k[(4, 4)] = k_rot_rot_z;
        k[(4, 8)] = k_rot_z;
        k[(4, 10)] = k_rot_rot_z2;

        k[(8, 2)] = -k_bend_z;
        k[(8, 4)] = k_rot_z;
        k[(8, 8)] = k_bend_z;
        k[(8, 10)] = k_rot_z;

        k[(10, 2)] = -k_rot_z;
        k[(10, 4)] = k_rot_rot_z2;
        k[(10, 8)] = k_rot_z;
        k[(10, 10)] = k_rot_rot_z;

        // Torsional stiffness (DOFs 3, 9)
        let k_torsion = g * j / l;
        k[(3, 3)] = k_torsion;
        k[(3, 9)] = -k_torsion;
        k[(9, 3)] = -k_torsion;
        k[(9, 9)] = k_torsion;

        k
    }

    /// Consistent mass matrix (12x12) in the element frame
    fn local_mass(&self, length: f64, material: &Material) -> SMatrix<f64, 12, 12> {
        let l = length;
        let m = material.density * self.section.area * l;
        let mut mm = SMatrix::<f64, 12, 12>::zeros();

        // Axial (DOFs 0, 6)
        let pairs = [(0, 0, 2.0), (0, 6, 1.0), (6, 0, 1.0), (6, 6, 2.0)];
        for (i, j, c) in pairs {
            mm[(i, j)] = m / 6.0 * c;
        }

        // Torsion (DOFs 3, 9)
        let jt = material.density * self.section.polar_moment() * l;
        let pairs = [(3, 3, 2.0), (3, 9, 1.0), (9, 3, 1.0), (9, 9, 2.0)];
        for (i, j, c) in pairs {
            mm[(i, j)] = jt / 6.0 * c;
        }

        let c = m / 420.0;
        let bend = [
            [156.0, 22.0 * l, 54.0, -13.0 * l],
            [22.0 * l, 4.0 * l * l, 13.0 * l, -3.0 * l * l],
            [54.0, 13.0 * l, 156.0, -22.0 * l],
            [-13.0 * l, -3.0 * l * l, -22.0 * l, 4.0 * l * l],
        ];

        // XY plane (DOFs 1, 5, 7, 11)
        let xy = [1, 5, 7, 11];
        for (a, &i) in xy.iter().enumerate() {
            for (b, &j) in xy.iter().enumerate() {
                mm[(i, j)] = c * bend[a][b];
            }
        }

        // XZ plane (DOFs 2, 4, 8, 10); rotation sign flipped
        let xz = [2, 4, 8, 10];
        let sign = [1.0, -1.0, 1.0, -1.0];
        for (a, &i) in xz.iter().enumerate() {
            for (b, &j) in xz.iter().enumerate() {
                mm[(i, j)] = c * bend[a][b] * sign[a] * sign[b];
            }
        }

        mm
    }
}

impl Element for Beam31 {
    fn stiffness_matrix(
        &self,
        nodes: &[Pose],
        material: &Material,
    ) -> Result<DMatrix<f64>, String> {
        let length = self.length(nodes)?;
        let k_local = self.local_stiffness(length, material);
        let t = self.transformation_matrix(nodes)?;

        // K = T^T * K_local * T
        Ok(t.transpose() * k_local * &t)
    }

    fn mass_matrix(&self, nodes: &[Pose], material: &Material) -> Result<DMatrix<f64>, String> {
        let length = self.length(nodes)?;
        let m_local = self.local_mass(length, material);
        let t = self.transformation_matrix(nodes)?;
        Ok(t.transpose() * m_local * &t)
    }

    fn num_nodes(&self) -> usize {
        2
    }

    fn dofs_per_node(&self) -> usize {
        6 // 3 translations + 3 rotations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{DVector, UnitQuaternion};

    fn steel() -> Material {
        Material::new("Steel", 200e9, 0.3, 7850.0)
    }

    fn poses(a: Vector3<f64>, b: Vector3<f64>) -> Vec<Pose> {
        vec![
            Pose {
                pos: a,
                rot: UnitQuaternion::identity(),
            },
            Pose {
                pos: b,
                rot: UnitQuaternion::identity(),
            },
        ]
    }

    fn beam() -> Beam31 {
        Beam31::new(
            1,
            [ItemHandle::boundary(0), ItemHandle::internal(0)],
            BeamSection::custom(0.01, 1e-6, 2e-6, 1e-6),
            0,
        )
    }

    #[test]
    fn test_circular_section() {
        let radius = 0.05;
        let section = BeamSection::circular(radius);

        let expected_area = std::f64::consts::PI * radius.powi(2);
        let expected_i = std::f64::consts::PI * radius.powi(4) / 4.0;
        let expected_j = std::f64::consts::PI * radius.powi(4) / 2.0;

        assert!((section.area - expected_area).abs() < 1e-10);
        assert!((section.iyy - expected_i).abs() < 1e-10);
        assert!((section.izz - expected_i).abs() < 1e-10);
        assert!((section.torsion_constant - expected_j).abs() < 1e-10);
    }

    #[test]
    fn test_rectangular_section() {
        let section = BeamSection::rectangular(0.1, 0.2);
        assert_eq!(section.area, 0.1 * 0.2);
        assert_eq!(section.iyy, 0.1 * 0.2_f64.powi(3) / 12.0);
        assert_eq!(section.izz, 0.2 * 0.1_f64.powi(3) / 12.0);
        assert!(section.torsion_constant > 0.0);
    }

    #[test]
    fn test_beam31_axial_stiffness() {
        let nodes = poses(Vector3::zeros(), Vector3::new(1.0, 0.0, 0.0));
        let k = beam().stiffness_matrix(&nodes, &steel()).unwrap();
        assert_eq!(k.shape(), (12, 12));

        let expected_axial = 200e9 * 0.01 / 1.0;
        assert!((k[(0, 0)] - expected_axial).abs() / expected_axial < 1e-6);
        assert!((k[(0, 6)] + expected_axial).abs() / expected_axial < 1e-6);
    }

    #[test]
    fn rigid_motion_is_stress_free() {
        let nodes = poses(Vector3::new(0.3, -0.2, 0.1), Vector3::new(1.1, 0.4, 0.7));
        let k = beam().stiffness_matrix(&nodes, &steel()).unwrap();

        // Infinitesimal rotation ω about the origin: u_i = ω × r_i, θ_i = ω
        let omega = Vector3::new(0.2, -0.5, 0.9);
        let mut u = DVector::zeros(12);
        for (n, node) in nodes.iter().enumerate() {
            u.fixed_rows_mut::<3>(6 * n).copy_from(&omega.cross(&node.pos));
            u.fixed_rows_mut::<3>(6 * n + 3).copy_from(&omega);
        }
        let f = &k * &u;
        assert!(f.norm() < 1e-6 * k.norm() * u.norm());
    }

    #[test]
    fn consistent_mass_total_and_symmetry() {
        let nodes = poses(Vector3::zeros(), Vector3::new(0.0, 2.0, 0.0));
        let m = beam().mass_matrix(&nodes, &steel()).unwrap();
        assert_relative_eq!(m.clone(), m.transpose(), epsilon = 1e-9);

        // Unit translation along x: kinetic mass equals ρ A L
        let mut ux = DVector::zeros(12);
        ux[0] = 1.0;
        ux[6] = 1.0;
        let total = (ux.transpose() * &m * &ux)[(0, 0)];
        assert_relative_eq!(total, 7850.0 * 0.01 * 2.0, max_relative = 1e-12);
    }

    #[test]
    fn rotated_item_axes_enter_transformation() {
        let mut nodes = poses(Vector3::zeros(), Vector3::new(1.0, 0.0, 0.0));
        let k0 = beam().stiffness_matrix(&nodes, &steel()).unwrap();
        nodes[1].rot = UnitQuaternion::from_euler_angles(0.0, 0.0, std::f64::consts::FRAC_PI_2);
        let k1 = beam().stiffness_matrix(&nodes, &steel()).unwrap();

        // Node 2 local x-rotation now acts about global y
        assert_relative_eq!(k1[(9, 9)], k0[(10, 10)], max_relative = 1e-9);
    }

    #[test]
    fn rayleigh_damping_combines_mass_and_stiffness() {
        let nodes = poses(Vector3::zeros(), Vector3::new(1.0, 0.0, 0.0));
        let mat = steel().with_rayleigh_damping(0.5, 1e-4);
        let b = beam();
        let r = b.damping_matrix(&nodes, &mat).unwrap();
        let expected = b.mass_matrix(&nodes, &mat).unwrap() * 0.5
            + b.stiffness_matrix(&nodes, &mat).unwrap() * 1e-4;
        assert_relative_eq!(r, expected, max_relative = 1e-12);
    }
}
