//! Native backend using nalgebra.
//!
//! This is the default backend. It supports:
//! - Ruiz-equilibrated dense LU for the bordered internal systems
//! - Null-space projection plus Cholesky-transformed SymmetricEigen for
//!   constrained generalized eigenvalue problems

use super::traits::*;
use nalgebra::linalg::{Cholesky, LU};
use nalgebra::{DMatrix, DVector, Dyn};
use nalgebra_sparse::CsrMatrix;

/// Native solver backend using nalgebra for all numerical operations.
///
/// Suitable for small-to-medium subassemblies (a few thousand DOFs).
#[derive(Debug, Clone)]
pub struct NativeBackend {
    /// Smallest accepted ratio `min|u_kk| / max|u_kk|` after equilibration.
    pub pivot_ratio_tolerance: f64,
    /// Relative cutoff on the eigenvalues of `CqᵗCq` defining the null space.
    pub null_space_tolerance: f64,
    pub equilibration_sweeps: usize,
}

impl Default for NativeBackend {
    fn default() -> Self {
        Self {
            pivot_ratio_tolerance: 1e-12,
            null_space_tolerance: 1e-10,
            equilibration_sweeps: 8,
        }
    }
}

/// Dense LU of `Dr A Dc`, solving `A x = b` as `x = Dc (Dr A Dc)⁻¹ Dr b`.
struct EquilibratedLu {
    lu: LU<f64, Dyn, Dyn>,
    row_scale: DVector<f64>,
    col_scale: DVector<f64>,
}

impl Factorization for EquilibratedLu {
    fn dim(&self) -> usize {
        self.row_scale.len()
    }

    fn solve(&self, rhs: &DVector<f64>) -> Result<DVector<f64>, BackendError> {
        if rhs.len() != self.dim() {
            return Err(BackendError(format!(
                "right-hand side has {} rows, factorization has {}",
                rhs.len(),
                self.dim()
            )));
        }
        let scaled = rhs.component_mul(&self.row_scale);
        let y = self
            .lu
            .solve(&scaled)
            .ok_or(BackendError("Singular matrix in LU solve".into()))?;
        Ok(y.component_mul(&self.col_scale))
    }
}

/// Ruiz scaling: alternately divide rows and columns by the square root of
/// their infinity norm until both are close to one.
fn equilibrate(
    a: &mut DMatrix<f64>,
    sweeps: usize,
) -> Result<(DVector<f64>, DVector<f64>), BackendError> {
    let n = a.nrows();
    let mut row_scale = DVector::from_element(n, 1.0);
    let mut col_scale = DVector::from_element(n, 1.0);

    for sweep in 0..sweeps {
        let mut r = DVector::zeros(n);
        let mut c = DVector::zeros(n);
        for i in 0..n {
            let row_max = a.row(i).amax();
            let col_max = a.column(i).amax();
            if row_max == 0.0 {
                return Err(BackendError(format!("row {} is identically zero", i)));
            }
            if col_max == 0.0 {
                return Err(BackendError(format!("column {} is identically zero", i)));
            }
            r[i] = 1.0 / row_max.sqrt();
            c[i] = 1.0 / col_max.sqrt();
        }
        for j in 0..n {
            for i in 0..n {
                a[(i, j)] *= r[i] * c[j];
            }
        }
        row_scale.component_mul_assign(&r);
        col_scale.component_mul_assign(&c);

        let spread = r.iter().chain(c.iter()).fold(0.0_f64, |acc, s| acc.max((s - 1.0).abs()));
        if spread < 1e-3 && sweep > 0 {
            break;
        }
    }
    Ok((row_scale, col_scale))
}

impl LinearSolver for NativeBackend {
    fn factorize(
        &self,
        a: &CsrMatrix<f64>,
    ) -> Result<(Box<dyn Factorization>, SolveInfo), BackendError> {
        if a.nrows() != a.ncols() {
            return Err(BackendError(format!(
                "cannot factor a non-square {}x{} matrix",
                a.nrows(),
                a.ncols()
            )));
        }
        let mut dense = DMatrix::from(a);
        let (row_scale, col_scale) = equilibrate(&mut dense, self.equilibration_sweeps)?;

        let lu = dense.lu();
        let u = lu.u();
        let diag = u.diagonal().map(f64::abs);
        let max_pivot = diag.max();
        let min_pivot = diag.min();
        if min_pivot == 0.0 || min_pivot < self.pivot_ratio_tolerance * max_pivot {
            return Err(BackendError(format!(
                "Singular matrix in LU decomposition (pivot ratio {:.3e})",
                if max_pivot > 0.0 { min_pivot / max_pivot } else { 0.0 }
            )));
        }

        Ok((
            Box::new(EquilibratedLu {
                lu,
                row_scale,
                col_scale,
            }),
            SolveInfo {
                iterations: 1,
                residual_norm: Some(min_pivot / max_pivot),
                solver_name: "nalgebra-LU".to_string(),
            },
        ))
    }
}

impl NativeBackend {
    /// Orthonormal basis of `ker(Cq)` as columns.
    fn null_space(&self, cq: &DMatrix<f64>) -> DMatrix<f64> {
        let n = cq.ncols();
        let gram = cq.transpose() * cq;
        let eigen = gram.symmetric_eigen();
        let scale = eigen.eigenvalues.amax().max(f64::MIN_POSITIVE);
        let keep: Vec<usize> = (0..n)
            .filter(|&i| eigen.eigenvalues[i] <= self.null_space_tolerance * scale)
            .collect();
        let mut z = DMatrix::zeros(n, keep.len());
        for (col, &i) in keep.iter().enumerate() {
            z.set_column(col, &eigen.eigenvectors.column(i));
        }
        z
    }
}

impl EigenSolver for NativeBackend {
    fn solve_eigen(
        &self,
        system: &EigenSystemData<'_>,
    ) -> Result<(EigenResult, SolveInfo), BackendError> {
        let k_full = DMatrix::from(system.stiffness);
        let m_full = DMatrix::from(system.mass);
        let n_full = k_full.nrows();
        if n_full == 0 {
            return Err("No DOFs for eigenvalue problem".into());
        }
        if m_full.shape() != (n_full, n_full) || k_full.ncols() != n_full {
            return Err("Mass and stiffness matrices differ in size".into());
        }

        // Restrict to the constraint null space: φ = Z φ_z
        let z = match system.constraints {
            Some(cq) if cq.nrows() > 0 => {
                if cq.ncols() != n_full {
                    return Err(BackendError(format!(
                        "constraint Jacobian has {} columns, expected {}",
                        cq.ncols(),
                        n_full
                    )));
                }
                Some(self.null_space(&DMatrix::from(cq)))
            }
            _ => None,
        };
        let (k_red, m_red) = match &z {
            Some(z) => (z.transpose() * &k_full * z, z.transpose() * &m_full * z),
            None => (k_full, m_full),
        };
        let n = k_red.nrows();
        if n == 0 {
            return Err("Constraints leave no free DOFs for eigenvalue problem".into());
        }

        // Cholesky decomposition: M = L * L^T
        let m_sym = (&m_red + m_red.transpose()) * 0.5;
        let chol_m = Cholesky::new(m_sym)
            .ok_or(BackendError("Mass matrix not positive definite".into()))?;
        let l = chol_m.l();

        // K* = L^-1 * K * L^-T
        let y = l
            .solve_lower_triangular(&k_red)
            .ok_or(BackendError("Failed to invert Cholesky factor L".into()))?;
        let k_star = l
            .solve_lower_triangular(&y.transpose())
            .ok_or(BackendError("Failed to invert Cholesky factor L".into()))?;
        let k_star = (&k_star + k_star.transpose()) * 0.5;

        let eigen = k_star.symmetric_eigen();
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| eigen.eigenvalues[a].total_cmp(&eigen.eigenvalues[b]));

        let mut psi = DMatrix::zeros(n, n);
        for (col, &i) in order.iter().enumerate() {
            psi.set_column(col, &eigen.eigenvectors.column(i));
        }

        // Transform eigenvectors back: phi = Z * L^-T * psi
        let phi_red = l
            .transpose()
            .solve_upper_triangular(&psi)
            .ok_or(BackendError("Failed to invert Cholesky factor L^T".into()))?;
        let eigenvectors = match &z {
            Some(z) => z * phi_red,
            None => phi_red,
        };
        let eigenvalues = order.iter().map(|&i| eigen.eigenvalues[i]).collect();

        Ok((
            EigenResult {
                eigenvalues,
                eigenvectors,
            },
            SolveInfo {
                iterations: 1,
                residual_norm: None,
                solver_name: "nalgebra-Cholesky+SymmetricEigen".to_string(),
            },
        ))
    }
}

impl SolverBackend for NativeBackend {
    fn name(&self) -> &str {
        "native-nalgebra"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra_sparse::CooMatrix;

    fn csr(nrows: usize, ncols: usize, entries: &[(usize, usize, f64)]) -> CsrMatrix<f64> {
        let mut coo = CooMatrix::new(nrows, ncols);
        for &(i, j, v) in entries {
            coo.push(i, j, v);
        }
        CsrMatrix::from(&coo)
    }

    #[test]
    fn native_linear_solve_3x3() {
        // K = [4 -1 0; -1 4 -1; 0 -1 4], F = [1; 2; 1]
        let backend = NativeBackend::default();
        let k = csr(
            3,
            3,
            &[
                (0, 0, 4.0),
                (0, 1, -1.0),
                (1, 0, -1.0),
                (1, 1, 4.0),
                (1, 2, -1.0),
                (2, 1, -1.0),
                (2, 2, 4.0),
            ],
        );
        let (fact, info) = backend.factorize(&k).unwrap();
        assert_eq!(info.solver_name, "nalgebra-LU");

        let f = DVector::from_vec(vec![1.0, 2.0, 1.0]);
        let u = fact.solve(&f).unwrap();
        assert_relative_eq!(DMatrix::from(&k) * u, f, epsilon = 1e-12);
    }

    #[test]
    fn saddle_point_system_with_badly_scaled_rows() {
        // [[k, 0, 1], [0, k, 1], [1, 1, 0]] with k = 1e9
        let k = 1e9;
        let a = csr(
            3,
            3,
            &[(0, 0, k), (1, 1, k), (0, 2, 1.0), (1, 2, 1.0), (2, 0, 1.0), (2, 1, 1.0)],
        );
        let (fact, _) = NativeBackend::default().factorize(&a).unwrap();
        let b = DVector::from_vec(vec![k, -k, 0.0]);
        let x = fact.solve(&b).unwrap();
        assert_relative_eq!(x[0], 1.0, epsilon = 1e-9);
        assert_relative_eq!(x[1], -1.0, epsilon = 1e-9);
        assert_relative_eq!(x[2], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn singular_matrix_is_rejected() {
        // Two springs in series with no support: rank 1
        let a = csr(2, 2, &[(0, 0, 1.0), (0, 1, -1.0), (1, 0, -1.0), (1, 1, 1.0)]);
        assert!(NativeBackend::default().factorize(&a).is_err());

        let zero_row = csr(2, 2, &[(0, 0, 1.0)]);
        assert!(NativeBackend::default().factorize(&zero_row).is_err());
    }

    #[test]
    fn eigen_two_dof_chain() {
        // M = I, K = [2 -1; -1 2] -> λ = 1, 3
        let k = csr(2, 2, &[(0, 0, 2.0), (0, 1, -1.0), (1, 0, -1.0), (1, 1, 2.0)]);
        let m = csr(2, 2, &[(0, 0, 1.0), (1, 1, 1.0)]);
        let (res, _) = NativeBackend::default()
            .solve_eigen(&EigenSystemData {
                stiffness: &k,
                mass: &m,
                constraints: None,
            })
            .unwrap();
        assert_relative_eq!(res.eigenvalues[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(res.eigenvalues[1], 3.0, epsilon = 1e-12);
        let phi = res.eigenvectors.column(0);
        assert_relative_eq!(phi.norm(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn eigen_respects_constraints() {
        // Free-free two-mass chain tied together: only the rigid mode survives
        let k = csr(2, 2, &[(0, 0, 1.0), (0, 1, -1.0), (1, 0, -1.0), (1, 1, 1.0)]);
        let m = csr(2, 2, &[(0, 0, 1.0), (1, 1, 1.0)]);
        let cq = csr(1, 2, &[(0, 0, 1.0), (0, 1, -1.0)]);
        let (res, _) = NativeBackend::default()
            .solve_eigen(&EigenSystemData {
                stiffness: &k,
                mass: &m,
                constraints: Some(&cq),
            })
            .unwrap();
        assert_eq!(res.eigenvalues.len(), 1);
        assert_relative_eq!(res.eigenvalues[0], 0.0, epsilon = 1e-12);
        let phi = res.eigenvectors.column(0);
        assert_relative_eq!(phi[0], phi[1], epsilon = 1e-12);
        // mass normalized: 2 φ² = 1
        assert_relative_eq!(2.0 * phi[0] * phi[0], 1.0, epsilon = 1e-12);
    }
}
