//! Backend trait definitions for numerical solvers.
//!
//! The reduction kernel needs two global services: a linear solver that is
//! factored once and then applied to many right-hand sides, and a
//! generalized eigensolver that respects linear constraints. Element-level
//! and reduced-size work stays in nalgebra (small, dense matrices).

use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CsrMatrix;

/// Error type for backend operations.
#[derive(Debug, Clone)]
pub struct BackendError(pub String);

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BackendError {}

impl From<String> for BackendError {
    fn from(s: String) -> Self {
        BackendError(s)
    }
}

impl From<&str> for BackendError {
    fn from(s: &str) -> Self {
        BackendError(s.to_string())
    }
}

/// A generalized eigenvalue system `K φ = λ M φ` subject to `Cq φ = 0`.
pub struct EigenSystemData<'a> {
    pub stiffness: &'a CsrMatrix<f64>,
    pub mass: &'a CsrMatrix<f64>,
    /// Constraint Jacobian; `None` or zero rows means unconstrained.
    pub constraints: Option<&'a CsrMatrix<f64>>,
}

/// Results from an eigenvalue solve.
pub struct EigenResult {
    /// Eigenvalues (lambda = omega^2), sorted ascending
    pub eigenvalues: Vec<f64>,
    /// Mass-normalized eigenvectors as columns (num_dofs x num_modes)
    pub eigenvectors: DMatrix<f64>,
}

/// Solver convergence and diagnostic info.
#[derive(Debug, Clone)]
pub struct SolveInfo {
    /// Number of iterations (1 for direct solvers)
    pub iterations: usize,
    /// Final residual norm (if available)
    pub residual_norm: Option<f64>,
    /// Human-readable solver name (e.g., "nalgebra-LU")
    pub solver_name: String,
}

/// A factored square matrix.
///
/// Shared read-only between column solves, hence `Send + Sync`.
pub trait Factorization: Send + Sync {
    fn dim(&self) -> usize;

    fn solve(&self, rhs: &DVector<f64>) -> Result<DVector<f64>, BackendError>;
}

/// Trait for a linear solver backend.
pub trait LinearSolver: Send + Sync {
    /// Factor `a` once; fails when `a` is numerically singular.
    fn factorize(
        &self,
        a: &CsrMatrix<f64>,
    ) -> Result<(Box<dyn Factorization>, SolveInfo), BackendError>;
}

/// Trait for an eigenvalue solver backend.
///
/// Implementations return every eigenpair of the constrained problem,
/// including the zero-frequency ones; mode selection happens upstream.
pub trait EigenSolver: Send + Sync {
    fn solve_eigen(
        &self,
        system: &EigenSystemData<'_>,
    ) -> Result<(EigenResult, SolveInfo), BackendError>;
}

/// Combined backend providing both linear and eigenvalue solvers.
pub trait SolverBackend: LinearSolver + EigenSolver {
    /// Human-readable name of this backend.
    fn name(&self) -> &str;
}
