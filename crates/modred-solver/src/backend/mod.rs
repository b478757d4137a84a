//! Numerical backend abstraction layer.
//!
//! The reduction kernel talks to the global linear algebra only through the
//! traits in [`traits`], so the dense nalgebra implementation can be swapped
//! for a sparse direct solver without touching the kernel.
//!
//! ```text
//! Assembly (COO triplets -> CSR)
//!         │
//!         ▼
//! Backend Trait Layer (LinearSolver, EigenSolver)
//!         │
//!         ▼
//!   Native Backend
//! ```

pub mod native;
pub mod traits;

pub use native::NativeBackend;
pub use traits::*;

/// Returns the default solver backend.
pub fn default_backend() -> Box<dyn SolverBackend> {
    Box::new(NativeBackend::default())
}
