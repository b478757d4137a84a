//! Linear Newmark integration used to verify reduced models.
//!
//! Solves `M*ü + C*u̇ + K*u = f(t)` on dense matrices:
//!
//! ```text
//! u_{n+1} = u_n + Δt*u̇_n + (Δt²/2)*[(1-2β)*ü_n + 2β*ü_{n+1}]
//! u̇_{n+1} = u̇_n + Δt*[(1-γ)*ü_n + γ*ü_{n+1}]
//! ```
//!
//! Standard parameter choices:
//! - **Average acceleration** (unconditionally stable): γ = 1/2, β = 1/4
//! - **Linear acceleration**: γ = 1/2, β = 1/6

use nalgebra::{DMatrix, DVector};

use crate::error::{ModalError, Result};

/// Newmark time integration parameters
#[derive(Debug, Clone, Copy)]
pub struct NewmarkConfig {
    /// Newmark β parameter (controls acceleration)
    pub beta: f64,
    /// Newmark γ parameter (controls velocity)
    pub gamma: f64,
}

impl NewmarkConfig {
    /// Average acceleration method (unconditionally stable, 2nd order accurate)
    pub fn average_acceleration() -> Self {
        Self { beta: 0.25, gamma: 0.5 }
    }

    /// Linear acceleration method (conditionally stable)
    pub fn linear_acceleration() -> Self {
        Self {
            beta: 1.0 / 6.0,
            gamma: 0.5,
        }
    }
}

impl Default for NewmarkConfig {
    fn default() -> Self {
        Self::average_acceleration()
    }
}

/// Time history of a Newmark run
#[derive(Debug, Clone)]
pub struct NewmarkResults {
    pub time_steps: Vec<f64>,
    pub displacements: Vec<DVector<f64>>,
    pub velocities: Vec<DVector<f64>>,
    pub accelerations: Vec<DVector<f64>>,
}

impl NewmarkResults {
    pub fn displacement_at(&self, step: usize) -> Option<&DVector<f64>> {
        self.displacements.get(step)
    }

    pub fn num_steps(&self) -> usize {
        self.time_steps.len()
    }
}

/// A linear second-order system with constant matrices.
pub struct LinearSystem {
    pub m: DMatrix<f64>,
    pub c: DMatrix<f64>,
    pub k: DMatrix<f64>,
}

impl LinearSystem {
    pub fn new(m: DMatrix<f64>, c: DMatrix<f64>, k: DMatrix<f64>) -> Result<Self> {
        let n = m.nrows();
        for (what, mat) in [("M", &m), ("C", &c), ("K", &k)] {
            if mat.shape() != (n, n) {
                return Err(ModalError::dimension(what, (n, n), mat.shape()));
            }
        }
        Ok(Self { m, c, k })
    }

    pub fn num_dofs(&self) -> usize {
        self.m.nrows()
    }

    /// Integrates from `(u0, v0)` over `[0, t_end]` with step `dt`.
    ///
    /// The initial acceleration solves `M a0 = f(0) - C v0 - K u0`.
    pub fn integrate<F>(
        &self,
        config: &NewmarkConfig,
        u0: &DVector<f64>,
        v0: &DVector<f64>,
        t_end: f64,
        dt: f64,
        mut force: F,
    ) -> Result<NewmarkResults>
    where
        F: FnMut(f64) -> DVector<f64>,
    {
        if dt <= 0.0 || t_end <= 0.0 {
            return Err(ModalError::Configuration(
                "time step and end time must be positive".to_string(),
            ));
        }
        let n = self.num_dofs();
        if u0.len() != n || v0.len() != n {
            return Err(ModalError::dimension("initial state", (n, 1), (u0.len(), 1)));
        }

        let a0 = self
            .m
            .clone()
            .lu()
            .solve(&(force(0.0) - &self.c * v0 - &self.k * u0))
            .ok_or_else(|| ModalError::Singular {
                which: "M".to_string(),
                detail: "initial acceleration".to_string(),
            })?;

        let NewmarkConfig { beta, gamma } = *config;
        let dt2 = dt * dt;
        // K_eff = K + (γ/(β*Δt))*C + (1/(β*Δt²))*M
        let k_eff = &self.k + &self.c * (gamma / (beta * dt)) + &self.m * (1.0 / (beta * dt2));
        let lu = k_eff.lu();

        let num_steps = (t_end / dt).ceil() as usize + 1;
        let mut results = NewmarkResults {
            time_steps: Vec::with_capacity(num_steps),
            displacements: Vec::with_capacity(num_steps),
            velocities: Vec::with_capacity(num_steps),
            accelerations: Vec::with_capacity(num_steps),
        };
        results.time_steps.push(0.0);
        results.displacements.push(u0.clone());
        results.velocities.push(v0.clone());
        results.accelerations.push(a0.clone());

        let mut u_n = u0.clone();
        let mut v_n = v0.clone();
        let mut a_n = a0;
        for step in 1..num_steps {
            let t = step as f64 * dt;

            let m_term =
                &u_n / (beta * dt2) + &v_n / (beta * dt) + &a_n * (1.0 / (2.0 * beta) - 1.0);
            let c_term = &u_n * (gamma / (beta * dt))
                + &v_n * (gamma / beta - 1.0)
                + &a_n * (dt * (gamma / (2.0 * beta) - 1.0));
            let f_eff = force(t) + &self.m * m_term + &self.c * c_term;

            let u_next = lu.solve(&f_eff).ok_or_else(|| ModalError::Singular {
                which: "K_eff".to_string(),
                detail: format!("step {}", step),
            })?;
            let a_next = (&u_next - &u_n) / (beta * dt2)
                - &v_n / (beta * dt)
                - &a_n * (1.0 / (2.0 * beta) - 1.0);
            let v_next = &v_n + (&a_n * (1.0 - gamma) + &a_next * gamma) * dt;

            results.time_steps.push(t);
            results.displacements.push(u_next.clone());
            results.velocities.push(v_next.clone());
            results.accelerations.push(a_next.clone());

            u_n = u_next;
            v_n = v_next;
            a_n = a_next;
        }
        Ok(results)
    }
}
