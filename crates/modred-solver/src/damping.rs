//! Damping models for the reduced system.
//!
//! A model turns the freshly reduced `M_red`, `K_red` and the reduction basis
//! `Psi` into `R_red`. Any closure with the matching signature is a model.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::assembly::FullMatrices;
use crate::error::{ModalError, Result};
use crate::partition::CoordinatePartition;

/// Data available to a damping model when `R_red` is computed.
pub struct ReductionContext<'a> {
    pub partition: &'a CoordinatePartition,
    /// Full matrices in the floating frame at the time of reduction.
    pub full_local: &'a FullMatrices,
    /// Frequencies (Hz) of the retained modes, in modal-coordinate order.
    pub frequencies: &'a [f64],
}

pub trait DampingModel: Send + Sync {
    fn compute_r(
        &self,
        ctx: &ReductionContext<'_>,
        m_red: &DMatrix<f64>,
        k_red: &DMatrix<f64>,
        psi: &DMatrix<f64>,
    ) -> Result<DMatrix<f64>>;
}

impl<F> DampingModel for F
where
    F: Fn(
            &ReductionContext<'_>,
            &DMatrix<f64>,
            &DMatrix<f64>,
            &DMatrix<f64>,
        ) -> Result<DMatrix<f64>>
        + Send
        + Sync,
{
    fn compute_r(
        &self,
        ctx: &ReductionContext<'_>,
        m_red: &DMatrix<f64>,
        k_red: &DMatrix<f64>,
        psi: &DMatrix<f64>,
    ) -> Result<DMatrix<f64>> {
        self(ctx, m_red, k_red, psi)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoDamping;

impl DampingModel for NoDamping {
    fn compute_r(
        &self,
        _ctx: &ReductionContext<'_>,
        m_red: &DMatrix<f64>,
        _k_red: &DMatrix<f64>,
        _psi: &DMatrix<f64>,
    ) -> Result<DMatrix<f64>> {
        Ok(DMatrix::zeros(m_red.nrows(), m_red.ncols()))
    }
}

/// `R_red = α M_red + β K_red`.
#[derive(Debug, Clone, Copy)]
pub struct RayleighDamping {
    pub alpha: f64,
    pub beta: f64,
}

impl DampingModel for RayleighDamping {
    fn compute_r(
        &self,
        _ctx: &ReductionContext<'_>,
        m_red: &DMatrix<f64>,
        k_red: &DMatrix<f64>,
        _psi: &DMatrix<f64>,
    ) -> Result<DMatrix<f64>> {
        Ok(m_red * self.alpha + k_red * self.beta)
    }
}

/// Projects the full damping matrix: `R_red = Psiᵗ R_loc Psi`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReducedFullDamping;

impl DampingModel for ReducedFullDamping {
    fn compute_r(
        &self,
        ctx: &ReductionContext<'_>,
        _m_red: &DMatrix<f64>,
        _k_red: &DMatrix<f64>,
        psi: &DMatrix<f64>,
    ) -> Result<DMatrix<f64>> {
        let r = &ctx.full_local.r;
        if r.ncols() != psi.nrows() {
            return Err(ModalError::dimension(
                "R_loc",
                (psi.nrows(), psi.nrows()),
                (r.nrows(), r.ncols()),
            ));
        }
        let r_psi: DMatrix<f64> = r * psi;
        Ok(psi.transpose() * r_psi)
    }
}

/// Modal damping factors on the modal block only:
/// `R_mm[i,i] = 2 ζ_i ω_i M_red[i,i]`.
///
/// The last factor is reused for modes beyond the list.
#[derive(Debug, Clone, PartialEq)]
pub struct ModalFactorDamping {
    pub factors: Vec<f64>,
}

impl DampingModel for ModalFactorDamping {
    fn compute_r(
        &self,
        ctx: &ReductionContext<'_>,
        m_red: &DMatrix<f64>,
        _k_red: &DMatrix<f64>,
        _psi: &DMatrix<f64>,
    ) -> Result<DMatrix<f64>> {
        let n_b = ctx.partition.n_boundary_coords_w;
        let n_m = ctx.partition.n_modes_coords_w;
        if ctx.frequencies.len() != n_m {
            return Err(ModalError::Dimension(format!(
                "{} modal frequencies for {} modal coordinates",
                ctx.frequencies.len(),
                n_m
            )));
        }
        let mut r = DMatrix::zeros(m_red.nrows(), m_red.ncols());
        let Some(&last) = self.factors.last() else {
            return Ok(r);
        };
        for (i, f) in ctx.frequencies.iter().enumerate() {
            let zeta = self.factors.get(i).copied().unwrap_or(last);
            let omega = 2.0 * std::f64::consts::PI * f;
            let k = n_b + i;
            r[(k, k)] = 2.0 * zeta * omega * m_red[(k, k)];
        }
        Ok(r)
    }
}

/// Serializable damping selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum DampingConfig {
    #[default]
    None,
    Rayleigh {
        alpha: f64,
        beta: f64,
    },
    ReducedFull,
    ModalFactor {
        factors: Vec<f64>,
    },
}

impl DampingConfig {
    pub fn validate(&self) -> Result<()> {
        match self {
            DampingConfig::Rayleigh { alpha, beta } if *alpha < 0.0 || *beta < 0.0 => Err(
                ModalError::Configuration("Rayleigh coefficients must be non-negative".to_string()),
            ),
            DampingConfig::ModalFactor { factors } if factors.iter().any(|z| *z < 0.0) => Err(
                ModalError::Configuration("modal damping factors must be non-negative".to_string()),
            ),
            _ => Ok(()),
        }
    }

    pub fn build(&self) -> Box<dyn DampingModel> {
        match self {
            DampingConfig::None => Box::new(NoDamping),
            DampingConfig::Rayleigh { alpha, beta } => Box::new(RayleighDamping {
                alpha: *alpha,
                beta: *beta,
            }),
            DampingConfig::ReducedFull => Box::new(ReducedFullDamping),
            DampingConfig::ModalFactor { factors } => Box::new(ModalFactorDamping {
                factors: factors.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra_sparse::{CooMatrix, CsrMatrix};

    fn empty_full(n: usize) -> FullMatrices {
        let z = CsrMatrix::from(&CooMatrix::<f64>::new(n, n));
        FullMatrices {
            m: z.clone(),
            k: z.clone(),
            r: z,
            cq: CsrMatrix::from(&CooMatrix::<f64>::new(0, n)),
        }
    }

    fn partition() -> CoordinatePartition {
        CoordinatePartition {
            n_boundary_coords_w: 6,
            n_internal_coords_w: 6,
            n_modes_coords_w: 2,
            ..Default::default()
        }
    }

    #[test]
    fn rayleigh_combines_reduced_matrices() {
        let p = partition();
        let full = empty_full(12);
        let ctx = ReductionContext {
            partition: &p,
            full_local: &full,
            frequencies: &[0.0, 1.0],
        };
        let m = DMatrix::identity(8, 8) * 2.0;
        let k = DMatrix::identity(8, 8) * 10.0;
        let r = DampingConfig::Rayleigh { alpha: 0.5, beta: 0.01 }
            .build()
            .compute_r(&ctx, &m, &k, &DMatrix::zeros(12, 8))
            .unwrap();
        assert_relative_eq!(r[(3, 3)], 1.1, epsilon = 1e-14);
        assert_eq!(r[(0, 1)], 0.0);
    }

    #[test]
    fn modal_factors_fill_modal_diagonal_only() {
        let p = partition();
        let full = empty_full(12);
        let ctx = ReductionContext {
            partition: &p,
            full_local: &full,
            frequencies: &[2.0, 5.0],
        };
        let m = DMatrix::identity(8, 8) * 3.0;
        let model = ModalFactorDamping { factors: vec![0.05] };
        let r = model.compute_r(&ctx, &m, &m, &DMatrix::zeros(12, 8)).unwrap();
        let two_pi = 2.0 * std::f64::consts::PI;
        assert_relative_eq!(r[(6, 6)], 2.0 * 0.05 * two_pi * 2.0 * 3.0, epsilon = 1e-12);
        assert_relative_eq!(r[(7, 7)], 2.0 * 0.05 * two_pi * 5.0 * 3.0, epsilon = 1e-12);
        assert_eq!(r.view((0, 0), (6, 6)).norm(), 0.0);
    }

    #[test]
    fn reduced_full_projects_through_basis() {
        let p = partition();
        let mut full = empty_full(12);
        let mut coo = CooMatrix::new(12, 12);
        for i in 0..12 {
            coo.push(i, i, 4.0);
        }
        full.r = CsrMatrix::from(&coo);
        let ctx = ReductionContext {
            partition: &p,
            full_local: &full,
            frequencies: &[0.0, 0.0],
        };
        let psi = DMatrix::from_fn(12, 8, |i, j| if i == j { 1.0 } else { 0.0 });
        let r = ReducedFullDamping
            .compute_r(&ctx, &DMatrix::zeros(8, 8), &DMatrix::zeros(8, 8), &psi)
            .unwrap();
        assert_relative_eq!(r, DMatrix::identity(8, 8) * 4.0, epsilon = 1e-14);
    }

    #[test]
    fn closures_are_models() {
        let p = partition();
        let full = empty_full(12);
        let ctx = ReductionContext {
            partition: &p,
            full_local: &full,
            frequencies: &[0.0, 0.0],
        };
        let model = |_: &ReductionContext<'_>,
                     m: &DMatrix<f64>,
                     _: &DMatrix<f64>,
                     _: &DMatrix<f64>|
         -> Result<DMatrix<f64>> { Ok(m * 0.2) };
        let r = model
            .compute_r(
                &ctx,
                &DMatrix::identity(8, 8),
                &DMatrix::zeros(8, 8),
                &DMatrix::zeros(12, 8),
            )
            .unwrap();
        assert_relative_eq!(r[(4, 4)], 0.2);
    }

    #[test]
    fn config_parses_and_validates() {
        let c: DampingConfig =
            serde_json::from_str(r#"{"model": "rayleigh", "alpha": 0.1, "beta": 0.001}"#).unwrap();
        assert_eq!(c, DampingConfig::Rayleigh { alpha: 0.1, beta: 0.001 });
        let c: DampingConfig =
            serde_json::from_str(r#"{"model": "modal_factor", "factors": [-0.1]}"#).unwrap();
        assert!(matches!(c.validate(), Err(ModalError::Configuration(_))));
        let c: DampingConfig = serde_json::from_str(r#"{"model": "none"}"#).unwrap();
        assert_eq!(c, DampingConfig::None);
    }
}
