//! Herting and Craig-Bampton reduction of the local full matrices.
//!
//! Both variants build `Psi = [[I, 0], [Psi_S, Psi_D]]` from static
//! correction shapes (`Psi_S`, one per boundary coordinate) and dynamic
//! correction shapes (`Psi_D`, one per retained mode), all obtained from a
//! single factorization of the bordered internal matrix
//!
//! ```text
//! K_IIc = [ K_II   Cq_IIᵗ ]
//!         [ Cq_II    0    ]
//! ```
//!
//! The mode columns are rescaled in a second pass so that the modal diagonal
//! of `M_red` matches the mean boundary diagonal.

use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CsrMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::assembly::FullMatrices;
use crate::backend::{BackendError, Factorization, LinearSolver};
use crate::error::{ModalError, Result};
use crate::math::{bordered_symmetric, csr_block, csr_to_dense, diagonal_head_mean, vstack};
use crate::partition::CoordinatePartition;

/// Reduction algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReductionType {
    /// Free-interface: modes of the whole subassembly, rigid modes included.
    #[default]
    Herting,
    /// Fixed-interface: modes of the internal part with the boundary clamped.
    CraigBampton,
}

impl ReductionType {
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "herting" => Ok(ReductionType::Herting),
            "craig_bampton" | "craigbampton" | "craig-bampton" => Ok(ReductionType::CraigBampton),
            other => Err(ModalError::Configuration(format!(
                "unknown reduction type '{}' (expected 'herting' or 'craig_bampton')",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReductionType::Herting => "herting",
            ReductionType::CraigBampton => "craig_bampton",
        }
    }
}

/// Output of the reduction kernel, before damping.
#[derive(Debug, Clone)]
pub struct ReducedSystem {
    pub psi_s: DMatrix<f64>,
    pub psi_d: DMatrix<f64>,
    pub psi: DMatrix<f64>,
    pub m_red: DMatrix<f64>,
    pub k_red: DMatrix<f64>,
    pub cq_red: DMatrix<f64>,
    /// Per-mode scale factors applied to the mode shapes.
    pub mode_scale: DVector<f64>,
}

/// Local full matrices split into the blocks the kernel needs.
struct Blocks {
    k_iic: CsrMatrix<f64>,
    /// `[K_IB; Cq_IB]`
    static_rhs: DMatrix<f64>,
    m_ib: CsrMatrix<f64>,
    m_ii: CsrMatrix<f64>,
    cq_b: CsrMatrix<f64>,
}

impl Blocks {
    fn split(p: &CoordinatePartition, local: &FullMatrices) -> Self {
        let (nb, ni) = (p.n_boundary_coords_w, p.n_internal_coords_w);
        let (nbd, nid) = (p.n_boundary_doc, p.n_internal_doc);
        let n = p.n_full_w();

        let k_ii = csr_block(&local.k, nb, nb, ni, ni);
        let k_iic = if nid > 0 {
            bordered_symmetric(&k_ii, &csr_block(&local.cq, nbd, nb, nid, ni))
        } else {
            k_ii
        };
        let k_ib = csr_to_dense(&csr_block(&local.k, nb, 0, ni, nb));
        let cq_ib = csr_to_dense(&csr_block(&local.cq, nbd, 0, nid, nb));

        Self {
            k_iic,
            static_rhs: vstack(&k_ib, &cq_ib),
            m_ib: csr_block(&local.m, nb, 0, ni, nb),
            m_ii: csr_block(&local.m, nb, nb, ni, ni),
            cq_b: csr_block(&local.cq, 0, 0, nbd, n),
        }
    }
}

fn singular(e: BackendError) -> ModalError {
    ModalError::Singular {
        which: "K_IIc".to_string(),
        detail: e.0,
    }
}

/// `-head(K_IIc⁻¹ rhs)` column by column against one shared factorization.
fn solve_columns(
    factor: &dyn Factorization,
    rhs: &DMatrix<f64>,
    n_head: usize,
) -> Result<DMatrix<f64>> {
    let columns = (0..rhs.ncols())
        .into_par_iter()
        .map(|j| factor.solve(&rhs.column(j).into_owned()))
        .collect::<std::result::Result<Vec<_>, BackendError>>()
        .map_err(singular)?;

    let mut out = DMatrix::zeros(n_head, rhs.ncols());
    for (j, x) in columns.iter().enumerate() {
        out.set_column(j, &(-x.rows(0, n_head)));
    }
    Ok(out)
}

fn assemble_psi(
    p: &CoordinatePartition,
    psi_s: &DMatrix<f64>,
    psi_d: &DMatrix<f64>,
) -> DMatrix<f64> {
    let (nb, ni, nm) = (p.n_boundary_coords_w, p.n_internal_coords_w, p.n_modes_coords_w);
    let mut psi = DMatrix::zeros(nb + ni, nb + nm);
    psi.view_mut((0, 0), (nb, nb)).fill_with_identity();
    psi.view_mut((nb, 0), (ni, nb)).copy_from(psi_s);
    psi.view_mut((nb, nb), (ni, nm)).copy_from(psi_d);
    psi
}

/// Projects `A` (CSR, full) to `Psiᵗ A Psi`.
fn congruence(a: &CsrMatrix<f64>, psi: &DMatrix<f64>) -> DMatrix<f64> {
    let a_psi: DMatrix<f64> = a * psi;
    psi.transpose() * a_psi
}

/// Runs the reduction.
///
/// `modes` holds the retained mode shapes over the full velocity layout
/// `[B; I]` (zero boundary rows for Craig-Bampton). For Herting, `rigid`
/// supplies the exact rigid-body shapes `[P_B2ᵗ P_B1; P_I2ᵗ P_I1]` that
/// replace the first six columns.
pub fn reduce<S: LinearSolver + ?Sized>(
    kind: ReductionType,
    p: &CoordinatePartition,
    local: &FullMatrices,
    modes: &DMatrix<f64>,
    rigid: Option<&DMatrix<f64>>,
    solver: &S,
) -> Result<ReducedSystem> {
    local.check_dimensions(p)?;
    let (nb, ni, nm) = (p.n_boundary_coords_w, p.n_internal_coords_w, p.n_modes_coords_w);
    if modes.shape() != (nb + ni, nm) {
        return Err(ModalError::dimension("mode shapes", (nb + ni, nm), modes.shape()));
    }
    let rigid = match (kind, rigid) {
        (ReductionType::Herting, Some(r)) if r.shape() == (nb + ni, 6) && nm >= 6 => Some(r),
        (ReductionType::Herting, _) => {
            return Err(ModalError::Precondition(
                "Herting reduction needs six rigid-body shapes and at least six modes".to_string(),
            ))
        }
        (ReductionType::CraigBampton, _) => None,
    };

    let blocks = Blocks::split(p, local);
    let (factor, info) = solver.factorize(&blocks.k_iic).map_err(singular)?;
    debug!(
        solver = %info.solver_name,
        dim = factor.dim(),
        "factored bordered internal stiffness"
    );

    let psi_s = solve_columns(factor.as_ref(), &blocks.static_rhs, ni)?;

    let mut scale = DVector::from_element(nm, 1.0);
    let mut reduced = None;
    for pass in 0..2 {
        let mut v = modes.clone();
        if let Some(r) = rigid {
            v.columns_mut(0, 6).copy_from(r);
        }
        for (j, c) in scale.iter().enumerate() {
            v.column_mut(j).scale_mut(*c);
        }

        let v_i = v.rows(nb, ni).into_owned();
        let mut rhs_top: DMatrix<f64> = &blocks.m_ii * &v_i;
        if kind == ReductionType::Herting {
            let v_b = v.rows(0, nb).into_owned();
            let m_ib_vb: DMatrix<f64> = &blocks.m_ib * &v_b;
            rhs_top += m_ib_vb;
        }
        let rhs = vstack(&rhs_top, &DMatrix::zeros(p.n_internal_doc, nm));
        let psi_d = solve_columns(factor.as_ref(), &rhs, ni)?;

        let psi = assemble_psi(p, &psi_s, &psi_d);
        let m_red = congruence(&local.m, &psi);
        let mut k_red = congruence(&local.k, &psi);
        k_red.view_mut((0, nb), (nb, nm)).fill(0.0);
        k_red.view_mut((nb, 0), (nm, nb)).fill(0.0);
        let cq_red: DMatrix<f64> = &blocks.cq_b * &psi;

        if pass == 0 {
            let expected = diagonal_head_mean(&m_red, nb);
            for j in 0..nm {
                let m_jj = m_red[(nb + j, nb + j)];
                scale[j] = if m_jj > 0.0 && expected > 0.0 {
                    (expected / m_jj).sqrt()
                } else {
                    1.0
                };
            }
        }
        reduced = Some(ReducedSystem {
            psi_s: psi_s.clone(),
            psi_d,
            psi,
            m_red,
            k_red,
            cq_red,
            mode_scale: scale.clone(),
        });
    }

    let reduced = reduced
        .ok_or_else(|| ModalError::Precondition("reduction produced no result".to_string()))?;
    debug!(
        kind = kind.as_str(),
        boundary = nb,
        internal = ni,
        modes = nm,
        "reduction complete"
    );
    Ok(reduced)
}
