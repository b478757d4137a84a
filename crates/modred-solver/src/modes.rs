//! Mode selection and eigen-analysis results.
//!
//! Eigenvalues are `λ = ω²`; frequencies are reported in Hz. Rigid-body modes
//! come out with `λ ≈ 0` and are clamped to zero frequency.

use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CsrMatrix;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::{EigenResult, EigenSolver, EigenSystemData};
use crate::error::{ModalError, Result};

/// Picks `nmodes` eigenpairs starting at frequency `freq` (Hz).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FreqSpan {
    pub nmodes: usize,
    #[serde(default)]
    pub freq: f64,
}

/// Which eigenpairs to keep, as an ordered list of frequency spans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeSettings {
    pub spans: Vec<FreqSpan>,
}

impl ModeSettings {
    /// The `n` lowest modes.
    pub fn count(n: usize) -> Self {
        Self {
            spans: vec![FreqSpan { nmodes: n, freq: 0.0 }],
        }
    }

    pub fn spans(spans: Vec<FreqSpan>) -> Self {
        Self { spans }
    }

    pub fn total_modes(&self) -> usize {
        self.spans.iter().map(|s| s.nmodes).sum()
    }
}

/// Eigenvalues, frequencies and mode shapes of one eigen-analysis.
#[derive(Debug, Clone, Default)]
pub struct ModalResults {
    pub eigenvalues: Vec<f64>,
    /// Natural frequencies in Hz
    pub frequencies: Vec<f64>,
    pub damping_ratios: Vec<f64>,
    /// Mode shapes as columns
    pub eigenvectors: DMatrix<f64>,
}

impl ModalResults {
    pub fn num_modes(&self) -> usize {
        self.eigenvectors.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.num_modes() == 0
    }

    pub fn mode_shape(&self, n: usize) -> Option<DVector<f64>> {
        (n < self.num_modes()).then(|| self.eigenvectors.column(n).into_owned())
    }

    pub(crate) fn clear(&mut self) {
        *self = ModalResults::default();
    }
}

pub fn frequency_hz(eigenvalue: f64) -> f64 {
    eigenvalue.max(0.0).sqrt() / (2.0 * std::f64::consts::PI)
}

/// Applies the spans to a full (ascending) eigen decomposition.
///
/// Spans are processed in order; a pair already taken by an earlier span is
/// not taken twice.
pub fn select_modes(all: &EigenResult, settings: &ModeSettings) -> ModalResults {
    let freqs: Vec<f64> = all.eigenvalues.iter().map(|&l| frequency_hz(l)).collect();
    let mut picked: Vec<usize> = Vec::new();
    for span in &settings.spans {
        let mut taken = 0;
        for (idx, &f) in freqs.iter().enumerate() {
            if taken == span.nmodes {
                break;
            }
            if f >= span.freq && !picked.contains(&idx) {
                picked.push(idx);
                taken += 1;
            }
        }
    }
    picked.sort_unstable();

    let n = all.eigenvectors.nrows();
    let mut eigenvectors = DMatrix::zeros(n, picked.len());
    for (col, &idx) in picked.iter().enumerate() {
        eigenvectors.set_column(col, &all.eigenvectors.column(idx));
    }
    ModalResults {
        eigenvalues: picked.iter().map(|&i| all.eigenvalues[i]).collect(),
        frequencies: picked.iter().map(|&i| freqs[i]).collect(),
        damping_ratios: vec![0.0; picked.len()],
        eigenvectors,
    }
}

/// Solves `K φ = λ M φ` with `Cq φ = 0` and keeps the requested modes.
pub fn solve_modes<S: EigenSolver + ?Sized>(
    solver: &S,
    m: &CsrMatrix<f64>,
    k: &CsrMatrix<f64>,
    cq: Option<&CsrMatrix<f64>>,
    settings: &ModeSettings,
) -> Result<ModalResults> {
    if settings.total_modes() == 0 {
        return Err(ModalError::Configuration("no modes requested".to_string()));
    }
    let system = EigenSystemData {
        stiffness: k,
        mass: m,
        constraints: cq.filter(|c| c.nrows() > 0),
    };
    let (all, info) = solver.solve_eigen(&system)?;
    let modes = select_modes(&all, settings);
    debug!(
        solver = %info.solver_name,
        available = all.eigenvalues.len(),
        selected = modes.num_modes(),
        "eigen analysis"
    );
    Ok(modes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn spectrum() -> EigenResult {
        // 0, 0, then 1 Hz, 2 Hz, 3 Hz, 4 Hz
        let two_pi = 2.0 * std::f64::consts::PI;
        let eigenvalues = vec![
            -1e-9,
            0.0,
            two_pi.powi(2),
            (2.0 * two_pi).powi(2),
            (3.0 * two_pi).powi(2),
            (4.0 * two_pi).powi(2),
        ];
        EigenResult {
            eigenvectors: DMatrix::from_fn(3, 6, |i, j| (i + 10 * j) as f64),
            eigenvalues,
        }
    }

    #[test]
    fn count_takes_lowest_modes() {
        let r = select_modes(&spectrum(), &ModeSettings::count(3));
        assert_eq!(r.num_modes(), 3);
        assert_eq!(r.frequencies[0], 0.0);
        assert_relative_eq!(r.frequencies[2], 1.0, epsilon = 1e-12);
        assert_eq!(r.eigenvectors[(1, 2)], 21.0);
        assert_eq!(r.damping_ratios, vec![0.0; 3]);
    }

    #[test]
    fn spans_merge_without_duplicates() {
        let settings = ModeSettings::spans(vec![
            FreqSpan { nmodes: 3, freq: 0.0 },
            FreqSpan { nmodes: 2, freq: 0.5 },
        ]);
        let r = select_modes(&spectrum(), &settings);
        // the second span skips the 1 Hz mode already taken
        assert_eq!(r.num_modes(), 5);
        assert_relative_eq!(r.frequencies[3], 2.0, epsilon = 1e-12);
        assert_relative_eq!(r.frequencies[4], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn band_above_threshold() {
        let settings = ModeSettings::spans(vec![FreqSpan { nmodes: 2, freq: 2.5 }]);
        let r = select_modes(&spectrum(), &settings);
        assert_eq!(r.num_modes(), 2);
        assert_relative_eq!(r.frequencies[0], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn mode_shape_bounds() {
        let r = select_modes(&spectrum(), &ModeSettings::count(2));
        assert!(r.mode_shape(1).is_some());
        assert!(r.mode_shape(2).is_none());
    }
}
