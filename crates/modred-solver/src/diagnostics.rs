//! Explicit diagnostics context for a modal assembly.
//!
//! Nothing here is process-wide: the caller owns a [`Diagnostics`] and passes
//! it to the operations that produce records.

use nalgebra::Vector3;
use tracing::{debug, info};

use crate::frame::FrameUpdateReport;

/// Consistency and energy figures recorded after a frame update.
#[derive(Debug, Clone, PartialEq)]
pub struct DebugRecord {
    pub frame_pos: Vector3<f64>,
    /// Frame orientation as a rotation vector.
    pub frame_rotvec: Vector3<f64>,
    /// `‖Uᵗ M_red e‖`, the frame-fit residual.
    pub constraint_norm: f64,
    /// `‖e_def - e_proj‖`
    pub deformation_mismatch: f64,
    /// `‖edt_def - edt_proj‖`
    pub velocity_mismatch: f64,
    pub kinetic_energy: f64,
    pub elastic_energy: f64,
    pub frame: FrameUpdateReport,
}

#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    /// Log every record at `info` instead of `debug`.
    pub verbose: bool,
    records: Vec<DebugRecord>,
}

impl Diagnostics {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: DebugRecord) {
        if self.verbose {
            info!(
                step = self.records.len(),
                constraint = record.constraint_norm,
                e_mismatch = record.deformation_mismatch,
                edt_mismatch = record.velocity_mismatch,
                kinetic = record.kinetic_energy,
                elastic = record.elastic_energy,
                "modal debug block"
            );
        } else {
            debug!(
                step = self.records.len(),
                constraint = record.constraint_norm,
                e_mismatch = record.deformation_mismatch,
                edt_mismatch = record.velocity_mismatch,
                kinetic = record.kinetic_energy,
                elastic = record.elastic_energy,
                "modal debug block"
            );
        }
        self.records.push(record);
    }

    pub fn records(&self) -> &[DebugRecord] {
        &self.records
    }

    pub fn last(&self) -> Option<&DebugRecord> {
        self.records.last()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(c: f64) -> DebugRecord {
        DebugRecord {
            frame_pos: Vector3::zeros(),
            frame_rotvec: Vector3::zeros(),
            constraint_norm: c,
            deformation_mismatch: 0.0,
            velocity_mismatch: 0.0,
            kinetic_energy: 1.0,
            elastic_energy: 0.5,
            frame: FrameUpdateReport::default(),
        }
    }

    #[test]
    fn keeps_records_in_order() {
        let mut d = Diagnostics::new(true);
        d.push(record(1.0));
        d.push(record(2.0));
        assert_eq!(d.records().len(), 2);
        assert_eq!(d.last().map(|r| r.constraint_norm), Some(2.0));
        d.clear();
        assert!(d.last().is_none());
    }
}
