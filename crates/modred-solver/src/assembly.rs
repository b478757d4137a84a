//! Full (unreduced) mass, stiffness, damping and constraint matrices.
//!
//! Entries are accumulated in a map, converted to COO and then CSR. Rows and
//! columns follow the full velocity layout `[boundary; internal]`; constraint
//! rows follow `[boundary links; internal links]`.

use std::collections::HashMap;

use nalgebra::{Matrix3, UnitQuaternion};
use nalgebra_sparse::{CooMatrix, CsrMatrix};

use crate::elements::Element;
use crate::error::{ModalError, Result};
use crate::items::{ItemHandle, Partition, PhysicsItem};
use crate::partition::CoordinatePartition;
use crate::state::StateAccessor;
use crate::subassembly::Subassembly;

#[derive(Debug, Clone)]
pub struct FullMatrices {
    pub m: CsrMatrix<f64>,
    pub k: CsrMatrix<f64>,
    pub r: CsrMatrix<f64>,
    pub cq: CsrMatrix<f64>,
}

#[derive(Default)]
struct EntryMap {
    entries: HashMap<(usize, usize), f64>,
}

impl EntryMap {
    fn add(&mut self, i: usize, j: usize, v: f64) {
        if v != 0.0 {
            *self.entries.entry((i, j)).or_insert(0.0) += v;
        }
    }

    fn into_csr(self, nrows: usize, ncols: usize) -> Result<CsrMatrix<f64>> {
        let mut rows = Vec::with_capacity(self.entries.len());
        let mut cols = Vec::with_capacity(self.entries.len());
        let mut vals = Vec::with_capacity(self.entries.len());
        for ((i, j), v) in self.entries {
            rows.push(i);
            cols.push(j);
            vals.push(v);
        }
        let coo = CooMatrix::try_from_triplets(nrows, ncols, rows, cols, vals)
            .map_err(|e| ModalError::Dimension(format!("COO assembly failed: {}", e)))?;
        Ok(CsrMatrix::from(&coo))
    }
}

impl FullMatrices {
    /// Assembles `M`, `K`, `R` and `Cq` in the current configuration.
    pub fn assemble(sub: &Subassembly) -> Result<Self> {
        let p = sub.coordinate_partition();
        let n = p.n_full_w();
        let mut m = EntryMap::default();
        let mut k = EntryMap::default();
        let mut r = EntryMap::default();
        let mut cq = EntryMap::default();

        // Atomic masses of bodies and lumped node masses
        for partition in [Partition::Boundary, Partition::Internal] {
            for (index, item) in sub.items(partition).iter().enumerate() {
                let off = sub.full_offset_w(ItemHandle { partition, index });
                let inertia = item.inertia();
                for d in 0..3 {
                    m.add(off + d, off + d, item.mass());
                    m.add(off + 3 + d, off + 3 + d, inertia[d]);
                }
            }
        }

        for beam in sub.beams() {
            let nodes = [sub.pose_of(beam.items[0])?, sub.pose_of(beam.items[1])?];
            let material = sub.materials().get(beam.material).ok_or_else(|| {
                ModalError::Configuration(format!("beam {} has no material", beam.id))
            })?;
            let ke = beam
                .stiffness_matrix(&nodes, material)
                .map_err(ModalError::Configuration)?;
            let me = beam.mass_matrix(&nodes, material).map_err(ModalError::Configuration)?;
            let re = beam
                .damping_matrix(&nodes, material)
                .map_err(ModalError::Configuration)?;

            let dofs: Vec<usize> = beam
                .items
                .iter()
                .flat_map(|h| {
                    let off = sub.full_offset_w(*h);
                    off..off + beam.dofs_per_node()
                })
                .collect();
            for (a, &i) in dofs.iter().enumerate() {
                for (b, &j) in dofs.iter().enumerate() {
                    k.add(i, j, ke[(a, b)]);
                    m.add(i, j, me[(a, b)]);
                    r.add(i, j, re[(a, b)]);
                }
            }
        }

        for link in sub.links() {
            let ends = [sub.pose_of(link.items[0])?, sub.pose_of(link.items[1])?];
            let (cq_a, cq_b) = link.jacobian(ends);
            let row0 = sub.full_offset_doc(link);
            for (block, h) in [(&cq_a, link.items[0]), (&cq_b, link.items[1])] {
                let col0 = sub.full_offset_w(h);
                for i in 0..block.nrows() {
                    for j in 0..block.ncols() {
                        cq.add(row0 + i, col0 + j, block[(i, j)]);
                    }
                }
            }
        }

        Ok(Self {
            m: m.into_csr(n, n)?,
            k: k.into_csr(n, n)?,
            r: r.into_csr(n, n)?,
            cq: cq.into_csr(p.n_full_doc(), n)?,
        })
    }

    /// Checks the matrix sizes against a coordinate partition.
    pub fn check_dimensions(&self, p: &CoordinatePartition) -> Result<()> {
        let n = p.n_full_w();
        for (what, mat) in [("M", &self.m), ("K", &self.k), ("R", &self.r)] {
            if mat.nrows() != n || mat.ncols() != n {
                return Err(ModalError::dimension(what, (n, n), (mat.nrows(), mat.ncols())));
            }
        }
        if self.cq.nrows() != p.n_full_doc() || self.cq.ncols() != n {
            return Err(ModalError::dimension(
                "Cq",
                (p.n_full_doc(), n),
                (self.cq.nrows(), self.cq.ncols()),
            ));
        }
        Ok(())
    }

    /// Re-expresses the matrices in the floating frame: `Xᵗ M X` with
    /// `X = P_BI`, and `Cq P_BI`.
    pub fn to_local(
        &self,
        p: &CoordinatePartition,
        frame_rot: &UnitQuaternion<f64>,
    ) -> Result<Self> {
        self.check_dimensions(p)?;
        let p_bi = local_rotation_operator(p.n_full_w() / PhysicsItem::DOF_W, frame_rot);
        let p_bi_t = p_bi.transpose();
        Ok(Self {
            m: &p_bi_t * &(&self.m * &p_bi),
            k: &p_bi_t * &(&self.k * &p_bi),
            r: &p_bi_t * &(&self.r * &p_bi),
            cq: &self.cq * &p_bi,
        })
    }
}

/// Block diagonal with the frame rotation on every translational block and
/// identity on the rotational ones.
pub fn local_rotation_operator(n_items: usize, frame_rot: &UnitQuaternion<f64>) -> CsrMatrix<f64> {
    let a: Matrix3<f64> = *frame_rot.to_rotation_matrix().matrix();
    let n = n_items * PhysicsItem::DOF_W;
    let mut coo = CooMatrix::new(n, n);
    for item in 0..n_items {
        let off = item * PhysicsItem::DOF_W;
        for i in 0..3 {
            for j in 0..3 {
                if a[(i, j)] != 0.0 {
                    coo.push(off + i, off + j, a[(i, j)]);
                }
            }
            coo.push(off + 3 + i, off + 3 + i, 1.0);
        }
    }
    CsrMatrix::from(&coo)
}
