//! Variable and constraint blocks exposed to an external time integrator.

use crate::items::{ItemHandle, Partition, PhysicsItem};
use crate::subassembly::Subassembly;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Item(ItemHandle),
    /// All modal coordinates, one block.
    Modal,
}

/// A contiguous range of velocity coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableBlock {
    pub kind: BlockKind,
    pub offset: usize,
    pub size: usize,
}

/// Rows contributed by one link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintBlock {
    pub link_id: u32,
    pub partition: Partition,
    pub offset: usize,
    pub rows: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemDescriptor {
    pub variables: Vec<VariableBlock>,
    pub constraints: Vec<ConstraintBlock>,
}

impl SystemDescriptor {
    /// Unreduced layout: every item and every link.
    pub fn full(sub: &Subassembly) -> Self {
        let mut d = SystemDescriptor::default();
        d.inject_items(sub, Partition::Boundary);
        d.inject_items(sub, Partition::Internal);
        d.inject_links(sub, |_| true);
        d
    }

    /// Reduced layout: boundary items, one modal block, boundary links.
    pub fn reduced(sub: &Subassembly, n_modes: usize) -> Self {
        let mut d = SystemDescriptor::default();
        d.inject_items(sub, Partition::Boundary);
        if n_modes > 0 {
            let offset = d.n_variables();
            d.variables.push(VariableBlock {
                kind: BlockKind::Modal,
                offset,
                size: n_modes,
            });
        }
        d.inject_links(sub, |p| p == Partition::Boundary);
        d
    }

    fn inject_items(&mut self, sub: &Subassembly, partition: Partition) {
        for index in 0..sub.items(partition).len() {
            let offset = self.n_variables();
            self.variables.push(VariableBlock {
                kind: BlockKind::Item(ItemHandle { partition, index }),
                offset,
                size: PhysicsItem::DOF_W,
            });
        }
    }

    fn inject_links(&mut self, sub: &Subassembly, keep: impl Fn(Partition) -> bool) {
        for link in sub.links().iter().filter(|l| keep(l.partition)) {
            self.constraints.push(ConstraintBlock {
                link_id: link.id,
                partition: link.partition,
                offset: sub.full_offset_doc(link),
                rows: link.n_constraints(),
            });
        }
    }

    pub fn n_variables(&self) -> usize {
        self.variables.iter().map(|b| b.size).sum()
    }

    pub fn n_constraints(&self) -> usize {
        self.constraints.iter().map(|b| b.rows).sum()
    }
}

impl Subassembly {
    /// Variable and constraint layout of the unreduced subassembly.
    pub fn system_descriptor(&self) -> SystemDescriptor {
        SystemDescriptor::full(self)
    }
}
