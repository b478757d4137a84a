//! Coordinate bookkeeping for the boundary, internal and modal partitions.
//!
//! Position vectors carry 7 coordinates per item (translation plus unit
//! quaternion), velocity vectors carry 6 (linear velocity plus angular
//! velocity). Full velocity-space vectors are ordered `[boundary; internal]`,
//! reduced ones `[boundary; modal]`.

/// Counts of position (`_coords`), velocity (`_coords_w`) and constraint
/// (`_doc`) coordinates per partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatePartition {
    pub n_boundary_coords: usize,
    pub n_boundary_coords_w: usize,
    pub n_boundary_doc: usize,
    pub n_internal_coords: usize,
    pub n_internal_coords_w: usize,
    pub n_internal_doc: usize,
    pub n_modes_coords_w: usize,
}

impl CoordinatePartition {
    /// Size of a full velocity vector `[B; I]`.
    pub fn n_full_w(&self) -> usize {
        self.n_boundary_coords_w + self.n_internal_coords_w
    }

    /// Size of a full position vector `[B; I]`.
    pub fn n_full_coords(&self) -> usize {
        self.n_boundary_coords + self.n_internal_coords
    }

    pub fn n_full_doc(&self) -> usize {
        self.n_boundary_doc + self.n_internal_doc
    }

    /// Size of a reduced velocity vector `[B; modal]`.
    pub fn n_reduced_w(&self) -> usize {
        self.n_boundary_coords_w + self.n_modes_coords_w
    }

    pub fn n_boundary_items(&self) -> usize {
        self.n_boundary_coords_w / 6
    }

    pub fn n_internal_items(&self) -> usize {
        self.n_internal_coords_w / 6
    }
}
