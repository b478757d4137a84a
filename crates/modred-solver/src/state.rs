//! Read/write access to the raw state of a subassembly.

use nalgebra::DVector;

use crate::items::Partition;
use crate::partition::CoordinatePartition;

/// Gathers and scatters item states for one partition at a time.
///
/// Partition vectors are laid out item by item in arena order (7 position
/// and 6 velocity coordinates each). The provided methods build the full
/// `[boundary; internal]` vectors used by the reduction engine.
pub trait StateAccessor {
    fn coordinate_partition(&self) -> CoordinatePartition;

    fn gather_state(&self, partition: Partition, x: &mut DVector<f64>, v: &mut DVector<f64>);

    fn scatter_state(&mut self, partition: Partition, x: &DVector<f64>, v: &DVector<f64>);

    fn gather_acceleration(&self, partition: Partition, a: &mut DVector<f64>);

    fn scatter_acceleration(&mut self, partition: Partition, a: &DVector<f64>);

    fn gather_full_state(&self) -> (DVector<f64>, DVector<f64>) {
        let p = self.coordinate_partition();
        let mut xb = DVector::zeros(p.n_boundary_coords);
        let mut vb = DVector::zeros(p.n_boundary_coords_w);
        let mut xi = DVector::zeros(p.n_internal_coords);
        let mut vi = DVector::zeros(p.n_internal_coords_w);
        self.gather_state(Partition::Boundary, &mut xb, &mut vb);
        self.gather_state(Partition::Internal, &mut xi, &mut vi);

        let mut x = DVector::zeros(p.n_full_coords());
        let mut v = DVector::zeros(p.n_full_w());
        x.rows_mut(0, xb.len()).copy_from(&xb);
        x.rows_mut(xb.len(), xi.len()).copy_from(&xi);
        v.rows_mut(0, vb.len()).copy_from(&vb);
        v.rows_mut(vb.len(), vi.len()).copy_from(&vi);
        (x, v)
    }

    fn scatter_full_state(&mut self, x: &DVector<f64>, v: &DVector<f64>) {
        let p = self.coordinate_partition();
        let xb = x.rows(0, p.n_boundary_coords).into_owned();
        let vb = v.rows(0, p.n_boundary_coords_w).into_owned();
        let xi = x.rows(p.n_boundary_coords, p.n_internal_coords).into_owned();
        let vi = v.rows(p.n_boundary_coords_w, p.n_internal_coords_w).into_owned();
        self.scatter_state(Partition::Boundary, &xb, &vb);
        self.scatter_state(Partition::Internal, &xi, &vi);
    }

    fn gather_full_acceleration(&self) -> DVector<f64> {
        let p = self.coordinate_partition();
        let mut ab = DVector::zeros(p.n_boundary_coords_w);
        let mut ai = DVector::zeros(p.n_internal_coords_w);
        self.gather_acceleration(Partition::Boundary, &mut ab);
        self.gather_acceleration(Partition::Internal, &mut ai);
        let mut a = DVector::zeros(p.n_full_w());
        a.rows_mut(0, ab.len()).copy_from(&ab);
        a.rows_mut(ab.len(), ai.len()).copy_from(&ai);
        a
    }
}
