//! Accuracy of the reduced matrices against the full beam model, and the
//! failure modes of the switch.

mod common;

use approx::assert_relative_eq;
use common::free_beam;
use modred_solver::math::csr_to_dense;
use modred_solver::modes::solve_modes;
use modred_solver::{
    Diagnostics, FeaNode, LinearSystem, ModalAssembly, ModalError, ModeSettings, NativeBackend,
    NewmarkConfig, Partition, PhysicsItem, ReductionConfig, RigidBody, RigidState,
};
use nalgebra::{DMatrix, DVector, UnitQuaternion, Vector3};
use nalgebra_sparse::CsrMatrix;

fn switched(config: ReductionConfig, n_elements: usize) -> ModalAssembly {
    let mut asm = ModalAssembly::new(free_beam(n_elements), config).unwrap();
    asm.switch_modal_reduction_on(&mut Diagnostics::default()).unwrap();
    asm
}

/// Lowest eigenvalues of a dense pair through the native eigen solver.
fn dense_eigenvalues(m: &DMatrix<f64>, k: &DMatrix<f64>, count: usize) -> Vec<f64> {
    let m = CsrMatrix::from(m);
    let k = CsrMatrix::from(k);
    solve_modes(&NativeBackend::default(), &m, &k, None, &ModeSettings::count(count))
        .unwrap()
        .eigenvalues
}

#[test]
fn rigid_motion_costs_no_reduced_strain_energy() {
    for config in [ReductionConfig::herting(8), ReductionConfig::craig_bampton(4)] {
        let asm = switched(config, 8);
        let k_red = &asm.reduced_system().unwrap().k_red;
        let u = &asm.projectors().unwrap().u;
        let residual = k_red * u;
        assert!(
            residual.amax() < 1e-6 * k_red.amax() * u.amax(),
            "|K_red U| = {:e}",
            residual.amax()
        );
    }
}

#[test]
fn reduced_operators_are_positive_semidefinite() {
    let asm = switched(ReductionConfig::herting(10), 8);
    let sys = asm.reduced_system().unwrap();
    for (name, m) in [("K_red", &sys.k_red), ("M_red", &sys.m_red)] {
        let sym = (m + m.transpose()) * 0.5;
        let eig = sym.symmetric_eigen();
        let floor = -1e-9 * eig.eigenvalues.amax();
        assert!(eig.eigenvalues.iter().all(|&l| l >= floor), "{} is indefinite", name);
    }
    let n = sys.m_red.nrows();
    for k in 0..5 {
        let v = DVector::from_fn(n, |i, _| ((i * 13 + k * 7) % 11) as f64 - 5.0);
        assert!(v.dot(&(&sys.m_red * &v)) > 0.0);
        assert!(v.dot(&(&sys.k_red * &v)) >= -1e-9 * sys.k_red.amax() * v.norm_squared());
    }
}

#[test]
fn too_few_herting_modes_fall_back_to_six() {
    let mut asm = ModalAssembly::new(free_beam(4), ReductionConfig::herting(3)).unwrap();
    assert!(asm.switch_modal_reduction_on(&mut Diagnostics::default()).is_ok());
    assert!(asm.is_modal());
    assert_eq!(asm.partition().n_modes_coords_w, 6);
}

#[test]
fn loose_internal_body_fails_the_switch() {
    let mut sub = free_beam(4);
    sub.add_item(
        Partition::Internal,
        PhysicsItem::Body(RigidBody::new(
            99,
            RigidState::at(Vector3::new(0.5, 0.2, 0.0), UnitQuaternion::identity()),
            1.0,
            Vector3::new(0.1, 0.1, 0.1),
        )),
    );
    for config in [ReductionConfig::herting(6), ReductionConfig::craig_bampton(4)] {
        let mut asm = ModalAssembly::new(sub.clone(), config).unwrap();
        let err = asm.switch_modal_reduction_on(&mut Diagnostics::default()).unwrap_err();
        assert!(matches!(err, ModalError::Singular { .. }), "got {err}");
        assert!(!asm.is_modal());
        assert_eq!(asm.partition().n_modes_coords_w, 0);
        assert_eq!(asm.n_coords_w(), 6 * 6);
    }
}

#[test]
fn craig_bampton_keeps_the_first_bending_frequency() {
    let asm = switched(ReductionConfig::craig_bampton(6), 10);
    let full = asm.full_local_matrices().unwrap();
    let sys = asm.reduced_system().unwrap();

    let full_eigs = dense_eigenvalues(&csr_to_dense(&full.m), &csr_to_dense(&full.k), 8);
    let red_eigs = dense_eigenvalues(&sys.m_red, &sys.k_red, 8);
    // six rigid-body modes, then the first bending pair
    for i in 6..8 {
        let rel = (red_eigs[i] - full_eigs[i]).abs() / full_eigs[i];
        assert!(rel < 1e-3, "mode {}: full {} reduced {}", i, full_eigs[i], red_eigs[i]);
    }
}

/// Boundary response of the full and reduced beams released from the first
/// bending shape, relative to its peak.
fn vibration_error(config: ReductionConfig) -> f64 {
    let asm = switched(config, 10);
    let full = asm.full_local_matrices().unwrap();
    let sys = asm.reduced_system().unwrap();
    let m_full = csr_to_dense(&full.m);
    let k_full = csr_to_dense(&full.k);

    // first elastic mode of the full beam, small amplitude
    let settings = ModeSettings::count(8);
    let modes =
        solve_modes(&NativeBackend::default(), &full.m, &full.k, None, &settings).unwrap();
    let phi = modes.eigenvectors.column(6).into_owned() * 1e-3;
    let period = 1.0 / modes.frequencies[6];

    // M-orthogonal projection onto the reduction basis
    let rhs = sys.psi.transpose() * (&m_full * &phi);
    let q0 = sys.m_red.clone().lu().solve(&rhs).unwrap();

    let n_full = m_full.nrows();
    let n_red = sys.m_red.nrows();
    let full_sys = LinearSystem::new(m_full, DMatrix::zeros(n_full, n_full), k_full).unwrap();
    let damping = DMatrix::zeros(n_red, n_red);
    let red_sys = LinearSystem::new(sys.m_red.clone(), damping, sys.k_red.clone()).unwrap();

    let dt = period / 400.0;
    let config = NewmarkConfig::average_acceleration();
    let full_run = full_sys
        .integrate(&config, &phi, &DVector::zeros(n_full), period, dt, |_| DVector::zeros(n_full))
        .unwrap();
    let red_run = red_sys
        .integrate(&config, &q0, &DVector::zeros(n_red), period, dt, |_| DVector::zeros(n_red))
        .unwrap();
    assert_eq!(full_run.num_steps(), red_run.num_steps());

    let nb = asm.partition().n_boundary_coords_w;
    let mut peak = 0.0_f64;
    let mut worst = 0.0_f64;
    for (uf, ur) in full_run.displacements.iter().zip(&red_run.displacements) {
        let bf = uf.rows(0, nb);
        let br = ur.rows(0, nb);
        peak = peak.max(bf.amax());
        worst = worst.max((bf - br).amax());
    }
    assert!(peak > 0.0);
    worst / peak
}

#[test]
fn reduced_vibration_tracks_the_full_model() {
    for config in [ReductionConfig::herting(8), ReductionConfig::craig_bampton(6)] {
        let err = vibration_error(config);
        assert!(err < 0.01, "relative boundary error {}", err);
    }
}

#[test]
fn node_masses_are_moved_into_the_reduced_mass() {
    let mut sub = free_beam(4);
    sub.add_item(
        Partition::Boundary,
        PhysicsItem::Node(
            FeaNode::new(
                50,
                RigidState::at(Vector3::new(2.0, 0.0, 0.0), UnitQuaternion::identity()),
            )
            .with_lumped_mass(3.0, Vector3::new(0.01, 0.01, 0.01)),
        ),
    );
    let mut asm = ModalAssembly::new(sub, ReductionConfig::craig_bampton(2)).unwrap();
    let total_mass = asm.subassembly().mass_properties().mass;
    assert!(total_mass > 3.0);
    asm.switch_modal_reduction_on(&mut Diagnostics::default()).unwrap();
    assert_eq!(asm.subassembly().items(Partition::Boundary)[2].mass(), 0.0);

    // total translational mass survives in M_red
    let u = &asm.projectors().unwrap().u;
    let m_red = &asm.reduced_system().unwrap().m_red;
    let utmu = u.transpose() * m_red * u;
    for k in 0..3 {
        assert_relative_eq!(utmu[(k, k)], total_mass, max_relative = 1e-9);
    }
}
