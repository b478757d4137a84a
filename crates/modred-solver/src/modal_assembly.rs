//! The modal assembly: a subassembly that starts out full and can be
//! switched, once, to a floating-frame reduced representation.
//!
//! ```text
//! new() ──► full (all items, global matrices)
//!             │ switch_modal_reduction_on()
//!             ▼
//!           reduced (boundary items + modal coordinates + floating frame)
//!             │ update()  = frame Newton + internal reconstruction
//!             ▼
//!           residual / mass / tangent / constraint loads
//! ```
//!
//! Before the switch every load falls back to the linear full matrices
//! assembled at construction. After it the subassembly exposes
//! `[boundary twists; modal rates]` as its velocity coordinates.

use std::path::Path;

use nalgebra::{DMatrix, DVector, Vector3};
use nalgebra_sparse::CsrMatrix;
use tracing::{debug, info, warn};

use modred_io::{DenseMatrixData, write_dense_matrix, write_triplets};

use crate::assembly::FullMatrices;
use crate::backend::{SolverBackend, default_backend};
use crate::config::{LocalStateMethod, ReductionConfig};
use crate::coupling::{ReducedKinematics, project_full_force};
use crate::damping::{DampingModel, ReductionContext};
use crate::descriptor::SystemDescriptor;
use crate::diagnostics::{DebugRecord, Diagnostics};
use crate::error::{ModalError, Result};
use crate::frame::{
    self, FrameConstraint, FrameMoving, FrameSolverSettings, FrameUpdateReport, com_frame,
    solve_frame,
};
use crate::items::{Partition, PhysicsItem};
use crate::math::{
    csr_block, csr_to_dense, quat_from_rotation_vector, read_quat, read_vec3, rotation_vector,
    skew, vstack, write_quat, write_vec3,
};
use crate::modes::{ModalResults, ModeSettings, solve_modes};
use crate::partition::CoordinatePartition;
use crate::projection::{Projectors, TransformationMatrices};
use crate::reduction::{ReducedSystem, ReductionType, reduce};
use crate::state::StateAccessor;
use crate::subassembly::Subassembly;

const DOF: usize = PhysicsItem::DOF;
const DOF_W: usize = PhysicsItem::DOF_W;

/// Local displacement `u`, elastic deformation `e` and deformation rate
/// `edt`, all over the reduced local layout `[B; modal]`.
#[derive(Debug, Clone)]
pub struct LocalState {
    pub u: DVector<f64>,
    pub e: DVector<f64>,
    pub edt: DVector<f64>,
}

/// Matrices the integrator sees, over `[v_B; q_dt]` in absolute boundary
/// coordinates.
#[derive(Debug, Clone, Default)]
pub struct ModalMatrices {
    pub m: DMatrix<f64>,
    pub k: DMatrix<f64>,
    pub r: DMatrix<f64>,
    pub cq: DMatrix<f64>,
}

/// Everything that only exists once the reduction is on.
struct ReducedState {
    system: ReducedSystem,
    r_red: DMatrix<f64>,
    full_local: FullMatrices,
    transforms: TransformationMatrices,
    projectors: Projectors,
    modal_q: DVector<f64>,
    modal_q_dt: DVector<f64>,
    modal_q_dtdt: DVector<f64>,
    custom_f_modal: DVector<f64>,
    frequencies: Vec<f64>,
}

/// Snapshot used by the frame Newton loop and its numerical check.
struct FrameFit<'a> {
    partition: CoordinatePartition,
    frame0: FrameMoving,
    x0: &'a DVector<f64>,
    x_red: &'a DVector<f64>,
    v_red: &'a DVector<f64>,
    x_boundary: DVector<f64>,
    m_red: &'a DMatrix<f64>,
}

impl FrameFit<'_> {
    fn eval(&self, f: &FrameMoving) -> Result<FrameConstraint> {
        let t =
            TransformationMatrices::compute(&self.partition, f, &self.x_boundary, self.x0, false)?;
        let proj = Projectors::compute(&self.partition, &t, self.m_red)?;
        let (e, _) =
            definition_state(&self.partition, f, &self.frame0, self.x0, self.x_red, self.v_red);
        let utm = proj.u.transpose() * self.m_red;
        Ok(FrameConstraint {
            residual: &utm * e,
            jacobian: -(utm * &proj.u),
        })
    }
}

/// `rotvec(q_B0ᶜ q_F0 q_Fᶜ q_B)` for the boundary item at `off`.
fn relative_rotation(
    frame: &FrameMoving,
    frame0: &FrameMoving,
    x_red: &DVector<f64>,
    x0: &DVector<f64>,
    off: usize,
) -> Vector3<f64> {
    let q_b = read_quat(x_red, off + 3);
    let q_b0 = read_quat(x0, off + 3);
    rotation_vector(&(q_b0.inverse() * frame0.rot * frame.rot.inverse() * q_b))
}

/// Displacement of the reduced coordinates relative to the reference
/// configuration, in frame axes.
fn local_displacement(
    p: &CoordinatePartition,
    frame: &FrameMoving,
    frame0: &FrameMoving,
    x0: &DVector<f64>,
    x_red: &DVector<f64>,
) -> DVector<f64> {
    let (nb, nm) = (p.n_boundary_coords_w, p.n_modes_coords_w);
    let mut u = DVector::zeros(nb + nm);
    u.rows_mut(nb, nm).copy_from(&x_red.rows(p.n_boundary_coords, nm));
    for i in 0..p.n_boundary_items() {
        let (ox, ow) = (DOF * i, DOF_W * i);
        let r = read_vec3(x_red, ox);
        let r0 = read_vec3(x0, ox);
        let t = frame.rot.inverse_transform_vector(&r) - frame0.rot.inverse_transform_vector(&r0);
        write_vec3(&mut u, ow, &t);
        write_vec3(&mut u, ow + 3, &relative_rotation(frame, frame0, x_red, x0, ox));
    }
    u
}

/// Elastic deformation and its rate measured directly against the frame.
fn definition_state(
    p: &CoordinatePartition,
    frame: &FrameMoving,
    frame0: &FrameMoving,
    x0: &DVector<f64>,
    x_red: &DVector<f64>,
    v_red: &DVector<f64>,
) -> (DVector<f64>, DVector<f64>) {
    let (nb, nm) = (p.n_boundary_coords_w, p.n_modes_coords_w);
    let mut e = DVector::zeros(nb + nm);
    let mut edt = DVector::zeros(nb + nm);
    e.rows_mut(nb, nm).copy_from(&x_red.rows(p.n_boundary_coords, nm));
    edt.rows_mut(nb, nm).copy_from(&v_red.rows(nb, nm));

    let w_f_abs = frame.wvel_abs();
    for i in 0..p.n_boundary_items() {
        let (ox, ow) = (DOF * i, DOF_W * i);
        let r = read_vec3(x_red, ox);
        let r0 = read_vec3(x0, ox);
        let d_loc = frame.rot.inverse_transform_vector(&(r - frame.pos));
        let d0_loc = frame0.rot.inverse_transform_vector(&(r0 - frame0.pos));
        write_vec3(&mut e, ow, &(d_loc - d0_loc));
        write_vec3(&mut e, ow + 3, &relative_rotation(frame, frame0, x_red, x0, ox));

        let v_b = read_vec3(v_red, ow);
        let w_b = read_vec3(v_red, ow + 3);
        let q_b = read_quat(x_red, ox + 3);
        let edt_t = frame.rot.inverse_transform_vector(&(v_b - frame.pos_dt))
            + skew(&d_loc) * frame.wvel_loc;
        write_vec3(&mut edt, ow, &edt_t);
        write_vec3(&mut edt, ow + 3, &(w_b - q_b.inverse_transform_vector(&w_f_abs)));
    }
    (e, edt)
}

/// Linear displacement of every item from `x_ref`, in velocity layout.
fn linear_displacement(x_ref: &DVector<f64>, x: &DVector<f64>, n_items: usize) -> DVector<f64> {
    let mut dx = DVector::zeros(n_items * DOF_W);
    for i in 0..n_items {
        let (ox, ow) = (DOF * i, DOF_W * i);
        write_vec3(&mut dx, ow, &(read_vec3(x, ox) - read_vec3(x_ref, ox)));
        let dq = read_quat(x_ref, ox + 3).inverse() * read_quat(x, ox + 3);
        write_vec3(&mut dx, ow + 3, &rotation_vector(&dq));
    }
    dx
}

fn dense_data(m: &DMatrix<f64>) -> Result<DenseMatrixData> {
    Ok(DenseMatrixData::new(m.nrows(), m.ncols(), m.transpose().as_slice().to_vec())?)
}

fn csr_triplets(m: &CsrMatrix<f64>) -> Vec<(usize, usize, f64)> {
    m.triplet_iter().map(|(i, j, v)| (i, j, *v)).collect()
}

fn not_reduced(what: &str) -> ModalError {
    ModalError::Precondition(format!("{} needs the modal reduction to be on", what))
}

fn check_room(what: &str, len: usize, offset: usize, n: usize) -> Result<()> {
    if offset + n > len {
        return Err(ModalError::Dimension(format!(
            "{} of length {} cannot hold {} entries at offset {}",
            what, len, n, offset
        )));
    }
    Ok(())
}

pub struct ModalAssembly {
    sub: Subassembly,
    config: ReductionConfig,
    reduction: ReductionType,
    local_state_method: LocalStateMethod,
    backend: Box<dyn SolverBackend>,
    damping: Box<dyn DampingModel>,
    pub frame_settings: FrameSolverSettings,
    frame: FrameMoving,
    frame0: FrameMoving,
    /// Global matrices at construction; drive the unreduced loads.
    full: FullMatrices,
    x_ref: DVector<f64>,
    modes_assembly_x0: DVector<f64>,
    full_assembly_x_old: DVector<f64>,
    full_assembly_v_old: DVector<f64>,
    custom_f_full: DVector<f64>,
    modal_results: ModalResults,
    reduced: Option<ReducedState>,
    modal: ModalMatrices,
}

impl ModalAssembly {
    /// Wraps a subassembly. Sets it up and assembles its global matrices
    /// in the current configuration.
    pub fn new(mut sub: Subassembly, config: ReductionConfig) -> Result<Self> {
        config.validate()?;
        let reduction = config.reduction()?;
        let local_state_method = config.local_state()?;
        let damping = config.damping.build();
        sub.setup()?;
        let full = FullMatrices::assemble(&sub)?;
        let (x, v) = sub.gather_full_state();
        let p = sub.coordinate_partition();
        info!(
            name = %sub.name,
            boundary = p.n_boundary_items(),
            internal = p.n_internal_items(),
            reduction = reduction.as_str(),
            "modal assembly created"
        );
        Ok(Self {
            sub,
            config,
            reduction,
            local_state_method,
            backend: default_backend(),
            damping,
            frame_settings: FrameSolverSettings::default(),
            frame: FrameMoving::default(),
            frame0: FrameMoving::default(),
            full,
            x_ref: x.clone(),
            modes_assembly_x0: x.clone(),
            full_assembly_x_old: x,
            full_assembly_v_old: v,
            custom_f_full: DVector::zeros(p.n_full_w()),
            modal_results: ModalResults::default(),
            reduced: None,
            modal: ModalMatrices::default(),
        })
    }

    pub fn with_backend(mut self, backend: Box<dyn SolverBackend>) -> Self {
        self.backend = backend;
        self
    }

    /// Replaces the configured damping model; takes effect at the switch.
    pub fn with_damping_model(mut self, model: Box<dyn DampingModel>) -> Self {
        self.damping = model;
        self
    }

    pub fn is_modal(&self) -> bool {
        self.reduced.is_some()
    }

    pub fn subassembly(&self) -> &Subassembly {
        &self.sub
    }

    pub fn config(&self) -> &ReductionConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn partition(&self) -> CoordinatePartition {
        self.sub.coordinate_partition()
    }

    pub fn frame(&self) -> &FrameMoving {
        &self.frame
    }

    /// Frame at the moment the reduction was switched on.
    pub fn frame0(&self) -> &FrameMoving {
        &self.frame0
    }

    pub fn modal_results(&self) -> &ModalResults {
        &self.modal_results
    }

    pub fn modal_matrices(&self) -> &ModalMatrices {
        &self.modal
    }

    /// Global matrices assembled at construction.
    pub fn full_matrices(&self) -> &FullMatrices {
        &self.full
    }

    pub fn reduced_system(&self) -> Option<&ReducedSystem> {
        self.reduced.as_ref().map(|s| &s.system)
    }

    pub fn r_red(&self) -> Option<&DMatrix<f64>> {
        self.reduced.as_ref().map(|s| &s.r_red)
    }

    /// Full matrices in the frame axes captured at the switch.
    pub fn full_local_matrices(&self) -> Option<&FullMatrices> {
        self.reduced.as_ref().map(|s| &s.full_local)
    }

    pub fn transforms(&self) -> Option<&TransformationMatrices> {
        self.reduced.as_ref().map(|s| &s.transforms)
    }

    pub fn projectors(&self) -> Option<&Projectors> {
        self.reduced.as_ref().map(|s| &s.projectors)
    }

    /// Frequencies (Hz) of the retained modes.
    pub fn retained_frequencies(&self) -> Option<&[f64]> {
        self.reduced.as_ref().map(|s| s.frequencies.as_slice())
    }

    pub fn modal_q(&self) -> Option<&DVector<f64>> {
        self.reduced.as_ref().map(|s| &s.modal_q)
    }

    pub fn modal_q_dt(&self) -> Option<&DVector<f64>> {
        self.reduced.as_ref().map(|s| &s.modal_q_dt)
    }

    fn state(&self, what: &str) -> Result<&ReducedState> {
        self.reduced.as_ref().ok_or_else(|| not_reduced(what))
    }

    // ------------------------------------------------------------------
    // Reduction
    // ------------------------------------------------------------------

    /// Reduces the local full matrices at `frame` and builds the transforms,
    /// damping and projectors. Touches nothing on `self`.
    fn build_reduction(
        &self,
        frame: &FrameMoving,
        x: &DVector<f64>,
    ) -> Result<(CoordinatePartition, ReducedState)> {
        let mut p = self.sub.coordinate_partition();
        let local = FullMatrices::assemble(&self.sub)?.to_local(&p, &frame.rot)?;
        let settings = self.config.mode_settings()?;
        let (nb, ni) = (p.n_boundary_coords_w, p.n_internal_coords_w);

        let (modes, frequencies) = match self.reduction {
            ReductionType::Herting => {
                let settings = if settings.total_modes() < 6 {
                    warn!(
                        requested = settings.total_modes(),
                        "Herting reduction keeps the six rigid-body modes, using the 6 lowest"
                    );
                    ModeSettings::count(6)
                } else {
                    settings
                };
                let res =
                    solve_modes(&*self.backend, &local.m, &local.k, Some(&local.cq), &settings)?;
                // the first six columns become exact rigid shapes
                let mut frequencies = res.frequencies;
                frequencies.iter_mut().take(6).for_each(|f| *f = 0.0);
                (res.eigenvectors, frequencies)
            }
            ReductionType::CraigBampton => {
                let (nbd, nid) = (p.n_boundary_doc, p.n_internal_doc);
                let m_ii = csr_block(&local.m, nb, nb, ni, ni);
                let k_ii = csr_block(&local.k, nb, nb, ni, ni);
                let cq_ii = csr_block(&local.cq, nbd, nb, nid, ni);
                let res = solve_modes(&*self.backend, &m_ii, &k_ii, Some(&cq_ii), &settings)?;
                let mut v = DMatrix::zeros(nb + ni, res.num_modes());
                v.rows_mut(nb, ni).copy_from(&res.eigenvectors);
                (v, res.frequencies)
            }
        };
        p.n_modes_coords_w = modes.ncols();

        let x_boundary = x.rows(0, p.n_boundary_coords).into_owned();
        let transforms = TransformationMatrices::compute(&p, frame, &x_boundary, x, true)?;
        let rigid = (self.reduction == ReductionType::Herting).then(|| {
            vstack(
                &(transforms.p_b2.transpose() * &transforms.p_b1),
                &(transforms.p_i2.transpose() * &transforms.p_i1),
            )
        });
        let system = reduce(self.reduction, &p, &local, &modes, rigid.as_ref(), &*self.backend)?;

        let ctx = ReductionContext {
            partition: &p,
            full_local: &local,
            frequencies: &frequencies,
        };
        let r_red = self.damping.compute_r(&ctx, &system.m_red, &system.k_red, &system.psi)?;
        let n = p.n_reduced_w();
        if r_red.shape() != (n, n) {
            return Err(ModalError::dimension("R_red", (n, n), r_red.shape()));
        }
        let projectors = Projectors::compute(&p, &transforms, &system.m_red)?;

        let nm = p.n_modes_coords_w;
        Ok((
            p,
            ReducedState {
                system,
                r_red,
                full_local: local,
                transforms,
                projectors,
                modal_q: DVector::zeros(nm),
                modal_q_dt: DVector::zeros(nm),
                modal_q_dtdt: DVector::zeros(nm),
                custom_f_modal: DVector::zeros(nm),
                frequencies,
            },
        ))
    }

    /// Switches to the reduced representation. One-way: a second call is a
    /// precondition error. On failure the assembly stays unreduced. Matrix
    /// dumps run after the switch and only log their failures.
    pub fn switch_modal_reduction_on(&mut self, diag: &mut Diagnostics) -> Result<()> {
        if self.is_modal() {
            return Err(ModalError::Precondition(
                "modal reduction is already on and cannot be switched again".to_string(),
            ));
        }
        let (x, v) = self.sub.gather_full_state();
        let frame = com_frame(&self.sub)?;
        let (p, state) = self.build_reduction(&frame, &x)?;

        let saved = (
            self.frame,
            self.frame0,
            self.modes_assembly_x0.clone(),
            self.full_assembly_x_old.clone(),
            self.full_assembly_v_old.clone(),
        );
        self.frame = frame;
        self.frame0 = frame;
        self.modes_assembly_x0 = x.clone();
        self.full_assembly_x_old = x;
        self.full_assembly_v_old = v;
        self.sub.set_n_modes_coords_w(p.n_modes_coords_w);
        self.reduced = Some(state);

        if let Err(err) = self.finish_switch(diag) {
            self.reduced = None;
            self.modal = ModalMatrices::default();
            self.sub.set_n_modes_coords_w(0);
            (
                self.frame,
                self.frame0,
                self.modes_assembly_x0,
                self.full_assembly_x_old,
                self.full_assembly_v_old,
            ) = saved;
            return Err(err);
        }

        self.sub.remove_item_masses();
        self.modal_results.clear();
        info!(
            reduction = self.reduction.as_str(),
            modes = p.n_modes_coords_w,
            reduced_coords = p.n_reduced_w(),
            "modal reduction switched on"
        );

        if let Some(dir) = self.config.dump_dir.clone() {
            let dumped = self
                .dump_reduced_matrices(&dir)
                .and_then(|_| self.dump_full_matrices(&dir));
            if let Err(err) = dumped {
                warn!(dir = %dir.display(), error = %err, "matrix dump failed");
            }
        }
        Ok(())
    }

    /// Fallible steps of the switch, run on the staged reduced state.
    fn finish_switch(&mut self, diag: &mut Diagnostics) -> Result<()> {
        self.refresh_projectors()?;
        self.compute_modal_matrices()?;
        self.record_debug(diag, FrameUpdateReport::initialized())
    }

    // ------------------------------------------------------------------
    // Frame and internal items
    // ------------------------------------------------------------------

    /// Moves the floating frame so that the elastic deformation carries no
    /// mass-weighted rigid motion, then refreshes the projectors and the
    /// frame velocity.
    pub fn update_floating_frame(&mut self, diag: &mut Diagnostics) -> Result<FrameUpdateReport> {
        let p = self.partition();
        let (x_red, v_red) = self.gather_state();
        let settings = self.frame_settings;
        let state = self.reduced.as_ref().ok_or_else(|| not_reduced("frame update"))?;
        let fit = FrameFit {
            partition: p,
            frame0: self.frame0,
            x0: &self.modes_assembly_x0,
            x_red: &x_red,
            v_red: &v_red,
            x_boundary: x_red.rows(0, p.n_boundary_coords).into_owned(),
            m_red: &state.system.m_red,
        };
        let report = solve_frame(&mut self.frame, &settings, |f| fit.eval(f))?;

        self.refresh_projectors()?;
        self.record_debug(diag, report.clone())?;
        Ok(report)
    }

    /// Transforms and projectors at the current frame, and the frame twist
    /// `Q P_Wᵗ v`.
    fn refresh_projectors(&mut self) -> Result<()> {
        let p = self.partition();
        let (x_red, v_red) = self.gather_state();
        let x_boundary = x_red.rows(0, p.n_boundary_coords).into_owned();
        let with_internal = self.config.internal_nodes_update;
        let state = self.reduced.as_mut().ok_or_else(|| not_reduced("projector update"))?;
        state.transforms = TransformationMatrices::compute(
            &p,
            &self.frame,
            &x_boundary,
            &self.full_assembly_x_old,
            with_internal,
        )?;
        state.projectors = Projectors::compute(&p, &state.transforms, &state.system.m_red)?;

        let twist = &state.projectors.q * (state.transforms.p_w.transpose() * &v_red);
        self.frame.pos_dt = Vector3::new(twist[0], twist[1], twist[2]);
        self.frame.wvel_loc = Vector3::new(twist[3], twist[4], twist[5]);
        Ok(())
    }

    /// Rebuilds internal item positions and velocities from the boundary,
    /// the modal coordinates and the frame.
    pub fn update_internal_nodes(&mut self) -> Result<()> {
        let p = self.partition();
        let (x_red, v_red) = self.gather_state();
        let state = self.reduced.as_ref().ok_or_else(|| not_reduced("internal reconstruction"))?;
        let (nb, ni, nm) = (p.n_boundary_coords_w, p.n_internal_coords_w, p.n_modes_coords_w);
        let sys = &state.system;
        let t = &state.transforms;

        let u = local_displacement(&p, &self.frame, &self.frame0, &self.modes_assembly_x0, &x_red);
        let e = &state.projectors.p_perp * &u;
        let dx = &sys.psi_s * e.rows(0, nb) + &sys.psi_d * e.rows(nb, nm);

        let mut x_i = DVector::zeros(p.n_internal_coords);
        let back = self.frame.rot * self.frame0.rot.inverse();
        for j in 0..p.n_internal_items() {
            let off0 = p.n_boundary_coords + DOF * j;
            let r0 = read_vec3(&self.modes_assembly_x0, off0);
            let q0 = read_quat(&self.modes_assembly_x0, off0 + 3);
            let d_t = read_vec3(&dx, DOF_W * j);
            let d_r = read_vec3(&dx, DOF_W * j + 3);
            let r0_loc = self.frame0.rot.inverse_transform_vector(&(r0 - self.frame0.pos));
            write_vec3(&mut x_i, DOF * j, &(self.frame.pos + self.frame.rot * (r0_loc + d_t)));
            write_quat(&mut x_i, DOF * j + 3, &(back * q0 * quat_from_rotation_vector(&d_r)));
        }

        let vel_f = DVector::from_iterator(
            6,
            self.frame.pos_dt.iter().chain(self.frame.wvel_loc.iter()).copied(),
        );
        let psi_s_b = &sys.psi_s * t.p_b2.transpose();
        let v_i = &t.p_i2 * (&psi_s_b * v_red.rows(0, nb) + &sys.psi_d * v_red.rows(nb, nm))
            + (&t.p_i1 - &t.p_i2 * &psi_s_b * &t.p_b1) * vel_f;
        if v_i.len() != ni {
            return Err(ModalError::dimension("internal velocities", (ni, 1), (v_i.len(), 1)));
        }

        self.sub.scatter_state(Partition::Internal, &x_i, &v_i);
        let (x, v) = self.sub.gather_full_state();
        self.full_assembly_x_old = x;
        self.full_assembly_v_old = v;
        debug!(items = p.n_internal_items(), "internal items reconstructed");
        Ok(())
    }

    /// Per-step update: frame first, then internal items when enabled.
    /// Does nothing before the reduction is on.
    pub fn update(&mut self, diag: &mut Diagnostics) -> Result<FrameUpdateReport> {
        if !self.is_modal() {
            return Ok(FrameUpdateReport::initialized());
        }
        let report = self.update_floating_frame(diag)?;
        if self.config.internal_nodes_update {
            self.update_internal_nodes()?;
        }
        Ok(report)
    }

    fn record_debug(&self, diag: &mut Diagnostics, report: FrameUpdateReport) -> Result<()> {
        let state = self.state("diagnostics")?;
        let p = self.partition();
        let (x_red, v_red) = self.gather_state();
        let x0 = &self.modes_assembly_x0;

        let u = local_displacement(&p, &self.frame, &self.frame0, x0, &x_red);
        let (e_def, edt_def) = definition_state(&p, &self.frame, &self.frame0, x0, &x_red, &v_red);
        let p_perp = &state.projectors.p_perp;
        let e_proj = p_perp * &u;
        let v_loc = state.transforms.p_w.transpose() * &v_red;
        let edt_proj = p_perp * &v_loc;

        let m = &state.system.m_red;
        let e = match self.local_state_method {
            LocalStateMethod::Definition => &e_def,
            LocalStateMethod::Projection => &e_proj,
        };
        diag.push(DebugRecord {
            frame_pos: self.frame.pos,
            frame_rotvec: rotation_vector(&self.frame.rot),
            constraint_norm: (state.projectors.u.transpose() * (m * &e_def)).norm(),
            deformation_mismatch: (&e_def - &e_proj).norm(),
            velocity_mismatch: (&edt_def - &edt_proj).norm(),
            kinetic_energy: 0.5 * v_loc.dot(&(m * &v_loc)),
            elastic_energy: 0.5 * e.dot(&(&state.system.k_red * e)),
            frame: report,
        });
        Ok(())
    }

    /// `u`, `e` and `edt` by the requested method.
    pub fn get_state_local(&self, method: LocalStateMethod) -> Result<LocalState> {
        let state = self.state("local state")?;
        let p = self.partition();
        let (x_red, v_red) = self.gather_state();
        let x0 = &self.modes_assembly_x0;
        let u = local_displacement(&p, &self.frame, &self.frame0, x0, &x_red);
        let (e, edt) = match method {
            LocalStateMethod::Definition => {
                definition_state(&p, &self.frame, &self.frame0, x0, &x_red, &v_red)
            }
            LocalStateMethod::Projection => {
                let p_perp = &state.projectors.p_perp;
                (p_perp * &u, p_perp * (state.transforms.p_w.transpose() * &v_red))
            }
        };
        Ok(LocalState { u, e, edt })
    }

    /// Analytic frame-fit Jacobian `-Uᵗ M_red U` at the current frame.
    pub fn frame_jacobian(&self) -> Result<DMatrix<f64>> {
        let state = self.state("frame Jacobian")?;
        let u = &state.projectors.u;
        Ok(-(u.transpose() * &state.system.m_red * u))
    }

    /// Forward-difference Jacobian of the frame-fit residual.
    pub fn numerical_frame_jacobian(&self, delta: f64) -> Result<DMatrix<f64>> {
        let state = self.state("frame Jacobian")?;
        let p = self.partition();
        let (x_red, v_red) = self.gather_state();
        let fit = FrameFit {
            partition: p,
            frame0: self.frame0,
            x0: &self.modes_assembly_x0,
            x_red: &x_red,
            v_red: &v_red,
            x_boundary: x_red.rows(0, p.n_boundary_coords).into_owned(),
            m_red: &state.system.m_red,
        };
        frame::numerical_frame_jacobian(&self.frame, delta, |f| Ok(fit.eval(f)?.residual))
    }

    // ------------------------------------------------------------------
    // Modes of the full assembly
    // ------------------------------------------------------------------

    /// Modes of the unreduced assembly in the frame axes of its center of
    /// mass. Records the current configuration for mode overlays.
    pub fn compute_modes(&mut self, settings: &ModeSettings) -> Result<&ModalResults> {
        if self.is_modal() {
            return Err(ModalError::Precondition(
                "full modes are not available after the reduction".to_string(),
            ));
        }
        let p = self.partition();
        let frame = com_frame(&self.sub)?;
        let local = FullMatrices::assemble(&self.sub)?.to_local(&p, &frame.rot)?;
        let results = solve_modes(&*self.backend, &local.m, &local.k, Some(&local.cq), settings)?;
        let (x, _) = self.sub.gather_full_state();
        self.modes_assembly_x0 = x;
        self.frame = frame;
        info!(modes = results.num_modes(), "computed modes of the full assembly");
        self.modal_results = results;
        Ok(&self.modal_results)
    }

    /// Deforms the assembly along mode `n`: `Dx = amplitude sin(phase) V_n`
    /// applied to the recorded configuration, with zero velocity.
    pub fn set_full_state_with_mode_overlay(
        &mut self,
        n: usize,
        phase: f64,
        amplitude: f64,
    ) -> Result<()> {
        if self.is_modal() {
            return Err(ModalError::Precondition(
                "mode overlay needs the full representation".to_string(),
            ));
        }
        let shape = self.modal_results.mode_shape(n).ok_or_else(|| {
            ModalError::Precondition(format!(
                "mode {} requested, {} computed",
                n,
                self.modal_results.num_modes()
            ))
        })?;
        let dx = shape * (amplitude * phase.sin());
        let p = self.partition();
        let mut x = self.modes_assembly_x0.clone();
        for i in 0..p.n_boundary_items() + p.n_internal_items() {
            let (ox, ow) = (DOF * i, DOF_W * i);
            let r = read_vec3(&x, ox) + self.frame.rot * read_vec3(&dx, ow);
            let q = read_quat(&x, ox + 3) * quat_from_rotation_vector(&read_vec3(&dx, ow + 3));
            write_vec3(&mut x, ox, &r);
            write_quat(&mut x, ox + 3, &q);
        }
        self.sub.scatter_full_state(&x, &DVector::zeros(p.n_full_w()));
        Ok(())
    }

    /// Restores the recorded configuration with zero velocity. After the
    /// reduction this also zeroes the modal coordinates and returns the
    /// frame to its initial placement.
    pub fn set_full_state_reset(&mut self) -> Result<()> {
        let p = self.partition();
        let x0 = self.modes_assembly_x0.clone();
        self.sub.scatter_full_state(&x0, &DVector::zeros(p.n_full_w()));
        if let Some(state) = self.reduced.as_mut() {
            state.modal_q.fill(0.0);
            state.modal_q_dt.fill(0.0);
            state.modal_q_dtdt.fill(0.0);
            self.frame = self.frame0;
            self.full_assembly_x_old = x0;
            self.full_assembly_v_old = DVector::zeros(p.n_full_w());
            self.refresh_projectors()?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // State exchange with the integrator
    // ------------------------------------------------------------------

    /// Number of position coordinates exposed to the integrator.
    pub fn n_coords(&self) -> usize {
        let p = self.partition();
        if self.is_modal() {
            p.n_boundary_coords + p.n_modes_coords_w
        } else {
            p.n_full_coords()
        }
    }

    /// Number of velocity coordinates exposed to the integrator.
    pub fn n_coords_w(&self) -> usize {
        let p = self.partition();
        if self.is_modal() { p.n_reduced_w() } else { p.n_full_w() }
    }

    fn n_state_items(&self) -> usize {
        let p = self.partition();
        if self.is_modal() {
            p.n_boundary_items()
        } else {
            p.n_boundary_items() + p.n_internal_items()
        }
    }

    /// `([x_B; q], [v_B; q_dt])` when reduced, the full state otherwise.
    pub fn gather_state(&self) -> (DVector<f64>, DVector<f64>) {
        let Some(state) = &self.reduced else {
            return self.sub.gather_full_state();
        };
        let p = self.partition();
        let (nb_x, nb, nm) = (p.n_boundary_coords, p.n_boundary_coords_w, p.n_modes_coords_w);
        let mut xb = DVector::zeros(nb_x);
        let mut vb = DVector::zeros(nb);
        self.sub.gather_state(Partition::Boundary, &mut xb, &mut vb);
        let mut x = DVector::zeros(nb_x + nm);
        let mut v = DVector::zeros(nb + nm);
        x.rows_mut(0, nb_x).copy_from(&xb);
        x.rows_mut(nb_x, nm).copy_from(&state.modal_q);
        v.rows_mut(0, nb).copy_from(&vb);
        v.rows_mut(nb, nm).copy_from(&state.modal_q_dt);
        (x, v)
    }

    pub fn scatter_state(&mut self, x: &DVector<f64>, v: &DVector<f64>) -> Result<()> {
        let (nx, nw) = (self.n_coords(), self.n_coords_w());
        if x.len() != nx || v.len() != nw {
            return Err(ModalError::Dimension(format!(
                "state of lengths {}/{} given, expected {}/{}",
                x.len(),
                v.len(),
                nx,
                nw
            )));
        }
        let p = self.partition();
        match self.reduced.as_mut() {
            None => self.sub.scatter_full_state(x, v),
            Some(state) => {
                let (nb_x, nb, nm) =
                    (p.n_boundary_coords, p.n_boundary_coords_w, p.n_modes_coords_w);
                let xb = x.rows(0, nb_x).into_owned();
                let vb = v.rows(0, nb).into_owned();
                self.sub.scatter_state(Partition::Boundary, &xb, &vb);
                state.modal_q.copy_from(&x.rows(nb_x, nm));
                state.modal_q_dt.copy_from(&v.rows(nb, nm));
            }
        }
        Ok(())
    }

    pub fn gather_acceleration(&self) -> DVector<f64> {
        let Some(state) = &self.reduced else {
            return self.sub.gather_full_acceleration();
        };
        let p = self.partition();
        let (nb, nm) = (p.n_boundary_coords_w, p.n_modes_coords_w);
        let mut ab = DVector::zeros(nb);
        self.sub.gather_acceleration(Partition::Boundary, &mut ab);
        let mut a = DVector::zeros(nb + nm);
        a.rows_mut(0, nb).copy_from(&ab);
        a.rows_mut(nb, nm).copy_from(&state.modal_q_dtdt);
        a
    }

    pub fn scatter_acceleration(&mut self, a: &DVector<f64>) -> Result<()> {
        let nw = self.n_coords_w();
        if a.len() != nw {
            return Err(ModalError::dimension("acceleration", (nw, 1), (a.len(), 1)));
        }
        let p = self.partition();
        match self.reduced.as_mut() {
            None => {
                let ab = a.rows(0, p.n_boundary_coords_w).into_owned();
                let ai = a.rows(p.n_boundary_coords_w, p.n_internal_coords_w).into_owned();
                self.sub.scatter_acceleration(Partition::Boundary, &ab);
                self.sub.scatter_acceleration(Partition::Internal, &ai);
            }
            Some(state) => {
                let (nb, nm) = (p.n_boundary_coords_w, p.n_modes_coords_w);
                let ab = a.rows(0, nb).into_owned();
                self.sub.scatter_acceleration(Partition::Boundary, &ab);
                state.modal_q_dtdt.copy_from(&a.rows(nb, nm));
            }
        }
        Ok(())
    }

    /// `x ⊕ dv`: item translations add, item rotations compose on the right
    /// with `exp(dv_rot)`, modal coordinates add.
    pub fn state_increment(&self, x: &DVector<f64>, dv: &DVector<f64>) -> Result<DVector<f64>> {
        let (nx, nw) = (self.n_coords(), self.n_coords_w());
        if x.len() != nx || dv.len() != nw {
            return Err(ModalError::Dimension(format!(
                "increment of lengths {}/{} given, expected {}/{}",
                x.len(),
                dv.len(),
                nx,
                nw
            )));
        }
        let n_items = self.n_state_items();
        let mut out = x.clone();
        for i in 0..n_items {
            let (ox, ow) = (DOF * i, DOF_W * i);
            write_vec3(&mut out, ox, &(read_vec3(x, ox) + read_vec3(dv, ow)));
            let q = read_quat(x, ox + 3) * quat_from_rotation_vector(&read_vec3(dv, ow + 3));
            write_quat(&mut out, ox + 3, &q);
        }
        let tail = nx - n_items * DOF;
        let mut modal = out.rows_mut(n_items * DOF, tail);
        modal += dv.rows(n_items * DOF_W, tail);
        Ok(out)
    }

    pub fn system_descriptor(&self) -> SystemDescriptor {
        match &self.reduced {
            Some(state) => SystemDescriptor::reduced(&self.sub, state.modal_q.len()),
            None => SystemDescriptor::full(&self.sub),
        }
    }

    // ------------------------------------------------------------------
    // External forces
    // ------------------------------------------------------------------

    /// Force on the full velocity layout `[B; I]` in absolute axes.
    pub fn set_custom_f_full(&mut self, f: DVector<f64>) -> Result<()> {
        let n = self.partition().n_full_w();
        if f.len() != n {
            return Err(ModalError::dimension("full force", (n, 1), (f.len(), 1)));
        }
        self.custom_f_full = f;
        Ok(())
    }

    /// Generalized force acting on the modal coordinates.
    pub fn set_custom_f_modal(&mut self, f: DVector<f64>) -> Result<()> {
        let state = self.reduced.as_mut().ok_or_else(|| not_reduced("modal force"))?;
        if f.len() != state.custom_f_modal.len() {
            return Err(ModalError::dimension(
                "modal force",
                (state.custom_f_modal.len(), 1),
                (f.len(), 1),
            ));
        }
        state.custom_f_modal = f;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Loads
    // ------------------------------------------------------------------

    /// Recomputes `M`, `K`, `R` and `Cq` over `[v_B; q_dt]` from the current
    /// state.
    pub fn compute_modal_matrices(&mut self) -> Result<()> {
        let p = self.partition();
        let (x_red, v_red) = self.gather_state();
        let a_red = self.gather_acceleration();
        let state = self.reduced.as_ref().ok_or_else(|| not_reduced("modal matrices"))?;
        let x_boundary = x_red.rows(0, p.n_boundary_coords).into_owned();
        let kin = ReducedKinematics {
            partition: &p,
            frame: &self.frame,
            x_boundary: &x_boundary,
            v: &v_red,
            transforms: &state.transforms,
            projectors: &state.projectors,
            m_red: &state.system.m_red,
        };
        let cfg = &self.config;
        let inertial =
            kin.inertial_terms(&a_red, cfg.use_inertial_damping, cfg.use_inertial_stiffness)?;

        let p_w = &state.transforms.p_w;
        let p_wt = p_w.transpose();
        let p_perp = &state.projectors.p_perp;
        let p_perp_t = p_perp.transpose();

        let mut k = p_w * (&p_perp_t * &state.system.k_red * p_perp) * &p_wt;
        if cfg.use_geometric_stiffness {
            let u =
                local_displacement(&p, &self.frame, &self.frame0, &self.modes_assembly_x0, &x_red);
            let e = p_perp * &u;
            k += kin.geometric_stiffness(&state.system.k_red, &e, &u)?;
        }
        if let Some(k_i) = inertial.k_i {
            k += k_i;
        }
        let mut r = p_w * (&p_perp_t * &state.r_red * p_perp) * &p_wt;
        if let Some(r_i) = inertial.r_i {
            r += r_i;
        }
        let cq = &state.system.cq_red * &p_wt;
        self.modal = ModalMatrices {
            m: inertial.m_sup,
            k,
            r,
            cq,
        };
        Ok(())
    }

    /// `R += c F` with `F` the internal, quadratic-velocity and custom forces.
    pub fn load_residual_f(&self, r: &mut DVector<f64>, offset: usize, c: f64) -> Result<()> {
        let n = self.n_coords_w();
        check_room("residual", r.len(), offset, n)?;
        let Some(state) = &self.reduced else {
            let p = self.partition();
            let (x, v) = self.sub.gather_full_state();
            let n_items = p.n_boundary_items() + p.n_internal_items();
            let dx = linear_displacement(&self.x_ref, &x, n_items);
            let f: DVector<f64> = &self.custom_f_full - &self.full.k * &dx - &self.full.r * &v;
            r.rows_mut(offset, n).axpy(c, &f, 1.0);
            return Ok(());
        };

        let p = self.partition();
        let (nb, nm) = (p.n_boundary_coords_w, p.n_modes_coords_w);
        let (x_red, v_red) = self.gather_state();
        let local = self.get_state_local(self.local_state_method)?;
        let t = &state.transforms;

        let elastic =
            &t.p_w * (state.projectors.p_perp.transpose() * (&state.system.k_red * &local.e));
        let mut f = -(elastic + &self.modal.r * &v_red);
        if self.config.use_quadratic_velocity_term {
            let x_boundary = x_red.rows(0, p.n_boundary_coords).into_owned();
            let kin = ReducedKinematics {
                partition: &p,
                frame: &self.frame,
                x_boundary: &x_boundary,
                v: &v_red,
                transforms: t,
                projectors: &state.projectors,
                m_red: &state.system.m_red,
            };
            f -= kin.quadratic_velocity_force();
        }
        let mut modal = f.rows_mut(nb, nm);
        modal += &state.custom_f_modal;
        if self.custom_f_full.iter().any(|v| *v != 0.0) {
            f += project_full_force(&p, t, &state.system, &self.custom_f_full)?;
        }
        r.rows_mut(offset, n).axpy(c, &f, 1.0);
        Ok(())
    }

    /// `R += c M w`.
    pub fn load_residual_mv(
        &self,
        r: &mut DVector<f64>,
        offset: usize,
        w: &DVector<f64>,
        c: f64,
    ) -> Result<()> {
        let n = self.n_coords_w();
        check_room("residual", r.len(), offset, n)?;
        if w.len() != n {
            return Err(ModalError::dimension("velocity-like vector", (n, 1), (w.len(), 1)));
        }
        let mw: DVector<f64> = if self.is_modal() {
            &self.modal.m * w
        } else {
            &self.full.m * w
        };
        r.rows_mut(offset, n).axpy(c, &mw, 1.0);
        Ok(())
    }

    /// Adds `c diag(M)` to `md` and accumulates `c Σ|offdiag(M)|` in `err`.
    pub fn load_lumped_mass(
        &self,
        md: &mut DVector<f64>,
        offset: usize,
        err: &mut f64,
        c: f64,
    ) -> Result<()> {
        let n = self.n_coords_w();
        check_room("lumped mass", md.len(), offset, n)?;
        let mut offdiag = 0.0;
        if self.is_modal() {
            let m = &self.modal.m;
            for j in 0..n {
                for i in 0..n {
                    if i == j {
                        md[offset + i] += c * m[(i, i)];
                    } else {
                        offdiag += m[(i, j)].abs();
                    }
                }
            }
        } else {
            for (i, j, v) in self.full.m.triplet_iter() {
                if i == j {
                    md[offset + i] += c * v;
                } else {
                    offdiag += v.abs();
                }
            }
        }
        *err += c * offdiag;
        Ok(())
    }

    /// `kf K + rf R + mf M`, refreshing the modal matrices first.
    pub fn compute_tangent_operators(&mut self, kf: f64, rf: f64, mf: f64) -> Result<DMatrix<f64>> {
        if !self.is_modal() {
            let f = &self.full;
            return Ok(csr_to_dense(&f.k) * kf + csr_to_dense(&f.r) * rf + csr_to_dense(&f.m) * mf);
        }
        self.compute_modal_matrices()?;
        let m = &self.modal;
        Ok(&m.k * kf + &m.r * rf + &m.m * mf)
    }

    /// `R += c Cqᵗ L` for constraint multipliers `L`.
    pub fn load_residual_cql(
        &self,
        r: &mut DVector<f64>,
        offset: usize,
        l: &DVector<f64>,
        c: f64,
    ) -> Result<()> {
        let n = self.n_coords_w();
        check_room("residual", r.len(), offset, n)?;
        let cq_t_l: DVector<f64> = if self.is_modal() {
            let cq = &self.modal.cq;
            if l.len() != cq.nrows() {
                return Err(ModalError::dimension("multipliers", (cq.nrows(), 1), (l.len(), 1)));
            }
            cq.transpose() * l
        } else {
            let cq = &self.full.cq;
            if l.len() != cq.nrows() {
                return Err(ModalError::dimension("multipliers", (cq.nrows(), 1), (l.len(), 1)));
            }
            &cq.transpose() * l
        };
        r.rows_mut(offset, n).axpy(c, &cq_t_l, 1.0);
        Ok(())
    }

    /// `Qc += c C(x)`: link violations, boundary links only once reduced.
    pub fn load_constraint_c(&self, qc: &mut DVector<f64>, offset: usize, c: f64) -> Result<()> {
        let p = self.partition();
        let modal = self.is_modal();
        let n = if modal { p.n_boundary_doc } else { p.n_full_doc() };
        check_room("constraint vector", qc.len(), offset, n)?;
        for link in self.sub.links() {
            if modal && link.partition == Partition::Internal {
                continue;
            }
            let ends = [self.sub.pose_of(link.items[0])?, self.sub.pose_of(link.items[1])?];
            let row = offset + self.sub.full_offset_doc(link);
            for (k, v) in link.violation(ends).iter().enumerate() {
                qc[row + k] += c * v;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Dumps
    // ------------------------------------------------------------------

    /// Writes `M_red`, `K_red`, `R_red`, `Cq_red` and `Psi` as dense text.
    pub fn dump_reduced_matrices(&self, dir: impl AsRef<Path>) -> Result<()> {
        let state = self.state("reduced matrix dump")?;
        let dir = dir.as_ref();
        let sys = &state.system;
        for (name, m) in [
            ("M_red", &sys.m_red),
            ("K_red", &sys.k_red),
            ("R_red", &state.r_red),
            ("Cq_red", &sys.cq_red),
            ("Psi", &sys.psi),
        ] {
            write_dense_matrix(dir.join(format!("{}.dat", name)), &dense_data(m)?)?;
        }
        info!(dir = %dir.display(), "reduced matrices written");
        Ok(())
    }

    /// Writes the local full `M`, `K`, `R` and `Cq` as 1-based triplets.
    pub fn dump_full_matrices(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        let assembled;
        let local = match &self.reduced {
            Some(state) => &state.full_local,
            None => {
                let p = self.partition();
                let rot = com_frame(&self.sub)?.rot;
                assembled = FullMatrices::assemble(&self.sub)?.to_local(&p, &rot)?;
                &assembled
            }
        };
        for (name, m) in [("M", &local.m), ("K", &local.k), ("R", &local.r), ("Cq", &local.cq)] {
            let path = dir.join(format!("{}_full.triplets", name));
            write_triplets(path, m.nrows(), m.ncols(), &csr_triplets(m))?;
        }
        info!(dir = %dir.display(), "full matrices written");
        Ok(())
    }
}
