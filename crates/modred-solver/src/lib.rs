//! Floating-frame modal reduction of flexible subassemblies.
//!
//! A [`Subassembly`] holds boundary and internal items (rigid bodies and
//! 6-DOF FE nodes), beam elements and links. A [`ModalAssembly`] wraps it,
//! assembles its full matrices and, once switched, replaces the internal
//! items by Herting or Craig-Bampton modal coordinates riding on a floating
//! frame that follows the mean rigid motion.

pub mod assembly;
pub mod backend;
pub mod config;
pub mod coupling;
pub mod damping;
pub mod descriptor;
pub mod diagnostics;
pub mod elements;
pub mod error;
pub mod frame;
pub mod integrator;
pub mod items;
pub mod links;
pub mod materials;
pub mod math;
pub mod modal_assembly;
pub mod modes;
pub mod partition;
pub mod projection;
pub mod reduction;
pub mod state;
pub mod subassembly;

pub use assembly::FullMatrices;
pub use backend::{
    default_backend, EigenResult, EigenSolver, EigenSystemData, LinearSolver, NativeBackend,
    SolveInfo, SolverBackend,
};
pub use config::{LocalStateMethod, ReductionConfig};
pub use damping::{DampingConfig, DampingModel, ReductionContext};
pub use descriptor::{BlockKind, ConstraintBlock, SystemDescriptor, VariableBlock};
pub use diagnostics::{DebugRecord, Diagnostics};
pub use elements::{Beam31, BeamSection, Element as ElementTrait};
pub use error::{ModalError, Result};
pub use frame::{FrameMoving, FrameSolverSettings, FrameUpdateReport};
pub use integrator::{LinearSystem, NewmarkConfig, NewmarkResults};
pub use items::{FeaNode, ItemHandle, Partition, PhysicsItem, Pose, RigidBody, RigidState};
pub use links::{Link, LinkKind};
pub use materials::Material;
pub use modal_assembly::{LocalState, ModalAssembly, ModalMatrices};
pub use modes::{FreqSpan, ModalResults, ModeSettings};
pub use partition::CoordinatePartition;
pub use projection::{Projectors, TransformationMatrices};
pub use reduction::{ReducedSystem, ReductionType};
pub use state::StateAccessor;
pub use subassembly::{MassProperties, Subassembly};
