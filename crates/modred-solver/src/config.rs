//! Reduction settings, loadable from JSON.
//!
//! ```json
//! {
//!   "reduction_type": "herting",
//!   "num_modes": 8,
//!   "damping": { "model": "rayleigh", "alpha": 0.0, "beta": 1e-4 },
//!   "use_geometric_stiffness": true
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::damping::DampingConfig;
use crate::error::{ModalError, Result};
use crate::modes::{FreqSpan, ModeSettings};
use crate::reduction::ReductionType;

/// How the local elastic state feeding the residual is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocalStateMethod {
    /// Directly from relative positions and rotations.
    Definition,
    /// Through the elastic projector `P_perp`.
    #[default]
    Projection,
}

impl LocalStateMethod {
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "definition" => Ok(LocalStateMethod::Definition),
            "projection" => Ok(LocalStateMethod::Projection),
            other => Err(ModalError::Configuration(format!(
                "unknown local state method '{}' (expected 'definition' or 'projection')",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReductionConfig {
    #[serde(default = "default_reduction_type")]
    pub reduction_type: String,
    /// Plain count of retained modes; ignored when `modes` is given.
    #[serde(default)]
    pub num_modes: Option<usize>,
    /// Frequency spans selecting the retained modes.
    #[serde(default)]
    pub modes: Vec<FreqSpan>,
    #[serde(default)]
    pub damping: DampingConfig,
    #[serde(default = "default_true")]
    pub use_quadratic_velocity_term: bool,
    #[serde(default)]
    pub use_inertial_damping: bool,
    #[serde(default)]
    pub use_inertial_stiffness: bool,
    #[serde(default)]
    pub use_geometric_stiffness: bool,
    /// Reconstruct internal items after every update.
    #[serde(default = "default_true")]
    pub internal_nodes_update: bool,
    #[serde(default = "default_local_state_method")]
    pub local_state_method: String,
    #[serde(default)]
    pub verbose: bool,
    /// Directory receiving matrix dumps right after the reduction.
    #[serde(default)]
    pub dump_dir: Option<PathBuf>,
}

fn default_reduction_type() -> String {
    ReductionType::Herting.as_str().to_string()
}

fn default_local_state_method() -> String {
    "projection".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ReductionConfig {
    fn default() -> Self {
        Self {
            reduction_type: default_reduction_type(),
            num_modes: Some(6),
            modes: Vec::new(),
            damping: DampingConfig::default(),
            use_quadratic_velocity_term: true,
            use_inertial_damping: false,
            use_inertial_stiffness: false,
            use_geometric_stiffness: false,
            internal_nodes_update: true,
            local_state_method: default_local_state_method(),
            verbose: false,
            dump_dir: None,
        }
    }
}

impl ReductionConfig {
    pub fn herting(num_modes: usize) -> Self {
        Self {
            num_modes: Some(num_modes),
            ..Default::default()
        }
    }

    pub fn craig_bampton(num_modes: usize) -> Self {
        Self {
            reduction_type: ReductionType::CraigBampton.as_str().to_string(),
            num_modes: Some(num_modes),
            ..Default::default()
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config: ReductionConfig = modred_io::load_json(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn reduction(&self) -> Result<ReductionType> {
        ReductionType::parse(&self.reduction_type)
    }

    pub fn local_state(&self) -> Result<LocalStateMethod> {
        LocalStateMethod::parse(&self.local_state_method)
    }

    pub fn mode_settings(&self) -> Result<ModeSettings> {
        if !self.modes.is_empty() {
            return Ok(ModeSettings::spans(self.modes.clone()));
        }
        match self.num_modes {
            Some(n) => Ok(ModeSettings::count(n)),
            None => Err(ModalError::Configuration(
                "either 'num_modes' or 'modes' must be given".to_string(),
            )),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.reduction()?;
        self.local_state()?;
        self.mode_settings()?;
        if self.modes.iter().any(|s| s.freq < 0.0 || !s.freq.is_finite()) {
            return Err(ModalError::Configuration(
                "frequency spans need finite, non-negative frequencies".to_string(),
            ));
        }
        self.damping.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_minimal_json() {
        let c: ReductionConfig = serde_json::from_str(r#"{"num_modes": 4}"#).unwrap();
        assert_eq!(c.reduction().unwrap(), ReductionType::Herting);
        assert!(c.use_quadratic_velocity_term);
        assert!(!c.use_inertial_damping);
        assert!(c.internal_nodes_update);
        assert_eq!(c.local_state().unwrap(), LocalStateMethod::Projection);
        assert_eq!(c.mode_settings().unwrap().total_modes(), 4);
        c.validate().unwrap();
    }

    #[test]
    fn spans_take_precedence() {
        let c: ReductionConfig = serde_json::from_str(
            r#"{"reduction_type": "craig_bampton", "num_modes": 3,
                "modes": [{"nmodes": 2, "freq": 10.0}, {"nmodes": 1}]}"#,
        )
        .unwrap();
        assert_eq!(c.reduction().unwrap(), ReductionType::CraigBampton);
        let s = c.mode_settings().unwrap();
        assert_eq!(s.spans.len(), 2);
        assert_eq!(s.spans[1].freq, 0.0);
    }

    #[test]
    fn unknown_selector_is_fatal() {
        let c = ReductionConfig {
            reduction_type: "guyan".to_string(),
            ..Default::default()
        };
        assert!(matches!(c.validate(), Err(ModalError::Configuration(_))));

        let c = ReductionConfig {
            local_state_method: "average".to_string(),
            ..Default::default()
        };
        assert!(matches!(c.validate(), Err(ModalError::Configuration(_))));

        let c = ReductionConfig {
            num_modes: None,
            ..Default::default()
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reduce.json");
        std::fs::write(
            &path,
            r#"{
                "num_modes": 8,
                "damping": {"model": "modal_factor", "factors": [0.02]},
                "verbose": true
            }"#,
        )
        .unwrap();
        let c = ReductionConfig::load(&path).unwrap();
        assert!(c.verbose);
        assert_eq!(c.damping, DampingConfig::ModalFactor { factors: vec![0.02] });
    }
}
