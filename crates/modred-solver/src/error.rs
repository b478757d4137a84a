//! Error taxonomy of the reduction engine.

use thiserror::Error;

use crate::backend::BackendError;

pub type Result<T> = std::result::Result<T, ModalError>;

#[derive(Error, Debug)]
pub enum ModalError {
    /// Invalid reduction settings. Stops the switch to the reduced representation.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A factorization failed; `which` names the linear system.
    #[error("Singular matrix in {which}: {detail}")]
    Singular { which: String, detail: String },

    /// Operation invoked in a state that does not support it.
    #[error("Precondition violated: {0}")]
    Precondition(String),

    /// Matrix or vector sizes disagree with the coordinate partition.
    #[error("Dimension mismatch: {0}")]
    Dimension(String),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Io(#[from] modred_io::IoError),
}

impl ModalError {
    pub(crate) fn dimension(what: &str, expected: (usize, usize), found: (usize, usize)) -> Self {
        ModalError::Dimension(format!(
            "{} is {}x{}, expected {}x{}",
            what, found.0, found.1, expected.0, expected.1
        ))
    }
}
