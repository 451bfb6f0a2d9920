use std::error::Error;
use std::fmt;

/// Error taxonomy for the beamforming core.
///
/// `Configuration` and `InsufficientData` are fatal at pipeline entry.
/// `IllConditionedMatrix` is recoverable per iteration through the
/// diagonal-loading fallback; `RefinementDegenerate` only stops the nested
/// grid search early and never aborts a run.
#[derive(Debug, Clone, PartialEq)]
pub enum BeamError {
    Configuration(String),
    InsufficientData(String),
    IllConditionedMatrix(String),
    /// Refinement degeneracy is reported in-band through the refined peak's
    /// `collapsed` flag; this variant keeps the condition representable for
    /// callers that treat it as an error.
    RefinementDegenerate(String),
}

impl fmt::Display for BeamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BeamError::Configuration(msg) => write!(f, "configuration error: {msg}"),
            BeamError::InsufficientData(msg) => write!(f, "insufficient data: {msg}"),
            BeamError::IllConditionedMatrix(msg) => {
                write!(f, "ill-conditioned matrix: {msg}")
            }
            BeamError::RefinementDegenerate(msg) => {
                write!(f, "refinement grid degenerate: {msg}")
            }
        }
    }
}

impl Error for BeamError {}

impl BeamError {
    pub fn config(msg: impl Into<String>) -> Self {
        BeamError::Configuration(msg.into())
    }

    pub fn insufficient(msg: impl Into<String>) -> Self {
        BeamError::InsufficientData(msg.into())
    }

    pub fn ill_conditioned(msg: impl Into<String>) -> Self {
        BeamError::IllConditionedMatrix(msg.into())
    }
}
