//! Error types shared by the targets, kernels and estimators.

use thiserror::Error;

/// Errors raised while configuring or running a sampler.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum McmcError {
    /// Bad dimensions, non-positive tuning parameters or a covariance that is
    /// not symmetric positive-definite.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A capability was used before it was supplied, or an operation was
    /// called in the wrong order.
    #[error("precondition violated: {0}")]
    PreconditionViolation(String),

    /// `samples()` or a sample statistic was requested before a run completed.
    #[error("samples have not been generated yet")]
    SamplesNotGenerated,

    /// The rejection sampler found a point where the target exceeds the
    /// scaled proposal envelope.
    #[error("rejection envelope violated: log acceptance ratio {log_ratio} > 0")]
    EnvelopeViolation { log_ratio: f64 },
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, McmcError>;

pub(crate) fn invalid(msg: impl Into<String>) -> McmcError {
    McmcError::InvalidConfiguration(msg.into())
}

pub(crate) fn precondition(msg: impl Into<String>) -> McmcError {
    McmcError::PreconditionViolation(msg.into())
}
