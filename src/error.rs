//! Error taxonomy for the solver and the calibration fitter.
//!
//! Configuration problems (wrong vector lengths, fewer data points than
//! parameters, a covariance that cannot be inverted) are reported as errors
//! before any iteration runs. A fit that gets stuck is *not* an error: `fit`
//! returns `Ok(false)` and the caller decides whether to retry.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    /// A vector or matrix handed to the solver does not match the sizes fixed at construction.
    #[error("{what}: expected {expected} elements, got {actual}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    /// Fewer data points than free parameters.
    #[error("underdetermined problem: {n} data points for {m} parameters")]
    Underdetermined { n: usize, m: usize },
    #[error("no data has been set")]
    MissingData,
    #[error("no initial parameters have been set")]
    MissingParameters,
    /// Result accessors that need a solution were called before `fit`.
    #[error("fit has not been run")]
    NotFitted,
    #[error("invalid data covariance: {0}")]
    InvalidCovariance(String),
    /// Covariance-derived quantities need N > M.
    #[error("no degrees of freedom left (N == M)")]
    NoDegreesOfFreedom,
    #[error("numerical failure: {0}")]
    Numeric(String),
    #[error("invalid site: {0}")]
    InvalidSite(String),
    /// Every correspondence was excluded (too faint or behind the camera).
    #[error("no usable correspondences")]
    NoCorrespondences,
}
