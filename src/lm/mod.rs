//! General-purpose Levenberg-Marquardt nonlinear least squares.
//!
//! The solver is generic over a [`ResidualModel`]: implement `model` (and
//! optionally `jacobian` / `post_parameter_update`), hand the model to a
//! [`LevenbergMarquardtSolver`], set data, initial parameters and the data
//! covariance, then call [`fit`](LevenbergMarquardtSolver::fit).

pub mod config;
pub mod covariance;
pub mod model;
pub mod solver;

pub use config::SolverConfig;
pub use covariance::DataCovariance;
pub use model::{central_difference_jacobian, forward_difference_jacobian, ResidualModel};
pub use solver::{FitStatus, LevenbergMarquardtSolver};
