//! Camera calibration from star cross-matches.
//!
//! Given an initial camera model, an initial SEZ → CAM orientation, and a set
//! of source / reference-star correspondences, [`calibrate_camera`] fits the
//! intrinsics and the orientation with Levenberg-Marquardt through a
//! [`GeoCalFitter`].
//!
//! Pixel uncertainties come from the sources themselves when every kept source
//! carries a 2×2 covariance (giving a block-diagonal data covariance), and
//! from [`CalibrationConfig::pixel_sigma`] otherwise.

use nalgebra::{DMatrix, DVector, UnitQuaternion};
use tracing::{debug, info, warn};

use crate::camera_model::CameraModel;
use crate::crossmatch::{Correspondence, Exclusion};
use crate::error::FitError;
use crate::linalg::rms_2d;
use crate::lm::{FitStatus, LevenbergMarquardtSolver, ResidualModel, SolverConfig};
use crate::site::Site;

use super::fitter::{GeoCalFitter, JacobianMode};

/// Configuration for camera calibration.
#[derive(Debug, Clone)]
pub struct CalibrationConfig {
    /// Reference stars fainter than this magnitude are left out. Default: no limit.
    pub faint_mag_limit: f64,
    /// Per-axis pixel uncertainty used when sources carry no covariance. Default 1.0.
    pub pixel_sigma: f64,
    /// How the Jacobian is computed. Default analytic.
    pub jacobian: JacobianMode,
    /// Iteration cap for the LM loop. Default 100.
    pub max_iterations: usize,
    /// Log per-iteration progress at debug level. Default false.
    pub verbose: bool,
    /// Damping and tolerance settings for the solver.
    pub solver: SolverConfig,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            faint_mag_limit: f64::INFINITY,
            pixel_sigma: 1.0,
            jacobian: JacobianMode::Analytic,
            max_iterations: 100,
            verbose: false,
            solver: SolverConfig::default(),
        }
    }
}

/// Result of camera calibration.
#[derive(Debug, Clone)]
pub struct CalibrationResult {
    /// The fitted camera model.
    pub camera: CameraModel,
    /// The fitted SEZ → CAM orientation.
    pub q_sez_cam: UnitQuaternion<f64>,
    /// How the LM loop ended.
    pub status: FitStatus,
    /// True when the solution is usable (converged or iteration cap reached).
    pub converged: bool,
    /// Number of LM iterations performed.
    pub iterations: usize,
    /// Final χ².
    pub chi2: f64,
    /// χ² / DOF, `None` when N == M.
    pub reduced_chi2: Option<f64>,
    /// Degrees of freedom, N − M.
    pub dof: usize,
    /// RMS residual in pixels before calibration.
    pub rms_before_px: f64,
    /// RMS residual in pixels after calibration.
    pub rms_after_px: f64,
    /// Per-correspondence residual `(observed − model)` in pixels, with the
    /// index into the input correspondences.
    pub residuals: Vec<(usize, f64, f64)>,
    /// Names of the fitted parameters, in covariance order.
    pub param_names: Vec<&'static str>,
    /// Fitted parameter vector `[intrinsics…, qw, qx, qy, qz]`.
    pub params: Vec<f64>,
    /// Parameter covariance; `None` when there are no degrees of freedom.
    pub covariance: Option<DMatrix<f64>>,
    /// Standard error of each parameter; `None` when there are no degrees of freedom.
    pub standard_errors: Option<DVector<f64>>,
    /// Number of correspondences used in the fit.
    pub num_used: usize,
    /// Correspondences left out of the fit, with the reason.
    pub excluded: Vec<(usize, Exclusion)>,
}

/// Fit camera intrinsics and orientation to star cross-matches.
///
/// `gmst` is the Greenwich mean sidereal time of the image in radians, and
/// `site` the observer location; both are held fixed.
///
/// Returns an error for configuration problems (no usable correspondences,
/// fewer data points than parameters, invalid source covariances). A fit that
/// gets stuck is returned as a result with `converged == false`.
pub fn calibrate_camera(
    camera: &CameraModel,
    q_sez_cam: &UnitQuaternion<f64>,
    correspondences: &[Correspondence],
    gmst: f64,
    site: &Site,
    config: &CalibrationConfig,
) -> Result<CalibrationResult, FitError> {
    let fitter = GeoCalFitter::new(
        camera.clone(),
        *q_sez_cam,
        correspondences,
        gmst,
        site,
        config.faint_mag_limit,
    )?
    .with_jacobian_mode(config.jacobian);

    let excluded = fitter.excluded().to_vec();
    let kept = fitter.kept().to_vec();
    for &(idx, reason) in &excluded {
        debug!("Correspondence {} excluded: {:?}", idx, reason);
    }

    let (m, n) = (fitter.num_params(), fitter.num_data());
    let observed = fitter.observed().to_vec();
    let p0 = fitter.initial_parameters();
    let block_covariance = fitter.source_covariances().map(block_diagonal);

    // Residuals at the initial guess.
    let mut f0 = DVector::zeros(n);
    let mut p0_vec = DVector::from_column_slice(&p0);
    fitter.post_parameter_update(&mut p0_vec);
    fitter.model(&p0_vec, &mut f0);
    let rms_before_px = rms_2d(&(DVector::from_column_slice(&observed) - f0));

    let mut solver = LevenbergMarquardtSolver::with_config(fitter, m, n, config.solver.clone());
    solver.set_data(&observed)?;
    solver.set_parameters(&p0)?;
    match block_covariance {
        Some(cov) => solver.set_covariance(&cov)?,
        None => {
            let var = config.pixel_sigma * config.pixel_sigma;
            solver.set_variance(&vec![var; n])?;
        }
    }

    let converged = solver.fit(config.max_iterations, config.verbose)?;
    if !converged {
        warn!(
            "Calibration did not converge ({:?} after {} iterations)",
            solver.status(),
            solver.iterations()
        );
    }

    let params = solver.parameters();
    let fitter = solver.residual_model();
    let fitted_camera = fitter.camera_from_params(params.as_slice())?;
    let fitted_q = fitter.orientation_from_params(params.as_slice())?;

    let r = solver.residuals();
    let residuals = kept
        .iter()
        .enumerate()
        .map(|(k, &idx)| (idx, r[2 * k], r[2 * k + 1]))
        .collect();
    let rms_after_px = rms_2d(&r);

    let covariance = match solver.parameter_covariance() {
        Ok(c) => Some(c),
        Err(FitError::NoDegreesOfFreedom) => None,
        Err(e) => return Err(e),
    };
    let standard_errors = covariance
        .as_ref()
        .map(|c| c.diagonal().map(|v| v.max(0.0).sqrt()));

    let mut param_names = fitted_camera.param_names();
    param_names.extend_from_slice(&["qw", "qx", "qy", "qz"]);

    info!(
        "Calibration: {} stars ({} excluded), RMS {:.3} px -> {:.3} px, {:?} in {} iterations",
        kept.len(),
        excluded.len(),
        rms_before_px,
        rms_after_px,
        solver.status(),
        solver.iterations()
    );

    Ok(CalibrationResult {
        camera: fitted_camera,
        q_sez_cam: fitted_q,
        status: solver.status(),
        converged,
        iterations: solver.iterations(),
        chi2: solver.chi2(),
        reduced_chi2: solver.reduced_chi2(),
        dof: solver.dof(),
        rms_before_px,
        rms_after_px,
        residuals,
        param_names,
        params: params.as_slice().to_vec(),
        covariance,
        standard_errors,
        num_used: kept.len(),
        excluded,
    })
}

/// Row-major N×N block-diagonal covariance from per-source 2×2 blocks.
fn block_diagonal(blocks: &[nalgebra::Matrix2<f64>]) -> Vec<f64> {
    let n = 2 * blocks.len();
    let mut cov = vec![0.0; n * n];
    for (k, b) in blocks.iter().enumerate() {
        let r = 2 * k;
        cov[r * n + r] = b[(0, 0)];
        cov[r * n + r + 1] = b[(0, 1)];
        cov[(r + 1) * n + r] = b[(1, 0)];
        cov[(r + 1) * n + r + 1] = b[(1, 1)];
    }
    cov
}
