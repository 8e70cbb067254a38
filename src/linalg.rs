//! Dense linear algebra helpers shared by the solver and the fitter.

use nalgebra::{DMatrix, DVector};

use crate::FitError;

/// Floor applied to the diagonal of `JᵀC⁻¹J` before Marquardt scaling, so a
/// parameter the model ignores still receives some damping.
const DIAG_FLOOR: f64 = 1e-12;

/// Singular values below `PINV_RCOND × σ_max` are treated as zero.
const PINV_RCOND: f64 = 1e-12;

/// Solve the damped normal equations `(A + λ·diag(A)) Δ = b` by Cholesky.
///
/// Returns `None` when the damped matrix is not positive definite; the solver
/// reacts by raising λ.
pub fn solve_damped(a: &DMatrix<f64>, b: &DVector<f64>, lambda: f64) -> Option<DVector<f64>> {
    let mut damped = a.clone();
    for i in 0..a.nrows() {
        damped[(i, i)] += lambda * a[(i, i)].max(DIAG_FLOOR);
    }
    let chol = damped.cholesky()?;
    let delta = chol.solve(b);
    delta.iter().all(|v| v.is_finite()).then_some(delta)
}

/// Moore-Penrose pseudo-inverse of a symmetric positive semi-definite matrix.
///
/// Directions with vanishing curvature (gauge freedoms such as the norm of a
/// quaternion) map to zero instead of blowing up.
pub fn pseudo_inverse(a: &DMatrix<f64>) -> Result<DMatrix<f64>, FitError> {
    let svd = a.clone().svd(true, true);
    let max_sv = svd.singular_values.max();
    if !max_sv.is_finite() {
        return Err(FitError::Numeric("non-finite normal matrix".into()));
    }
    svd.pseudo_inverse(max_sv * PINV_RCOND)
        .map_err(|e| FitError::Numeric(e.to_string()))
}

/// Normalize a covariance matrix into a correlation matrix.
///
/// Parameters with zero variance get unit self-correlation and zero
/// correlation with everything else.
pub fn covariance_to_correlation(cov: &DMatrix<f64>) -> DMatrix<f64> {
    let sigma: Vec<f64> = cov.diagonal().iter().map(|v| v.max(0.0).sqrt()).collect();
    DMatrix::from_fn(cov.nrows(), cov.ncols(), |i, j| {
        if i == j {
            1.0
        } else if sigma[i] > 0.0 && sigma[j] > 0.0 {
            cov[(i, j)] / (sigma[i] * sigma[j])
        } else {
            0.0
        }
    })
}

/// Check symmetry to a relative tolerance.
pub fn is_symmetric(m: &DMatrix<f64>, rel_tol: f64) -> bool {
    if !m.is_square() {
        return false;
    }
    let scale = m.amax().max(f64::MIN_POSITIVE);
    for i in 0..m.nrows() {
        for j in (i + 1)..m.ncols() {
            if (m[(i, j)] - m[(j, i)]).abs() > rel_tol * scale {
                return false;
            }
        }
    }
    true
}

/// Root-mean-square of the 2D point residuals packed as `[dx0, dy0, dx1, dy1, …]`.
pub fn rms_2d(residuals: &DVector<f64>) -> f64 {
    let n_points = residuals.len() / 2;
    if n_points == 0 {
        return 0.0;
    }
    (residuals.norm_squared() / n_points as f64).sqrt()
}
