//! Damped Gauss-Newton (Levenberg-Marquardt) loop.
//!
//! Each iteration solves
//!
//! ```text
//! (JᵀC⁻¹J + λ·diag(JᵀC⁻¹J)) Δ = JᵀC⁻¹(Y − f(P))
//! ```
//!
//! tries `P + Δ`, and keeps it only if χ² drops. Accepted steps shrink λ
//! (towards Gauss-Newton), rejected steps grow it (towards gradient descent).
//!
//! The loop stops when:
//! - an accepted step changes χ² by less than `exit_tolerance` (relative),
//! - χ² reaches exactly zero,
//! - an accepted step changes the parameters negligibly (`step_tolerance`),
//! - a rejected step is negligible *and* the scaled gradient is too, so the
//!   current point is already the minimum,
//! - `max_iterations` steps have been tried,
//! - λ exceeds `max_damping × λ₀`: the fit is stuck, reported as `Ok(false)`.

use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

use crate::linalg::{covariance_to_correlation, pseudo_inverse, solve_damped};
use crate::FitError;

use super::config::SolverConfig;
use super::covariance::DataCovariance;
use super::model::ResidualModel;

/// Damping used when `1e-3 × mean(diag(JᵀC⁻¹J))` is zero or not finite.
const FALLBACK_DAMPING: f64 = 1e-3;

/// How the most recent fit ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitStatus {
    /// `fit` has not been called yet.
    NotRun,
    /// χ² reached its minimum to within the configured tolerances.
    Converged,
    /// The iteration cap was reached while χ² was still decreasing.
    MaxIterations,
    /// The damping factor exceeded its ceiling without improving χ².
    DampingExceeded,
}

impl FitStatus {
    /// Whether the parameters hold a usable (non-divergent) solution.
    pub fn is_valid(self) -> bool {
        matches!(self, FitStatus::Converged | FitStatus::MaxIterations)
    }
}

/// Everything produced by one run of the damping loop.
struct LoopOutcome {
    params: DVector<f64>,
    model_values: DVector<f64>,
    chi2: f64,
    chi2_history: Vec<f64>,
    status: FitStatus,
    iterations: usize,
}

/// Levenberg-Marquardt solver for `M` parameters and `N` data points.
///
/// The solver owns the parameter vector, the data vector, the data
/// covariance, and the residual model. Sizes are fixed at construction; every
/// setter checks them.
///
/// ```
/// use geocal::lm::{LevenbergMarquardtSolver, ResidualModel};
/// use nalgebra::DVector;
///
/// // y = a·exp(b·x)
/// struct Exponential { x: Vec<f64> }
///
/// impl ResidualModel for Exponential {
///     fn model(&self, p: &DVector<f64>, out: &mut DVector<f64>) {
///         for (i, &x) in self.x.iter().enumerate() {
///             out[i] = p[0] * (p[1] * x).exp();
///         }
///     }
/// }
///
/// let x: Vec<f64> = (0..10).map(|i| i as f64 * 0.1).collect();
/// let y: Vec<f64> = x.iter().map(|&x| 2.0 * (-1.5 * x).exp()).collect();
///
/// let mut lm = LevenbergMarquardtSolver::new(Exponential { x }, 2, 10);
/// lm.set_data(&y).unwrap();
/// lm.set_parameters(&[1.0, -1.0]).unwrap();
/// assert!(lm.fit(100, false).unwrap());
/// let p = lm.parameters();
/// assert!((p[0] - 2.0).abs() < 1e-8 && (p[1] + 1.5).abs() < 1e-8);
/// ```
pub struct LevenbergMarquardtSolver<R: ResidualModel> {
    model: R,
    m: usize,
    n: usize,
    config: SolverConfig,
    data: Option<DVector<f64>>,
    params: Option<DVector<f64>>,
    covariance: DataCovariance,
    model_values: DVector<f64>,
    chi2: f64,
    chi2_history: Vec<f64>,
    status: FitStatus,
    iterations: usize,
    last_max_iterations: usize,
}

impl<R: ResidualModel> LevenbergMarquardtSolver<R> {
    /// Create a solver for `m` free parameters and `n` data points with the
    /// default configuration and unit data variance.
    pub fn new(model: R, m: usize, n: usize) -> Self {
        Self::with_config(model, m, n, SolverConfig::default())
    }

    pub fn with_config(model: R, m: usize, n: usize, config: SolverConfig) -> Self {
        Self {
            model,
            m,
            n,
            config,
            data: None,
            params: None,
            covariance: DataCovariance::identity(n),
            model_values: DVector::zeros(n),
            chi2: f64::NAN,
            chi2_history: Vec::new(),
            status: FitStatus::NotRun,
            iterations: 0,
            last_max_iterations: 0,
        }
    }

    // ── Setup ───────────────────────────────────────────────────────────────

    /// Set the N observed values.
    pub fn set_data(&mut self, data: &[f64]) -> Result<(), FitError> {
        check_len("data", self.n, data.len())?;
        self.data = Some(DVector::from_column_slice(data));
        Ok(())
    }

    /// Set the M initial-guess parameters.
    pub fn set_parameters(&mut self, params: &[f64]) -> Result<(), FitError> {
        check_len("parameters", self.m, params.len())?;
        self.params = Some(DVector::from_column_slice(params));
        Ok(())
    }

    /// Set the full N×N data covariance, packed row-major.
    pub fn set_covariance(&mut self, covariance: &[f64]) -> Result<(), FitError> {
        check_len("covariance", self.n * self.n, covariance.len())?;
        let c = DMatrix::from_row_slice(self.n, self.n, covariance);
        self.covariance = DataCovariance::full(c)?;
        Ok(())
    }

    /// Set the N data variances (uncorrelated data).
    pub fn set_variance(&mut self, variance: &[f64]) -> Result<(), FitError> {
        check_len("variance", self.n, variance.len())?;
        self.covariance = DataCovariance::diagonal(DVector::from_column_slice(variance))?;
        Ok(())
    }

    pub fn set_exit_tolerance(&mut self, exit_tolerance: f64) {
        self.config.exit_tolerance = exit_tolerance;
    }

    pub fn set_max_damping(&mut self, max_damping: f64) {
        self.config.max_damping = max_damping;
    }

    pub fn set_boost_shrink_factor(&mut self, boost_shrink_factor: f64) {
        self.config.boost_shrink_factor = boost_shrink_factor;
    }

    /// Data step used by [`fourth_order_covariance`](Self::fourth_order_covariance).
    pub fn set_h(&mut self, h: f64) {
        self.config.data_step = h;
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn residual_model(&self) -> &R {
        &self.model
    }

    /// Consume the solver and hand back the residual model.
    pub fn into_residual_model(self) -> R {
        self.model
    }

    // ── Fit ─────────────────────────────────────────────────────────────────

    /// Run the damping loop until convergence, `max_iterations`, or damping
    /// overflow.
    ///
    /// Returns `Ok(true)` when the parameters hold a valid solution and
    /// `Ok(false)` when the fit got stuck. Configuration problems (missing
    /// inputs, N < M) are returned as errors before any iteration runs.
    pub fn fit(&mut self, max_iterations: usize, verbose: bool) -> Result<bool, FitError> {
        if self.n < self.m {
            return Err(FitError::Underdetermined {
                n: self.n,
                m: self.m,
            });
        }
        let data = self.data.clone().ok_or(FitError::MissingData)?;
        let params = self.params.clone().ok_or(FitError::MissingParameters)?;

        let outcome = self.run(&data, params, max_iterations, verbose);

        if verbose {
            debug!(
                "LM finished: {:?} after {} iterations, chi2 = {:.6e}",
                outcome.status, outcome.iterations, outcome.chi2
            );
        }
        if outcome.status == FitStatus::DampingExceeded {
            warn!(
                "LM fit stuck: damping exceeded its ceiling after {} iterations (chi2 = {:.6e})",
                outcome.iterations, outcome.chi2
            );
        }

        self.params = Some(outcome.params);
        self.model_values = outcome.model_values;
        self.chi2 = outcome.chi2;
        self.chi2_history = outcome.chi2_history;
        self.status = outcome.status;
        self.iterations = outcome.iterations;
        self.last_max_iterations = max_iterations;

        Ok(self.status.is_valid())
    }

    /// Normal matrix `JᵀC⁻¹J` and gradient `JᵀC⁻¹r`.
    fn normal_equations(
        &self,
        jac: &DMatrix<f64>,
        residuals: &DVector<f64>,
    ) -> (DMatrix<f64>, DVector<f64>) {
        let weighted = self.covariance.weight_rows(jac);
        let a = jac.transpose() * &weighted;
        let b = weighted.transpose() * residuals;
        (a, b)
    }

    /// Whether the Jacobi-scaled gradient `Σ b_k² / A_kk` (the χ² decrease a
    /// diagonal Newton step would predict) is lost in round-off: small next to
    /// χ² itself and next to the χ² of a `step_tolerance`-sized data change.
    fn gradient_negligible(
        &self,
        a: &DMatrix<f64>,
        b: &DVector<f64>,
        chi2: f64,
        data: &DVector<f64>,
    ) -> bool {
        let tol = self.config.step_tolerance;
        let predicted: f64 = b
            .iter()
            .zip(a.diagonal().iter())
            .filter(|(_, d)| **d > 0.0)
            .map(|(g, d)| g * g / d)
            .sum();
        predicted <= tol * chi2 + self.covariance.chi2(&(data * tol))
    }

    /// The damping loop itself; leaves `self` untouched so it can be rerun on
    /// perturbed data.
    fn run(
        &self,
        data: &DVector<f64>,
        mut params: DVector<f64>,
        max_iterations: usize,
        verbose: bool,
    ) -> LoopOutcome {
        let (n, m) = (self.n, self.m);
        let boost = self.config.boost_shrink_factor;

        let mut f = DVector::zeros(n);
        let mut f_trial = DVector::zeros(n);
        let mut jac = DMatrix::zeros(n, m);

        self.model.post_parameter_update(&mut params);
        self.model.model(&params, &mut f);
        self.model.jacobian(&params, &mut jac);
        let mut chi2 = self.covariance.chi2(&(data - &f));
        let mut history = vec![chi2];
        let (mut a, mut b) = self.normal_equations(&jac, &(data - &f));

        let mean_diag = a.diagonal().mean();
        let mut lambda = if mean_diag.is_finite() && mean_diag > 0.0 {
            1e-3 * mean_diag
        } else {
            FALLBACK_DAMPING
        };
        let max_lambda = self.config.max_damping * lambda;

        if verbose {
            debug!(
                "LM start: M={}, N={}, chi2 = {:.6e}, lambda = {:.3e}",
                m, n, chi2, lambda
            );
        }

        let mut status = if chi2 == 0.0 {
            FitStatus::Converged
        } else {
            FitStatus::MaxIterations
        };
        let mut iterations = 0;

        while status == FitStatus::MaxIterations && iterations < max_iterations {
            iterations += 1;

            let Some(delta) = solve_damped(&a, &b, lambda) else {
                lambda *= boost;
                if verbose {
                    debug!(
                        "  iter {:>4}: damped normal matrix singular, lambda -> {:.3e}",
                        iterations, lambda
                    );
                }
                if lambda > max_lambda {
                    status = FitStatus::DampingExceeded;
                }
                continue;
            };

            let mut trial = &params + &delta;
            self.model.post_parameter_update(&mut trial);
            self.model.model(&trial, &mut f_trial);
            let chi2_trial = self.covariance.chi2(&(data - &f_trial));

            let step = (&trial - &params).norm();
            let negligible_step =
                step <= self.config.step_tolerance * (params.norm() + self.config.step_tolerance);

            if chi2_trial.is_finite() && chi2_trial < chi2 {
                let rel_change = (chi2 - chi2_trial) / chi2;
                params = trial;
                std::mem::swap(&mut f, &mut f_trial);
                chi2 = chi2_trial;
                history.push(chi2);
                lambda /= boost;

                if verbose {
                    debug!(
                        "  iter {:>4}: accepted, chi2 = {:.6e} (rel change {:.3e}), lambda -> {:.3e}",
                        iterations, chi2, rel_change, lambda
                    );
                }

                if rel_change < self.config.exit_tolerance || chi2 == 0.0 || negligible_step {
                    status = FitStatus::Converged;
                } else {
                    self.model.jacobian(&params, &mut jac);
                    (a, b) = self.normal_equations(&jac, &(data - &f));
                }
            } else {
                lambda *= boost;
                if verbose {
                    debug!(
                        "  iter {:>4}: rejected, chi2 = {:.6e} >= {:.6e}, lambda -> {:.3e}",
                        iterations, chi2_trial, chi2, lambda
                    );
                }
                if negligible_step && self.gradient_negligible(&a, &b, chi2, data) {
                    status = FitStatus::Converged;
                } else if lambda > max_lambda {
                    status = FitStatus::DampingExceeded;
                }
            }
        }

        LoopOutcome {
            params,
            model_values: f,
            chi2,
            chi2_history: history,
            status,
            iterations,
        }
    }

    // ── Results ─────────────────────────────────────────────────────────────

    /// Current parameters: the solution after `fit`, the initial guess before.
    pub fn parameters(&self) -> DVector<f64> {
        self.params
            .clone()
            .unwrap_or_else(|| DVector::zeros(self.m))
    }

    /// Copy the current parameters into `out` (length M).
    pub fn get_parameters(&self, out: &mut [f64]) -> Result<(), FitError> {
        check_len("parameters", self.m, out.len())?;
        out.copy_from_slice(self.parameters().as_slice());
        Ok(())
    }

    /// Model values f(P) at the last fitted solution.
    pub fn model_values(&self) -> &DVector<f64> {
        &self.model_values
    }

    /// Residuals Y − f(P) at the last fitted solution.
    pub fn residuals(&self) -> DVector<f64> {
        match &self.data {
            Some(d) => d - &self.model_values,
            None => DVector::zeros(self.n),
        }
    }

    /// χ² = (Y − f)ᵀ C⁻¹ (Y − f) at the last fitted solution.
    pub fn chi2(&self) -> f64 {
        self.chi2
    }

    /// χ² after the initial guess and after each accepted step.
    pub fn chi2_history(&self) -> &[f64] {
        &self.chi2_history
    }

    /// Degrees of freedom, N − M.
    pub fn dof(&self) -> usize {
        self.n.saturating_sub(self.m)
    }

    /// χ² / (N − M); `None` when there are no degrees of freedom.
    pub fn reduced_chi2(&self) -> Option<f64> {
        match self.dof() {
            0 => None,
            dof => Some(self.chi2 / dof as f64),
        }
    }

    pub fn status(&self) -> FitStatus {
        self.status
    }

    /// Number of steps tried (accepted or rejected) in the last fit.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn num_params(&self) -> usize {
        self.m
    }

    pub fn num_data(&self) -> usize {
        self.n
    }

    fn ensure_fitted(&self) -> Result<(), FitError> {
        match self.status {
            FitStatus::NotRun => Err(FitError::NotFitted),
            _ => Ok(()),
        }
    }

    // ── Covariance ──────────────────────────────────────────────────────────

    /// Parameter covariance `χ²_ν · (JᵀC⁻¹J)⁺` at the current solution.
    ///
    /// Uses the pseudo-inverse, so directions the data cannot constrain
    /// (gauge freedoms) get zero variance.
    pub fn parameter_covariance(&self) -> Result<DMatrix<f64>, FitError> {
        self.ensure_fitted()?;
        let reduced_chi2 = self.reduced_chi2().ok_or(FitError::NoDegreesOfFreedom)?;
        let params = self.params.as_ref().ok_or(FitError::MissingParameters)?;

        let mut jac = DMatrix::zeros(self.n, self.m);
        self.model.jacobian(params, &mut jac);
        let a = jac.transpose() * self.covariance.weight_rows(&jac);
        Ok(pseudo_inverse(&a)? * reduced_chi2)
    }

    /// Square root of the diagonal of [`parameter_covariance`](Self::parameter_covariance).
    pub fn asymptotic_standard_error(&self) -> Result<DVector<f64>, FitError> {
        let cov = self.parameter_covariance()?;
        Ok(cov.diagonal().map(|v| v.max(0.0).sqrt()))
    }

    /// Parameter covariance normalized by the outer product of standard errors.
    pub fn parameter_correlation(&self) -> Result<DMatrix<f64>, FitError> {
        Ok(covariance_to_correlation(&self.parameter_covariance()?))
    }

    /// Parameter covariance from propagating the data covariance:
    /// `S_p = Dᵀ S_y D` with `D = ∂p/∂y` (N×M).
    ///
    /// `D` is estimated with a fourth-order central difference: each data
    /// value is shifted by ±h and ±2h and the problem is refit from the
    /// current solution. Only trustworthy when the model is close to linear
    /// within a couple of standard deviations of the solution; far from the
    /// optimum the result is meaningless. Near the optimum it matches
    /// [`parameter_covariance`](Self::parameter_covariance) divided by the
    /// reduced χ².
    pub fn fourth_order_covariance(&self) -> Result<DMatrix<f64>, FitError> {
        self.ensure_fitted()?;
        let data = self.data.as_ref().ok_or(FitError::MissingData)?;
        let solution = self.params.clone().ok_or(FitError::MissingParameters)?;
        let h = self.config.data_step;
        let max_iterations = self.last_max_iterations;

        let mut d = DMatrix::zeros(self.n, self.m);
        let refit = |i: usize, offset: f64| -> DVector<f64> {
            let mut perturbed = data.clone();
            perturbed[i] += offset;
            self.run(&perturbed, solution.clone(), max_iterations, false)
                .params
        };

        for i in 0..self.n {
            let pp2 = refit(i, 2.0 * h);
            let pp1 = refit(i, h);
            let pm1 = refit(i, -h);
            let pm2 = refit(i, -2.0 * h);
            let row = (-pp2 + pp1 * 8.0 - pm1 * 8.0 + pm2) / (12.0 * h);
            d.set_row(i, &row.transpose());
        }

        Ok(self.covariance.propagate(&d))
    }
}

fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<(), FitError> {
    if expected != actual {
        return Err(FitError::DimensionMismatch {
            what,
            expected,
            actual,
        });
    }
    Ok(())
}
