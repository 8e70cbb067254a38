/// Tuning knobs for the Levenberg-Marquardt loop.
#[derive(Debug, Clone)]
pub struct SolverConfig {
    /// If the relative decrease of χ² on an accepted step falls below this,
    /// the fit has reached the minimum. Default 1e-32.
    pub exit_tolerance: f64,
    /// Ceiling on the damping factor, expressed as a multiple of the initial
    /// damping (itself 1e-3 × the mean diagonal of `JᵀC⁻¹J`). Exceeding it
    /// means the fit is stuck. Default 1e32.
    pub max_damping: f64,
    /// Factor by which the damping is shrunk after an accepted step and grown
    /// after a rejected one. Default 10.
    pub boost_shrink_factor: f64,
    /// A step whose length is below `step_tolerance × (‖P‖ + step_tolerance)`
    /// cannot improve the parameters any further. Default 1e-12.
    pub step_tolerance: f64,
    /// Absolute step applied to the data values when estimating the
    /// parameter/data Jacobian for [`fourth_order_covariance`]. Default 1e-2.
    ///
    /// [`fourth_order_covariance`]: super::LevenbergMarquardtSolver::fourth_order_covariance
    pub data_step: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            exit_tolerance: 1e-32,
            max_damping: 1e32,
            boost_shrink_factor: 10.0,
            step_tolerance: 1e-12,
            data_step: 1e-2,
        }
    }
}
