//! The residual model seam between the generic solver and a concrete problem.
//!
//! A problem implements [`ResidualModel::model`] (P → f(P)). The Jacobian
//! defaults to a forward finite difference with per-parameter steps from
//! [`ResidualModel::finite_difference_steps`]; problems with closed-form
//! derivatives override [`ResidualModel::jacobian`].
//!
//! [`ResidualModel::post_parameter_update`] runs after *every* change to the
//! parameter vector: accepted steps, trial steps, and each perturbation made
//! while estimating a Jacobian numerically. Use it to enforce structural
//! constraints such as unit quaternions.

use nalgebra::{DMatrix, DVector};

/// Relative step used by the default finite-difference step sizes.
pub const DEFAULT_RELATIVE_STEP: f64 = 1e-6;

pub trait ResidualModel {
    /// Write the model values f(P) (length N) into `out`.
    fn model(&self, params: &DVector<f64>, out: &mut DVector<f64>);

    /// Write the N×M Jacobian ∂fᵢ/∂pⱼ into `out`.
    fn jacobian(&self, params: &DVector<f64>, out: &mut DMatrix<f64>) {
        forward_difference_jacobian(self, params, out);
    }

    /// Step size per parameter for the finite-difference Jacobians.
    fn finite_difference_steps(&self, params: &DVector<f64>) -> DVector<f64> {
        params.map(|p| DEFAULT_RELATIVE_STEP * p.abs().max(1.0))
    }

    /// Hook called after every mutation of the parameter vector.
    fn post_parameter_update(&self, _params: &mut DVector<f64>) {}
}

impl<T: ResidualModel + ?Sized> ResidualModel for &T {
    fn model(&self, params: &DVector<f64>, out: &mut DVector<f64>) {
        (**self).model(params, out)
    }
    fn jacobian(&self, params: &DVector<f64>, out: &mut DMatrix<f64>) {
        (**self).jacobian(params, out)
    }
    fn finite_difference_steps(&self, params: &DVector<f64>) -> DVector<f64> {
        (**self).finite_difference_steps(params)
    }
    fn post_parameter_update(&self, params: &mut DVector<f64>) {
        (**self).post_parameter_update(params)
    }
}

/// Evaluate the model at `params + offset·eⱼ`, running the post-update hook on
/// the perturbed vector first.
fn evaluate_offset<R: ResidualModel + ?Sized>(
    model: &R,
    params: &DVector<f64>,
    j: usize,
    offset: f64,
    out: &mut DVector<f64>,
) {
    let mut p = params.clone();
    p[j] += offset;
    model.post_parameter_update(&mut p);
    model.model(&p, out);
}

/// First-order forward difference: `(f(p + h) − f(p)) / h`.
pub fn forward_difference_jacobian<R: ResidualModel + ?Sized>(
    model: &R,
    params: &DVector<f64>,
    out: &mut DMatrix<f64>,
) {
    let n = out.nrows();
    let steps = model.finite_difference_steps(params);
    let mut f0 = DVector::zeros(n);
    let mut f1 = DVector::zeros(n);
    model.model(params, &mut f0);

    for (j, &h) in steps.iter().enumerate() {
        evaluate_offset(model, params, j, h, &mut f1);
        out.set_column(j, &((&f1 - &f0) / h));
    }
}

/// Fourth-order central difference:
/// `(−f(p + 2h) + 8f(p + h) − 8f(p − h) + f(p − 2h)) / 12h`.
pub fn central_difference_jacobian<R: ResidualModel + ?Sized>(
    model: &R,
    params: &DVector<f64>,
    out: &mut DMatrix<f64>,
) {
    let n = out.nrows();
    let steps = model.finite_difference_steps(params);
    let mut fp2 = DVector::zeros(n);
    let mut fp1 = DVector::zeros(n);
    let mut fm1 = DVector::zeros(n);
    let mut fm2 = DVector::zeros(n);

    for (j, &h) in steps.iter().enumerate() {
        evaluate_offset(model, params, j, 2.0 * h, &mut fp2);
        evaluate_offset(model, params, j, h, &mut fp1);
        evaluate_offset(model, params, j, -h, &mut fm1);
        evaluate_offset(model, params, j, -2.0 * h, &mut fm2);
        let col = (-&fp2 + &fp1 * 8.0 - &fm1 * 8.0 + &fm2) / (12.0 * h);
        out.set_column(j, &col);
    }
}
