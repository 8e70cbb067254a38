//! Data covariance: a full N×N matrix, or N independent variances.
//!
//! The diagonal form keeps storage and weighting at O(N); the full form
//! inverts the matrix once, up front, via Cholesky.

use nalgebra::{DMatrix, DVector};

use crate::linalg::is_symmetric;
use crate::FitError;

#[derive(Debug, Clone)]
pub enum DataCovariance {
    /// Independent data points: one variance per element.
    Diagonal(DVector<f64>),
    /// Correlated data points.
    Full {
        covariance: DMatrix<f64>,
        inverse: DMatrix<f64>,
    },
}

impl DataCovariance {
    /// Unit variance for every data point.
    pub fn identity(n: usize) -> Self {
        DataCovariance::Diagonal(DVector::from_element(n, 1.0))
    }

    pub fn diagonal(variances: DVector<f64>) -> Result<Self, FitError> {
        if let Some((i, v)) = variances
            .iter()
            .enumerate()
            .find(|(_, v)| !(v.is_finite() && **v > 0.0))
        {
            return Err(FitError::InvalidCovariance(format!(
                "variance {} at index {} is not positive",
                v, i
            )));
        }
        Ok(DataCovariance::Diagonal(variances))
    }

    pub fn full(covariance: DMatrix<f64>) -> Result<Self, FitError> {
        if !is_symmetric(&covariance, 1e-10) {
            return Err(FitError::InvalidCovariance("matrix is not symmetric".into()));
        }
        let chol = covariance.clone().cholesky().ok_or_else(|| {
            FitError::InvalidCovariance("matrix is not positive definite".into())
        })?;
        let inverse = chol.inverse();
        Ok(DataCovariance::Full {
            covariance,
            inverse,
        })
    }

    /// Number of data points covered.
    pub fn len(&self) -> usize {
        match self {
            DataCovariance::Diagonal(v) => v.len(),
            DataCovariance::Full { covariance, .. } => covariance.nrows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_diagonal(&self) -> bool {
        matches!(self, DataCovariance::Diagonal(_))
    }

    /// `C⁻¹ v`
    pub fn weight(&self, v: &DVector<f64>) -> DVector<f64> {
        match self {
            DataCovariance::Diagonal(var) => v.component_div(var),
            DataCovariance::Full { inverse, .. } => inverse * v,
        }
    }

    /// `C⁻¹ J`, row scaling in the diagonal case.
    pub fn weight_rows(&self, j: &DMatrix<f64>) -> DMatrix<f64> {
        match self {
            DataCovariance::Diagonal(var) => {
                let mut w = j.clone();
                for (i, mut row) in w.row_iter_mut().enumerate() {
                    row /= var[i];
                }
                w
            }
            DataCovariance::Full { inverse, .. } => inverse * j,
        }
    }

    /// χ² of a residual vector: `rᵀ C⁻¹ r`.
    pub fn chi2(&self, r: &DVector<f64>) -> f64 {
        r.dot(&self.weight(r))
    }

    /// Propagate the data covariance through a data→parameter Jacobian:
    /// `Dᵀ C D` for an N×M matrix `D`.
    pub fn propagate(&self, d: &DMatrix<f64>) -> DMatrix<f64> {
        match self {
            DataCovariance::Diagonal(var) => {
                let mut scaled = d.clone();
                for (i, mut row) in scaled.row_iter_mut().enumerate() {
                    row *= var[i];
                }
                d.transpose() * scaled
            }
            DataCovariance::Full { covariance, .. } => d.transpose() * covariance * d,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagonal_and_full_agree() {
        let var = DVector::from_vec(vec![0.5, 2.0, 4.0]);
        let diag = DataCovariance::diagonal(var.clone()).unwrap();
        let full = DataCovariance::full(DMatrix::from_diagonal(&var)).unwrap();

        let r = DVector::from_vec(vec![1.0, -2.0, 3.0]);
        assert!((diag.chi2(&r) - full.chi2(&r)).abs() < 1e-12);
        assert!((diag.chi2(&r) - (2.0 + 2.0 + 2.25)).abs() < 1e-12);

        let j = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        let wd = diag.weight_rows(&j);
        let wf = full.weight_rows(&j);
        assert!((wd - wf).norm() < 1e-12);

        let pd = diag.propagate(&j);
        let pf = full.propagate(&j);
        assert!((pd - pf).norm() < 1e-12);
    }

    #[test]
    fn test_rejects_non_positive_variance() {
        let err = DataCovariance::diagonal(DVector::from_vec(vec![1.0, 0.0])).unwrap_err();
        assert!(matches!(err, FitError::InvalidCovariance(_)));
    }

    #[test]
    fn test_rejects_asymmetric_and_indefinite() {
        let asym = DMatrix::from_row_slice(2, 2, &[1.0, 0.5, 0.0, 1.0]);
        assert!(DataCovariance::full(asym).is_err());
        let indef = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        assert!(DataCovariance::full(indef).is_err());
    }
}
