//! Polynomial radial lens distortion in normalized image coordinates.
//!
//! Coordinates are `(X/Z, Y/Z)`: relative to the principal point and divided
//! by the focal length, so the coefficients are dimensionless and do not
//! depend on image size or pixel pitch.

/// Radial distortion `r_d = r·s(r²)` with `s(r²) = 1 + k1·r² + k2·r⁴ + k3·r⁶`.
///
/// Only the first `terms` coefficients are fit parameters; the others keep
/// their value (normally zero). Negative `k1` is barrel distortion, positive
/// is pincushion.
#[derive(Debug, Clone, PartialEq)]
pub struct RadialDistortion {
    pub k1: f64,
    pub k2: f64,
    pub k3: f64,
    /// Number of coefficients exposed as fit parameters (1..=3).
    pub terms: usize,
}

impl RadialDistortion {
    /// All three coefficients given and free.
    pub fn new(k1: f64, k2: f64, k3: f64) -> Self {
        Self { k1, k2, k3, terms: 3 }
    }

    /// Zero distortion with only the first `terms` coefficients free (clamped to 1..=3).
    pub fn with_terms(terms: usize) -> Self {
        Self {
            k1: 0.0,
            k2: 0.0,
            k3: 0.0,
            terms: terms.clamp(1, 3),
        }
    }

    /// Radial scale factor `s(r²) = 1 + k1·r² + k2·r⁴ + k3·r⁶`.
    pub fn scale(&self, r2: f64) -> f64 {
        1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3))
    }

    /// Derivative of [`scale`](Self::scale) with respect to r².
    pub fn scale_derivative(&self, r2: f64) -> f64 {
        self.k1 + r2 * (2.0 * self.k2 + 3.0 * self.k3 * r2)
    }

    /// Ideal normalized coordinates to distorted ones.
    pub fn distort(&self, x: f64, y: f64) -> (f64, f64) {
        let s = self.scale(x * x + y * y);
        (x * s, y * s)
    }

    /// Distorted normalized coordinates back to ideal ones.
    ///
    /// Solves `r·s(r²) = r_d` for `r` by Newton's method, starting at `r_d`.
    pub fn undistort(&self, xd: f64, yd: f64) -> (f64, f64) {
        let rd = xd.hypot(yd);
        if rd < 1e-15 {
            return (xd, yd);
        }

        let mut r = rd;
        for _ in 0..20 {
            let r2 = r * r;
            let g = r * self.scale(r2) - rd;
            // d(r·s)/dr = s + 2r²·s'
            let dg = self.scale(r2) + 2.0 * r2 * self.scale_derivative(r2);
            let step = g / dg;
            r -= step;
            if step.abs() < 1e-15 {
                break;
            }
        }

        let k = r / rd;
        (xd * k, yd * k)
    }

    /// Number of free coefficients, at most 3.
    pub fn num_free(&self) -> usize {
        self.terms.min(3)
    }

    /// The free coefficients, in order.
    pub fn coefficients(&self) -> Vec<f64> {
        [self.k1, self.k2, self.k3][..self.num_free()].to_vec()
    }

    /// Overwrite the free coefficients from `coeffs`; extra values are ignored.
    pub(crate) fn set_coefficients(&mut self, coeffs: &[f64]) {
        for (i, &k) in coeffs.iter().take(self.num_free()).enumerate() {
            match i {
                0 => self.k1 = k,
                1 => self.k2 = k,
                _ => self.k3 = k,
            }
        }
    }

    pub fn is_zero(&self) -> bool {
        self.k1 == 0.0 && self.k2 == 0.0 && self.k3 == 0.0
    }
}
