//! Lens distortion models.
//!
//! Distortion acts on normalized image coordinates `(X/Z, Y/Z)` between the
//! perspective divide and the intrinsic scaling, so the projection is
//!
//! ```text
//! camera vector → perspective divide → distort → scale by (fi, fj) → add (pi, pj) → pixel
//! ```
//!
//! When distortion is enabled its free coefficients are appended to the
//! camera's intrinsic parameter vector and fitted alongside the focal lengths
//! and principal point.

pub mod radial;

pub use radial::RadialDistortion;

/// Lens distortion model.
#[derive(Debug, Clone, PartialEq)]
pub enum Distortion {
    /// No distortion correction.
    None,
    /// Radial distortion: r_distorted = r × (1 + k1·r² + k2·r⁴ + k3·r⁶).
    Radial(RadialDistortion),
}

impl Distortion {
    /// Convert observed (distorted) normalized coordinates to ideal (pinhole) coordinates.
    pub fn undistort(&self, x: f64, y: f64) -> (f64, f64) {
        match self {
            Distortion::None => (x, y),
            Distortion::Radial(r) => r.undistort(x, y),
        }
    }

    /// Convert ideal (pinhole) normalized coordinates to observed (distorted) coordinates.
    pub fn distort(&self, x: f64, y: f64) -> (f64, f64) {
        match self {
            Distortion::None => (x, y),
            Distortion::Radial(r) => r.distort(x, y),
        }
    }

    /// Radial scale `s(r²)` and its derivative `ds/d(r²)`.
    pub fn scale_and_derivative(&self, r2: f64) -> (f64, f64) {
        match self {
            Distortion::None => (1.0, 0.0),
            Distortion::Radial(r) => (r.scale(r2), r.scale_derivative(r2)),
        }
    }

    /// Number of free coefficients contributed to the parameter vector.
    pub fn num_params(&self) -> usize {
        match self {
            Distortion::None => 0,
            Distortion::Radial(r) => r.num_free(),
        }
    }

    /// Free coefficients, in parameter order.
    pub fn coefficients(&self) -> Vec<f64> {
        match self {
            Distortion::None => Vec::new(),
            Distortion::Radial(r) => r.coefficients(),
        }
    }

    pub(crate) fn set_coefficients(&mut self, coeffs: &[f64]) {
        if let Distortion::Radial(r) = self {
            r.set_coefficients(coeffs);
        }
    }

    /// Names of the free coefficients, in parameter order.
    pub fn param_names(&self) -> &'static [&'static str] {
        static RADIAL: [&str; 3] = ["k1", "k2", "k3"];
        match self {
            Distortion::None => &[],
            Distortion::Radial(r) => &RADIAL[..r.num_free()],
        }
    }
}
