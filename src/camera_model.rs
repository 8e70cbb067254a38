//! Camera intrinsics model: focal lengths, principal point, and distortion.
//!
//! `CameraModel` separates per-camera intrinsics from the per-image
//! orientation. It maps camera-frame vectors to pixel coordinates and exposes
//! its intrinsics as a flat parameter vector for fitting.
//!
//! # Coordinate conventions
//!
//! - **Camera frame**: +X right, +Y down, +Z along the boresight.
//! - **Normalized coordinates** `(x, y) = (X/Z, Y/Z)`: tangent-plane radians.
//! - **Pixel coordinates** `(i, j)`: origin at the image corner, +i right, +j down.
//!
//! # Pipeline
//!
//! ```text
//! camera vector → perspective divide → distort → scale by (fi, fj) → add (pi, pj) → pixel
//! pixel → subtract (pi, pj) → divide by (fi, fj) → undistort → normalized
//! ```
//!
//! # Parameter vector
//!
//! `[fi, fj, pi, pj, k1, …]`: four pinhole intrinsics followed by the free
//! distortion coefficients, if any.

use nalgebra::{Matrix2x3, Matrix2xX, Matrix3, Vector3};

use crate::distortion::Distortion;
use crate::error::FitError;

/// Number of pinhole intrinsics `(fi, fj, pi, pj)`.
pub const PINHOLE_PARAMS: usize = 4;

/// Camera intrinsics model.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraModel {
    /// Focal length in pixels along the i-axis.
    pub fi: f64,
    /// Focal length in pixels along the j-axis.
    pub fj: f64,
    /// Principal point, i-coordinate in pixels.
    pub pi: f64,
    /// Principal point, j-coordinate in pixels.
    pub pj: f64,
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Lens distortion, applied in normalized coordinates.
    pub distortion: Distortion,
}

/// A projected point together with its partial derivatives.
#[derive(Debug, Clone)]
pub struct ProjectionJacobian {
    /// Pixel coordinate `(i, j)`.
    pub pixel: (f64, f64),
    /// ∂(i, j)/∂(X, Y, Z) with respect to the camera-frame vector.
    pub wrt_point: Matrix2x3<f64>,
    /// ∂(i, j)/∂intrinsics, one column per intrinsic parameter.
    pub wrt_intrinsics: Matrix2xX<f64>,
}

impl CameraModel {
    /// Pinhole camera from physical properties.
    ///
    /// `focal_length`, `pixel_width` and `pixel_height` share a length unit
    /// (e.g. mm). The principal point is placed at the image centre.
    pub fn from_physical(
        focal_length: f64,
        pixel_width: f64,
        pixel_height: f64,
        image_width: u32,
        image_height: u32,
    ) -> Self {
        Self {
            fi: focal_length / pixel_width,
            fj: focal_length / pixel_height,
            pi: image_width as f64 / 2.0,
            pj: image_height as f64 / 2.0,
            width: image_width,
            height: image_height,
            distortion: Distortion::None,
        }
    }

    /// Square-pixel camera from a horizontal field of view.
    ///
    /// Principal point at the image centre, no distortion.
    pub fn from_fov(fov_rad: f64, image_width: u32, image_height: u32) -> Self {
        let f = (image_width as f64 / 2.0) / (fov_rad / 2.0).tan();
        Self {
            fi: f,
            fj: f,
            pi: image_width as f64 / 2.0,
            pj: image_height as f64 / 2.0,
            width: image_width,
            height: image_height,
            distortion: Distortion::None,
        }
    }

    pub fn with_distortion(mut self, distortion: Distortion) -> Self {
        self.distortion = distortion;
        self
    }

    /// Horizontal field of view in radians.
    pub fn fov_rad(&self) -> f64 {
        2.0 * ((self.width as f64 / 2.0) / self.fi).atan()
    }

    /// Vertical field of view in radians.
    pub fn vertical_fov_rad(&self) -> f64 {
        2.0 * ((self.height as f64 / 2.0) / self.fj).atan()
    }

    /// Pixel scale in radians per pixel along i (approximate, at the principal point).
    pub fn pixel_scale(&self) -> f64 {
        1.0 / self.fi
    }

    /// The 3×3 pinhole intrinsic matrix (distortion is not representable here).
    pub fn intrinsic_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fi, 0.0, self.pi, //
            0.0, self.fj, self.pj, //
            0.0, 0.0, 1.0,
        )
    }

    /// Whether a pixel coordinate lies on the detector.
    pub fn contains(&self, i: f64, j: f64) -> bool {
        i >= 0.0 && j >= 0.0 && i < self.width as f64 && j < self.height as f64
    }

    // ── Parameter vector ────────────────────────────────────────────────────

    /// Number of intrinsic parameters.
    pub fn num_params(&self) -> usize {
        PINHOLE_PARAMS + self.distortion.num_params()
    }

    /// Intrinsic parameter vector `[fi, fj, pi, pj, k…]`.
    pub fn params(&self) -> Vec<f64> {
        let mut p = vec![self.fi, self.fj, self.pi, self.pj];
        p.extend(self.distortion.coefficients());
        p
    }

    /// Overwrite the intrinsics from a parameter vector of length [`num_params`](Self::num_params).
    pub fn set_params(&mut self, params: &[f64]) -> Result<(), FitError> {
        if params.len() != self.num_params() {
            return Err(FitError::DimensionMismatch {
                what: "camera parameters",
                expected: self.num_params(),
                actual: params.len(),
            });
        }
        self.fi = params[0];
        self.fj = params[1];
        self.pi = params[2];
        self.pj = params[3];
        self.distortion.set_coefficients(&params[PINHOLE_PARAMS..]);
        Ok(())
    }

    /// Parameter names, in parameter order.
    pub fn param_names(&self) -> Vec<&'static str> {
        let mut names = vec!["fi", "fj", "pi", "pj"];
        names.extend_from_slice(self.distortion.param_names());
        names
    }

    // ── Projection ──────────────────────────────────────────────────────────

    /// Project a camera-frame vector to pixel coordinates.
    ///
    /// Returns `None` for vectors on or behind the image plane (`Z ≤ 0`).
    pub fn project(&self, r_cam: &Vector3<f64>) -> Option<(f64, f64)> {
        if r_cam.z <= 0.0 {
            return None;
        }
        let x = r_cam.x / r_cam.z;
        let y = r_cam.y / r_cam.z;
        Some(self.tanplane_to_pixel(x, y))
    }

    /// Project a camera-frame vector and differentiate the result with respect
    /// to the vector and to every intrinsic parameter.
    pub fn project_with_jacobian(&self, r_cam: &Vector3<f64>) -> Option<ProjectionJacobian> {
        let z = r_cam.z;
        if z <= 0.0 {
            return None;
        }
        let x = r_cam.x / z;
        let y = r_cam.y / z;
        let r2 = x * x + y * y;
        let (s, ds) = self.distortion.scale_and_derivative(r2);
        let xd = x * s;
        let yd = y * s;

        // ∂(xd, yd)/∂(x, y)
        let dxd_dx = s + 2.0 * x * x * ds;
        let dxd_dy = 2.0 * x * y * ds;
        let dyd_dx = dxd_dy;
        let dyd_dy = s + 2.0 * y * y * ds;

        // ∂(x, y)/∂(X, Y, Z)
        let inv_z = 1.0 / z;
        let d_norm = Matrix2x3::new(
            inv_z, 0.0, -x * inv_z, //
            0.0, inv_z, -y * inv_z,
        );
        let d_dist = nalgebra::Matrix2::new(
            self.fi * dxd_dx,
            self.fi * dxd_dy,
            self.fj * dyd_dx,
            self.fj * dyd_dy,
        );
        let wrt_point = d_dist * d_norm;

        let mut wrt_intrinsics = Matrix2xX::zeros(self.num_params());
        wrt_intrinsics[(0, 0)] = xd;
        wrt_intrinsics[(1, 1)] = yd;
        wrt_intrinsics[(0, 2)] = 1.0;
        wrt_intrinsics[(1, 3)] = 1.0;
        let mut rk = r2;
        for c in PINHOLE_PARAMS..self.num_params() {
            wrt_intrinsics[(0, c)] = self.fi * x * rk;
            wrt_intrinsics[(1, c)] = self.fj * y * rk;
            rk *= r2;
        }

        Some(ProjectionJacobian {
            pixel: (self.fi * xd + self.pi, self.fj * yd + self.pj),
            wrt_point,
            wrt_intrinsics,
        })
    }

    /// Unit vector in the camera frame seen at pixel `(i, j)`.
    pub fn unproject(&self, i: f64, j: f64) -> Vector3<f64> {
        let (x, y) = self.pixel_to_tanplane(i, j);
        Vector3::new(x, y, 1.0).normalize()
    }

    /// Convert pixel coordinates to normalized (tangent-plane) coordinates.
    ///
    /// Pipeline: subtract principal point → divide by focal length → undistort.
    pub fn pixel_to_tanplane(&self, i: f64, j: f64) -> (f64, f64) {
        let xd = (i - self.pi) / self.fi;
        let yd = (j - self.pj) / self.fj;
        self.distortion.undistort(xd, yd)
    }

    /// Convert normalized (tangent-plane) coordinates to pixel coordinates.
    ///
    /// Pipeline: distort → multiply by focal length → add principal point.
    pub fn tanplane_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        let (xd, yd) = self.distortion.distort(x, y);
        (self.fi * xd + self.pi, self.fj * yd + self.pj)
    }
}
