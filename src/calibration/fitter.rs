//! Residual model for geometric camera calibration.
//!
//! The parameter vector is the camera intrinsics followed by the SEZ → CAM
//! orientation quaternion `(w, x, y, z)`:
//!
//! ```text
//! P = [fi, fj, pi, pj, k…, qw, qx, qy, qz]
//! ```
//!
//! The data vector packs the observed pixel positions of the kept
//! correspondences as `[i₀, j₀, i₁, j₁, …]`. Each reference star is rotated
//! BCRF → ECEF → SEZ once at construction (the GMST and the site are fixed),
//! so a model evaluation only applies the current orientation and projects
//! through the current intrinsics.

use nalgebra::{DMatrix, DVector, Matrix3, Quaternion, UnitQuaternion, Vector3};
use tracing::debug;

use crate::camera_model::CameraModel;
use crate::coords::bcrf_to_ecef;
use crate::crossmatch::{partition_visible, Correspondence, Exclusion};
use crate::error::FitError;
use crate::lm::{central_difference_jacobian, forward_difference_jacobian, ResidualModel};
use crate::site::Site;

/// Finite-difference step for quaternion components (~0.02 arcsec).
const QUATERNION_STEP: f64 = 1e-7;
/// Finite-difference step for distortion coefficients.
const DISTORTION_STEP: f64 = 1e-9;
/// Relative finite-difference step for focal lengths and principal point.
const INTRINSIC_RELATIVE_STEP: f64 = 1e-6;

/// How the fitter computes ∂f/∂P.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JacobianMode {
    /// Closed-form derivatives of the projection.
    #[default]
    Analytic,
    /// First-order forward differences.
    ForwardDifference,
    /// Fourth-order central differences.
    CentralDifference,
}

/// Calibration residual model: camera intrinsics and orientation against
/// matched star positions.
#[derive(Debug, Clone)]
pub struct GeoCalFitter {
    /// Initial intrinsics; also fixes the distortion model layout.
    camera: CameraModel,
    q_sez_cam: UnitQuaternion<f64>,
    /// Kept stars as unit vectors in the SEZ frame.
    r_sez: Vec<Vector3<f64>>,
    /// Observed positions of the kept stars, `[i₀, j₀, i₁, j₁, …]`.
    observed: Vec<f64>,
    /// Per-source 2×2 covariances of the kept stars, if every one has one.
    source_covariances: Option<Vec<nalgebra::Matrix2<f64>>>,
    kept: Vec<usize>,
    excluded: Vec<(usize, Exclusion)>,
    jacobian_mode: JacobianMode,
}

impl GeoCalFitter {
    /// Build the fitter from an initial camera and orientation.
    ///
    /// Correspondences whose star is fainter than `faint_mag_limit`, or lies
    /// behind the camera at the initial orientation, are excluded here and
    /// stay excluded for the whole fit.
    pub fn new(
        camera: CameraModel,
        q_sez_cam: UnitQuaternion<f64>,
        correspondences: &[Correspondence],
        gmst: f64,
        site: &Site,
        faint_mag_limit: f64,
    ) -> Result<Self, FitError> {
        let r_bcrf_sez: Matrix3<f64> = site.ecef_to_sez() * bcrf_to_ecef(gmst);
        let r_bcrf_cam = q_sez_cam.to_rotation_matrix().matrix() * r_bcrf_sez;

        let vis = partition_visible(correspondences, &r_bcrf_cam, faint_mag_limit);
        if vis.kept.is_empty() {
            return Err(FitError::NoCorrespondences);
        }
        if !vis.excluded.is_empty() {
            debug!(
                "Excluded {} of {} correspondences (faint or behind camera)",
                vis.excluded.len(),
                correspondences.len()
            );
        }

        let mut r_sez = Vec::with_capacity(vis.kept.len());
        let mut observed = Vec::with_capacity(2 * vis.kept.len());
        let mut covs = Vec::with_capacity(vis.kept.len());
        for &idx in &vis.kept {
            let c = &correspondences[idx];
            r_sez.push(r_bcrf_sez * c.star.uvec());
            observed.push(c.source.x);
            observed.push(c.source.y);
            covs.push(c.source.cov);
        }
        let source_covariances = covs.into_iter().collect::<Option<Vec<_>>>();

        Ok(Self {
            camera,
            q_sez_cam,
            r_sez,
            observed,
            source_covariances,
            kept: vis.kept,
            excluded: vis.excluded,
            jacobian_mode: JacobianMode::Analytic,
        })
    }

    pub fn with_jacobian_mode(mut self, mode: JacobianMode) -> Self {
        self.jacobian_mode = mode;
        self
    }

    pub fn jacobian_mode(&self) -> JacobianMode {
        self.jacobian_mode
    }

    /// M: intrinsics plus the four quaternion components.
    pub fn num_params(&self) -> usize {
        self.camera.num_params() + 4
    }

    /// N: two coordinates per kept correspondence.
    pub fn num_data(&self) -> usize {
        self.observed.len()
    }

    /// Observed pixel positions, packed `[i₀, j₀, i₁, j₁, …]`.
    pub fn observed(&self) -> &[f64] {
        &self.observed
    }

    /// Indices (into the input correspondences) used in the fit.
    pub fn kept(&self) -> &[usize] {
        &self.kept
    }

    /// Indices (into the input correspondences) left out, with the reason.
    pub fn excluded(&self) -> &[(usize, Exclusion)] {
        &self.excluded
    }

    /// Source covariances of the kept correspondences, when all of them have one.
    pub fn source_covariances(&self) -> Option<&[nalgebra::Matrix2<f64>]> {
        self.source_covariances.as_deref()
    }

    /// Initial parameter vector from the camera and orientation given at construction.
    pub fn initial_parameters(&self) -> Vec<f64> {
        let mut p = self.camera.params();
        let q = self.q_sez_cam.quaternion();
        p.extend_from_slice(&[q.w, q.i, q.j, q.k]);
        p
    }

    /// Offset of the quaternion within the parameter vector.
    fn q_offset(&self) -> usize {
        self.camera.num_params()
    }

    /// Camera with its intrinsics taken from `params`.
    pub fn camera_from_params(&self, params: &[f64]) -> Result<CameraModel, FitError> {
        if params.len() != self.num_params() {
            return Err(FitError::DimensionMismatch {
                what: "calibration parameters",
                expected: self.num_params(),
                actual: params.len(),
            });
        }
        let mut camera = self.camera.clone();
        camera.set_params(&params[..self.q_offset()])?;
        Ok(camera)
    }

    /// Orientation taken from `params` (normalized).
    pub fn orientation_from_params(&self, params: &[f64]) -> Result<UnitQuaternion<f64>, FitError> {
        if params.len() != self.num_params() {
            return Err(FitError::DimensionMismatch {
                what: "calibration parameters",
                expected: self.num_params(),
                actual: params.len(),
            });
        }
        let o = self.q_offset();
        let q = Quaternion::new(params[o], params[o + 1], params[o + 2], params[o + 3]);
        if q.norm() == 0.0 {
            return Ok(UnitQuaternion::identity());
        }
        Ok(UnitQuaternion::from_quaternion(q))
    }

    /// Split a parameter vector into its intrinsics camera and raw `(w, v)` quaternion.
    fn unpack(&self, params: &DVector<f64>) -> (CameraModel, f64, Vector3<f64>) {
        let o = self.q_offset();
        let mut camera = self.camera.clone();
        camera.fi = params[0];
        camera.fj = params[1];
        camera.pi = params[2];
        camera.pj = params[3];
        camera
            .distortion
            .set_coefficients(&params.as_slice()[crate::camera_model::PINHOLE_PARAMS..o]);
        let w = params[o];
        let v = Vector3::new(params[o + 1], params[o + 2], params[o + 3]);
        (camera, w, v)
    }
}

/// `R(q)·s` for a quaternion `(w, v)`, written as a homogeneous quadratic in q.
/// Equals the rotation for unit q; the scale factor cancels in the perspective divide.
fn rotate(w: f64, v: &Vector3<f64>, s: &Vector3<f64>) -> Vector3<f64> {
    s * (w * w - v.dot(v)) + v * (2.0 * v.dot(s)) + v.cross(s) * (2.0 * w)
}

/// ∂(R(q)·s)/∂(w, x, y, z), one column per component.
fn rotate_derivative(w: f64, v: &Vector3<f64>, s: &Vector3<f64>) -> nalgebra::Matrix3x4<f64> {
    let mut d = nalgebra::Matrix3x4::zeros();
    d.set_column(0, &(s * (2.0 * w) + v.cross(s) * 2.0));
    let vs = v.dot(s);
    for k in 0..3 {
        let e = Vector3::ith(k, 1.0);
        let col = s * (-2.0 * v[k]) + v * (2.0 * s[k]) + e * (2.0 * vs) + e.cross(s) * (2.0 * w);
        d.set_column(k + 1, &col);
    }
    d
}

impl ResidualModel for GeoCalFitter {
    fn model(&self, params: &DVector<f64>, out: &mut DVector<f64>) {
        let (camera, w, v) = self.unpack(params);
        for (k, s) in self.r_sez.iter().enumerate() {
            let r_cam = rotate(w, &v, s);
            let (i, j) = camera
                .project(&r_cam)
                .unwrap_or((self.observed[2 * k], self.observed[2 * k + 1]));
            out[2 * k] = i;
            out[2 * k + 1] = j;
        }
    }

    fn jacobian(&self, params: &DVector<f64>, out: &mut DMatrix<f64>) {
        match self.jacobian_mode {
            JacobianMode::ForwardDifference => return forward_difference_jacobian(self, params, out),
            JacobianMode::CentralDifference => return central_difference_jacobian(self, params, out),
            JacobianMode::Analytic => {}
        }

        let (camera, w, v) = self.unpack(params);
        let o = self.q_offset();
        out.fill(0.0);
        for (k, s) in self.r_sez.iter().enumerate() {
            let r_cam = rotate(w, &v, s);
            // Behind the camera: residual pinned to zero, no gradient.
            let Some(pj) = camera.project_with_jacobian(&r_cam) else {
                continue;
            };
            let dq = pj.wrt_point * rotate_derivative(w, &v, s);
            for row in 0..2 {
                for c in 0..o {
                    out[(2 * k + row, c)] = pj.wrt_intrinsics[(row, c)];
                }
                for c in 0..4 {
                    out[(2 * k + row, o + c)] = dq[(row, c)];
                }
            }
        }
    }

    fn finite_difference_steps(&self, params: &DVector<f64>) -> DVector<f64> {
        let o = self.q_offset();
        DVector::from_fn(params.len(), |c, _| {
            if c >= o {
                QUATERNION_STEP
            } else if c >= crate::camera_model::PINHOLE_PARAMS {
                DISTORTION_STEP
            } else {
                INTRINSIC_RELATIVE_STEP * params[c].abs().max(1.0)
            }
        })
    }

    /// Renormalize the quaternion; a zero quaternion resets to identity.
    fn post_parameter_update(&self, params: &mut DVector<f64>) {
        let o = self.q_offset();
        let mut q = params.rows_mut(o, 4);
        let norm = q.norm();
        if norm > 0.0 && norm.is_finite() {
            q /= norm;
        } else {
            q.copy_from_slice(&[1.0, 0.0, 0.0, 0.0]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::{cartesian_to_spherical, sez_to_cam_quaternion};
    use crate::distortion::{Distortion, RadialDistortion};
    use crate::source::Source;
    use crate::star::ReferenceStar;

    const GMST: f64 = 1.234;

    fn scene(camera: &CameraModel, q: &UnitQuaternion<f64>, site: &Site) -> Vec<Correspondence> {
        let r_bcrf_sez = site.ecef_to_sez() * bcrf_to_ecef(GMST);
        let r_cam_bcrf = (q.to_rotation_matrix().matrix() * r_bcrf_sez).transpose();
        [(150.0, 120.0), (900.0, 200.0), (500.0, 450.0), (100.0, 650.0), (820.0, 700.0)]
            .iter()
            .enumerate()
            .map(|(id, &(i, j))| {
                let (_, ra, dec) = cartesian_to_spherical(&(r_cam_bcrf * camera.unproject(i, j)));
                Correspondence::new(Source::new(i, j), ReferenceStar::new(id as u64, ra, dec, 3.0))
            })
            .collect()
    }

    fn setup() -> GeoCalFitter {
        let site = Site::from_degrees(-3.2, 55.9, 100.0).unwrap();
        let camera = CameraModel::from_fov(60f64.to_radians(), 1024, 768)
            .with_distortion(Distortion::Radial(RadialDistortion::new(-0.1, 0.02, 0.0)));
        let q = sez_to_cam_quaternion(1.0, 0.6, 0.1);
        let xms = scene(&camera, &q, &site);
        GeoCalFitter::new(camera, q, &xms, GMST, &site, 6.0).unwrap()
    }

    #[test]
    fn test_model_reproduces_scene() {
        let fitter = setup();
        assert_eq!(fitter.num_params(), 11);
        assert_eq!(fitter.num_data(), 10);
        let p = DVector::from_vec(fitter.initial_parameters());
        let mut f = DVector::zeros(fitter.num_data());
        fitter.model(&p, &mut f);
        for (k, (m, o)) in f.iter().zip(fitter.observed()).enumerate() {
            assert!((m - o).abs() < 1e-8, "value {}: model {} vs observed {}", k, m, o);
        }
    }

    #[test]
    fn test_analytic_jacobian_matches_central_difference() {
        let fitter = setup();
        let mut p = DVector::from_vec(fitter.initial_parameters());
        // Move away from the solution so no derivative is trivially symmetric.
        p[0] += 3.0;
        p[8] += 0.01;
        fitter.post_parameter_update(&mut p);

        let (n, m) = (fitter.num_data(), fitter.num_params());
        let mut analytic = DMatrix::zeros(n, m);
        fitter.jacobian(&p, &mut analytic);
        let numeric_fitter = fitter.clone().with_jacobian_mode(JacobianMode::CentralDifference);
        let mut numeric = DMatrix::zeros(n, m);
        numeric_fitter.jacobian(&p, &mut numeric);

        for r in 0..n {
            for c in 0..m {
                let (a, b) = (analytic[(r, c)], numeric[(r, c)]);
                assert!(
                    (a - b).abs() < 1e-4 * b.abs().max(1.0),
                    "J[{}, {}]: analytic {:.6}, numeric {:.6}",
                    r,
                    c,
                    a,
                    b
                );
            }
        }
    }

    #[test]
    fn test_unpack_reads_intrinsics() {
        let fitter = setup();
        let mut p = DVector::from_vec(fitter.initial_parameters());
        p[0] = 900.0;
        p[3] = 401.5;
        p[5] = 0.007;
        let (camera, w, _) = fitter.unpack(&p);
        assert_eq!(camera.params(), p.rows(0, 7).iter().copied().collect::<Vec<_>>());
        assert_eq!(w, p[7]);
    }

    #[test]
    fn test_star_turned_behind_camera_is_inert() {
        let fitter = setup();
        let o = fitter.camera.num_params();
        let q0 = fitter.q_sez_cam;
        // Yaw the camera 70° so the stars near the left edge swing behind it.
        let yaw = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), -70f64.to_radians());
        let q = yaw * q0;
        let mut p = DVector::from_vec(fitter.initial_parameters());
        p.rows_mut(o, 4)
            .copy_from_slice(&[q.quaternion().w, q.quaternion().i, q.quaternion().j, q.quaternion().k]);

        let depths: Vec<f64> = fitter
            .r_sez
            .iter()
            .map(|s| (q.to_rotation_matrix() * s).z)
            .collect();
        assert!(depths.iter().any(|&z| z <= 0.0), "no star behind: {:?}", depths);
        assert!(depths.iter().any(|&z| z > 0.0), "all stars behind: {:?}", depths);

        let (n, m) = (fitter.num_data(), fitter.num_params());
        let mut f = DVector::zeros(n);
        fitter.model(&p, &mut f);
        let mut jac = DMatrix::from_element(n, m, f64::NAN);
        fitter.jacobian(&p, &mut jac);

        for (k, &z) in depths.iter().enumerate() {
            let rows = jac.rows(2 * k, 2);
            if z <= 0.0 {
                assert_eq!(f[2 * k], fitter.observed()[2 * k], "star {} i", k);
                assert_eq!(f[2 * k + 1], fitter.observed()[2 * k + 1], "star {} j", k);
                assert!(rows.iter().all(|&v| v == 0.0), "star {} has gradient", k);
            } else {
                assert!(rows.iter().all(|v| v.is_finite()));
                assert!(rows.amax() > 0.0, "star {} in front has no gradient", k);
            }
        }
    }

    #[test]
    fn test_quaternion_gauge_is_null() {
        let fitter = setup();
        let p = DVector::from_vec(fitter.initial_parameters());
        let mut jac = DMatrix::zeros(fitter.num_data(), fitter.num_params());
        fitter.jacobian(&p, &mut jac);
        let o = fitter.camera.num_params();
        let q = p.rows(o, 4).into_owned();
        let radial = jac.columns(o, 4) * &q;
        assert!(radial.amax() < 1e-8, "scaling q should not move stars: {:.3e}", radial.amax());
    }

    #[test]
    fn test_post_update_normalizes() {
        let fitter = setup();
        let mut p = DVector::from_vec(fitter.initial_parameters());
        let o = fitter.num_params() - 4;
        for c in o..o + 4 {
            p[c] *= 3.0;
        }
        fitter.post_parameter_update(&mut p);
        assert!((p.rows(o, 4).norm() - 1.0).abs() < 1e-15);

        p.rows_mut(o, 4).fill(0.0);
        fitter.post_parameter_update(&mut p);
        let q: Vec<f64> = p.rows(o, 4).iter().copied().collect();
        assert_eq!(q, vec![1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_finite_difference_steps() {
        let fitter = setup();
        let p = DVector::from_vec(fitter.initial_parameters());
        let steps = fitter.finite_difference_steps(&p);
        assert!((steps[0] - 1e-6 * p[0]).abs() < 1e-18);
        assert_eq!(steps[4], DISTORTION_STEP);
        assert_eq!(steps[10], QUATERNION_STEP);
    }

    #[test]
    fn test_no_usable_correspondences() {
        let site = Site::from_degrees(0.0, 0.0, 0.0).unwrap();
        let camera = CameraModel::from_fov(1.0, 100, 100);
        let xms = vec![Correspondence::new(
            Source::new(50.0, 50.0),
            ReferenceStar::new(1, 0.0, 0.0, 12.0),
        )];
        let err = GeoCalFitter::new(camera, UnitQuaternion::identity(), &xms, 0.0, &site, 6.0)
            .unwrap_err();
        assert_eq!(err, FitError::NoCorrespondences);
    }
}
