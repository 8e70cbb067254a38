//! Persisted calibration: the fitted camera and orientation plus enough fit
//! statistics to judge it later, serializable with rkyv.

use nalgebra::{Quaternion, UnitQuaternion};
use rkyv::{Archive, Deserialize, Serialize};
use tracing::info;

use crate::camera_model::CameraModel;
use crate::distortion::{Distortion, RadialDistortion};
use crate::site::Site;

use super::calibrate::CalibrationResult;

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct CalibrationRecord {
    /// Epoch of the calibration image, microseconds since the Unix epoch.
    pub epoch_us: i64,
    pub longitude_rad: f64,
    pub latitude_rad: f64,
    pub altitude_m: f64,

    pub image_width: u32,
    pub image_height: u32,
    pub fi: f64,
    pub fj: f64,
    pub pi: f64,
    pub pj: f64,
    /// Radial coefficients `[k1, k2, k3]`; all zero without distortion.
    pub radial: [f64; 3],
    /// Number of free radial coefficients; 0 means no distortion model.
    pub radial_terms: u8,

    /// SEZ → CAM orientation `[w, x, y, z]`.
    pub q_sez_cam: [f64; 4],

    pub num_stars: u32,
    pub rms_px: f64,
    pub chi2: f64,
    pub reduced_chi2: Option<f64>,
    /// Parameter names and standard errors, in fit order. Empty when N == M.
    pub param_names: Vec<String>,
    pub standard_errors: Vec<f64>,
}

impl CalibrationRecord {
    /// Capture a calibration result for the given image epoch and site.
    pub fn from_result(result: &CalibrationResult, epoch_us: i64, site: &Site) -> Self {
        let cam = &result.camera;
        let (radial, radial_terms) = match &cam.distortion {
            Distortion::None => ([0.0; 3], 0),
            Distortion::Radial(r) => ([r.k1, r.k2, r.k3], r.num_free() as u8),
        };
        let q = result.q_sez_cam.quaternion();
        Self {
            epoch_us,
            longitude_rad: site.longitude_rad,
            latitude_rad: site.latitude_rad,
            altitude_m: site.altitude_m,
            image_width: cam.width,
            image_height: cam.height,
            fi: cam.fi,
            fj: cam.fj,
            pi: cam.pi,
            pj: cam.pj,
            radial,
            radial_terms,
            q_sez_cam: [q.w, q.i, q.j, q.k],
            num_stars: result.num_used as u32,
            rms_px: result.rms_after_px,
            chi2: result.chi2,
            reduced_chi2: result.reduced_chi2,
            param_names: result.param_names.iter().map(|s| s.to_string()).collect(),
            standard_errors: result
                .standard_errors
                .as_ref()
                .map(|s| s.iter().copied().collect())
                .unwrap_or_default(),
        }
    }

    /// Rebuild the camera model.
    pub fn camera(&self) -> CameraModel {
        let distortion = match self.radial_terms {
            0 => Distortion::None,
            n => Distortion::Radial(RadialDistortion {
                k1: self.radial[0],
                k2: self.radial[1],
                k3: self.radial[2],
                terms: n as usize,
            }),
        };
        CameraModel {
            fi: self.fi,
            fj: self.fj,
            pi: self.pi,
            pj: self.pj,
            width: self.image_width,
            height: self.image_height,
            distortion,
        }
    }

    /// Rebuild the SEZ → CAM orientation.
    pub fn orientation(&self) -> UnitQuaternion<f64> {
        let [w, x, y, z] = self.q_sez_cam;
        UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z))
    }

    /// Serialize the record to bytes using rkyv.
    pub fn to_rkyv_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map_err(|e| anyhow::anyhow!("rkyv serialization failed: {}", e))?;
        Ok(bytes.to_vec())
    }

    /// Save the record to a file using rkyv.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let bytes = self.to_rkyv_bytes()?;
        std::fs::write(path, &bytes)?;
        info!("Saved calibration to {} ({} bytes)", path, bytes.len());
        Ok(())
    }

    /// Load a record from an rkyv file.
    pub fn load_from_file(path: &str) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)?;
        let record = rkyv::from_bytes::<Self, rkyv::rancor::Error>(&bytes)
            .map_err(|e| anyhow::anyhow!("rkyv deserialization failed: {}", e))?;
        info!(
            "Loaded calibration: {}x{} camera, {} stars, RMS {:.3} px",
            record.image_width, record.image_height, record.num_stars, record.rms_px
        );
        Ok(record)
    }
}
