//! # geocal
//!
//! **Levenberg-Marquardt least squares** and **geometric camera calibration**
//! against reference stars.
//!
//! Given the pixel positions of stars detected in an image of the night sky,
//! matched to catalogue stars, `geocal` fits the camera's intrinsics (focal
//! lengths, principal point, optional radial distortion) and its orientation
//! relative to the local horizon, and reports how well the fit is determined.
//!
//! ## Features
//!
//! - **Generic LM solver**: any problem implementing [`ResidualModel`]; analytic
//!   or finite-difference Jacobians; full or diagonal data covariance
//! - **Covariance estimates**: asymptotic (pseudo-inverse of the normal
//!   matrix) and fourth-order data propagation
//! - **Calibration fitter**: BCRF → ECEF → SEZ → CAM → image projection with
//!   closed-form derivatives in the intrinsics and the orientation quaternion
//! - **Persistence**: calibrations serialize with [rkyv](https://docs.rs/rkyv)
//!
//! ## Example
//!
//! ```no_run
//! use geocal::{
//!     calibrate_camera, epoch_to_gmst, load_reference_stars_from_file, match_stars,
//!     sez_to_cam_quaternion, CalibrationConfig, CalibrationRecord, CameraModel, Site, Source,
//! };
//!
//! let site = Site::from_degrees(-3.19, 55.95, 80.0).unwrap();
//! let epoch_us = 1_700_000_000_000_000;
//! let gmst = epoch_to_gmst(epoch_us);
//!
//! // Initial guess: 8 mm lens, 5.2 µm pixels, pointing east at 40° elevation
//! let camera = CameraModel::from_physical(8.0, 0.0052, 0.0052, 1280, 960);
//! let q = sez_to_cam_quaternion(90f64.to_radians(), 40f64.to_radians(), 0.0);
//!
//! let stars = load_reference_stars_from_file("data/bright_stars.txt").unwrap();
//! let sources = vec![Source::new(612.3, 401.9), Source::new(233.0, 820.4)];
//!
//! let r_bcrf_cam = q.to_rotation_matrix().matrix()
//!     * site.ecef_to_sez()
//!     * geocal::coords::bcrf_to_ecef(gmst);
//! let xms = match_stars(&sources, &stars, &camera, &r_bcrf_cam, 20.0, 50);
//!
//! let result = calibrate_camera(&camera, &q, &xms, gmst, &site, &CalibrationConfig::default())
//!     .unwrap();
//! println!("RMS {:.3} px after {} iterations", result.rms_after_px, result.iterations);
//!
//! CalibrationRecord::from_result(&result, epoch_us, &site)
//!     .save_to_file("calibration.rkyv")
//!     .unwrap();
//! ```

pub mod calibration;
pub mod camera_model;
pub mod catalogs;
pub mod coords;
pub mod crossmatch;
pub mod distortion;
mod error;
pub mod linalg;
pub mod lm;
pub mod site;
pub mod source;
pub mod star;
pub mod time;

pub use calibration::{
    calibrate_camera, CalibrationConfig, CalibrationRecord, CalibrationResult, GeoCalFitter,
    JacobianMode,
};
pub use camera_model::CameraModel;
pub use catalogs::{load_reference_stars, load_reference_stars_from_file};
pub use coords::{sez_to_cam, sez_to_cam_quaternion};
pub use crossmatch::{match_stars, Correspondence, Exclusion};
pub use distortion::{Distortion, RadialDistortion};
pub use error::FitError;
pub use lm::{FitStatus, LevenbergMarquardtSolver, ResidualModel, SolverConfig};
pub use site::Site;
pub use source::Source;
pub use star::ReferenceStar;
pub use time::{epoch_to_gmst, epoch_to_jd};

/// Orientation of one frame relative to another.
pub type Quaternion = nalgebra::UnitQuaternion<f64>;
