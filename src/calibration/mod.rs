//! Geometric camera calibration: fit intrinsics and orientation to matched
//! reference stars.

pub mod calibrate;
pub mod fitter;
pub mod record;

pub use calibrate::{calibrate_camera, CalibrationConfig, CalibrationResult};
pub use fitter::{GeoCalFitter, JacobianMode};
pub use record::CalibrationRecord;
