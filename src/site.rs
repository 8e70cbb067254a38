//! Observing site: geodetic position of the camera.

use nalgebra::Matrix3;

use crate::coords::ecef_to_sez;
use crate::error::FitError;

/// Longitude range accepted, in degrees. Both the ±180 and the 0..360
/// conventions are allowed.
const LONGITUDE_RANGE_DEG: (f64, f64) = (-180.0, 360.0);
const LATITUDE_RANGE_DEG: (f64, f64) = (-90.0, 90.0);
/// Altitude range accepted, in metres above the ellipsoid.
const ALTITUDE_RANGE_M: (f64, f64) = (-100.0, 5000.0);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Site {
    /// Geodetic longitude, radians, positive east.
    pub longitude_rad: f64,
    /// Geodetic latitude, radians.
    pub latitude_rad: f64,
    /// Altitude in metres. Not used by the projection (stars are at infinity).
    pub altitude_m: f64,
}

impl Site {
    /// Validated site from degrees and metres.
    pub fn from_degrees(longitude_deg: f64, latitude_deg: f64, altitude_m: f64) -> Result<Self, FitError> {
        check_range("longitude", longitude_deg, LONGITUDE_RANGE_DEG, "deg")?;
        check_range("latitude", latitude_deg, LATITUDE_RANGE_DEG, "deg")?;
        check_range("altitude", altitude_m, ALTITUDE_RANGE_M, "m")?;
        Ok(Self {
            longitude_rad: longitude_deg.to_radians(),
            latitude_rad: latitude_deg.to_radians(),
            altitude_m,
        })
    }

    /// ECEF → SEZ rotation for this site.
    pub fn ecef_to_sez(&self) -> Matrix3<f64> {
        ecef_to_sez(self.longitude_rad, self.latitude_rad)
    }
}

fn check_range(name: &str, value: f64, (lo, hi): (f64, f64), unit: &str) -> Result<(), FitError> {
    if value.is_finite() && (lo..=hi).contains(&value) {
        Ok(())
    } else {
        Err(FitError::InvalidSite(format!(
            "{} {} {} outside [{}, {}]",
            name, value, unit, lo, hi
        )))
    }
}
