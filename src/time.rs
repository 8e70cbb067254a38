//! Epoch time conversions: Unix microseconds → Julian date → sidereal time.
//!
//! Epoch times are microseconds after 1970-01-01T00:00:00Z. UTC is used in
//! place of UT1; the difference (< 0.9 s) is far below what a calibration
//! from a single image can resolve.

use std::f64::consts::TAU;

/// Julian date of the Unix epoch.
const JD_UNIX_EPOCH: f64 = 2440587.5;
/// Julian date of J2000.0 (2000-01-01T12:00:00 TT).
const JD_J2000: f64 = 2451545.0;
const MICROSECONDS_PER_DAY: f64 = 86_400_000_000.0;
const SECONDS_PER_DAY: f64 = 86_400.0;

/// Julian date for an epoch time, ignoring leap seconds.
pub fn epoch_to_jd(epoch_us: i64) -> f64 {
    JD_UNIX_EPOCH + epoch_us as f64 / MICROSECONDS_PER_DAY
}

/// Greenwich Mean Sidereal Time in decimal hours `[0, 24)`.
///
/// IAU-82 expression; see Vallado, *Fundamentals of Astrodynamics and
/// Applications*, Example 3-5.
pub fn epoch_to_gmst_hours(epoch_us: i64) -> f64 {
    // Julian centuries since J2000
    let t = (epoch_to_jd(epoch_us) - JD_J2000) / 36525.0;

    let gmst_s = 67310.54841 + (876600.0 * 3600.0 + 8640184.812866) * t + 0.093104 * t * t
        - 6.2e-6 * t * t * t;

    gmst_s.rem_euclid(SECONDS_PER_DAY) / SECONDS_PER_DAY * 24.0
}

/// Greenwich Mean Sidereal Time in radians `[0, 2π)`.
pub fn epoch_to_gmst(epoch_us: i64) -> f64 {
    epoch_to_gmst_hours(epoch_us) / 24.0 * TAU
}

/// Local sidereal time in radians `[0, 2π)` for a site at `longitude`
/// (radians, positive east).
pub fn gmst_to_lst(gmst: f64, longitude: f64) -> f64 {
    (gmst + longitude).rem_euclid(TAU)
}

/// Split decimal hours into whole hours, whole minutes, and seconds.
pub fn decimal_hours_to_hms(hours: f64) -> (i32, i32, f64) {
    let h = hours.floor();
    let minutes = (hours - h) * 60.0;
    let m = minutes.floor();
    let s = (minutes - m) * 60.0;
    (h as i32, m as i32, s)
}
