//! Reference frames and the rotations between them.
//!
//! Frames, from sky to detector:
//!
//! - **BCRF**: celestial frame of the reference star catalogue (right ascension, declination).
//! - **ECEF**: Earth-fixed; differs from BCRF by a rotation about +Z by GMST.
//! - **SEZ**: topocentric South-East-Zenith frame of the observing site.
//! - **CAM**: camera frame, +X right, +Y down, +Z along the boresight.
//! - **IM**: image pixel coordinates, reached through the intrinsic matrix and a
//!   perspective divide.
//!
//! All angles are radians. Rotations are 3×3 matrices applied to column
//! vectors, composed right to left: `r_cam = R_sez_cam · R_ecef_sez · R_bcrf_ecef · r_bcrf`.

use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};

/// Unit (or radius-`r`) vector from longitude-like angle `theta` and
/// latitude-like angle `phi`, e.g. right ascension and declination.
pub fn spherical_to_cartesian(r: f64, theta: f64, phi: f64) -> Vector3<f64> {
    let (st, ct) = theta.sin_cos();
    let (sp, cp) = phi.sin_cos();
    Vector3::new(r * cp * ct, r * cp * st, r * sp)
}

/// Inverse of [`spherical_to_cartesian`]: returns `(r, theta, phi)` with
/// `theta` in `[0, 2π)`.
pub fn cartesian_to_spherical(v: &Vector3<f64>) -> (f64, f64, f64) {
    let r = v.norm();
    if r == 0.0 {
        return (0.0, 0.0, 0.0);
    }
    let theta = v.y.atan2(v.x).rem_euclid(std::f64::consts::TAU);
    let phi = (v.z / r).clamp(-1.0, 1.0).asin();
    (r, theta, phi)
}

/// Convert an azimuth measured east of south to the conventional east of north.
pub fn east_of_south_to_east_of_north(theta: f64) -> f64 {
    (std::f64::consts::PI - theta).rem_euclid(std::f64::consts::TAU)
}

/// BCRF → ECEF: rotation about +Z by the Greenwich Mean Sidereal Time.
pub fn bcrf_to_ecef(gmst: f64) -> Matrix3<f64> {
    let (s, c) = gmst.sin_cos();
    Matrix3::new(
        c, s, 0.0, //
        -s, c, 0.0, //
        0.0, 0.0, 1.0,
    )
}

/// ECEF → SEZ for a site at geodetic longitude `lon` (east positive) and latitude `lat`.
pub fn ecef_to_sez(lon: f64, lat: f64) -> Matrix3<f64> {
    let (slon, clon) = lon.sin_cos();
    let (slat, clat) = lat.sin_cos();
    Matrix3::new(
        slat * clon, slat * slon, -clat, //
        -slon, clon, 0.0, //
        clat * clon, clat * slon, slat,
    )
}

/// SEZ → CAM for a camera pointing at azimuth `az` (east of north) and
/// elevation `el`, rotated by `roll` about its boresight.
///
/// At zero roll, image +X points along increasing azimuth and image +Y points
/// away from the zenith.
pub fn sez_to_cam(az: f64, el: f64, roll: f64) -> Matrix3<f64> {
    let (saz, caz) = az.sin_cos();
    let (sel, cel) = el.sin_cos();

    // Boresight in SEZ; north is -S.
    let z = Vector3::new(-cel * caz, cel * saz, sel);
    let x = Vector3::new(saz, caz, 0.0);
    let y = z.cross(&x);

    let r0 = Matrix3::from_rows(&[x.transpose(), y.transpose(), z.transpose()]);
    let (sr, cr) = roll.sin_cos();
    let r_roll = Matrix3::new(
        cr, sr, 0.0, //
        -sr, cr, 0.0, //
        0.0, 0.0, 1.0,
    );
    r_roll * r0
}

/// Quaternion form of [`sez_to_cam`].
pub fn sez_to_cam_quaternion(az: f64, el: f64, roll: f64) -> UnitQuaternion<f64> {
    UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(sez_to_cam(
        az, el, roll,
    )))
}

/// Pointing `(az, el, roll)` of a SEZ → CAM orientation; inverse of [`sez_to_cam`].
pub fn cam_pointing(q_sez_cam: &UnitQuaternion<f64>) -> (f64, f64, f64) {
    let r = q_sez_cam.to_rotation_matrix();
    let m = r.matrix();
    // Third row is the boresight expressed in SEZ.
    let bz = Vector3::new(m[(2, 0)], m[(2, 1)], m[(2, 2)]);
    let el = bz.z.clamp(-1.0, 1.0).asin();
    let az = bz.y.atan2(-bz.x).rem_euclid(std::f64::consts::TAU);

    // Compare the actual x-axis with the zero-roll x-axis.
    let r0 = sez_to_cam(az, el, 0.0);
    let x0 = r0.row(0).transpose();
    let y0 = r0.row(1).transpose();
    let x = Vector3::new(m[(0, 0)], m[(0, 1)], m[(0, 2)]);
    let roll = x.dot(&y0).atan2(x.dot(&x0));
    (az, el, roll)
}

/// Pinhole intrinsic matrix from physical camera properties.
///
/// `focal_length`, `pixel_width` and `pixel_height` share a length unit
/// (e.g. mm); the principal point is placed at the image centre.
pub fn camera_intrinsic_matrix(
    focal_length: f64,
    pixel_width: f64,
    pixel_height: f64,
    image_width: u32,
    image_height: u32,
) -> Matrix3<f64> {
    Matrix3::new(
        focal_length / pixel_width, 0.0, image_width as f64 / 2.0, //
        0.0, focal_length / pixel_height, image_height as f64 / 2.0, //
        0.0, 0.0, 1.0,
    )
}

/// Project a camera-frame vector through an intrinsic matrix.
///
/// Returns `None` for vectors on or behind the image plane.
pub fn project(k: &Matrix3<f64>, r_cam: &Vector3<f64>) -> Option<(f64, f64)> {
    if r_cam.z <= 0.0 {
        return None;
    }
    let r_im = k * r_cam;
    Some((r_im.x / r_im.z, r_im.y / r_im.z))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

    fn assert_vec_close(a: &Vector3<f64>, b: &Vector3<f64>, tol: f64) {
        assert!((a - b).norm() < tol, "expected {:?}, got {:?}", b, a);
    }

    #[test]
    fn test_spherical_roundtrip() {
        let v = spherical_to_cartesian(2.0, 4.0, -0.3);
        let (r, theta, phi) = cartesian_to_spherical(&v);
        assert!((r - 2.0).abs() < 1e-12);
        assert!((theta - 4.0).abs() < 1e-12);
        assert!((phi + 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_rotations_are_orthonormal() {
        for m in [
            bcrf_to_ecef(1.3),
            ecef_to_sez(0.2, 0.9),
            sez_to_cam(2.0, 0.6, 0.4),
        ] {
            let err = (m.transpose() * m - Matrix3::identity()).norm();
            assert!(err < 1e-12, "not orthonormal: {:.3e}", err);
            assert!((m.determinant() - 1.0).abs() < 1e-12, "not proper");
        }
    }

    #[test]
    fn test_gmst_rotation() {
        // A star on the equator at RA = GMST transits the Greenwich meridian.
        let gmst = 1.1;
        let star = spherical_to_cartesian(1.0, gmst, 0.0);
        assert_vec_close(&(bcrf_to_ecef(gmst) * star), &Vector3::x(), 1e-12);
    }

    #[test]
    fn test_zenith_in_sez() {
        let (lon, lat) = (0.3, 0.8);
        let up = spherical_to_cartesian(1.0, lon, lat);
        assert_vec_close(&(ecef_to_sez(lon, lat) * up), &Vector3::z(), 1e-12);

        // Celestial pole lies due north at elevation = latitude.
        let pole = ecef_to_sez(lon, lat) * Vector3::z();
        assert_vec_close(&pole, &Vector3::new(-lat.cos(), 0.0, lat.sin()), 1e-12);
    }

    #[test]
    fn test_camera_boresight() {
        // Pointing due east, 45° up.
        let r = sez_to_cam(FRAC_PI_2, FRAC_PI_4, 0.3);
        let look = Vector3::new(0.0, FRAC_PI_4.cos(), FRAC_PI_4.sin());
        assert_vec_close(&(r * look), &Vector3::z(), 1e-12);

        // Zenith appears "up" (negative image y) at zero roll.
        let r = sez_to_cam(0.0, 0.2, 0.0);
        let zen = r * Vector3::z();
        assert!(zen.y < 0.0 && zen.x.abs() < 1e-12);
    }

    #[test]
    fn test_pointing_roundtrip() {
        let (az, el, roll) = (2.5, 0.7, -0.4);
        let q = sez_to_cam_quaternion(az, el, roll);
        let (az2, el2, roll2) = cam_pointing(&q);
        assert!((az - az2).abs() < 1e-10, "az {} vs {}", az, az2);
        assert!((el - el2).abs() < 1e-10, "el {} vs {}", el, el2);
        assert!((roll - roll2).abs() < 1e-10, "roll {} vs {}", roll, roll2);
    }

    #[test]
    fn test_intrinsic_projection() {
        let k = camera_intrinsic_matrix(6.0, 0.01, 0.01, 640, 480);
        let (i, j) = project(&k, &Vector3::new(0.0, 0.0, 1.0)).unwrap();
        assert_eq!((i, j), (320.0, 240.0));
        let (i, j) = project(&k, &Vector3::new(0.1, -0.05, 1.0)).unwrap();
        assert!((i - 380.0).abs() < 1e-9 && (j - 210.0).abs() < 1e-9);
        assert!(project(&k, &Vector3::new(0.0, 0.0, -1.0)).is_none());
    }
}
