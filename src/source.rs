//! A source: a star detection measured in an image.
//! Sources are paired with reference stars before calibration.

use nalgebra::Matrix2;

#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    /// Position in pixels along columns (image i-axis).
    /// Origin is the image corner; +i points right.
    pub x: f64,
    /// Position in pixels along rows (image j-axis).
    /// Origin is the image corner; +j points down.
    pub y: f64,
    /// Optional "brightness" value used for sorting (brighter = higher).
    /// The exact meaning is image-dependent.
    pub brightness: Option<f64>,
    /// Optional 2×2 covariance of the measured position, in pixels².
    pub cov: Option<Matrix2<f64>>,
}

impl Source {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            brightness: None,
            cov: None,
        }
    }

    pub fn with_brightness(mut self, brightness: f64) -> Self {
        self.brightness = Some(brightness);
        self
    }

    pub fn with_cov(mut self, cov: Matrix2<f64>) -> Self {
        self.cov = Some(cov);
        self
    }

    /// Squared pixel distance to `(i, j)`.
    pub fn dist_sq(&self, i: f64, j: f64) -> f64 {
        let di = self.x - i;
        let dj = self.y - j;
        di * di + dj * dj
    }
}
