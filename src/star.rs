use rkyv::{Archive, Deserialize, Serialize};

use crate::coords::spherical_to_cartesian;

/// A reference star from a catalogue, in the BCRF.
/// The RA & Dec assume proper motion has already been applied to the observation epoch.
/// The magnitude is only used for the faint-star cut; lower is brighter.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct ReferenceStar {
    pub id: u64,
    pub ra_rad: f64,
    pub dec_rad: f64,
    pub mag: f64,
}

impl ReferenceStar {
    pub fn new(id: u64, ra_rad: f64, dec_rad: f64, mag: f64) -> Self {
        Self {
            id,
            ra_rad,
            dec_rad,
            mag,
        }
    }

    /// Construct from right ascension and declination in degrees.
    pub fn from_degrees(id: u64, ra_deg: f64, dec_deg: f64, mag: f64) -> Self {
        Self::new(id, ra_deg.to_radians(), dec_deg.to_radians(), mag)
    }

    /// Unit vector pointing to the star's position on the celestial sphere.
    pub fn uvec(&self) -> nalgebra::Vector3<f64> {
        spherical_to_cartesian(1.0, self.ra_rad, self.dec_rad)
    }

    /// True when the star is at least as bright as `limit`.
    pub fn brighter_than(&self, limit: f64) -> bool {
        self.mag <= limit
    }
}
