//! Reference star catalogues.
//!
//! Only a simple text format is supported: one star per line with right
//! ascension, declination (degrees) and magnitude. See [`reference`].

pub mod reference;

pub use reference::{load_reference_stars, load_reference_stars_from_file};
