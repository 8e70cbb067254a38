//! Plain-text reference star lists.
//!
//! One star per line, fields separated by whitespace and/or commas:
//!
//! ```text
//! # [id] ra_deg dec_deg mag
//! 32349  101.2872  -16.7161  -1.46
//! 279.2347, 38.7837, 0.03
//! ```
//!
//! With three fields the id is the 1-based line number. Blank lines and
//! everything after `#` are ignored; malformed lines are skipped with a warning.

use anyhow::Context;
use tracing::{info, warn};

use crate::star::ReferenceStar;

/// Parse a single line. `Ok(None)` for blank and comment lines.
fn parse_line(line: &str, line_no: usize) -> Result<Option<ReferenceStar>, String> {
    let content = line.split('#').next().unwrap_or("").trim();
    if content.is_empty() {
        return Ok(None);
    }

    let fields: Vec<&str> = content
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|f| !f.is_empty())
        .collect();

    let parse = |s: &str| -> Result<f64, String> {
        s.parse::<f64>()
            .map_err(|e| format!("invalid number {:?}: {}", s, e))
    };

    let (id, rest) = match fields.len() {
        3 => (line_no as u64, &fields[..]),
        4 => (
            fields[0]
                .parse::<u64>()
                .map_err(|e| format!("invalid id {:?}: {}", fields[0], e))?,
            &fields[1..],
        ),
        n => return Err(format!("expected 3 or 4 fields, found {}", n)),
    };

    let ra_deg = parse(rest[0])?;
    let dec_deg = parse(rest[1])?;
    let mag = parse(rest[2])?;
    if !(-90.0..=90.0).contains(&dec_deg) {
        return Err(format!("declination {} outside [-90, 90]", dec_deg));
    }

    Ok(Some(ReferenceStar::from_degrees(
        id,
        ra_deg.rem_euclid(360.0),
        dec_deg,
        mag,
    )))
}

/// Load reference stars from an in-memory string.
pub fn load_reference_stars(data: &str) -> Vec<ReferenceStar> {
    let mut stars = Vec::new();
    for (idx, line) in data.lines().enumerate() {
        match parse_line(line, idx + 1) {
            Ok(Some(star)) => stars.push(star),
            Ok(None) => {}
            Err(e) => warn!("Skipping reference star line {}: {}", idx + 1, e),
        }
    }
    stars
}

pub fn load_reference_stars_from_file<P: AsRef<std::path::Path>>(
    path: P,
) -> anyhow::Result<Vec<ReferenceStar>> {
    let path = path.as_ref();
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("reading reference stars from {}", path.display()))?;
    let stars = load_reference_stars(&data);
    info!("Loaded {} reference stars from {}", stars.len(), path.display());
    Ok(stars)
}
