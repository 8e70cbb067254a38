//! Correspondences between detected sources and reference stars.
//!
//! A calibration needs pairs of (measured image position, catalogue star).
//! This module holds the pair type, the visibility filter applied once before
//! a fit, and a nearest-neighbour matcher that builds pairs from a predicted
//! orientation.

use nalgebra::Matrix3;
use tracing::debug;

use crate::camera_model::CameraModel;
use crate::source::Source;
use crate::star::ReferenceStar;

/// One matched pair: where a star was measured, and which star it is.
#[derive(Debug, Clone, PartialEq)]
pub struct Correspondence {
    pub source: Source,
    pub star: ReferenceStar,
}

impl Correspondence {
    pub fn new(source: Source, star: ReferenceStar) -> Self {
        Self { source, star }
    }
}

/// Why a correspondence was left out of a fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclusion {
    /// Star magnitude above the faint limit.
    TooFaint,
    /// Star on or behind the camera's image plane.
    BehindCamera,
}

/// Outcome of [`partition_visible`].
#[derive(Debug, Clone, Default)]
pub struct Visibility {
    /// Indices of correspondences used in the fit, in input order.
    pub kept: Vec<usize>,
    /// Indices of excluded correspondences with the reason.
    pub excluded: Vec<(usize, Exclusion)>,
}

/// Split correspondences into those a fit can use and those it must skip.
///
/// `r_bcrf_cam` is the full BCRF → CAM rotation at the initial orientation.
/// A star is excluded if fainter than `faint_mag_limit` or if its camera-frame
/// depth is not positive.
pub fn partition_visible(
    correspondences: &[Correspondence],
    r_bcrf_cam: &Matrix3<f64>,
    faint_mag_limit: f64,
) -> Visibility {
    let mut vis = Visibility::default();
    for (idx, c) in correspondences.iter().enumerate() {
        if !c.star.brighter_than(faint_mag_limit) {
            vis.excluded.push((idx, Exclusion::TooFaint));
        } else if (r_bcrf_cam * c.star.uvec()).z <= 0.0 {
            vis.excluded.push((idx, Exclusion::BehindCamera));
        } else {
            vis.kept.push(idx);
        }
    }
    vis
}

/// Predicted pixel positions `(star index, i, j)` of the reference stars that
/// land on the detector and are at least as bright as `faint_mag_limit`.
pub fn project_reference_stars(
    stars: &[ReferenceStar],
    camera: &CameraModel,
    r_bcrf_cam: &Matrix3<f64>,
    faint_mag_limit: f64,
) -> Vec<(usize, f64, f64)> {
    stars
        .iter()
        .enumerate()
        .filter(|(_, s)| s.brighter_than(faint_mag_limit))
        .filter_map(|(idx, s)| {
            camera
                .project(&(r_bcrf_cam * s.uvec()))
                .filter(|&(i, j)| camera.contains(i, j))
                .map(|(i, j)| (idx, i, j))
        })
        .collect()
}

/// Pair sources with reference stars by predicted pixel position.
///
/// Every star is projected with `camera` and `r_bcrf_cam`; candidate pairs
/// within `radius_px` are assigned greedily, closest first, each source and
/// each star used at most once. Only the `max_sources` brightest sources are
/// considered when brightness is available (input order otherwise).
pub fn match_stars(
    sources: &[Source],
    stars: &[ReferenceStar],
    camera: &CameraModel,
    r_bcrf_cam: &Matrix3<f64>,
    radius_px: f64,
    max_sources: usize,
) -> Vec<Correspondence> {
    let radius_sq = radius_px * radius_px;

    let mut order: Vec<usize> = (0..sources.len()).collect();
    order.sort_by(|&a, &b| {
        let ba = sources[a].brightness.unwrap_or(f64::NEG_INFINITY);
        let bb = sources[b].brightness.unwrap_or(f64::NEG_INFINITY);
        bb.partial_cmp(&ba).unwrap_or(std::cmp::Ordering::Equal)
    });
    order.truncate(max_sources);

    let predicted = project_reference_stars(stars, camera, r_bcrf_cam, f64::INFINITY);

    // Collect all candidate pairs within radius
    let mut candidates: Vec<(f64, usize, usize)> = Vec::new(); // (dist_sq, src_idx, star_idx)
    for &src_idx in &order {
        for &(star_idx, pi, pj) in &predicted {
            let d2 = sources[src_idx].dist_sq(pi, pj);
            if d2 <= radius_sq {
                candidates.push((d2, src_idx, star_idx));
            }
        }
    }

    // Sort by distance (closest first)
    candidates.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    // Greedy unique 1-to-1 assignment
    let mut used_src = vec![false; sources.len()];
    let mut used_star = vec![false; stars.len()];
    let mut matches = Vec::new();
    for &(_, src_idx, star_idx) in &candidates {
        if !used_src[src_idx] && !used_star[star_idx] {
            used_src[src_idx] = true;
            used_star[star_idx] = true;
            matches.push(Correspondence::new(
                sources[src_idx].clone(),
                stars[star_idx].clone(),
            ));
        }
    }

    debug!(
        "Matched {} of {} sources against {} projected stars",
        matches.len(),
        order.len(),
        predicted.len()
    );
    matches
}
