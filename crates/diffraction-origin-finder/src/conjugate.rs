//! Origin from conjugate Bragg peak pairs, for data behind a beamstop.
//!
//! Peaks inside an annulus around the current center are paired greedily
//! with the peak closest to their point reflection; the mean of the pair
//! midpoints is that position's center. Each round ends with a global
//! update of the center to the mean over all positions that found one.

use diffraction_origin_core::{OriginError, OriginField, PeakCollection};
use log::{debug, warn};
use nalgebra::Point2;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::params::ConjugatePairParams;

fn validate(params: &ConjugatePairParams) -> Result<(), OriginError> {
    let (inner, outer) = params.radii;
    if !(inner.is_finite() && outer.is_finite()) || inner > outer {
        return Err(OriginError::InvalidArgument(format!(
            "annulus radii must satisfy inner <= outer (got {inner}, {outer})"
        )));
    }
    if params.max_dist.is_nan() || params.max_dist < 0.0 {
        return Err(OriginError::InvalidArgument(format!(
            "max_dist must be non-negative, got {}",
            params.max_dist
        )));
    }
    if params.max_iter == 0 {
        return Err(OriginError::InvalidArgument(
            "max_iter must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// One pairing round about a fixed `center`.
///
/// Returns the per-position centers; positions without any pair are invalid.
/// A peak may pair with itself when it lies within `max_dist / 2` of
/// `center`. Ties go to the first peak in list order.
pub fn pair_round(peaks: &PeakCollection, center: Point2<f64>, max_dist: f64) -> OriginField {
    let mut out = OriginField::invalid(peaks.shape());
    let mut paired = Vec::new();
    for (rx, ry, list) in peaks.iter() {
        paired.clear();
        paired.resize(list.len(), false);
        let mut sum = Point2::<f64>::origin();
        let mut pairs = 0usize;

        for i in 0..list.len() {
            if paired[i] {
                continue;
            }
            let mirror = Point2::new(2.0 * center.x - list[i].qx, 2.0 * center.y - list[i].qy);
            let mut best: Option<(usize, f64)> = None;
            for (j, p) in list.iter().enumerate() {
                if paired[j] {
                    continue;
                }
                let d = p.distance_to(mirror);
                if best.is_none_or(|(_, b)| d < b) {
                    best = Some((j, d));
                }
            }
            if let Some((j, _)) = best.filter(|&(_, d)| d <= max_dist) {
                paired[i] = true;
                paired[j] = true;
                sum.x += 0.5 * (list[i].qx + list[j].qx);
                sum.y += 0.5 * (list[i].qy + list[j].qy);
                pairs += 1;
            }
        }

        if pairs > 0 {
            let n = pairs as f64;
            out.set(rx, ry, Some(Point2::new(sum.x / n, sum.y / n)));
        }
    }
    out
}

/// Per-position origins from conjugate pairs inside the annulus
/// `radii.0 <= |q - center_guess| <= radii.1`.
#[cfg_attr(
    feature = "tracing",
    instrument(
        level = "info",
        skip_all,
        fields(peaks = peaks.total_len(), rounds = params.max_iter)
    )
)]
pub fn resolve_beamstop_origin(
    peaks: &PeakCollection,
    params: &ConjugatePairParams,
) -> Result<OriginField, OriginError> {
    validate(params)?;
    let guess = params.center_guess;
    let (inner, outer) = params.radii;

    let mut annulus = peaks.clone();
    annulus.retain(|_, _, p| {
        let r = p.distance_to(guess);
        r >= inner && r <= outer
    });
    debug!(
        "annulus [{inner}, {outer}] keeps {} of {} peaks",
        annulus.total_len(),
        peaks.total_len()
    );

    let mut center = guess;
    let mut origins = OriginField::invalid(peaks.shape());
    for round in 0..params.max_iter {
        origins = pair_round(&annulus, center, params.max_dist);
        match origins.mean() {
            Some(mean) => {
                center = mean;
                debug!(
                    "round {round}: {} positions paired, center ({:.4}, {:.4})",
                    origins.count_valid(),
                    center.x,
                    center.y
                );
            }
            None => warn!(
                "round {round}: no conjugate pairs found; keeping center ({:.4}, {:.4})",
                center.x, center.y
            ),
        }
    }
    Ok(origins)
}
