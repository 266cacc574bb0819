//! Direct-beam radius and center from a threshold sweep.
//!
//! The central disk is much brighter than the rest of the pattern, so the
//! equivalent radius `sqrt(area / pi)` of `frame > t * max` barely changes
//! over a wide band of thresholds `t`. That plateau is located from the
//! derivative of the radius along the sweep.

use diffraction_origin_core::{center_of_mass, Field2, FrameView, OriginError};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::params::ProbeSizeParams;

/// Probe radius and center, in diffraction-space pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProbeEstimate {
    pub radius: f64,
    pub x0: f64,
    pub y0: f64,
}

pub fn estimate_probe(
    frame: &FrameView<'_>,
    params: &ProbeSizeParams,
) -> Result<ProbeEstimate, OriginError> {
    let n = params.n_thresholds;
    if n < 2 {
        return Err(OriginError::InvalidArgument(format!(
            "probe size sweep needs at least 2 thresholds, got {n}"
        )));
    }
    let (lo, hi) = (params.thresh_lower, params.thresh_upper);
    if !(0.0..=1.0).contains(&lo) || !(0.0..=1.0).contains(&hi) || lo >= hi {
        return Err(OriginError::InvalidArgument(format!(
            "probe size thresholds must satisfy 0 <= lower < upper <= 1 (got {lo}, {hi})"
        )));
    }

    if frame.data.is_empty() {
        return Err(OriginError::InvalidArgument(
            "probe size needs a non-empty frame".to_string(),
        ));
    }

    let max = frame.max() as f64;
    let thresholds: Vec<f64> = (0..n)
        .map(|i| lo + (hi - lo) * i as f64 / (n - 1) as f64)
        .collect();
    let radii: Vec<f64> = thresholds
        .iter()
        .map(|&t| {
            let cut = max * t;
            let area = frame.data.iter().filter(|&&v| v as f64 > cut).count();
            (area as f64 / std::f64::consts::PI).sqrt()
        })
        .collect();

    let slope = gradient(&radii);
    let floor = 2.0 * median(&slope);
    let selected: Vec<usize> = (0..n)
        .filter(|&i| slope[i] <= 0.0 && slope[i] >= floor)
        .collect();
    if selected.is_empty() {
        return Err(OriginError::EmptySelection(
            "no stable radius plateau in the probe threshold sweep",
        ));
    }

    let k = selected.len() as f64;
    let radius = selected.iter().map(|&i| radii[i]).sum::<f64>() / k;
    let thresh = selected.iter().map(|&i| thresholds[i]).sum::<f64>() / k;
    debug!(
        "probe plateau: {} of {n} thresholds, radius {radius:.3} px at t={thresh:.3}",
        selected.len()
    );

    let cut = max * thresh;
    let mask = Field2::from_fn(frame.nx, frame.ny, |x, y| frame.get(x, y) as f64 > cut);
    let center = center_of_mass(frame, Some(&mask))
        .ok_or(OriginError::EmptySelection("probe mask carries no intensity"))?;

    Ok(ProbeEstimate {
        radius,
        x0: center.x,
        y0: center.y,
    })
}

/// Second-order central differences inside, first-order at both ends.
fn gradient(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    (0..n)
        .map(|i| match i {
            0 => values[1] - values[0],
            i if i == n - 1 => values[n - 1] - values[n - 2],
            i => 0.5 * (values[i + 1] - values[i - 1]),
        })
        .collect()
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        0.5 * (sorted[n / 2 - 1] + sorted[n / 2])
    }
}
