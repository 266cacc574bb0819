//! Origins from detected Bragg peaks.
//!
//! The unscattered beam is the one peak every scan position shares, so it
//! dominates the vector map of all peaks. A center guess is taken from that
//! map, and at every position the peak nearest to the guess is the origin.

use diffraction_origin_core::{
    gaussian_filter, BraggPeak, Field2, Frame, OriginError, OriginField, PeakCollection,
};
use log::{debug, warn};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::params::CenterGuess;

/// Per-position origins and the vector map of the peaks chosen as origins.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BraggOrigins {
    pub origins: OriginField,
    /// Diagnostic map: only the selected peak of each valid position.
    pub origin_map: Field2<f64>,
}

/// Intensity of every peak, splatted bilinearly into a `q_shape` map.
pub fn bragg_vector_map(peaks: &PeakCollection, q_shape: (usize, usize)) -> Field2<f64> {
    let mut map = Field2::filled(q_shape.0, q_shape.1, 0.0);
    for (_, _, list) in peaks.iter() {
        for p in list {
            map.splat_bilinear(p.qx, p.qy, p.intensity);
        }
    }
    map
}

/// First peak with the smallest distance to `guess`.
fn nearest(list: &[BraggPeak], guess: Point2<f64>) -> Option<&BraggPeak> {
    let mut best: Option<(&BraggPeak, f64)> = None;
    for p in list {
        let d2 = (p.qx - guess.x).powi(2) + (p.qy - guess.y).powi(2);
        if best.is_none_or(|(_, b)| d2 < b) {
            best = Some((p, d2));
        }
    }
    best.map(|(p, _)| p)
}

fn refine_by_nearest(
    peaks: &PeakCollection,
    q_shape: (usize, usize),
    guess: Point2<f64>,
) -> Option<Point2<f64>> {
    let mut map = Field2::filled(q_shape.0, q_shape.1, 0.0);
    for (_, _, list) in peaks.iter() {
        if let Some(p) = nearest(list, guess) {
            map.splat_bilinear(p.qx, p.qy, p.intensity);
        }
    }
    map.center_of_mass()
}

fn initial_center(
    peaks: &PeakCollection,
    q_shape: (usize, usize),
    all_peaks: &Field2<f64>,
    guess: CenterGuess,
) -> Result<Option<Point2<f64>>, OriginError> {
    match guess {
        CenterGuess::CenterOfMass => Ok(all_peaks
            .center_of_mass()
            .and_then(|c| refine_by_nearest(peaks, q_shape, c))),
        CenterGuess::Max { sigma } => {
            if sigma.is_nan() || sigma < 0.0 {
                return Err(OriginError::InvalidArgument(format!(
                    "vector map smoothing sigma must be non-negative, got {sigma}"
                )));
            }
            if all_peaks.as_slice().iter().all(|&v| v == 0.0) {
                return Ok(None);
            }
            let frame = Frame {
                nx: q_shape.0,
                ny: q_shape.1,
                data: all_peaks.as_slice().iter().map(|&v| v as f32).collect(),
            };
            let (x, y) = gaussian_filter(&frame.view(), sigma).view().argmax();
            Ok(Some(Point2::new(x as f64, y as f64)))
        }
    }
}

/// Origins from the peak nearest to the vector map center at each position.
///
/// Peaks at positions where `mask` is `false` are ignored for every step, so
/// they never move the center of other positions; those positions and
/// positions without peaks are invalid. `all_peaks_map` may carry a
/// precomputed [`bragg_vector_map`] of shape `q_shape`; it is used as given.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip_all, fields(peaks = peaks.total_len()))
)]
pub fn origin_from_braggpeaks(
    peaks: &PeakCollection,
    q_shape: (usize, usize),
    guess: CenterGuess,
    all_peaks_map: Option<&Field2<f64>>,
    mask: Option<&Field2<bool>>,
) -> Result<BraggOrigins, OriginError> {
    if q_shape.0 == 0 || q_shape.1 == 0 {
        return Err(OriginError::InvalidArgument(format!(
            "diffraction shape must be positive, got {q_shape:?}"
        )));
    }
    let shape = peaks.shape();
    let masked;
    let peaks = match mask {
        Some(m) => {
            OriginError::check_shape("scan mask", shape.as_tuple(), m.shape())?;
            let mut kept = peaks.clone();
            kept.retain(|rx, ry, _| *m.get(rx, ry));
            masked = kept;
            &masked
        }
        None => peaks,
    };
    let computed;
    let all_peaks = match all_peaks_map {
        Some(map) => {
            OriginError::check_shape("bragg vector map", q_shape, map.shape())?;
            map
        }
        None => {
            computed = bragg_vector_map(peaks, q_shape);
            &computed
        }
    };

    let mut origins = OriginField::invalid(shape);
    let mut origin_map = Field2::filled(q_shape.0, q_shape.1, 0.0);
    let Some(center) = initial_center(peaks, q_shape, all_peaks, guess)? else {
        warn!("bragg vector map is empty; no origins found");
        return Ok(BraggOrigins {
            origins,
            origin_map,
        });
    };
    debug!("vector map center ({:.3}, {:.3})", center.x, center.y);

    for (rx, ry, list) in peaks.iter() {
        if let Some(p) = nearest(list, center) {
            origin_map.splat_bilinear(p.qx, p.qy, p.intensity);
            origins.set(rx, ry, Some(p.position()));
        }
    }
    debug!(
        "{} of {} positions carry an origin peak",
        origins.count_valid(),
        shape.len()
    );
    Ok(BraggOrigins {
        origins,
        origin_map,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use diffraction_origin_core::ScanShape;

    /// Center beam drifting with the scan plus two weaker reflections.
    fn drifting_peaks(shape: ScanShape) -> PeakCollection {
        PeakCollection::from_fn(shape, |rx, ry| {
            let cx = 30.0 + 0.2 * rx as f64;
            let cy = 34.0 - 0.1 * ry as f64;
            [
                BraggPeak::new(cx + 12.0, cy + 3.0, 2.0),
                BraggPeak::new(cx, cy, 10.0),
                BraggPeak::new(cx - 12.0, cy - 3.0, 2.0),
            ]
        })
    }

    #[test]
    fn nearest_prefers_first_on_ties() {
        let list = [BraggPeak::new(1.0, 0.0, 1.0), BraggPeak::new(-1.0, 0.0, 2.0)];
        let p = nearest(&list, Point2::origin()).unwrap();
        assert_eq!(p.intensity, 1.0);
        assert!(nearest(&[], Point2::origin()).is_none());
    }

    #[test]
    fn picks_center_beam_with_both_guesses() {
        let shape = ScanShape::new(4, 3);
        let peaks = drifting_peaks(shape);
        for guess in [CenterGuess::CenterOfMass, CenterGuess::Max { sigma: 2.0 }] {
            let out = origin_from_braggpeaks(&peaks, (64, 64), guess, None, None).unwrap();
            assert_eq!(out.origins.count_valid(), 12);
            for (rx, ry) in shape.positions() {
                let p = out.origins.get(rx, ry).unwrap();
                assert_abs_diff_eq!(p.x, 30.0 + 0.2 * rx as f64, epsilon = 1e-12);
                assert_abs_diff_eq!(p.y, 34.0 - 0.1 * ry as f64, epsilon = 1e-12);
            }
            let total: f64 = out.origin_map.as_slice().iter().sum();
            assert_abs_diff_eq!(total, 120.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn masked_and_empty_positions_are_invalid() {
        let shape = ScanShape::new(3, 3);
        let mut peaks = drifting_peaks(shape);
        peaks.retain(|rx, ry, _| (rx, ry) != (2, 2));
        let mask = Field2::from_fn(3, 3, |rx, ry| (rx, ry) != (0, 1));
        let out =
            origin_from_braggpeaks(&peaks, (64, 64), CenterGuess::default(), None, Some(&mask))
                .unwrap();
        assert!(out.origins.get(0, 1).is_none());
        assert!(out.origins.get(2, 2).is_none());
        assert_eq!(out.origins.count_valid(), 7);
    }

    #[test]
    fn masked_positions_do_not_move_the_center() {
        let shape = ScanShape::new(2, 2);
        let peaks = PeakCollection::from_fn(shape, |rx, _| {
            if rx == 0 {
                vec![BraggPeak::new(30.0, 34.0, 10.0), BraggPeak::new(44.0, 34.0, 2.0)]
            } else {
                vec![BraggPeak::new(46.0, 34.0, 1000.0)]
            }
        });
        let mask = Field2::from_fn(2, 2, |rx, _| rx == 0);
        for guess in [CenterGuess::CenterOfMass, CenterGuess::Max { sigma: 2.0 }] {
            let out = origin_from_braggpeaks(&peaks, (64, 64), guess, None, Some(&mask)).unwrap();
            assert_eq!(out.origins.count_valid(), 2);
            for ry in 0..2 {
                assert_eq!(out.origins.get(0, ry), Some(Point2::new(30.0, 34.0)));
                assert!(out.origins.get(1, ry).is_none());
            }
            let total: f64 = out.origin_map.as_slice().iter().sum();
            assert_abs_diff_eq!(total, 20.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn no_peaks_gives_all_invalid() {
        let peaks = PeakCollection::empty(ScanShape::new(2, 2));
        let out = origin_from_braggpeaks(&peaks, (16, 16), CenterGuess::default(), None, None)
            .unwrap();
        assert_eq!(out.origins.count_valid(), 0);
    }

    #[test]
    fn precomputed_map_shape_is_checked() {
        let peaks = drifting_peaks(ScanShape::new(2, 2));
        let map = Field2::filled(32, 64, 0.0);
        let err = origin_from_braggpeaks(&peaks, (64, 64), CenterGuess::default(), Some(&map), None)
            .unwrap_err();
        assert!(matches!(err, OriginError::ShapeMismatch { .. }));
    }
}
