//! Run a single-frame finder over every position of a scan.

use diffraction_origin_core::{Field2, FrameSource, FrameView, OriginError, OriginField};
use log::{debug, info, warn};
use nalgebra::Point2;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::detector::{CorrelationMaxDetector, DiskDetector};
use crate::params::{BrightestDiskParams, DirectBeamParams};
use crate::probe::estimate_probe;
use crate::single::{guess_from_frame, BeamstopFinder, BrightestDiskFinder, DirectBeamFinder};
use crate::FrameOriginFinder;

/// Origins at every scan position, in row-major order.
///
/// `mask`, when given, must have the scan shape; positions where it is
/// `false` are skipped and stay invalid. A frame the source cannot deliver,
/// or on which the finder fails, also leaves its cell invalid.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip_all, fields(positions = source.scan_shape().len()))
)]
pub fn find_origins<S, F>(
    source: &S,
    finder: &F,
    mask: Option<&Field2<bool>>,
) -> Result<OriginField, OriginError>
where
    S: FrameSource + ?Sized,
    F: FrameOriginFinder + ?Sized,
{
    let shape = source.scan_shape();
    let (q_nx, q_ny) = source.frame_shape();
    if let Some(m) = mask {
        OriginError::check_shape("scan mask", shape.as_tuple(), m.shape())?;
    }
    if let Some(expected) = finder.expected_frame_shape() {
        OriginError::check_shape("frame", expected, (q_nx, q_ny))?;
    }

    let mut origins = OriginField::invalid(shape);
    let mut skipped = 0usize;
    for (rx, ry) in shape.positions() {
        if mask.is_some_and(|m| !*m.get(rx, ry)) {
            skipped += 1;
            continue;
        }
        let data = match source.frame(rx, ry) {
            Ok(data) => data,
            Err(e) => {
                warn!("frame ({rx}, {ry}) unavailable: {e}");
                continue;
            }
        };
        let view = match FrameView::new(q_nx, q_ny, &data) {
            Ok(view) => view,
            Err(e) => {
                warn!("frame ({rx}, {ry}) rejected: {e}");
                continue;
            }
        };
        origins.set(rx, ry, finder.find_origin(&view));
    }

    debug!(
        "origins found at {} of {} positions ({skipped} masked)",
        origins.count_valid(),
        shape.len()
    );
    Ok(origins)
}

/// Direct-beam origins for data without a beamstop.
///
/// The disk radius comes from `params.radius`, else from the probe size of
/// `reference`, else from the probe size of the maximum projection over the
/// whole scan.
#[cfg_attr(feature = "tracing", instrument(level = "info", skip_all))]
pub fn find_origins_direct_beam<S: FrameSource + ?Sized>(
    source: &S,
    params: &DirectBeamParams,
    reference: Option<&FrameView<'_>>,
    mask: Option<&Field2<bool>>,
) -> Result<OriginField, OriginError> {
    if params.rscale.is_nan() || params.rscale <= 0.0 {
        return Err(OriginError::InvalidArgument(format!(
            "rscale must be positive, got {}",
            params.rscale
        )));
    }
    let radius = match (params.radius, reference) {
        (Some(r), _) if r > 0.0 && r.is_finite() => r,
        (Some(r), _) => {
            return Err(OriginError::InvalidArgument(format!(
                "disk radius must be positive, got {r}"
            )))
        }
        (None, Some(frame)) => {
            OriginError::check_shape("reference frame", source.frame_shape(), frame.shape())?;
            estimate_probe(frame, &params.probe)?.radius
        }
        (None, None) => {
            info!("estimating the disk radius from the maximum projection over the scan");
            let projection = source.max_projection()?;
            estimate_probe(&projection.view(), &params.probe)?.radius
        }
    };
    debug!("direct beam radius {radius:.3} px, mask scale {}", params.rscale);

    find_origins(source, &DirectBeamFinder::new(radius, params.rscale), mask)
}

/// Brightest-disk origins by correlation with `kernel`, using
/// [`CorrelationMaxDetector`].
///
/// Without `params.initial_guess` the guess is the strongest correlation
/// peak of the scan-mean frame.
pub fn find_origins_brightest_disk<S: FrameSource + ?Sized>(
    source: &S,
    kernel: &FrameView<'_>,
    params: &BrightestDiskParams,
    detector_mask: Option<&Field2<f64>>,
    mask: Option<&Field2<bool>>,
) -> Result<OriginField, OriginError> {
    find_origins_brightest_disk_with(
        source,
        kernel,
        params,
        detector_mask,
        mask,
        CorrelationMaxDetector,
    )
}

/// [`find_origins_brightest_disk`] with a caller-supplied disk detector,
/// used both for the scan-mean guess and for every frame.
#[cfg_attr(feature = "tracing", instrument(level = "info", skip_all))]
pub fn find_origins_brightest_disk_with<S, D>(
    source: &S,
    kernel: &FrameView<'_>,
    params: &BrightestDiskParams,
    detector_mask: Option<&Field2<f64>>,
    mask: Option<&Field2<bool>>,
    detector: D,
) -> Result<OriginField, OriginError>
where
    S: FrameSource + ?Sized,
    D: DiskDetector,
{
    OriginError::check_shape("probe kernel", source.frame_shape(), kernel.shape())?;
    let guess: Point2<f64> = match params.initial_guess {
        Some(g) => g,
        None => {
            info!("deriving the initial guess from the scan-mean frame");
            let mean = source.mean_frame()?;
            guess_from_frame(&mean, kernel, params.subpixel, &detector)?.ok_or(
                OriginError::EmptySelection("no correlation peak in the scan-mean frame"),
            )?
        }
    };
    let finder =
        BrightestDiskFinder::new(kernel, guess, params, detector_mask)?.with_detector(detector);
    find_origins(source, &finder, mask)
}

/// Beamstop origins; `beamstop` is `true` where the detector is usable.
#[cfg_attr(feature = "tracing", instrument(level = "info", skip_all))]
pub fn find_origins_beamstop<S: FrameSource + ?Sized>(
    source: &S,
    beamstop: &Field2<bool>,
    mask: Option<&Field2<bool>>,
) -> Result<OriginField, OriginError> {
    OriginError::check_shape("beamstop mask", source.frame_shape(), beamstop.shape())?;
    find_origins(source, &BeamstopFinder::new(beamstop)?, mask)
}
