use diffraction_origin_core::{
    gaussian_window, Complex64, Fft2, Field2, Frame, FrameView, OriginError,
};
use log::debug;
use nalgebra::Point2;

use crate::detector::{CorrelationMaxDetector, DiskDetector};
use crate::params::{BrightestDiskParams, DetectParams, SubpixelMethod};
use crate::probe::estimate_probe;
use crate::FrameOriginFinder;

/// Brightest disk by cross-correlation with a probe kernel.
///
/// Every frame is multiplied by a gaussian window around the initial guess
/// (and by the optional detector mask) before correlating. The single
/// strongest correlation peak, refined as configured, is the origin.
pub struct BrightestDiskFinder<D = CorrelationMaxDetector> {
    fft: Fft2,
    kernel_fft: Vec<Complex64>,
    window: Vec<f32>,
    detect: DetectParams,
    detector: D,
}

impl BrightestDiskFinder<CorrelationMaxDetector> {
    /// Prepare the kernel spectrum and the window.
    ///
    /// `kernel` is the probe centered on pixel `(0, 0)`; it must have the
    /// frame shape, as must `detector_mask` when given.
    pub fn new(
        kernel: &FrameView<'_>,
        initial_guess: Point2<f64>,
        params: &BrightestDiskParams,
        detector_mask: Option<&Field2<f64>>,
    ) -> Result<Self, OriginError> {
        let shape = kernel.shape();
        if let Some(m) = detector_mask {
            OriginError::check_shape("detector mask", shape, m.shape())?;
        }

        let sigma = match params.probe_mask_size {
            Some(s) if s > 0.0 && s.is_finite() => s,
            Some(s) => {
                return Err(OriginError::InvalidArgument(format!(
                    "probe mask size must be positive, got {s}"
                )))
            }
            None => {
                let centered = kernel.to_frame().fftshift();
                2.0 * estimate_probe(&centered.view(), &params.probe)?.radius
            }
        };
        debug!(
            "gaussian window sigma {sigma:.3} px at ({:.2}, {:.2})",
            initial_guess.x, initial_guess.y
        );

        let mut window = gaussian_window(shape, initial_guess, sigma);
        if let Some(m) = detector_mask {
            window = Field2::from_fn(shape.0, shape.1, |x, y| window.get(x, y) * m.get(x, y));
        }

        let fft = Fft2::new(shape.0, shape.1);
        let kernel_fft = fft.forward_real(kernel.data);
        Ok(Self {
            fft,
            kernel_fft,
            window: window.as_slice().iter().map(|&w| w as f32).collect(),
            detect: DetectParams {
                max_num_peaks: 1,
                subpixel: params.subpixel,
            },
            detector: CorrelationMaxDetector,
        })
    }
}

impl<D: DiskDetector> BrightestDiskFinder<D> {
    /// Swap in another disk detector.
    pub fn with_detector<E: DiskDetector>(self, detector: E) -> BrightestDiskFinder<E> {
        BrightestDiskFinder {
            fft: self.fft,
            kernel_fft: self.kernel_fft,
            window: self.window,
            detect: self.detect,
            detector,
        }
    }
}

impl<D: DiskDetector> FrameOriginFinder for BrightestDiskFinder<D> {
    fn expected_frame_shape(&self) -> Option<(usize, usize)> {
        Some(self.fft.shape())
    }

    fn find_origin(&self, frame: &FrameView<'_>) -> Option<Point2<f64>> {
        if frame.shape() != self.fft.shape() {
            return None;
        }
        let windowed: Vec<f32> = frame
            .data
            .iter()
            .zip(&self.window)
            .map(|(&v, &w)| v * w)
            .collect();
        let view = FrameView {
            nx: frame.nx,
            ny: frame.ny,
            data: &windowed,
        };
        self.detector
            .detect_peaks(&view, &self.kernel_fft, &self.fft, &self.detect)
            .first()
            .map(|p| p.position())
    }
}

/// Strongest peak `detector` finds in an unwindowed frame, used as the
/// initial guess when none is given.
pub(crate) fn guess_from_frame<D: DiskDetector>(
    frame: &Frame,
    kernel: &FrameView<'_>,
    subpixel: SubpixelMethod,
    detector: &D,
) -> Result<Option<Point2<f64>>, OriginError> {
    OriginError::check_shape("probe kernel", (frame.nx, frame.ny), kernel.shape())?;
    let fft = Fft2::new(frame.nx, frame.ny);
    let kernel_fft = fft.forward_real(kernel.data);
    let detect = DetectParams {
        max_num_peaks: 1,
        subpixel,
    };
    Ok(detector
        .detect_peaks(&frame.view(), &kernel_fft, &fft, &detect)
        .first()
        .map(|p| p.position()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::disk_frame;
    use approx::assert_abs_diff_eq;
    use diffraction_origin_core::BraggPeak;

    /// Probe disk of radius `r` centered on pixel `(0, 0)` with wrap-around.
    fn corner_kernel(nx: usize, ny: usize, r: f64) -> Frame {
        disk_frame(nx, ny, (nx / 2) as f64, (ny / 2) as f64, r, 1.0).fftshift()
    }

    #[test]
    fn finds_bright_disk_near_guess() {
        let (nx, ny) = (48, 48);
        let kernel = corner_kernel(nx, ny, 4.0);
        let bright = disk_frame(nx, ny, 22.0, 25.0, 4.0, 5.0);
        let far = disk_frame(nx, ny, 6.0, 40.0, 4.0, 8.0);
        let frame = Frame::from_fn(nx, ny, |x, y| bright.get(x, y) + far.get(x, y));

        let params = BrightestDiskParams::default();
        let finder =
            BrightestDiskFinder::new(&kernel.view(), Point2::new(24.0, 24.0), &params, None)
                .unwrap();
        let p = finder.find_origin(&frame.view()).unwrap();
        assert_abs_diff_eq!(p.x, 22.0, epsilon = 1.0);
        assert_abs_diff_eq!(p.y, 25.0, epsilon = 1.0);
    }

    #[test]
    fn detector_mask_must_match_kernel() {
        let kernel = corner_kernel(16, 16, 3.0);
        let mask = Field2::filled(16, 12, 1.0);
        let params = BrightestDiskParams {
            probe_mask_size: Some(6.0),
            ..BrightestDiskParams::default()
        };
        let err = BrightestDiskFinder::new(
            &kernel.view(),
            Point2::new(8.0, 8.0),
            &params,
            Some(&mask),
        )
        .err()
        .unwrap();
        assert!(matches!(err, OriginError::ShapeMismatch { .. }));
    }

    struct FixedDetector;

    impl DiskDetector for FixedDetector {
        fn detect_peaks(
            &self,
            _frame: &FrameView<'_>,
            _kernel_fft: &[Complex64],
            _fft: &Fft2,
            _params: &DetectParams,
        ) -> Vec<BraggPeak> {
            vec![BraggPeak::new(3.5, 4.5, 1.0)]
        }
    }

    #[test]
    fn custom_detector_is_used() {
        let kernel = corner_kernel(16, 16, 3.0);
        let params = BrightestDiskParams {
            probe_mask_size: Some(6.0),
            ..BrightestDiskParams::default()
        };
        let finder = BrightestDiskFinder::new(&kernel.view(), Point2::new(8.0, 8.0), &params, None)
            .unwrap()
            .with_detector(FixedDetector);
        let frame = Frame::zeros(16, 16);
        assert_eq!(finder.find_origin(&frame.view()), Some(Point2::new(3.5, 4.5)));
        assert_eq!(finder.expected_frame_shape(), Some((16, 16)));
    }

    #[test]
    fn guess_from_mean_frame() {
        let kernel = corner_kernel(32, 32, 3.0);
        let frame = disk_frame(32, 32, 13.0, 18.0, 3.0, 1.0);
        let g = guess_from_frame(
            &frame,
            &kernel.view(),
            SubpixelMethod::None,
            &CorrelationMaxDetector,
        )
        .unwrap()
        .unwrap();
        assert_eq!(g, Point2::new(13.0, 18.0));

        let fixed = guess_from_frame(&frame, &kernel.view(), SubpixelMethod::None, &FixedDetector)
            .unwrap();
        assert_eq!(fixed, Some(Point2::new(3.5, 4.5)));
    }
}
