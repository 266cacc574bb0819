//! Origin finders for scanning diffraction data.
//!
//! Four strategies locate the undiffracted beam in each diffraction frame:
//!
//! 1. [`DirectBeamFinder`]: smooth, take the brightest pixel, center of mass
//!    inside a disk around it. For data where the direct beam is visible.
//! 2. [`BrightestDiskFinder`]: cross-correlate with a probe kernel inside a
//!    gaussian window, optionally refined to sub-pixel precision.
//! 3. [`BeamstopFinder`]: correlate the masked frame with its own point
//!    reflection. Works when the direct beam is hidden behind a beamstop.
//! 4. [`origin_from_braggpeaks`]: accumulate detected Bragg peaks into a
//!    vector map and pick the peak nearest to its center at each position.
//!
//! The single-frame finders are driven over a whole scan by [`find_origins`].
//! Beamstop data can be refined further with [`resolve_beamstop_origin`],
//! which pairs Bragg peaks that are reflections of each other.
//!
//! ## Quickstart
//!
//! ```
//! use diffraction_origin_core::{Frame, InMemoryScan, ScanShape};
//! use diffraction_origin_finder::{find_origins, DirectBeamFinder};
//!
//! let frame = Frame::from_fn(32, 32, |x, y| {
//!     let (dx, dy) = (x as f32 - 15.0, y as f32 - 17.0);
//!     if dx * dx + dy * dy < 16.0 { 1.0 } else { 0.0 }
//! });
//! let scan = InMemoryScan::from_frames(ScanShape::new(2, 3), |_, _| frame.clone()).unwrap();
//!
//! let finder = DirectBeamFinder::new(4.0, 1.2);
//! let origins = find_origins(&scan, &finder, None).unwrap();
//! assert_eq!(origins.count_valid(), 6);
//! ```

mod batch;
mod bragg;
mod conjugate;
mod detector;
mod params;
mod probe;
mod single;

pub use batch::{
    find_origins, find_origins_beamstop, find_origins_brightest_disk,
    find_origins_brightest_disk_with, find_origins_direct_beam,
};
pub use bragg::{bragg_vector_map, origin_from_braggpeaks, BraggOrigins};
pub use conjugate::{pair_round, resolve_beamstop_origin};
pub use detector::{CorrelationMaxDetector, DiskDetector};
pub use params::{
    BrightestDiskParams, CenterGuess, ConjugatePairParams, DetectParams, DirectBeamParams,
    ProbeSizeParams, SubpixelMethod,
};
pub use probe::{estimate_probe, ProbeEstimate};
pub use single::{BeamstopFinder, BrightestDiskFinder, DirectBeamFinder};

use diffraction_origin_core::FrameView;
use nalgebra::Point2;

/// Origin estimate from a single diffraction frame.
///
/// `None` marks a per-frame failure (for example a frame without any
/// intensity); the batch driver records it as an invalid cell.
pub trait FrameOriginFinder {
    /// Frame shape this finder was prepared for, if it is tied to one.
    fn expected_frame_shape(&self) -> Option<(usize, usize)> {
        None
    }

    fn find_origin(&self, frame: &FrameView<'_>) -> Option<Point2<f64>>;
}
