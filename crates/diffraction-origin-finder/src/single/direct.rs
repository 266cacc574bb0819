use diffraction_origin_core::{center_of_mass, disk_mask, gaussian_filter, FrameView};
use nalgebra::Point2;

use crate::FrameOriginFinder;

/// Center of mass of the brightest disk, for data without a beamstop.
///
/// The frame is smoothed with a gaussian of sigma `radius`, the brightest
/// smoothed pixel is taken as a coarse center, and the center of mass is
/// computed inside `hypot(dx, dy) < radius * rscale` around it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DirectBeamFinder {
    pub radius: f64,
    pub rscale: f64,
}

impl DirectBeamFinder {
    pub fn new(radius: f64, rscale: f64) -> Self {
        Self { radius, rscale }
    }
}

impl FrameOriginFinder for DirectBeamFinder {
    fn find_origin(&self, frame: &FrameView<'_>) -> Option<Point2<f64>> {
        let smoothed = gaussian_filter(frame, self.radius);
        let (x, y) = smoothed.view().argmax();
        let coarse = Point2::new(x as f64, y as f64);
        let mask = disk_mask(frame.shape(), coarse, self.radius * self.rscale);
        center_of_mass(frame, Some(&mask))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{disk_frame, hash_noise};
    use approx::assert_abs_diff_eq;
    use diffraction_origin_core::Frame;

    #[test]
    fn recovers_disk_centroid_under_noise() {
        let disk = disk_frame(48, 40, 20.4, 18.7, 5.0, 10.0);
        let frame = Frame::from_fn(48, 40, |x, y| {
            disk.get(x, y) + 0.1 * (1.0 + hash_noise(x, y))
        });
        let p = DirectBeamFinder::new(5.0, 1.2)
            .find_origin(&frame.view())
            .unwrap();
        assert_abs_diff_eq!(p.x, 20.4, epsilon = 0.25);
        assert_abs_diff_eq!(p.y, 18.7, epsilon = 0.25);
    }

    #[test]
    fn ignores_dimmer_disks_outside_the_mask() {
        let main = disk_frame(64, 64, 30.0, 34.0, 4.0, 10.0);
        let side = disk_frame(64, 64, 50.0, 12.0, 4.0, 3.0);
        let frame = Frame::from_fn(64, 64, |x, y| main.get(x, y) + side.get(x, y));
        let p = DirectBeamFinder::new(4.0, 1.2)
            .find_origin(&frame.view())
            .unwrap();
        assert_abs_diff_eq!(p.x, 30.0, epsilon = 1e-9);
        assert_abs_diff_eq!(p.y, 34.0, epsilon = 1e-9);
    }

    #[test]
    fn empty_frame_has_no_origin() {
        let frame = Frame::zeros(16, 16);
        assert!(DirectBeamFinder::new(3.0, 1.2)
            .find_origin(&frame.view())
            .is_none());
    }
}
