use diffraction_origin_core::{Fft2, Field2, Frame, FrameView, OriginError};
use nalgebra::Point2;

use crate::FrameOriginFinder;

/// Origin from the point symmetry of a frame partly hidden by a beamstop.
///
/// The masked frame `F * M` is correlated with its 180 degree rotation,
/// taken as the point reflection through pixel `(0, 0)` on the periodic
/// grid (`out(x, y) = in(-x mod N, -y mod N)`, see
/// [`Frame::point_reflection`]), not as an end-to-end flip of the array.
/// For a pattern symmetric about `c` the correlation peaks at
/// `2c` modulo the frame size, which is unwrapped to
/// `c = (N + wrap(p)) / 2` per axis, with `wrap(p) = ((p + N/2) mod N) - N/2`.
/// The estimate therefore has half-pixel resolution and is unambiguous for
/// centers in `[N/4, 3N/4)`.
pub struct BeamstopFinder {
    mask: Vec<f32>,
    fft: Fft2,
}

impl BeamstopFinder {
    /// `mask` is `true` where the detector is usable and `false` under the
    /// beamstop; it fixes the frame shape.
    pub fn new(mask: &Field2<bool>) -> Result<Self, OriginError> {
        let (nx, ny) = mask.shape();
        if nx == 0 || ny == 0 {
            return Err(OriginError::InvalidArgument(
                "beamstop mask must not be empty".to_string(),
            ));
        }
        Ok(Self {
            mask: mask
                .as_slice()
                .iter()
                .map(|&m| if m { 1.0 } else { 0.0 })
                .collect(),
            fft: Fft2::new(nx, ny),
        })
    }
}

/// `((p + n/2) mod n) - n/2`
fn wrap(p: usize, n: usize) -> f64 {
    let half = n as f64 / 2.0;
    (p as f64 + half).rem_euclid(n as f64) - half
}

impl FrameOriginFinder for BeamstopFinder {
    fn expected_frame_shape(&self) -> Option<(usize, usize)> {
        Some(self.fft.shape())
    }

    fn find_origin(&self, frame: &FrameView<'_>) -> Option<Point2<f64>> {
        let (nx, ny) = self.fft.shape();
        if frame.shape() != (nx, ny) {
            return None;
        }
        let masked = Frame {
            nx,
            ny,
            data: frame
                .data
                .iter()
                .zip(&self.mask)
                .map(|(&v, &m)| v * m)
                .collect(),
        };
        let total: f64 = masked.data.iter().map(|&v| v as f64).sum();
        if total == 0.0 || !total.is_finite() {
            return None;
        }

        let reflected = masked.point_reflection();
        let corr = self.fft.correlate(
            &self.fft.forward_real(&masked.data),
            &self.fft.forward_real(&reflected.data),
        );
        let (xp, yp) = Field2::new(nx, ny, corr).ok()?.argmax();
        Some(Point2::new(
            (nx as f64 + wrap(xp, nx)) / 2.0,
            (ny as f64 + wrap(yp, ny)) / 2.0,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Gaussian spots at `c +- v` for each `v`, plus a bright center.
    fn symmetric_pattern(nx: usize, ny: usize, c: (f64, f64), offsets: &[(f64, f64)]) -> Frame {
        let spot = |x: f64, y: f64, px: f64, py: f64| {
            let d2 = (x - px).powi(2) + (y - py).powi(2);
            (-d2 / 2.0).exp()
        };
        Frame::from_fn(nx, ny, |x, y| {
            let (x, y) = (x as f64, y as f64);
            let mut v = 3.0 * spot(x, y, c.0, c.1);
            for &(ox, oy) in offsets {
                v += spot(x, y, c.0 + ox, c.1 + oy) + spot(x, y, c.0 - ox, c.1 - oy);
            }
            v as f32
        })
    }

    const SPOTS: [(f64, f64); 4] = [(8.0, 1.0), (-2.0, 9.0), (6.0, 7.0), (11.0, -5.0)];

    #[test]
    fn wrap_is_centered_on_zero() {
        assert_eq!(wrap(0, 10), 0.0);
        assert_eq!(wrap(4, 10), 4.0);
        assert_eq!(wrap(5, 10), -5.0);
        assert_eq!(wrap(9, 10), -1.0);
    }

    #[test]
    fn recovers_integer_and_half_pixel_centers() {
        let mask = Field2::filled(48, 44, true);
        let finder = BeamstopFinder::new(&mask).unwrap();
        for c in [(24.0, 22.0), (21.5, 25.0), (27.0, 19.5)] {
            let frame = symmetric_pattern(48, 44, c, &SPOTS);
            let p = finder.find_origin(&frame.view()).unwrap();
            assert_eq!((p.x, p.y), c);
        }
    }

    #[test]
    fn survives_a_beamstop_over_the_center() {
        let c = (23.0, 21.0);
        let frame = symmetric_pattern(48, 44, c, &SPOTS);
        // rectangular beamstop arm reaching the center from one edge
        let mask = Field2::from_fn(48, 44, |x, y| !(x <= 25 && (19..=23).contains(&y)));
        let finder = BeamstopFinder::new(&mask).unwrap();
        let p = finder.find_origin(&frame.view()).unwrap();
        assert_eq!((p.x, p.y), c);
    }

    #[test]
    fn blank_frame_has_no_origin() {
        let mask = Field2::filled(8, 8, true);
        let finder = BeamstopFinder::new(&mask).unwrap();
        assert!(finder.find_origin(&Frame::zeros(8, 8).view()).is_none());
    }
}
