use serde::{Deserialize, Serialize};

use crate::OriginError;

/// Borrowed diffraction frame of shape `(nx, ny)`.
///
/// Storage is row-major with `x` as the slow index: `data[x * ny + y]`.
#[derive(Clone, Copy, Debug)]
pub struct FrameView<'a> {
    pub nx: usize,
    pub ny: usize,
    pub data: &'a [f32], // len = nx*ny
}

/// Owned diffraction frame, same layout as [`FrameView`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub nx: usize,
    pub ny: usize,
    pub data: Vec<f32>,
}

impl<'a> FrameView<'a> {
    pub fn new(nx: usize, ny: usize, data: &'a [f32]) -> Result<Self, OriginError> {
        if nx == 0 || ny == 0 {
            return Err(OriginError::invalid(format!(
                "frame dimensions must be positive (nx={nx}, ny={ny})"
            )));
        }
        if data.len() != nx * ny {
            return Err(OriginError::invalid(format!(
                "frame buffer length {} does not match {nx}x{ny}",
                data.len()
            )));
        }
        Ok(Self { nx, ny, data })
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.nx, self.ny)
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[x * self.ny + y]
    }

    pub fn max(&self) -> f32 {
        self.data.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }

    /// Position of the first maximal pixel in storage order.
    pub fn argmax(&self) -> (usize, usize) {
        let idx = argmax_index(self.data);
        (idx / self.ny, idx % self.ny)
    }

    pub fn to_frame(&self) -> Frame {
        Frame {
            nx: self.nx,
            ny: self.ny,
            data: self.data.to_vec(),
        }
    }
}

impl Frame {
    pub fn new(nx: usize, ny: usize, data: Vec<f32>) -> Result<Self, OriginError> {
        FrameView::new(nx, ny, &data)?;
        Ok(Self { nx, ny, data })
    }

    pub fn zeros(nx: usize, ny: usize) -> Self {
        Self {
            nx,
            ny,
            data: vec![0.0; nx * ny],
        }
    }

    pub fn from_fn(nx: usize, ny: usize, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        let mut data = Vec::with_capacity(nx * ny);
        for x in 0..nx {
            for y in 0..ny {
                data.push(f(x, y));
            }
        }
        Self { nx, ny, data }
    }

    #[inline]
    pub fn view(&self) -> FrameView<'_> {
        FrameView {
            nx: self.nx,
            ny: self.ny,
            data: &self.data,
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[x * self.ny + y]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, v: f32) {
        self.data[x * self.ny + y] = v;
    }

    /// Point reflection through pixel `(0, 0)` on the periodic grid,
    /// `out(x, y) = in(-x mod nx, -y mod ny)`.
    ///
    /// This is the 180 degree rotation whose correlation with the original
    /// peaks at exactly `2c` for a pattern symmetric about `c`.
    pub fn point_reflection(&self) -> Frame {
        let (nx, ny) = (self.nx, self.ny);
        Frame::from_fn(nx, ny, |x, y| self.get((nx - x) % nx, (ny - y) % ny))
    }

    /// Swap half-spaces so the zero-frequency sample moves to the center.
    pub fn fftshift(&self) -> Frame {
        let (nx, ny) = (self.nx, self.ny);
        let (sx, sy) = (nx / 2, ny / 2);
        Frame::from_fn(nx, ny, |x, y| {
            self.get((x + nx - sx) % nx, (y + ny - sy) % ny)
        })
    }
}

pub(crate) fn argmax_index<T: PartialOrd + Copy>(data: &[T]) -> usize {
    let mut best = 0usize;
    for (i, v) in data.iter().enumerate() {
        if *v > data[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_buffer() {
        assert!(Frame::new(3, 4, vec![0.0; 11]).is_err());
        assert!(Frame::new(0, 4, Vec::new()).is_err());
    }

    #[test]
    fn point_reflection_fixes_origin() {
        let f = Frame::from_fn(3, 4, |x, y| (x * 10 + y) as f32);
        let r = f.point_reflection();
        assert_eq!(r.get(0, 0), f.get(0, 0));
        assert_eq!(r.get(1, 1), f.get(2, 3));
        assert_eq!(r.get(2, 0), f.get(1, 0));
        assert_eq!(r.point_reflection(), f);
    }

    #[test]
    fn fftshift_moves_origin_to_center() {
        let mut f = Frame::zeros(6, 5);
        f.set(0, 0, 1.0);
        let s = f.fftshift();
        assert_eq!(s.view().argmax(), (3, 2));
    }

    #[test]
    fn argmax_keeps_first_maximum() {
        let f = Frame::new(2, 2, vec![1.0, 3.0, 3.0, 0.0]).unwrap();
        assert_eq!(f.view().argmax(), (0, 1));
    }
}
