use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::frame::argmax_index;
use crate::OriginError;

/// Shape of the real-space scan grid.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ScanShape {
    pub r_nx: usize,
    pub r_ny: usize,
}

impl ScanShape {
    pub fn new(r_nx: usize, r_ny: usize) -> Self {
        Self { r_nx, r_ny }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.r_nx * self.r_ny
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn as_tuple(&self) -> (usize, usize) {
        (self.r_nx, self.r_ny)
    }

    /// Scan positions in row-major order (`rx` outer, `ry` inner).
    pub fn positions(&self) -> impl Iterator<Item = (usize, usize)> {
        let r_ny = self.r_ny;
        (0..self.r_nx).flat_map(move |rx| (0..r_ny).map(move |ry| (rx, ry)))
    }
}

/// Dense 2D array indexed `(x, y)` with `x` as the slow index.
///
/// Deserialization goes through [`Field2::new`], so a buffer whose length
/// does not match `nx * ny` is rejected.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "RawField2<T>",
    bound(deserialize = "T: Deserialize<'de>")
)]
pub struct Field2<T> {
    nx: usize,
    ny: usize,
    data: Vec<T>,
}

#[derive(Deserialize)]
struct RawField2<T> {
    nx: usize,
    ny: usize,
    data: Vec<T>,
}

impl<T> TryFrom<RawField2<T>> for Field2<T> {
    type Error = OriginError;

    fn try_from(raw: RawField2<T>) -> Result<Self, Self::Error> {
        Field2::new(raw.nx, raw.ny, raw.data)
    }
}

/// A field whose cells may be invalid; `None` never aliases a numeric value.
pub type MaskedField<T> = Field2<Option<T>>;

impl<T> Field2<T> {
    pub fn new(nx: usize, ny: usize, data: Vec<T>) -> Result<Self, OriginError> {
        if nx.checked_mul(ny) != Some(data.len()) {
            return Err(OriginError::invalid(format!(
                "field buffer length {} does not match {nx}x{ny}",
                data.len()
            )));
        }
        Ok(Self { nx, ny, data })
    }

    pub fn from_fn(nx: usize, ny: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(nx * ny);
        for x in 0..nx {
            for y in 0..ny {
                data.push(f(x, y));
            }
        }
        Self { nx, ny, data }
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.nx, self.ny)
    }

    #[inline]
    pub fn nx(&self) -> usize {
        self.nx
    }

    #[inline]
    pub fn ny(&self) -> usize {
        self.ny
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> &T {
        &self.data[x * self.ny + y]
    }

    #[inline]
    pub fn get_mut(&mut self, x: usize, y: usize) -> &mut T {
        &mut self.data[x * self.ny + y]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: T) {
        self.data[x * self.ny + y] = value;
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Cells with their coordinates, in storage order.
    pub fn indexed(&self) -> impl Iterator<Item = ((usize, usize), &T)> {
        let ny = self.ny;
        self.data
            .iter()
            .enumerate()
            .map(move |(i, v)| ((i / ny, i % ny), v))
    }

    pub fn map<U>(&self, f: impl FnMut(&T) -> U) -> Field2<U> {
        Field2 {
            nx: self.nx,
            ny: self.ny,
            data: self.data.iter().map(f).collect(),
        }
    }
}

impl<T: Clone> Field2<T> {
    pub fn filled(nx: usize, ny: usize, value: T) -> Self {
        Self {
            nx,
            ny,
            data: vec![value; nx * ny],
        }
    }
}

impl<T: PartialOrd + Copy> Field2<T> {
    /// Coordinates of the first maximal cell in storage order.
    pub fn argmax(&self) -> (usize, usize) {
        let idx = argmax_index(&self.data);
        (idx / self.ny, idx % self.ny)
    }
}

impl Field2<f64> {
    /// Add `value` at a sub-pixel location, split bilinearly over the four
    /// surrounding cells. Locations whose bracketing cells are not all inside
    /// the field are dropped entirely.
    pub fn splat_bilinear(&mut self, x: f64, y: f64, value: f64) {
        if !(x.is_finite() && y.is_finite()) {
            return;
        }
        let (x0, y0) = (x.floor(), y.floor());
        if x0 < 0.0 || y0 < 0.0 || x.ceil() >= self.nx as f64 || y.ceil() >= self.ny as f64 {
            return;
        }
        let fx = x - x0;
        let fy = y - y0;
        let (x0, y0) = (x0 as usize, y0 as usize);
        let taps = [
            (x0, y0, (1.0 - fx) * (1.0 - fy)),
            (x0 + 1, y0, fx * (1.0 - fy)),
            (x0, y0 + 1, (1.0 - fx) * fy),
            (x0 + 1, y0 + 1, fx * fy),
        ];
        for (xi, yi, w) in taps {
            // zero-weight taps of integer coordinates may sit one past the edge
            if w != 0.0 {
                self.data[xi * self.ny + yi] += w * value;
            }
        }
    }

    /// Intensity-weighted centroid, `None` when the total weight vanishes.
    pub fn center_of_mass(&self) -> Option<Point2<f64>> {
        let mut sum = 0.0;
        let mut sx = 0.0;
        let mut sy = 0.0;
        for ((x, y), &v) in self.indexed() {
            sum += v;
            sx += v * x as f64;
            sy += v * y as f64;
        }
        if sum == 0.0 || !sum.is_finite() {
            return None;
        }
        Some(Point2::new(sx / sum, sy / sum))
    }
}

impl<T> Field2<Option<T>> {
    pub fn invalid(nx: usize, ny: usize) -> Self {
        Self::from_fn(nx, ny, |_, _| None)
    }

    #[inline]
    pub fn is_valid(&self, x: usize, y: usize) -> bool {
        self.get(x, y).is_some()
    }

    pub fn count_valid(&self) -> usize {
        self.data.iter().filter(|v| v.is_some()).count()
    }

    /// Boolean validity grid (`true` where a value is present).
    pub fn validity(&self) -> Field2<bool> {
        self.map(|v| v.is_some())
    }
}

/// Per-position origin estimates, `qx0` and `qy0` always valid together.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OriginField {
    pub qx0: MaskedField<f64>,
    pub qy0: MaskedField<f64>,
}

impl OriginField {
    pub fn invalid(shape: ScanShape) -> Self {
        Self {
            qx0: Field2::invalid(shape.r_nx, shape.r_ny),
            qy0: Field2::invalid(shape.r_nx, shape.r_ny),
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.qx0.shape()
    }

    pub fn get(&self, rx: usize, ry: usize) -> Option<Point2<f64>> {
        match (self.qx0.get(rx, ry), self.qy0.get(rx, ry)) {
            (Some(x), Some(y)) => Some(Point2::new(*x, *y)),
            _ => None,
        }
    }

    pub fn set(&mut self, rx: usize, ry: usize, origin: Option<Point2<f64>>) {
        self.qx0.set(rx, ry, origin.map(|p| p.x));
        self.qy0.set(rx, ry, origin.map(|p| p.y));
    }

    pub fn count_valid(&self) -> usize {
        self.qx0.count_valid()
    }

    /// Mean of all valid origins.
    pub fn mean(&self) -> Option<Point2<f64>> {
        let (nx, ny) = self.shape();
        let mut n = 0usize;
        let mut acc = Point2::<f64>::origin();
        for rx in 0..nx {
            for ry in 0..ny {
                if let Some(p) = self.get(rx, ry) {
                    acc.x += p.x;
                    acc.y += p.y;
                    n += 1;
                }
            }
        }
        (n > 0).then(|| Point2::new(acc.x / n as f64, acc.y / n as f64))
    }
}
