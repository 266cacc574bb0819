//! Arena-backed Bragg peak lists, one contiguous slice per scan position.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::{Field2, OriginError, ScanShape};

/// One detected Bragg peak in diffraction-space pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BraggPeak {
    pub qx: f64,
    pub qy: f64,
    pub intensity: f64,
}

impl BraggPeak {
    pub fn new(qx: f64, qy: f64, intensity: f64) -> Self {
        Self { qx, qy, intensity }
    }

    #[inline]
    pub fn position(&self) -> Point2<f64> {
        Point2::new(self.qx, self.qy)
    }

    #[inline]
    pub fn distance_to(&self, p: Point2<f64>) -> f64 {
        (self.qx - p.x).hypot(self.qy - p.y)
    }
}

/// Peak lists for every scan position.
///
/// All peaks live in one flat buffer; position `i` (row-major) owns
/// `peaks[offsets[i]..offsets[i + 1]]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPeakCollection")]
pub struct PeakCollection {
    shape: ScanShape,
    peaks: Vec<BraggPeak>,
    offsets: Vec<usize>,
}

#[derive(Deserialize)]
struct RawPeakCollection {
    shape: ScanShape,
    peaks: Vec<BraggPeak>,
    offsets: Vec<usize>,
}

impl TryFrom<RawPeakCollection> for PeakCollection {
    type Error = OriginError;

    /// Offsets must start at 0, never decrease, and end at the peak count,
    /// with one range per scan position.
    fn try_from(raw: RawPeakCollection) -> Result<Self, Self::Error> {
        let slots = raw.shape.r_nx.checked_mul(raw.shape.r_ny);
        let ranges_ok = raw.offsets.first() == Some(&0)
            && raw.offsets.last() == Some(&raw.peaks.len())
            && raw.offsets.windows(2).all(|w| w[0] <= w[1]);
        if slots.and_then(|n| n.checked_add(1)) != Some(raw.offsets.len()) || !ranges_ok {
            return Err(OriginError::invalid(format!(
                "peak offsets do not describe {} peaks over a {}x{} scan",
                raw.peaks.len(),
                raw.shape.r_nx,
                raw.shape.r_ny
            )));
        }
        Ok(Self {
            shape: raw.shape,
            peaks: raw.peaks,
            offsets: raw.offsets,
        })
    }
}

/// Origin subtracted by [`PeakCollection::centered`].
#[derive(Clone, Copy, Debug)]
pub enum CenterShift<'a> {
    Constant(Point2<f64>),
    PerPosition {
        qx0: &'a Field2<f64>,
        qy0: &'a Field2<f64>,
    },
}

impl PeakCollection {
    /// Empty lists at every position.
    pub fn empty(shape: ScanShape) -> Self {
        Self {
            shape,
            peaks: Vec::new(),
            offsets: vec![0; shape.len() + 1],
        }
    }

    /// Build from a callback producing each position's peaks, in row-major order.
    pub fn from_fn<I>(shape: ScanShape, mut f: impl FnMut(usize, usize) -> I) -> Self
    where
        I: IntoIterator<Item = BraggPeak>,
    {
        let mut peaks = Vec::new();
        let mut offsets = Vec::with_capacity(shape.len() + 1);
        offsets.push(0);
        for (rx, ry) in shape.positions() {
            peaks.extend(f(rx, ry));
            offsets.push(peaks.len());
        }
        Self {
            shape,
            peaks,
            offsets,
        }
    }

    /// Build from row-major per-position lists.
    pub fn from_lists(shape: ScanShape, lists: Vec<Vec<BraggPeak>>) -> Result<Self, OriginError> {
        if lists.len() != shape.len() {
            return Err(OriginError::invalid(format!(
                "expected {} peak lists, got {}",
                shape.len(),
                lists.len()
            )));
        }
        let mut lists = lists.into_iter();
        Ok(Self::from_fn(shape, |_, _| lists.next().unwrap_or_default()))
    }

    #[inline]
    pub fn shape(&self) -> ScanShape {
        self.shape
    }

    /// Total number of peaks over all positions.
    #[inline]
    pub fn total_len(&self) -> usize {
        self.peaks.len()
    }

    #[inline]
    fn slot(&self, rx: usize, ry: usize) -> usize {
        rx * self.shape.r_ny + ry
    }

    pub fn len_at(&self, rx: usize, ry: usize) -> usize {
        let i = self.slot(rx, ry);
        self.offsets[i + 1] - self.offsets[i]
    }

    pub fn peaks(&self, rx: usize, ry: usize) -> &[BraggPeak] {
        let i = self.slot(rx, ry);
        &self.peaks[self.offsets[i]..self.offsets[i + 1]]
    }

    pub fn peaks_mut(&mut self, rx: usize, ry: usize) -> &mut [BraggPeak] {
        let i = self.slot(rx, ry);
        let range = self.offsets[i]..self.offsets[i + 1];
        &mut self.peaks[range]
    }

    /// `(rx, ry, peaks)` for every position in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, &[BraggPeak])> {
        self.shape
            .positions()
            .map(move |(rx, ry)| (rx, ry, self.peaks(rx, ry)))
    }

    /// Keep only peaks for which `keep(rx, ry, peak)` holds, compacting the
    /// arena in place while preserving per-position order.
    pub fn retain(&mut self, mut keep: impl FnMut(usize, usize, &BraggPeak) -> bool) {
        let mut write = 0usize;
        let mut start = self.offsets[0];
        for (slot, (rx, ry)) in self.shape.positions().enumerate() {
            let end = self.offsets[slot + 1];
            for read in start..end {
                if keep(rx, ry, &self.peaks[read]) {
                    self.peaks[write] = self.peaks[read];
                    write += 1;
                }
            }
            start = end;
            self.offsets[slot + 1] = write;
        }
        self.peaks.truncate(write);
    }

    /// Copy with every peak shifted so the given origin becomes `(0, 0)`.
    pub fn centered(&self, shift: CenterShift<'_>) -> Result<Self, OriginError> {
        if let CenterShift::PerPosition { qx0, qy0 } = shift {
            OriginError::check_shape("qx0", self.shape.as_tuple(), qx0.shape())?;
            OriginError::check_shape("qy0", self.shape.as_tuple(), qy0.shape())?;
        }
        let mut out = self.clone();
        for (rx, ry) in self.shape.positions() {
            let origin = match shift {
                CenterShift::Constant(p) => p,
                CenterShift::PerPosition { qx0, qy0 } => {
                    Point2::new(*qx0.get(rx, ry), *qy0.get(rx, ry))
                }
            };
            for peak in out.peaks_mut(rx, ry) {
                peak.qx -= origin.x;
                peak.qy -= origin.y;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PeakCollection {
        PeakCollection::from_fn(ScanShape::new(2, 2), |rx, ry| {
            (0..(rx * 2 + ry)).map(move |k| BraggPeak::new(k as f64, (rx + ry) as f64, 1.0))
        })
    }

    #[test]
    fn per_position_slices_follow_offsets() {
        let c = sample();
        assert_eq!(c.len_at(0, 0), 0);
        assert_eq!(c.len_at(0, 1), 1);
        assert_eq!(c.len_at(1, 0), 2);
        assert_eq!(c.len_at(1, 1), 3);
        assert_eq!(c.total_len(), 6);
        assert_eq!(c.peaks(1, 1)[2].qx, 2.0);
    }

    #[test]
    fn deserialize_rejects_inconsistent_offsets() {
        let json = serde_json::to_string(&sample()).unwrap();
        let back: PeakCollection = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sample());

        let peak = r#"{"qx":1.0,"qy":2.0,"intensity":3.0}"#;
        let shape = r#""shape":{"r_nx":1,"r_ny":2}"#;
        for offsets in ["[0,1]", "[0,2,1]", "[1,1,1]", "[0,0,2]"] {
            let json = format!(r#"{{{shape},"peaks":[{peak}],"offsets":{offsets}}}"#);
            assert!(
                serde_json::from_str::<PeakCollection>(&json).is_err(),
                "offsets {offsets}"
            );
        }
        let ok = format!(r#"{{{shape},"peaks":[{peak}],"offsets":[0,0,1]}}"#);
        let c: PeakCollection = serde_json::from_str(&ok).unwrap();
        assert_eq!(c.len_at(0, 1), 1);
    }

    #[test]
    fn retain_compacts_in_place() {
        let mut c = sample();
        c.retain(|_, _, p| p.qx != 0.0);
        assert_eq!(c.len_at(0, 1), 0);
        assert_eq!(c.len_at(1, 0), 1);
        assert_eq!(c.len_at(1, 1), 2);
        assert_eq!(c.total_len(), 3);
        assert_eq!(c.peaks(1, 1)[0].qx, 1.0);
        assert_eq!(c.peaks(1, 1)[1].qx, 2.0);
    }

    #[test]
    fn centered_by_field_and_constant() {
        let c = sample();
        let qx0 = Field2::from_fn(2, 2, |rx, _| rx as f64);
        let qy0 = Field2::filled(2, 2, 1.0);
        let shifted = c
            .centered(CenterShift::PerPosition {
                qx0: &qx0,
                qy0: &qy0,
            })
            .unwrap();
        assert_eq!(shifted.peaks(1, 1)[0], BraggPeak::new(-1.0, 1.0, 1.0));

        let constant = c.centered(CenterShift::Constant(Point2::new(1.0, 2.0))).unwrap();
        assert_eq!(constant.peaks(0, 1)[0], BraggPeak::new(-1.0, -1.0, 1.0));

        let wrong = Field2::filled(3, 2, 0.0);
        assert!(c
            .centered(CenterShift::PerPosition {
                qx0: &wrong,
                qy0: &qy0,
            })
            .is_err());
    }

    #[test]
    fn from_lists_checks_count() {
        assert!(PeakCollection::from_lists(ScanShape::new(2, 2), vec![Vec::new()]).is_err());
    }
}
