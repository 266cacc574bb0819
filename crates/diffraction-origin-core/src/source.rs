//! Scan frame sources.
//!
//! Raw-format readers live outside this workspace; they only need to
//! implement [`FrameSource`]. The in-memory scan and the block-averaging
//! adapter here cover the loading modes the batch driver distinguishes.

use std::borrow::Cow;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{Frame, OriginError, ScanShape};

/// Random access to the frames of a 4D scan, one frame at a time.
pub trait FrameSource {
    fn scan_shape(&self) -> ScanShape;

    /// Diffraction-space shape `(q_nx, q_ny)` of every frame.
    fn frame_shape(&self) -> (usize, usize);

    /// Frame at `(rx, ry)` in `x`-major layout.
    fn frame(&self, rx: usize, ry: usize) -> Result<Cow<'_, [f32]>, OriginError>;

    /// Per-pixel maximum over every readable frame of the scan.
    ///
    /// Frames the source cannot deliver are skipped with a warning; only a
    /// scan without any readable frame is an error.
    fn max_projection(&self) -> Result<Frame, OriginError> {
        let (q_nx, q_ny) = self.frame_shape();
        let mut out = vec![f32::NEG_INFINITY; q_nx * q_ny];
        let used = for_each_readable_frame(self, |frame| {
            for (o, &v) in out.iter_mut().zip(frame) {
                *o = o.max(v);
            }
        })?;
        debug!("max projection over {used} frames");
        Frame::new(q_nx, q_ny, out)
    }

    /// Per-pixel mean over every readable frame of the scan.
    fn mean_frame(&self) -> Result<Frame, OriginError> {
        let (q_nx, q_ny) = self.frame_shape();
        let mut acc = vec![0.0f64; q_nx * q_ny];
        let used = for_each_readable_frame(self, |frame| {
            for (a, &v) in acc.iter_mut().zip(frame) {
                *a += v as f64;
            }
        })?;
        debug!("mean frame over {used} frames");
        let n = used as f64;
        Frame::new(q_nx, q_ny, acc.into_iter().map(|v| (v / n) as f32).collect())
    }
}

/// Feed every frame of the correct length to `f`, returning how many were used.
fn for_each_readable_frame<S: FrameSource + ?Sized>(
    source: &S,
    mut f: impl FnMut(&[f32]),
) -> Result<usize, OriginError> {
    let shape = source.scan_shape();
    let (q_nx, q_ny) = source.frame_shape();
    let mut used = 0usize;
    for (rx, ry) in shape.positions() {
        match source.frame(rx, ry) {
            Ok(frame) if frame.len() == q_nx * q_ny => {
                f(&frame[..]);
                used += 1;
            }
            Ok(frame) => warn!(
                "frame ({rx}, {ry}) has {} samples, expected {}; skipped",
                frame.len(),
                q_nx * q_ny
            ),
            Err(e) => warn!("frame ({rx}, {ry}) unavailable: {e}; skipped"),
        }
    }
    if used == 0 {
        return Err(OriginError::EmptySelection("no readable frame in the scan"));
    }
    Ok(used)
}

/// Whole scan held in one contiguous buffer, `[rx][ry][qx][qy]`.
#[derive(Clone, Debug)]
pub struct InMemoryScan {
    shape: ScanShape,
    q_nx: usize,
    q_ny: usize,
    data: Vec<f32>,
}

impl InMemoryScan {
    pub fn new(
        shape: ScanShape,
        q_nx: usize,
        q_ny: usize,
        data: Vec<f32>,
    ) -> Result<Self, OriginError> {
        let expected = shape.len() * q_nx * q_ny;
        if q_nx == 0 || q_ny == 0 || data.len() != expected {
            return Err(OriginError::invalid(format!(
                "scan buffer length {} does not match {}x{}x{q_nx}x{q_ny}",
                data.len(),
                shape.r_nx,
                shape.r_ny
            )));
        }
        Ok(Self {
            shape,
            q_nx,
            q_ny,
            data,
        })
    }

    /// Build a scan by evaluating `f(rx, ry)` for every position.
    pub fn from_frames(
        shape: ScanShape,
        mut f: impl FnMut(usize, usize) -> Frame,
    ) -> Result<Self, OriginError> {
        let mut data = Vec::new();
        let mut q_shape = None;
        for (rx, ry) in shape.positions() {
            let frame = f(rx, ry);
            let expected = *q_shape.get_or_insert((frame.nx, frame.ny));
            OriginError::check_shape("frame", expected, (frame.nx, frame.ny))?;
            data.extend_from_slice(&frame.data);
        }
        let (q_nx, q_ny) =
            q_shape.ok_or_else(|| OriginError::invalid("scan must contain at least one frame"))?;
        Self::new(shape, q_nx, q_ny, data)
    }
}

impl FrameSource for InMemoryScan {
    fn scan_shape(&self) -> ScanShape {
        self.shape
    }

    fn frame_shape(&self) -> (usize, usize) {
        (self.q_nx, self.q_ny)
    }

    fn frame(&self, rx: usize, ry: usize) -> Result<Cow<'_, [f32]>, OriginError> {
        if rx >= self.shape.r_nx || ry >= self.shape.r_ny {
            return Err(OriginError::invalid(format!(
                "scan position ({rx}, {ry}) outside {}x{}",
                self.shape.r_nx, self.shape.r_ny
            )));
        }
        let n = self.q_nx * self.q_ny;
        let start = (rx * self.shape.r_ny + ry) * n;
        Ok(Cow::Borrowed(&self.data[start..start + n]))
    }
}

/// Block-averages every frame of `inner` by `factor` in diffraction space.
/// Trailing rows/columns that do not fill a block are dropped.
#[derive(Clone, Debug)]
pub struct BinnedSource<S> {
    inner: S,
    factor: usize,
}

impl<S: FrameSource> BinnedSource<S> {
    pub fn new(inner: S, factor: usize) -> Result<Self, OriginError> {
        let (q_nx, q_ny) = inner.frame_shape();
        if factor == 0 || factor > q_nx || factor > q_ny {
            return Err(OriginError::invalid(format!(
                "bin factor {factor} invalid for {q_nx}x{q_ny} frames"
            )));
        }
        Ok(Self { inner, factor })
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: FrameSource> FrameSource for BinnedSource<S> {
    fn scan_shape(&self) -> ScanShape {
        self.inner.scan_shape()
    }

    fn frame_shape(&self) -> (usize, usize) {
        let (q_nx, q_ny) = self.inner.frame_shape();
        (q_nx / self.factor, q_ny / self.factor)
    }

    fn frame(&self, rx: usize, ry: usize) -> Result<Cow<'_, [f32]>, OriginError> {
        let raw = self.inner.frame(rx, ry)?;
        let (_, q_ny) = self.inner.frame_shape();
        let (bx, by) = self.frame_shape();
        let b = self.factor;
        let norm = 1.0 / (b * b) as f32;
        let mut out = vec![0.0f32; bx * by];
        for x in 0..bx * b {
            let row = &raw[x * q_ny..x * q_ny + by * b];
            for (y, &v) in row.iter().enumerate() {
                out[(x / b) * by + y / b] += v * norm;
            }
        }
        Ok(Cow::Owned(out))
    }
}

/// How the caller's reader backs the scan.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Whole scan resident in memory.
    #[default]
    InMemory,
    /// Frames read lazily from a memory-mapped file.
    MemoryMapped,
}

/// Loading strategy requested for a scan.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct LoadOptions {
    #[serde(default)]
    pub mode: LoadMode,
    /// Diffraction-space block-averaging factor applied on load.
    #[serde(default)]
    pub bin_factor: Option<usize>,
}

impl LoadOptions {
    pub fn validate(&self) -> Result<(), OriginError> {
        match (self.mode, self.bin_factor) {
            (_, Some(0)) => Err(OriginError::invalid("bin factor must be positive")),
            (LoadMode::MemoryMapped, Some(b)) if b > 1 => {
                Err(OriginError::UnsupportedCombination(format!(
                    "memory-mapped loading cannot bin on load (bin factor {b})"
                )))
            }
            _ => Ok(()),
        }
    }

    /// Wrap a caller-provided source according to these options.
    pub fn open<S: FrameSource>(&self, source: S) -> Result<ScanSource<S>, OriginError> {
        self.validate()?;
        match self.bin_factor {
            Some(b) if b > 1 => {
                debug!("binning frames on load by {b}");
                Ok(ScanSource::Binned(BinnedSource::new(source, b)?))
            }
            _ => Ok(ScanSource::Direct(source)),
        }
    }
}

/// A source after [`LoadOptions::open`].
#[derive(Clone, Debug)]
pub enum ScanSource<S> {
    Direct(S),
    Binned(BinnedSource<S>),
}

impl<S: FrameSource> FrameSource for ScanSource<S> {
    fn scan_shape(&self) -> ScanShape {
        match self {
            Self::Direct(s) => s.scan_shape(),
            Self::Binned(s) => s.scan_shape(),
        }
    }

    fn frame_shape(&self) -> (usize, usize) {
        match self {
            Self::Direct(s) => s.frame_shape(),
            Self::Binned(s) => s.frame_shape(),
        }
    }

    fn frame(&self, rx: usize, ry: usize) -> Result<Cow<'_, [f32]>, OriginError> {
        match self {
            Self::Direct(s) => s.frame(rx, ry),
            Self::Binned(s) => s.frame(rx, ry),
        }
    }
}
