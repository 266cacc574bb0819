//! 2D FFT by row/column decomposition on top of `rustfft`.
//!
//! The column pass gathers each column into a scratch buffer, so frames
//! need not be square.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

pub type Complex64 = Complex<f64>;

/// Planned forward/inverse transforms for one `(nx, ny)` frame shape.
pub struct Fft2 {
    nx: usize,
    ny: usize,
    fwd_rows: Arc<dyn Fft<f64>>,
    inv_rows: Arc<dyn Fft<f64>>,
    fwd_cols: Arc<dyn Fft<f64>>,
    inv_cols: Arc<dyn Fft<f64>>,
}

impl std::fmt::Debug for Fft2 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fft2")
            .field("nx", &self.nx)
            .field("ny", &self.ny)
            .finish()
    }
}

impl Fft2 {
    pub fn new(nx: usize, ny: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            nx,
            ny,
            fwd_rows: planner.plan_fft_forward(ny),
            inv_rows: planner.plan_fft_inverse(ny),
            fwd_cols: planner.plan_fft_forward(nx),
            inv_cols: planner.plan_fft_inverse(nx),
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nx, self.ny)
    }

    /// Forward transform of a real frame given in `x`-major order.
    pub fn forward_real(&self, data: &[f32]) -> Vec<Complex64> {
        debug_assert_eq!(data.len(), self.nx * self.ny);
        let mut buf: Vec<Complex64> = data
            .iter()
            .map(|&v| Complex64::new(v as f64, 0.0))
            .collect();
        self.process(&mut buf, false);
        buf
    }

    /// Inverse transform, normalized by `1 / (nx * ny)`, real part only.
    pub fn inverse_real(&self, mut spectrum: Vec<Complex64>) -> Vec<f64> {
        debug_assert_eq!(spectrum.len(), self.nx * self.ny);
        self.process(&mut spectrum, true);
        let norm = 1.0 / (self.nx * self.ny) as f64;
        spectrum.into_iter().map(|c| c.re * norm).collect()
    }

    /// Circular cross-correlation `ifft(A * conj(B))` of two spectra.
    pub fn correlate(&self, a: &[Complex64], b: &[Complex64]) -> Vec<f64> {
        let product = a.iter().zip(b).map(|(&p, &q)| p * q.conj()).collect();
        self.inverse_real(product)
    }

    fn process(&self, buf: &mut [Complex64], inverse: bool) {
        let (nx, ny) = (self.nx, self.ny);
        let (rows, cols) = if inverse {
            (&self.inv_rows, &self.inv_cols)
        } else {
            (&self.fwd_rows, &self.fwd_cols)
        };

        for row in buf.chunks_exact_mut(ny) {
            rows.process(row);
        }

        let mut column = vec![Complex64::new(0.0, 0.0); nx];
        for y in 0..ny {
            for x in 0..nx {
                column[x] = buf[x * ny + y];
            }
            cols.process(&mut column);
            for x in 0..nx {
                buf[x * ny + y] = column[x];
            }
        }
    }
}
