//! Disk detection primitive used by the correlation finders.
//!
//! A full Bragg disk detector lives outside this workspace; it only has to
//! implement [`DiskDetector`]. [`CorrelationMaxDetector`] is the minimal
//! implementation: maxima of the circular cross-correlation with the probe
//! kernel, refined by one of the [`SubpixelMethod`]s.

use std::f64::consts::TAU;

use diffraction_origin_core::{BraggPeak, Complex64, Fft2, FrameView};

use crate::params::{DetectParams, SubpixelMethod};

/// Finds disk positions in a frame given the probe kernel spectrum.
pub trait DiskDetector {
    /// `kernel_fft` is the forward transform of the probe kernel, centered on
    /// pixel `(0, 0)`, computed with `fft`. Peaks come back brightest first.
    fn detect_peaks(
        &self,
        frame: &FrameView<'_>,
        kernel_fft: &[Complex64],
        fft: &Fft2,
        params: &DetectParams,
    ) -> Vec<BraggPeak>;
}

/// Local maxima of the cross-correlation, brightest first.
#[derive(Clone, Copy, Debug, Default)]
pub struct CorrelationMaxDetector;

impl DiskDetector for CorrelationMaxDetector {
    fn detect_peaks(
        &self,
        frame: &FrameView<'_>,
        kernel_fft: &[Complex64],
        fft: &Fft2,
        params: &DetectParams,
    ) -> Vec<BraggPeak> {
        if params.max_num_peaks == 0 || fft.shape() != frame.shape() {
            return Vec::new();
        }
        let (nx, ny) = frame.shape();
        let cross_power: Vec<Complex64> = fft
            .forward_real(frame.data)
            .iter()
            .zip(kernel_fft)
            .map(|(&a, &b)| a * b.conj())
            .collect();
        let corr = fft.inverse_real(cross_power.clone());
        if corr.iter().any(|v| !v.is_finite()) {
            return Vec::new();
        }

        let mut maxima = local_maxima(&corr, nx, ny);
        maxima.sort_by(|a, b| corr[b.0 * ny + b.1].total_cmp(&corr[a.0 * ny + a.1]));
        maxima.truncate(params.max_num_peaks);

        maxima
            .into_iter()
            .map(|(x, y)| {
                let intensity = corr[x * ny + y];
                let (qx, qy) = match params.subpixel {
                    SubpixelMethod::None => (x as f64, y as f64),
                    SubpixelMethod::Poly => parabolic_peak(&corr, nx, ny, x, y),
                    SubpixelMethod::Multicorr { upsample_factor } => {
                        let coarse = parabolic_peak(&corr, nx, ny, x, y);
                        upsampled_peak(&cross_power, nx, ny, coarse, upsample_factor.max(1))
                    }
                };
                BraggPeak::new(qx, qy, intensity)
            })
            .collect()
    }
}

/// Pixels not smaller than any of their 8 circular neighbours.
fn local_maxima(corr: &[f64], nx: usize, ny: usize) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    for x in 0..nx {
        for y in 0..ny {
            let v = corr[x * ny + y];
            let is_max = neighbours(x, y, nx, ny).all(|(i, j)| corr[i * ny + j] <= v);
            if is_max {
                out.push((x, y));
            }
        }
    }
    out
}

fn neighbours(
    x: usize,
    y: usize,
    nx: usize,
    ny: usize,
) -> impl Iterator<Item = (usize, usize)> {
    (-1isize..=1)
        .flat_map(|dx| (-1isize..=1).map(move |dy| (dx, dy)))
        .filter(|&(dx, dy)| dx != 0 || dy != 0)
        .map(move |(dx, dy)| {
            (
                (x as isize + dx).rem_euclid(nx as isize) as usize,
                (y as isize + dy).rem_euclid(ny as isize) as usize,
            )
        })
}

/// Vertex offset of the parabola through `(-1, l), (0, c), (1, r)`.
fn vertex_offset(l: f64, c: f64, r: f64) -> f64 {
    let denom = l - 2.0 * c + r;
    if denom >= 0.0 || !denom.is_finite() {
        return 0.0;
    }
    (0.5 * (l - r) / denom).clamp(-1.0, 1.0)
}

/// Separable parabolic refinement of the maximum at `(x, y)`.
fn parabolic_peak(corr: &[f64], nx: usize, ny: usize, x: usize, y: usize) -> (f64, f64) {
    let at = |i: usize, j: usize| corr[(i % nx) * ny + (j % ny)];
    let c = at(x, y);
    let dx = vertex_offset(at(x + nx - 1, y), c, at(x + 1, y));
    let dy = vertex_offset(at(x, y + ny - 1), c, at(x, y + 1));
    (x as f64 + dx, y as f64 + dy)
}

/// Signed frequency of DFT bin `k` out of `n`.
fn signed_freq(k: usize, n: usize) -> f64 {
    if k >= n.div_ceil(2) {
        k as f64 - n as f64
    } else {
        k as f64
    }
}

/// Refine `coarse` to `1 / upsample` pixel by evaluating the inverse DFT of
/// `cross_power` on a small grid around it.
///
/// The grid spans `ceil(1.5 * upsample)` samples per axis. It is evaluated
/// separably: first along `x` for every `ky`, then along `y`.
fn upsampled_peak(
    cross_power: &[Complex64],
    nx: usize,
    ny: usize,
    coarse: (f64, f64),
    upsample: usize,
) -> (f64, f64) {
    let u = upsample as f64;
    let step = 1.0 / u;
    let center = ((coarse.0 * u).round() / u, (coarse.1 * u).round() / u);
    let width = (1.5 * u).ceil() as usize;
    let half = (width / 2) as f64;
    let xs: Vec<f64> = (0..width).map(|s| center.0 + (s as f64 - half) * step).collect();
    let ys: Vec<f64> = (0..width).map(|t| center.1 + (t as f64 - half) * step).collect();

    // partial[s][ky] = sum_kx P[kx, ky] exp(2 pi i kx xs[s] / nx)
    let mut partial = vec![Complex64::new(0.0, 0.0); width * ny];
    for (s, &x) in xs.iter().enumerate() {
        for kx in 0..nx {
            let phase = Complex64::from_polar(1.0, TAU * signed_freq(kx, nx) * x / nx as f64);
            let row = &cross_power[kx * ny..(kx + 1) * ny];
            for (acc, &p) in partial[s * ny..(s + 1) * ny].iter_mut().zip(row) {
                *acc += p * phase;
            }
        }
    }

    let mut grid = vec![0.0f64; width * width];
    for s in 0..width {
        for (t, &y) in ys.iter().enumerate() {
            let mut acc = Complex64::new(0.0, 0.0);
            for ky in 0..ny {
                let phase = Complex64::from_polar(1.0, TAU * signed_freq(ky, ny) * y / ny as f64);
                acc += partial[s * ny + ky] * phase;
            }
            grid[s * width + t] = acc.re;
        }
    }

    let mut best = 0usize;
    for (i, v) in grid.iter().enumerate() {
        if *v > grid[best] {
            best = i;
        }
    }
    let (s, t) = (best / width, best % width);
    let at = |i: usize, j: usize| grid[i * width + j];
    let ds = if s > 0 && s + 1 < width {
        vertex_offset(at(s - 1, t), at(s, t), at(s + 1, t))
    } else {
        0.0
    };
    let dt = if t > 0 && t + 1 < width {
        vertex_offset(at(s, t - 1), at(s, t), at(s, t + 1))
    } else {
        0.0
    };
    let wrap = |v: f64, n: usize| v.rem_euclid(n as f64);
    (wrap(xs[s] + ds * step, nx), wrap(ys[t] + dt * step, ny))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use diffraction_origin_core::Frame;

    /// Smooth blob so the correlation maximum is well defined.
    fn gaussian_frame(nx: usize, ny: usize, cx: f64, cy: f64, s: f64) -> Frame {
        Frame::from_fn(nx, ny, |x, y| {
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            (-(dx * dx + dy * dy) / (2.0 * s * s)).exp() as f32
        })
    }

    /// Delta kernel at `(0, 0)`: correlation equals the frame itself.
    fn delta_kernel_fft(fft: &Fft2) -> Vec<Complex64> {
        let (nx, ny) = fft.shape();
        let mut k = Frame::zeros(nx, ny);
        k.set(0, 0, 1.0);
        fft.forward_real(&k.data)
    }

    #[test]
    fn integer_peak_without_refinement() {
        let frame = gaussian_frame(24, 20, 9.0, 13.0, 2.0);
        let fft = Fft2::new(24, 20);
        let peaks = CorrelationMaxDetector.detect_peaks(
            &frame.view(),
            &delta_kernel_fft(&fft),
            &fft,
            &DetectParams::default(),
        );
        assert_eq!(peaks.len(), 1);
        assert_abs_diff_eq!(peaks[0].qx, 9.0, epsilon = 1e-9);
        assert_abs_diff_eq!(peaks[0].qy, 13.0, epsilon = 1e-9);
    }

    #[test]
    fn poly_and_multicorr_refine_off_grid_peak() {
        let (cx, cy) = (10.3, 7.6);
        let frame = gaussian_frame(32, 24, cx, cy, 2.5);
        let fft = Fft2::new(32, 24);
        let kernel = delta_kernel_fft(&fft);

        let poly = DetectParams {
            max_num_peaks: 1,
            subpixel: SubpixelMethod::Poly,
        };
        let p = CorrelationMaxDetector.detect_peaks(&frame.view(), &kernel, &fft, &poly)[0];
        assert_abs_diff_eq!(p.qx, cx, epsilon = 0.1);
        assert_abs_diff_eq!(p.qy, cy, epsilon = 0.1);

        let multi = DetectParams {
            max_num_peaks: 1,
            subpixel: SubpixelMethod::Multicorr {
                upsample_factor: 16,
            },
        };
        let m = CorrelationMaxDetector.detect_peaks(&frame.view(), &kernel, &fft, &multi)[0];
        assert_abs_diff_eq!(m.qx, cx, epsilon = 0.05);
        assert_abs_diff_eq!(m.qy, cy, epsilon = 0.05);
    }

    #[test]
    fn returns_brightest_first() {
        let a = gaussian_frame(32, 32, 8.0, 8.0, 1.5);
        let b = gaussian_frame(32, 32, 22.0, 20.0, 1.5);
        let frame = Frame::from_fn(32, 32, |x, y| 0.5 * a.get(x, y) + b.get(x, y));
        let fft = Fft2::new(32, 32);
        let params = DetectParams {
            max_num_peaks: 2,
            subpixel: SubpixelMethod::None,
        };
        let peaks = CorrelationMaxDetector.detect_peaks(
            &frame.view(),
            &delta_kernel_fft(&fft),
            &fft,
            &params,
        );
        assert_eq!(peaks.len(), 2);
        assert_eq!((peaks[0].qx, peaks[0].qy), (22.0, 20.0));
        assert_eq!((peaks[1].qx, peaks[1].qy), (8.0, 8.0));
        assert!(peaks[0].intensity > peaks[1].intensity);
    }

    #[test]
    fn signed_frequencies_follow_fftfreq() {
        let f: Vec<f64> = (0..5).map(|k| signed_freq(k, 5)).collect();
        assert_eq!(f, vec![0.0, 1.0, 2.0, -2.0, -1.0]);
        let g: Vec<f64> = (0..4).map(|k| signed_freq(k, 4)).collect();
        assert_eq!(g, vec![0.0, 1.0, -2.0, -1.0]);
    }
}
