//! Small image primitives shared by the origin finders.

use nalgebra::Point2;

use crate::{Field2, Frame, FrameView};

/// Kernel half-width in units of sigma.
const GAUSSIAN_TRUNCATE: f64 = 4.0;

/// Separable gaussian smoothing with half-sample symmetric ("reflect")
/// boundaries. `sigma <= 0` returns an unchanged copy.
pub fn gaussian_filter(src: &FrameView<'_>, sigma: f64) -> Frame {
    if sigma.is_nan() || sigma <= 0.0 {
        return src.to_frame();
    }
    let kernel = gaussian_kernel_1d(sigma);
    let radius = (kernel.len() / 2) as isize;
    let (nx, ny) = src.shape();

    // pass along y (contiguous)
    let mut tmp = vec![0.0f64; nx * ny];
    for x in 0..nx {
        let row = &src.data[x * ny..(x + 1) * ny];
        for y in 0..ny {
            let mut acc = 0.0;
            for (k, w) in kernel.iter().enumerate() {
                let j = reflect_index(y as isize + k as isize - radius, ny);
                acc += w * row[j] as f64;
            }
            tmp[x * ny + y] = acc;
        }
    }

    // pass along x
    let mut out = vec![0.0f32; nx * ny];
    for x in 0..nx {
        for y in 0..ny {
            let mut acc = 0.0;
            for (k, w) in kernel.iter().enumerate() {
                let i = reflect_index(x as isize + k as isize - radius, nx);
                acc += w * tmp[i * ny + y];
            }
            out[x * ny + y] = acc as f32;
        }
    }

    Frame { nx, ny, data: out }
}

/// Normalized 1D gaussian taps, `2 * round(4 sigma) + 1` long.
fn gaussian_kernel_1d(sigma: f64) -> Vec<f64> {
    let radius = (GAUSSIAN_TRUNCATE * sigma + 0.5) as isize;
    let s2 = sigma * sigma;
    let mut taps: Vec<f64> = (-radius..=radius)
        .map(|i| (-0.5 * (i * i) as f64 / s2).exp())
        .collect();
    let sum: f64 = taps.iter().sum();
    for t in &mut taps {
        *t /= sum;
    }
    taps
}

/// Mirror `i` into `[0, n)` as `d c b a | a b c d | d c b a`.
#[inline]
fn reflect_index(i: isize, n: usize) -> usize {
    let n = n as isize;
    let m = i.rem_euclid(2 * n);
    if m < n {
        m as usize
    } else {
        (2 * n - 1 - m) as usize
    }
}

/// Intensity-weighted centroid of a frame, optionally restricted to pixels
/// where `mask` is `true`. `None` when the total weight vanishes.
pub fn center_of_mass(src: &FrameView<'_>, mask: Option<&Field2<bool>>) -> Option<Point2<f64>> {
    let ny = src.ny;
    let mut sum = 0.0f64;
    let mut sx = 0.0f64;
    let mut sy = 0.0f64;
    for (i, &v) in src.data.iter().enumerate() {
        let (x, y) = (i / ny, i % ny);
        if let Some(m) = mask {
            if !*m.get(x, y) {
                continue;
            }
        }
        let v = v as f64;
        sum += v;
        sx += v * x as f64;
        sy += v * y as f64;
    }
    if sum == 0.0 || !sum.is_finite() {
        return None;
    }
    Some(Point2::new(sx / sum, sy / sum))
}

/// Boolean disk `hypot(x - cx, y - cy) < radius` of the given shape.
pub fn disk_mask(shape: (usize, usize), center: Point2<f64>, radius: f64) -> Field2<bool> {
    Field2::from_fn(shape.0, shape.1, |x, y| {
        (x as f64 - center.x).hypot(y as f64 - center.y) < radius
    })
}

/// Soft gaussian window `exp(-r^2 / (2 s^2))` centered on `center`.
pub fn gaussian_window(shape: (usize, usize), center: Point2<f64>, sigma: f64) -> Field2<f64> {
    let denom = -2.0 * sigma * sigma;
    Field2::from_fn(shape.0, shape.1, |x, y| {
        let dx = x as f64 - center.x;
        let dy = y as f64 - center.y;
        ((dx * dx + dy * dy) / denom).exp()
    })
}
