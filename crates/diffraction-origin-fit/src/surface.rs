//! Robust least-squares fits of smooth surfaces to scan-shaped fields.
//!
//! Grid coordinates are normalized per axis to `[0, 1]`. Every model is
//! linear in its parameters, so each fit is an exact linear least-squares
//! solve by SVD.

use std::fmt;
use std::str::FromStr;

use diffraction_origin_core::{Field2, MaskedField, OriginError, OriginField};
use log::{debug, warn};
use nalgebra::{DMatrix, DVector, Point2};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

const SVD_EPS: f64 = 1e-12;

/// Surface family fitted to an origin coordinate field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SurfaceModel {
    /// `mx * x + my * y + b`
    #[default]
    Plane,
    /// `c0 + cx1 * x + cy1 * y + cx2 * x^2 + cy2 * y^2 + cxy * x * y`
    Parabola,
    /// Quadratic tensor-product Bernstein surface with 9 control values
    /// `c00 ..= c22`.
    BezierTwo,
}

impl SurfaceModel {
    pub const ALL: [SurfaceModel; 3] = [Self::Plane, Self::Parabola, Self::BezierTwo];

    pub fn name(self) -> &'static str {
        match self {
            Self::Plane => "plane",
            Self::Parabola => "parabola",
            Self::BezierTwo => "bezier_two",
        }
    }

    pub fn param_names(self) -> &'static [&'static str] {
        match self {
            Self::Plane => &["mx", "my", "b"],
            Self::Parabola => &["c0", "cx1", "cy1", "cx2", "cy2", "cxy"],
            Self::BezierTwo => &[
                "c00", "c01", "c02", "c10", "c11", "c12", "c20", "c21", "c22",
            ],
        }
    }

    pub fn n_params(self) -> usize {
        self.param_names().len()
    }

    /// Basis functions at `(x, y)`, in parameter order.
    pub fn basis(self, x: f64, y: f64) -> Vec<f64> {
        match self {
            Self::Plane => vec![x, y, 1.0],
            Self::Parabola => vec![1.0, x, y, x * x, y * y, x * y],
            Self::BezierTwo => {
                let bx = bernstein2(x);
                let by = bernstein2(y);
                let mut out = Vec::with_capacity(9);
                for b_i in bx {
                    for b_j in by {
                        out.push(b_i * b_j);
                    }
                }
                out
            }
        }
    }

    /// Model value at normalized `(x, y)`.
    pub fn evaluate(self, params: &[f64], x: f64, y: f64) -> f64 {
        self.basis(x, y)
            .iter()
            .zip(params)
            .map(|(b, p)| b * p)
            .sum()
    }
}

/// Quadratic Bernstein polynomials `(1-t)^2, 2(1-t)t, t^2`.
fn bernstein2(t: f64) -> [f64; 3] {
    let s = 1.0 - t;
    [s * s, 2.0 * s * t, t * t]
}

impl fmt::Display for SurfaceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SurfaceModel {
    type Err = OriginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or_else(|| OriginError::InvalidFitFunction(s.to_string()))
    }
}

impl TryFrom<String> for SurfaceModel {
    type Error = OriginError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<SurfaceModel> for String {
    fn from(m: SurfaceModel) -> Self {
        m.name().to_string()
    }
}

/// Iterative outlier rejection between refits.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobustParams {
    pub enabled: bool,
    /// Maximum number of refits after the initial fit.
    pub steps: usize,
    /// Rejection threshold in units of the inlier residual RMS.
    pub thresh: f64,
}

impl Default for RobustParams {
    fn default() -> Self {
        Self {
            enabled: false,
            steps: 3,
            thresh: 2.0,
        }
    }
}

impl RobustParams {
    pub fn robust() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }
}

/// Result of [`fit_surface`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SurfaceFit {
    pub model: SurfaceModel,
    pub params: Vec<f64>,
    /// Parameter covariance; zero when there are no spare degrees of freedom.
    pub covariance: DMatrix<f64>,
    /// Model evaluated over the whole grid.
    pub fitted: Field2<f64>,
    /// `measured - fitted`, valid where a measurement was used as input.
    pub residuals: MaskedField<f64>,
    /// Points that entered the final fit.
    pub inliers: Field2<bool>,
}

impl SurfaceFit {
    /// Model value at normalized `(x, y)`.
    pub fn evaluate(&self, x: f64, y: f64) -> f64 {
        self.model.evaluate(&self.params, x, y)
    }

    /// Root mean square of the residuals over the final inliers.
    pub fn inlier_rms(&self) -> f64 {
        let mut ss = 0.0;
        let mut n = 0usize;
        for ((x, y), r) in self.residuals.indexed() {
            if let (Some(r), true) = (r, *self.inliers.get(x, y)) {
                ss += r * r;
                n += 1;
            }
        }
        if n == 0 {
            0.0
        } else {
            (ss / n as f64).sqrt()
        }
    }
}

/// `linspace(0, 1, n)[i]`; a single sample sits at 0.
fn normalized(i: usize, n: usize) -> f64 {
    if n > 1 {
        i as f64 / (n - 1) as f64
    } else {
        0.0
    }
}

struct Sample {
    x: usize,
    y: usize,
    basis: Vec<f64>,
    value: f64,
}

fn solve(model: SurfaceModel, samples: &[&Sample]) -> Result<DVector<f64>, OriginError> {
    let p = model.n_params();
    let j = DMatrix::from_fn(samples.len(), p, |r, c| samples[r].basis[c]);
    let b = DVector::from_iterator(samples.len(), samples.iter().map(|s| s.value));
    j.svd(true, true)
        .solve(&b, SVD_EPS)
        .map_err(|e| OriginError::InvalidArgument(format!("{model} fit failed: {e}")))
}

fn predict(basis: &[f64], params: &DVector<f64>) -> f64 {
    basis.iter().zip(params.iter()).map(|(b, q)| b * q).sum()
}

fn covariance(model: SurfaceModel, samples: &[&Sample], params: &DVector<f64>) -> DMatrix<f64> {
    let p = model.n_params();
    let n = samples.len();
    if n <= p {
        return DMatrix::zeros(p, p);
    }
    let j = DMatrix::from_fn(n, p, |r, c| samples[r].basis[c]);
    let ssr: f64 = samples
        .iter()
        .map(|s| (s.value - predict(&s.basis, params)).powi(2))
        .sum();
    match (j.transpose() * &j).pseudo_inverse(SVD_EPS) {
        Ok(inv) => inv * (ssr / (n - p) as f64),
        Err(_) => DMatrix::zeros(p, p),
    }
}

/// Fit `model` to `field` where `mask` is `true` (everywhere when `None`).
///
/// Non-finite values are never used. With `robust.enabled`, every usable
/// point is re-tested after each fit: those whose residual exceeds
/// `robust.thresh` times the RMS over the current inliers form the next
/// inlier set, so a point rejected under an early, skewed fit can come back.
/// The model is refitted at most `robust.steps` times or until the inlier
/// set stops changing.
#[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all, fields(model = %model)))]
pub fn fit_surface(
    field: &Field2<f64>,
    model: SurfaceModel,
    mask: Option<&Field2<bool>>,
    robust: &RobustParams,
) -> Result<SurfaceFit, OriginError> {
    let (nx, ny) = field.shape();
    if let Some(m) = mask {
        OriginError::check_shape("fit mask", (nx, ny), m.shape())?;
    }
    if robust.enabled && (robust.thresh.is_nan() || robust.thresh <= 0.0) {
        return Err(OriginError::InvalidArgument(format!(
            "robust threshold must be positive, got {}",
            robust.thresh
        )));
    }

    let samples: Vec<Sample> = field
        .indexed()
        .filter(|&((x, y), v)| v.is_finite() && mask.is_none_or(|m| *m.get(x, y)))
        .map(|((x, y), &value)| Sample {
            x,
            y,
            basis: model.basis(normalized(x, nx), normalized(y, ny)),
            value,
        })
        .collect();
    let p = model.n_params();
    if samples.len() < p {
        return Err(OriginError::InvalidArgument(format!(
            "{model} fit needs at least {p} points, got {}",
            samples.len()
        )));
    }

    let mut inlier = vec![true; samples.len()];
    let mut used: Vec<&Sample> = samples.iter().collect();
    let mut params = solve(model, &used)?;

    if robust.enabled {
        for step in 0..robust.steps {
            let residual = |s: &Sample| s.value - predict(&s.basis, &params);
            let ss: f64 = used.iter().map(|s| residual(*s).powi(2)).sum();
            let rms = (ss / used.len() as f64).sqrt();
            // floor keeps round-off of an exact fit from rejecting points
            let scale = used.iter().fold(1.0f64, |m, s| m.max(s.value.abs()));
            let cut = (robust.thresh * rms).max(1e-9 * scale);
            let next: Vec<bool> = samples.iter().map(|s| residual(s).abs() <= cut).collect();
            if next == inlier {
                debug!("robust {model} fit converged after {step} refits");
                break;
            }
            let kept = next.iter().filter(|&&k| k).count();
            if kept < p {
                warn!("robust {model} fit would keep {kept} < {p} points; stopping early");
                break;
            }
            debug!(
                "robust {model} fit step {step}: rms {rms:.4e}, keeping {kept} of {}",
                samples.len()
            );
            inlier = next;
            used = samples
                .iter()
                .zip(&inlier)
                .filter_map(|(s, &k)| k.then_some(s))
                .collect();
            params = solve(model, &used)?;
        }
    }

    let covariance = covariance(model, &used, &params);
    let params: Vec<f64> = params.iter().copied().collect();
    let fitted = Field2::from_fn(nx, ny, |x, y| {
        model.evaluate(&params, normalized(x, nx), normalized(y, ny))
    });
    let mut residuals = MaskedField::invalid(nx, ny);
    let mut inliers = Field2::filled(nx, ny, false);
    for (s, &k) in samples.iter().zip(&inlier) {
        residuals.set(s.x, s.y, Some(s.value - fitted.get(s.x, s.y)));
        inliers.set(s.x, s.y, k);
    }

    Ok(SurfaceFit {
        model,
        params,
        covariance,
        fitted,
        residuals,
        inliers,
    })
}

/// Surface fits of both origin coordinates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OriginFit {
    pub x: SurfaceFit,
    pub y: SurfaceFit,
}

impl OriginFit {
    /// Fitted origin at scan position `(rx, ry)`.
    pub fn origin_at(&self, rx: usize, ry: usize) -> Point2<f64> {
        Point2::new(*self.x.fitted.get(rx, ry), *self.y.fitted.get(rx, ry))
    }

    /// Fitted origins as a fully valid field.
    pub fn to_origin_field(&self) -> OriginField {
        OriginField {
            qx0: self.x.fitted.map(|&v| Some(v)),
            qy0: self.y.fitted.map(|&v| Some(v)),
        }
    }
}

/// Fit `model` to both coordinate fields; `mask` is `true` where a
/// measurement is used.
pub fn fit_origin(
    qx0: &Field2<f64>,
    qy0: &Field2<f64>,
    model: SurfaceModel,
    mask: Option<&Field2<bool>>,
    robust: &RobustParams,
) -> Result<OriginFit, OriginError> {
    OriginError::check_shape("qy0", qx0.shape(), qy0.shape())?;
    Ok(OriginFit {
        x: fit_surface(qx0, model, mask, robust)?,
        y: fit_surface(qy0, model, mask, robust)?,
    })
}

/// [`fit_origin`] over a masked origin field; invalid cells are never used.
pub fn fit_origin_masked(
    origins: &OriginField,
    model: SurfaceModel,
    mask: Option<&Field2<bool>>,
    robust: &RobustParams,
) -> Result<OriginFit, OriginError> {
    let (nx, ny) = origins.shape();
    if let Some(m) = mask {
        OriginError::check_shape("fit mask", (nx, ny), m.shape())?;
    }
    let usable = Field2::from_fn(nx, ny, |x, y| {
        origins.get(x, y).is_some() && mask.is_none_or(|m| *m.get(x, y))
    });
    let qx0 = origins.qx0.map(|v| v.unwrap_or(0.0));
    let qy0 = origins.qy0.map(|v| v.unwrap_or(0.0));
    fit_origin(&qx0, &qy0, model, Some(&usable), robust)
}
