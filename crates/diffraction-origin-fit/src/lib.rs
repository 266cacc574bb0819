//! Smoothing and validation of measured origin fields.
//!
//! - [`fit_surface`] fits a [`SurfaceModel`] to one scan-shaped field, with
//!   optional iterative outlier rejection.
//! - [`fit_origin`] and [`fit_origin_masked`] fit both origin coordinates.
//! - [`score_outliers`] flags positions whose shifts disagree with their
//!   neighbours, so they can be left out of the fit.

mod outliers;
mod surface;

pub use outliers::{score_outliers, OutlierScore};
pub use surface::{
    fit_origin, fit_origin_masked, fit_surface, OriginFit, RobustParams, SurfaceFit, SurfaceModel,
};
