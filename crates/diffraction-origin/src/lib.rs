//! Diffraction origin calibration for 4D scanning diffraction data.
//!
//! This crate provides:
//! - stable re-exports of the workspace crates
//! - a JSON-backed [`OriginCalibConfig`]
//! - [`calibrate_origin`], which measures direct-beam origins over a scan,
//!   optionally flags outliers and fits a smooth origin surface
//!
//! ## Quickstart
//!
//! ```
//! use diffraction_origin::core::{Frame, InMemoryScan, ScanShape};
//! use diffraction_origin::{calibrate_origin, OriginCalibConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let scan = InMemoryScan::from_frames(ScanShape::new(4, 3), |rx, ry| {
//!     let (cx, cy) = (14.0 + rx as f32, 18.0 - ry as f32);
//!     Frame::from_fn(32, 32, |x, y| {
//!         let (dx, dy) = (x as f32 - cx, y as f32 - cy);
//!         if dx * dx + dy * dy < 16.0 { 1.0 } else { 0.0 }
//!     })
//! })?;
//!
//! let config = OriginCalibConfig::from_json_str(
//!     r#"{ "direct_beam": { "radius": 4.0, "rscale": 1.2 } }"#,
//! )?;
//! let calib = calibrate_origin(scan, &config, None)?;
//! let origin = calib.fit.origin_at(2, 1);
//! assert!((origin.x - 16.0).abs() < 1e-6 && (origin.y - 17.0).abs() < 1e-6);
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `diffraction_origin::core`: frames, scan fields, Bragg peaks, frame sources.
//! - `diffraction_origin::finder`: probe size, single-frame finders, batch
//!   driver, Bragg vector map and conjugate-pair resolver.
//! - `diffraction_origin::fit`: outlier scoring and surface fits.

pub use diffraction_origin_core as core;
pub use diffraction_origin_finder as finder;
pub use diffraction_origin_fit as fit;

mod config;
mod pipeline;

pub use config::{ConfigError, FitConfig, OriginCalibConfig, OutlierParams};
pub use pipeline::{calibrate_origin, OriginCalibration};

pub use diffraction_origin_core::{init_with_level, FrameSource, OriginError, OriginField};
pub use diffraction_origin_fit::{OriginFit, SurfaceModel};

/// Route `log` records into `tracing` and install the core subscriber.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool) {
    let _ = tracing_log::LogTracer::init();
    diffraction_origin_core::init_tracing(json);
}
