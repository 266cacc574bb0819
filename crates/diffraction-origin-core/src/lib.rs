//! Core types and utilities for diffraction origin calibration.
//!
//! This crate is intentionally small: frames, scan-shaped fields, the
//! arena-backed Bragg peak collection and a handful of image primitives
//! (gaussian smoothing, center of mass, FFT correlation). It does *not*
//! read any raw data format; scans are consumed through [`FrameSource`].

mod error;
mod fft;
mod field;
mod filter;
mod frame;
mod logger;
mod peaks;
mod source;

pub use error::OriginError;
pub use fft::{Complex64, Fft2};
pub use field::{Field2, MaskedField, OriginField, ScanShape};
pub use filter::{center_of_mass, disk_mask, gaussian_filter, gaussian_window};
pub use frame::{Frame, FrameView};
pub use peaks::{BraggPeak, CenterShift, PeakCollection};
pub use source::{BinnedSource, FrameSource, InMemoryScan, LoadMode, LoadOptions, ScanSource};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
