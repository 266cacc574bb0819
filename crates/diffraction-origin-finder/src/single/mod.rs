//! Finders that work on one diffraction frame at a time.

mod beamstop;
mod correlation;
mod direct;

pub use beamstop::BeamstopFinder;
pub(crate) use correlation::guess_from_frame;
pub use correlation::BrightestDiskFinder;
pub use direct::DirectBeamFinder;
