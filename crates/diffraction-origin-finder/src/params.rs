use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Threshold sweep used by the probe size estimator.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProbeSizeParams {
    /// Lowest threshold, as a fraction of the frame maximum.
    pub thresh_lower: f64,
    /// Highest threshold, as a fraction of the frame maximum.
    pub thresh_upper: f64,
    /// Number of thresholds in the sweep.
    pub n_thresholds: usize,
}

impl Default for ProbeSizeParams {
    fn default() -> Self {
        Self {
            thresh_lower: 0.01,
            thresh_upper: 0.99,
            n_thresholds: 100,
        }
    }
}

/// Direct-beam masking, for data without a beamstop.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DirectBeamParams {
    /// Central disk radius in pixels; estimated from the scan when `None`.
    #[serde(default)]
    pub radius: Option<f64>,
    /// Mask radius relative to `radius`.
    #[serde(default = "default_rscale")]
    pub rscale: f64,
    #[serde(default)]
    pub probe: ProbeSizeParams,
}

impl Default for DirectBeamParams {
    fn default() -> Self {
        Self {
            radius: None,
            rscale: default_rscale(),
            probe: ProbeSizeParams::default(),
        }
    }
}

/// Sub-pixel refinement of a correlation maximum.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SubpixelMethod {
    /// Integer pixel of the maximum.
    #[default]
    None,
    /// Separable parabolic fit through the 3x3 neighbourhood.
    Poly,
    /// Parabolic estimate followed by a local upsampled DFT of the
    /// cross-power spectrum.
    Multicorr {
        #[serde(default = "default_upsample_factor")]
        upsample_factor: usize,
    },
}

fn default_rscale() -> f64 {
    1.2
}

fn default_upsample_factor() -> usize {
    16
}

/// Settings passed to a [`crate::DiskDetector`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectParams {
    pub max_num_peaks: usize,
    #[serde(default)]
    pub subpixel: SubpixelMethod,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            max_num_peaks: 1,
            subpixel: SubpixelMethod::None,
        }
    }
}

/// Brightest-disk correlation against a probe kernel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BrightestDiskParams {
    /// Initial `(qx0, qy0)`; derived from the scan-mean frame when `None`.
    #[serde(default)]
    pub initial_guess: Option<Point2<f64>>,
    /// Sigma of the gaussian window around the initial guess; twice the
    /// kernel's probe radius when `None`.
    #[serde(default)]
    pub probe_mask_size: Option<f64>,
    #[serde(default)]
    pub subpixel: SubpixelMethod,
    #[serde(default)]
    pub probe: ProbeSizeParams,
}

/// How the Bragg-peak strategy picks its first center guess.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CenterGuess {
    /// Centroid of the all-peaks vector map, refined once.
    #[default]
    CenterOfMass,
    /// Maximum of the vector map smoothed with a wide gaussian.
    Max {
        #[serde(default = "default_map_sigma")]
        sigma: f64,
    },
}

fn default_map_sigma() -> f64 {
    10.0
}

/// Conjugate-pair matching for beamstop data.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConjugatePairParams {
    pub center_guess: Point2<f64>,
    /// Inner and outer radius of the annulus, inclusive.
    pub radii: (f64, f64),
    /// Largest distance between a peak's reflection and its partner.
    pub max_dist: f64,
    /// Number of pairing rounds.
    pub max_iter: usize,
}

impl ConjugatePairParams {
    pub fn new(center_guess: Point2<f64>, radii: (f64, f64)) -> Self {
        Self {
            center_guess,
            radii,
            max_dist: 2.0,
            max_iter: 1,
        }
    }
}
