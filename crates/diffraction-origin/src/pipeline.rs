use std::path::Path;

use diffraction_origin_core::{FrameSource, FrameView, OriginError, OriginField};
use diffraction_origin_finder::find_origins_direct_beam;
use diffraction_origin_fit::{fit_origin_masked, score_outliers, OriginFit, OutlierScore};
use log::{debug, info};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::config::{ConfigError, OriginCalibConfig};

/// Measured origins, the outlier flags that were applied and the fitted
/// origin surface.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OriginCalibration {
    pub measured: OriginField,
    pub outliers: Option<OutlierScore>,
    pub fit: OriginFit,
}

impl OriginCalibration {
    /// Fitted origin at every scan position.
    pub fn origins(&self) -> OriginField {
        self.fit.to_origin_field()
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Calibrate the diffraction origin of a scan without a beamstop.
///
/// The source is opened with `config.load`, so `reference` (if any) must
/// have the frame shape after binning.
#[cfg_attr(feature = "tracing", instrument(level = "info", skip_all))]
pub fn calibrate_origin<S: FrameSource>(
    source: S,
    config: &OriginCalibConfig,
    reference: Option<&FrameView<'_>>,
) -> Result<OriginCalibration, OriginError> {
    let scan = config.load.open(source)?;
    let measured = find_origins_direct_beam(&scan, &config.direct_beam, reference, None)?;
    let total = scan.scan_shape().len();
    debug!("{} of {total} positions measured", measured.count_valid());

    let outliers = match &config.outliers {
        Some(params) => {
            let mean = measured
                .mean()
                .ok_or(OriginError::EmptySelection("no position yielded an origin"))?;
            // unmeasured cells take the mean origin
            let qx0 = measured.qx0.map(|v| v.unwrap_or(mean.x));
            let qy0 = measured.qy0.map(|v| v.unwrap_or(mean.y));
            Some(score_outliers(
                &qx0,
                &qy0,
                params.n_sigma,
                params.edge_boundary,
            )?)
        }
        None => None,
    };
    let fit_mask = outliers.as_ref().map(|o| o.mask.map(|&flagged| !flagged));

    let fit = fit_origin_masked(
        &measured,
        config.fit.model,
        fit_mask.as_ref(),
        &config.fit.robust,
    )?;
    info!(
        "{} origin fit over {} of {total} positions",
        config.fit.model,
        fit.x.inliers.as_slice().iter().filter(|&&k| k).count()
    );

    Ok(OriginCalibration {
        measured,
        outliers,
        fit,
    })
}
