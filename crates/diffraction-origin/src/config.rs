//! JSON configuration for [`crate::calibrate_origin`].

use std::{fs, path::Path};

use diffraction_origin_core::LoadOptions;
use diffraction_origin_finder::DirectBeamParams;
use diffraction_origin_fit::{RobustParams, SurfaceModel};
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Neighbour-disagreement outlier flagging between measurement and fit.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierParams {
    pub n_sigma: f64,
    /// Width of the always-flagged band along the scan edges.
    pub edge_boundary: usize,
}

impl Default for OutlierParams {
    fn default() -> Self {
        Self {
            n_sigma: 10.0,
            edge_boundary: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    pub model: SurfaceModel,
    pub robust: RobustParams,
}

/// Everything [`crate::calibrate_origin`] needs besides the data.
///
/// Every section is optional in JSON and falls back to its default.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OriginCalibConfig {
    pub load: LoadOptions,
    pub direct_beam: DirectBeamParams,
    /// Skip outlier flagging when `None`.
    pub outliers: Option<OutlierParams>,
    pub fit: FitConfig,
}

impl OriginCalibConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diffraction_origin_core::LoadMode;

    #[test]
    fn empty_object_is_default() {
        let cfg = OriginCalibConfig::from_json_str("{}").unwrap();
        assert_eq!(cfg, OriginCalibConfig::default());
        assert_eq!(cfg.fit.model, SurfaceModel::Plane);
        assert!(cfg.outliers.is_none());
    }

    #[test]
    fn parses_partial_sections() {
        let cfg = OriginCalibConfig::from_json_str(
            r#"{
                "load": { "mode": "memory_mapped" },
                "outliers": { "n_sigma": 3.5 },
                "fit": { "model": "bezier_two", "robust": { "enabled": true } }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.load.mode, LoadMode::MemoryMapped);
        assert_eq!(
            cfg.outliers,
            Some(OutlierParams {
                n_sigma: 3.5,
                edge_boundary: 0
            })
        );
        assert_eq!(cfg.fit.model, SurfaceModel::BezierTwo);
        assert_eq!(cfg.fit.robust, RobustParams::robust());
    }

    #[test]
    fn direct_beam_radius_alone_keeps_default_scale() {
        let cfg = OriginCalibConfig::from_json_str(r#"{ "direct_beam": { "radius": 4.0 } }"#)
            .unwrap();
        assert_eq!(cfg.direct_beam.radius, Some(4.0));
        assert_eq!(cfg.direct_beam.rscale, DirectBeamParams::default().rscale);
    }

    #[test]
    fn unknown_model_is_a_json_error() {
        let err =
            OriginCalibConfig::from_json_str(r#"{ "fit": { "model": "cubic" } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
        assert!(err.to_string().contains("cubic"));
    }
}
