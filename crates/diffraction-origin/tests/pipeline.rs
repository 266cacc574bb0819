use approx::assert_abs_diff_eq;
use diffraction_origin::core::{Frame, InMemoryScan, LoadMode, ScanShape};
use diffraction_origin::finder::DirectBeamParams;
use diffraction_origin::fit::RobustParams;
use diffraction_origin::{
    calibrate_origin, OriginCalibConfig, OriginCalibration, OriginError, OutlierParams,
    SurfaceModel,
};

const Q: usize = 64;
const SHAPE: (usize, usize) = (6, 5);

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn true_origin(rx: usize, ry: usize) -> (f64, f64) {
    (20.0 + rx as f64, 26.0 - ry as f64)
}

fn disk(cx: f64, cy: f64) -> Frame {
    Frame::from_fn(Q, Q, |x, y| {
        if (x as f64 - cx).hypot(y as f64 - cy) < 5.0 {
            1.0
        } else {
            0.0
        }
    })
}

/// Drifting direct beam; `outlier` moves one position's disk off the trend.
fn drifting_scan(outlier: Option<(usize, usize)>) -> InMemoryScan {
    InMemoryScan::from_frames(ScanShape::new(SHAPE.0, SHAPE.1), |rx, ry| {
        let (cx, cy) = true_origin(rx, ry);
        if outlier == Some((rx, ry)) {
            disk(cx + 15.0, cy)
        } else {
            disk(cx, cy)
        }
    })
    .unwrap()
}

fn assert_on_trend(calib: &OriginCalibration) {
    for rx in 0..SHAPE.0 {
        for ry in 0..SHAPE.1 {
            let (x, y) = true_origin(rx, ry);
            let p = calib.fit.origin_at(rx, ry);
            assert_abs_diff_eq!(p.x, x, epsilon = 1e-6);
            assert_abs_diff_eq!(p.y, y, epsilon = 1e-6);
        }
    }
}

#[test]
fn estimates_radius_and_fits_plane() {
    init_logger();
    let calib = calibrate_origin(drifting_scan(None), &OriginCalibConfig::default(), None).unwrap();
    assert_eq!(calib.measured.count_valid(), SHAPE.0 * SHAPE.1);
    assert!(calib.outliers.is_none());
    assert_on_trend(&calib);
    assert_eq!(calib.origins().count_valid(), SHAPE.0 * SHAPE.1);
}

#[test]
fn flagged_outlier_is_excluded_from_fit() {
    init_logger();
    let config = OriginCalibConfig {
        direct_beam: DirectBeamParams {
            radius: Some(5.0),
            ..DirectBeamParams::default()
        },
        outliers: Some(OutlierParams {
            n_sigma: 3.0,
            edge_boundary: 0,
        }),
        ..OriginCalibConfig::default()
    };
    let calib = calibrate_origin(drifting_scan(Some((2, 2))), &config, None).unwrap();

    let measured = calib.measured.get(2, 2).unwrap();
    assert_abs_diff_eq!(measured.x, 37.0, epsilon = 1e-6);

    let outliers = calib.outliers.as_ref().unwrap();
    let flagged: Vec<_> = outliers
        .mask
        .indexed()
        .filter(|(_, m)| **m)
        .map(|(p, _)| p)
        .collect();
    assert_eq!(flagged, vec![(2, 2)]);
    assert!(!*calib.fit.x.inliers.get(2, 2));
    assert_on_trend(&calib);
}

#[test]
fn robust_fit_rejects_outlier_without_scoring() {
    init_logger();
    let mut config = OriginCalibConfig::default();
    config.direct_beam.radius = Some(5.0);
    config.fit.robust = RobustParams::robust();
    let calib = calibrate_origin(drifting_scan(Some((3, 1))), &config, None).unwrap();
    assert!(!*calib.fit.x.inliers.get(3, 1));
    assert_on_trend(&calib);
}

#[test]
fn memory_mapped_binning_is_rejected() {
    let mut config = OriginCalibConfig::default();
    config.load.mode = LoadMode::MemoryMapped;
    config.load.bin_factor = Some(2);
    let err = calibrate_origin(drifting_scan(None), &config, None).unwrap_err();
    assert!(matches!(err, OriginError::UnsupportedCombination(_)));
}

#[test]
fn config_and_result_round_trip_through_json() {
    let dir = tempfile::tempdir().unwrap();

    let mut config = OriginCalibConfig::default();
    config.direct_beam.radius = Some(5.0);
    config.fit.model = SurfaceModel::Parabola;
    config.outliers = Some(OutlierParams::default());
    let cfg_path = dir.path().join("origin.json");
    config.write_json(&cfg_path).unwrap();
    let loaded = OriginCalibConfig::load_json(&cfg_path).unwrap();
    assert_eq!(loaded, config);

    let calib = calibrate_origin(drifting_scan(None), &loaded, None).unwrap();
    let out_path = dir.path().join("calibration.json");
    calib.write_json(&out_path).unwrap();
    let raw = std::fs::read_to_string(&out_path).unwrap();
    let back: OriginCalibration = serde_json::from_str(&raw).unwrap();
    assert_eq!(back.measured, calib.measured);
    assert_eq!(back.fit.x.model, SurfaceModel::Parabola);
    assert_abs_diff_eq!(back.fit.origin_at(4, 3).x, calib.fit.origin_at(4, 3).x, epsilon = 1e-9);
}

#[test]
fn missing_config_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = OriginCalibConfig::load_json(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, diffraction_origin::ConfigError::Io(_)));
}
