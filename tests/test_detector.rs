use ndarray::{s, Array3, Axis};
use std::path::PathBuf;
use tempfile::TempDir;
use terrawatch::core::{ModelSpec, PatchParams};
use terrawatch::{
    AnomalyDetector, ClassProbabilityMap, DetectorConfig, GeoReference, GeoTransform,
    PreprocessParams, PreprocessedImage, RasterWriter, SegmentationModel, TerraError, TerraResult,
};

/// Class 1 probability follows the first input channel, clamped to [0.05, 0.95]
struct ChannelModel {
    spec: ModelSpec,
}

impl SegmentationModel for ChannelModel {
    fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    fn predict(&self, image: &PreprocessedImage) -> TerraResult<ClassProbabilityMap> {
        self.spec.check_input(image)?;
        let (height, width, _) = image.shape();
        let mut out = Array3::zeros((height, width, self.spec.num_classes));
        for ((row, col), &v) in image.data().index_axis(Axis(2), 0).indexed_iter() {
            let p = v.clamp(0.05, 0.95);
            out[[row, col, 1]] = p;
            out[[row, col, 0]] = 1.0 - p;
        }
        ClassProbabilityMap::new(out)
    }
}

/// Declares two classes but answers with three
struct ExtraClassModel {
    spec: ModelSpec,
}

impl SegmentationModel for ExtraClassModel {
    fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    fn predict(&self, image: &PreprocessedImage) -> TerraResult<ClassProbabilityMap> {
        let (height, width, _) = image.shape();
        Ok(ClassProbabilityMap::background(height, width, 3))
    }
}

fn config(input: usize) -> DetectorConfig {
    DetectorConfig {
        anomaly_types: vec!["oil_spill".to_string()],
        input_shape: (input, input, 3),
        source: "landsat-8".to_string(),
        preprocess: PreprocessParams::from_flags(false, false, 0.7),
        ..DetectorConfig::default()
    }
}

fn detector(input: usize) -> AnomalyDetector {
    AnomalyDetector::new(config(input))
        .unwrap()
        .with_model(ChannelModel {
            spec: ModelSpec::new((input, input, 3), 2),
        })
        .unwrap()
}

/// 16x16 scene whose top-left quadrant is bright in band 1
fn write_scene(dir: &TempDir, name: &str) -> PathBuf {
    let path = dir.path().join(name);
    let mut data = Array3::from_elem((3, 16, 16), 0.0f32);
    data.slice_mut(s![0, 0..8, 0..8]).fill(1.0);
    let transform = GeoTransform::from_gdal([5.0, 0.01, 0.0, 52.0, 0.0, -0.01]);
    let georef = GeoReference::new(Some("EPSG:4326".to_string()), transform, 16, 16);
    RasterWriter::write_geotiff(&path, &data, &georef, None).unwrap();
    path
}

#[test]
fn test_detect_from_file() {
    let _ = env_logger::builder().is_test(true).try_init();
    let temp_dir = TempDir::new().unwrap();
    let path = write_scene(&temp_dir, "scene.tif");

    let mut metadata = serde_json::Map::new();
    metadata.insert("acquired".to_string(), serde_json::json!("2024-07-01"));
    let result = detector(16).detect(&path, Some(0.5), metadata).unwrap();

    let report = &result.anomalies["oil_spill"];
    assert!(report.detected);
    assert!((report.coverage_percentage - 25.0).abs() < 1e-9);
    assert!((report.confidence_score - 0.95).abs() < 1e-6);
    assert_eq!(result.threshold, 0.5);
    assert_eq!(result.image_path, path.display().to_string());
    for (actual, expected) in result.bbox.iter().zip([5.0, 51.84, 5.16, 52.0]) {
        assert!((actual - expected).abs() < 1e-9, "bbox {:?}", result.bbox);
    }

    let value: serde_json::Value = serde_json::from_str(&result.to_json_pretty().unwrap()).unwrap();
    assert_eq!(value["metadata"]["acquired"], "2024-07-01");
    assert_eq!(value["coverage_area"]["coordinates"][0].as_array().unwrap().len(), 5);
}

#[test]
fn test_missing_model_is_reported_before_io() {
    let detector = AnomalyDetector::new(config(16)).unwrap();
    let err = detector
        .detect("/nonexistent/scene.tif", None, serde_json::Map::new())
        .unwrap_err();
    assert!(matches!(err, TerraError::ModelNotLoaded));
}

#[test]
fn test_missing_image_is_io_error() {
    let err = detector(16)
        .detect("/nonexistent/scene.tif", None, serde_json::Map::new())
        .unwrap_err();
    assert!(err.is_io());
}

#[test]
fn test_tiled_detection_stitches_patches() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_scene(&temp_dir, "tiled.tif");
    let params = PatchParams {
        patch_size: 8,
        stride: 8,
        min_valid_fraction: 0.0,
    };

    let result = detector(8).detect_tiled(&path, None, &params).unwrap();
    let report = &result.anomalies["oil_spill"];
    assert!(report.detected);
    assert!((report.coverage_percentage - 25.0).abs() < 1e-9);
}

#[test]
fn test_tiled_detection_uncovered_pixels_are_background() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_scene(&temp_dir, "sparse.tif");
    // only the bright top-left tile holds enough valid pixels
    let params = PatchParams {
        patch_size: 8,
        stride: 8,
        min_valid_fraction: 0.5,
    };

    let result = detector(8).detect_tiled(&path, Some(0.5), &params).unwrap();
    let report = &result.anomalies["oil_spill"];
    assert!((report.coverage_percentage - 25.0).abs() < 1e-9);
}

#[test]
fn test_batch_results_in_input_order() {
    let temp_dir = TempDir::new().unwrap();
    let first = write_scene(&temp_dir, "a.tif");
    let second = write_scene(&temp_dir, "b.tif");
    let missing = temp_dir.path().join("missing.tif");

    let paths = vec![first.clone(), missing, second.clone()];
    let results = detector(16).detect_batch(&paths, None);

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap().image_path, first.display().to_string());
    assert!(results[1].as_ref().unwrap_err().is_io());
    assert_eq!(results[2].as_ref().unwrap().image_path, second.display().to_string());
}

#[test]
fn test_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("detector.json");
    std::fs::write(
        &path,
        r#"{
            "anomaly_types": ["flood"],
            "input_shape": [64, 64, 4],
            "threshold": 0.7,
            "preprocess": {"normalization": {"method": "reflectance", "divisor": 10000.0}}
        }"#,
    )
    .unwrap();

    let config = DetectorConfig::from_file(&path).unwrap();
    assert_eq!(config.input_shape, (64, 64, 4));
    assert_eq!(config.threshold, 0.7);
    assert_eq!(config.source, "sentinel-2");
    assert!(config.preprocess.mask_clouds);

    std::fs::write(&path, r#"{"input_shape": [0, 64, 4]}"#).unwrap();
    assert!(matches!(
        DetectorConfig::from_file(&path),
        Err(TerraError::Config(_))
    ));
}

#[test]
fn test_threshold_echoed_in_json() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_scene(&temp_dir, "scene.tif");

    let result = detector(16).detect(&path, Some(0.3), serde_json::Map::new()).unwrap();
    let value: serde_json::Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
    assert_eq!(value["threshold"], 0.3);
}

#[test]
fn test_model_output_must_match_its_spec() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_scene(&temp_dir, "scene.tif");
    let detector = |input: usize| {
        AnomalyDetector::new(config(input))
            .unwrap()
            .with_model(ExtraClassModel {
                spec: ModelSpec::new((input, input, 3), 2),
            })
            .unwrap()
    };

    let err = detector(16)
        .detect(&path, None, serde_json::Map::new())
        .unwrap_err();
    assert!(matches!(err, TerraError::ShapeMismatch { .. }));

    let params = PatchParams {
        patch_size: 8,
        stride: 8,
        min_valid_fraction: 0.0,
    };
    let err = detector(8).detect_tiled(&path, None, &params).unwrap_err();
    match err {
        TerraError::ShapeMismatch { expected, actual } => {
            assert_eq!(expected, vec![8, 8, 2]);
            assert_eq!(actual, vec![8, 8, 3]);
        }
        other => panic!("unexpected error {:?}", other),
    }
}
