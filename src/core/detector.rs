//! End-to-end anomaly detection: load, preprocess, predict, extract.
//!
//! A single detector type covers every anomaly kind; which kinds it reports
//! is configuration, and class `i + 1` of the model output belongs to
//! `anomaly_types[i]`.

use crate::core::bands::SatelliteSource;
use crate::core::model::{ClassProbabilityMap, SegmentationModel};
use crate::core::patches::{Patch, PatchExtractor, PatchParams};
use crate::core::postprocess::{DetectionResult, RegionExtractor};
use crate::core::preprocess::{resize_bilinear, PreprocessParams, Preprocessor};
use crate::io::RasterReader;
use crate::types::{RasterImage, TerraError, TerraResult};
use ndarray::{s, Array2, Array3, Axis};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

pub const DEFAULT_ANOMALY_TYPES: [&str; 4] = ["wildfire", "deforestation", "flood", "oil_spill"];

/// Detector configuration, loadable from JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub anomaly_types: Vec<String>,
    /// Model input `(height, width, channels)`
    pub input_shape: (usize, usize, usize),
    pub source: String,
    pub threshold: f64,
    pub model_path: Option<PathBuf>,
    pub preprocess: PreprocessParams,
    /// Model emits raw scores rather than probabilities
    pub apply_softmax: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            anomaly_types: DEFAULT_ANOMALY_TYPES.iter().map(|s| s.to_string()).collect(),
            input_shape: (256, 256, 12),
            source: "sentinel-2".to_string(),
            threshold: 0.5,
            model_path: None,
            preprocess: PreprocessParams::default(),
            apply_softmax: false,
        }
    }
}

impl DetectorConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> TerraResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TerraResult<()> {
        if self.anomaly_types.is_empty() {
            return Err(TerraError::Config("At least one anomaly type is required".to_string()));
        }
        let (height, width, channels) = self.input_shape;
        if height == 0 || width == 0 || channels == 0 {
            return Err(TerraError::Config(format!(
                "Invalid model input shape {:?}",
                self.input_shape
            )));
        }
        if !self.threshold.is_finite() {
            return Err(TerraError::Config("Detection threshold must be finite".to_string()));
        }
        self.preprocess.validate()
    }

    /// Background plus one class per anomaly type
    pub fn num_classes(&self) -> usize {
        self.anomaly_types.len() + 1
    }
}

/// Canonical anomaly type name for common aliases
pub fn canonical_anomaly_type(name: &str) -> String {
    let name = name.trim().to_ascii_lowercase();
    match name.as_str() {
        "forest_loss" | "deforestation" => "deforestation".to_string(),
        "flooding" | "water" | "flood" => "flood".to_string(),
        _ => name,
    }
}

/// Configured anomaly detector holding an optional loaded model
pub struct AnomalyDetector {
    config: DetectorConfig,
    source: SatelliteSource,
    preprocessor: Preprocessor,
    model: Option<Arc<dyn SegmentationModel>>,
}

impl AnomalyDetector {
    /// Build a detector, loading `config.model_path` when the file exists
    pub fn new(config: DetectorConfig) -> TerraResult<Self> {
        config.validate()?;
        log::info!(
            "Initializing detector for {:?} with input shape {:?}",
            config.anomaly_types,
            config.input_shape
        );

        let mut detector = Self {
            source: SatelliteSource::parse(&config.source),
            preprocessor: Preprocessor::new(),
            model: None,
            config,
        };

        if let Some(path) = detector.config.model_path.clone() {
            if path.exists() {
                detector.load_model(&path)?;
            } else {
                log::warn!("Model file {} not found, starting without a model", path.display());
            }
        }
        Ok(detector)
    }

    /// Detector for a single anomaly type, resolving common aliases
    pub fn for_anomaly(
        name: &str,
        model_path: Option<PathBuf>,
        input_shape: Option<(usize, usize, usize)>,
    ) -> TerraResult<Self> {
        let defaults = DetectorConfig::default();
        let config = DetectorConfig {
            anomaly_types: vec![canonical_anomaly_type(name)],
            input_shape: input_shape.unwrap_or(defaults.input_shape),
            model_path,
            ..defaults
        };
        Self::new(config)
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn anomaly_types(&self) -> &[String] {
        &self.config.anomaly_types
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    /// Load an ONNX model artifact
    #[cfg(feature = "onnx")]
    pub fn load_model<P: AsRef<Path>>(&mut self, path: P) -> TerraResult<()> {
        use crate::core::model::ModelSpec;
        use crate::core::onnx::OnnxSegmentationModel;

        let spec = ModelSpec::new(self.config.input_shape, self.config.num_classes());
        let model = OnnxSegmentationModel::load(path.as_ref(), spec, self.config.apply_softmax)?;
        self.set_model(Arc::new(model))?;
        log::info!("Model loaded from {}", path.as_ref().display());
        Ok(())
    }

    #[cfg(not(feature = "onnx"))]
    pub fn load_model<P: AsRef<Path>>(&mut self, path: P) -> TerraResult<()> {
        Err(TerraError::Config(format!(
            "Cannot load {}: built without the `onnx` feature",
            path.as_ref().display()
        )))
    }

    /// Attach an already constructed model
    pub fn with_model<M: SegmentationModel + 'static>(mut self, model: M) -> TerraResult<Self> {
        self.set_model(Arc::new(model))?;
        Ok(self)
    }

    /// Attach a model that may be shared with other detectors
    pub fn set_model(&mut self, model: Arc<dyn SegmentationModel>) -> TerraResult<()> {
        let spec = model.spec();
        if spec.input_shape != self.config.input_shape {
            let (h, w, c) = self.config.input_shape;
            let (mh, mw, mc) = spec.input_shape;
            return Err(TerraError::ShapeMismatch {
                expected: vec![h, w, c],
                actual: vec![mh, mw, mc],
            });
        }
        if spec.num_classes < self.config.num_classes() {
            return Err(TerraError::Config(format!(
                "Model predicts {} classes, {} anomaly types need {}",
                spec.num_classes,
                self.config.anomaly_types.len(),
                self.config.num_classes()
            )));
        }
        self.model = Some(model);
        Ok(())
    }

    fn model(&self) -> TerraResult<&dyn SegmentationModel> {
        self.model.as_deref().ok_or(TerraError::ModelNotLoaded)
    }

    fn extractor(&self, threshold: Option<f64>) -> TerraResult<RegionExtractor> {
        RegionExtractor::new(threshold.unwrap_or(self.config.threshold))
    }

    /// Run detection on a raster file.
    ///
    /// `threshold` defaults to the configured one. Fails with
    /// `ModelNotLoaded` before touching the file when no model is attached.
    pub fn detect<P: AsRef<Path>>(
        &self,
        image_path: P,
        threshold: Option<f64>,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> TerraResult<DetectionResult> {
        self.model()?;
        let image_path = image_path.as_ref();
        log::info!("Starting anomaly detection on {}", image_path.display());

        let image = RasterReader::open(image_path)?;
        self.detect_image(&image, &image_path.display().to_string(), threshold, metadata)
    }

    /// Run detection on a raster already in memory
    pub fn detect_image(
        &self,
        image: &RasterImage,
        image_path: &str,
        threshold: Option<f64>,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> TerraResult<DetectionResult> {
        let model = self.model()?;
        let extractor = self.extractor(threshold)?;

        let input = self.preprocessor.preprocess(
            image,
            &self.source,
            &self.config.preprocess,
            self.config.input_shape,
        )?;
        log::info!("Cloud coverage: {:.1}%", input.cloud_fraction() * 100.0);

        let probabilities = model.predict(&input)?;
        model.spec().check_output(&probabilities)?;
        let result = extractor.extract(
            &probabilities,
            image.georef(),
            &self.config.anomaly_types,
            image_path,
        )?;
        Ok(result.with_metadata(metadata))
    }

    /// Detection over overlapping tiles of a large raster.
    ///
    /// Every retained tile is predicted at model resolution and resampled back
    /// to tile size; overlapping predictions are averaged and pixels outside
    /// all retained tiles are background.
    pub fn detect_tiled<P: AsRef<Path>>(
        &self,
        image_path: P,
        threshold: Option<f64>,
        patch_params: &PatchParams,
    ) -> TerraResult<DetectionResult> {
        let model = self.model()?;
        let extractor = self.extractor(threshold)?;
        patch_params.validate()?;
        let image_path = image_path.as_ref();
        log::info!("Starting tiled anomaly detection on {}", image_path.display());

        let image = RasterReader::open(image_path)?;
        let patches = PatchExtractor::extract(&image, patch_params)?;

        #[cfg(feature = "parallel")]
        let predictions: Vec<TerraResult<Array3<f32>>> = patches
            .par_iter()
            .map(|patch| self.predict_patch(model, patch, patch_params.patch_size))
            .collect();
        #[cfg(not(feature = "parallel"))]
        let predictions: Vec<TerraResult<Array3<f32>>> = patches
            .iter()
            .map(|patch| self.predict_patch(model, patch, patch_params.patch_size))
            .collect();

        let num_classes = model.spec().num_classes;
        let mut sum = Array3::<f32>::zeros((image.height(), image.width(), num_classes));
        let mut count = Array2::<f32>::zeros((image.height(), image.width()));
        let size = patch_params.patch_size;
        for (patch, prediction) in patches.iter().zip(predictions) {
            let prediction = prediction?;
            let (rows, cols) = (patch.row..patch.row + size, patch.col..patch.col + size);
            let mut target = sum.slice_mut(s![rows.clone(), cols.clone(), ..]);
            target += &prediction;
            count.slice_mut(s![rows, cols]).mapv_inplace(|c| c + 1.0);
        }

        for ((row, col), &n) in count.indexed_iter() {
            let mut pixel = sum.slice_mut(s![row, col, ..]);
            if n > 0.0 {
                pixel.mapv_inplace(|p| p / n);
            } else {
                pixel.fill(0.0);
                pixel[0] = 1.0;
            }
        }

        let stitched = ClassProbabilityMap::new(sum)?;
        extractor.extract(
            &stitched,
            image.georef(),
            &self.config.anomaly_types,
            &image_path.display().to_string(),
        )
    }

    fn predict_patch(
        &self,
        model: &dyn SegmentationModel,
        patch: &Patch,
        size: usize,
    ) -> TerraResult<Array3<f32>> {
        let input = self.preprocessor.preprocess(
            &patch.image,
            &self.source,
            &self.config.preprocess,
            self.config.input_shape,
        )?;
        let map = model.predict(&input)?;
        model.spec().check_output(&map)?;
        let probabilities = map.into_inner();

        let (_, _, classes) = probabilities.dim();
        let mut out = Array3::zeros((size, size, classes));
        for (class, layer) in probabilities.axis_iter(Axis(2)).enumerate() {
            out.index_axis_mut(Axis(2), class)
                .assign(&resize_bilinear(&layer, size, size));
        }
        Ok(out)
    }

    /// Independent detections, one result per path in input order
    pub fn detect_batch<P: AsRef<Path> + Sync>(
        &self,
        image_paths: &[P],
        threshold: Option<f64>,
    ) -> Vec<TerraResult<DetectionResult>> {
        log::info!("Running batch detection on {} images", image_paths.len());

        #[cfg(feature = "parallel")]
        let results = image_paths
            .par_iter()
            .map(|path| self.detect(path, threshold, serde_json::Map::new()))
            .collect();
        #[cfg(not(feature = "parallel"))]
        let results = image_paths
            .iter()
            .map(|path| self.detect(path, threshold, serde_json::Map::new()))
            .collect();

        results
    }
}
