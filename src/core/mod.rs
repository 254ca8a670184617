//! Anomaly detection processing stages

pub mod bands;
pub mod cloud_mask;
pub mod preprocess;
pub mod spectral;
pub mod model;
pub mod reproject;
pub mod postprocess;
pub mod patches;
pub mod detector;

#[cfg(feature = "onnx")]
pub mod onnx;

// Re-export main types
pub use bands::{Band, BandRegistry, BandTable, SatelliteSource};
pub use cloud_mask::{CloudDetector, CloudMask};
pub use preprocess::{Normalization, PreprocessParams, PreprocessedImage, Preprocessor};
pub use spectral::{SpectralIndex, SpectralIndexEngine};
pub use model::{ClassProbabilityMap, ModelSpec, SegmentationModel};
pub use reproject::reproject_to_wgs84;
pub use postprocess::{
    AnomalyRegion, AnomalyReport, DetectionResult, DetectionSummary, GeoJsonPolygon,
    RegionExtractor,
};
pub use patches::{Patch, PatchExtractor, PatchParams};
pub use detector::{AnomalyDetector, DetectorConfig};

#[cfg(feature = "onnx")]
pub use onnx::OnnxSegmentationModel;
