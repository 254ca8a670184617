//! TerraWatch: satellite imagery anomaly detection
//!
//! This library reads multi-band satellite rasters, prepares them for a
//! semantic segmentation model, derives spectral indices, and turns per-pixel
//! class probabilities into geolocated anomaly reports (wildfire,
//! deforestation, flood, oil spill, ...).

pub mod types;
pub mod io;
pub mod core;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{
    Band2, BandStack, BoundingBox, Bounds, GeoReference, GeoTransform, RasterImage, TerraError,
    TerraResult,
};

pub use io::{RasterReader, RasterWriter};

pub use crate::core::{
    AnomalyDetector, BandRegistry, ClassProbabilityMap, DetectionResult, DetectorConfig,
    PatchExtractor, PatchParams, PreprocessParams, PreprocessedImage, Preprocessor,
    RegionExtractor, SatelliteSource, SegmentationModel, SpectralIndex, SpectralIndexEngine,
};
