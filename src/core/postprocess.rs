//! Conversion of class probability maps into geolocated anomaly reports

use crate::core::model::ClassProbabilityMap;
use crate::core::reproject::reproject_to_wgs84;
use crate::types::{BoundingBox, GeoReference, TerraError, TerraResult};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One detected occurrence of an anomaly type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRegion {
    pub id: String,
    pub confidence: f64,
    pub area_percentage: f64,
    /// `[min_lon, min_lat, max_lon, max_lat]`
    pub bbox: [f64; 4],
}

/// Detection outcome for a single anomaly type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub detected: bool,
    pub coverage_percentage: f64,
    pub confidence_score: f64,
    pub regions: Vec<AnomalyRegion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionSummary {
    pub detected_anomaly_types: Vec<String>,
    pub total_detected_regions: usize,
    pub has_anomalies: bool,
}

/// GeoJSON polygon geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoJsonPolygon {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: Vec<Vec<[f64; 2]>>,
}

impl GeoJsonPolygon {
    /// Closed, counter-clockwise ring around a bounding box
    pub fn from_bbox(bbox: &BoundingBox) -> Self {
        let ring = vec![
            [bbox.max_lon, bbox.min_lat],
            [bbox.max_lon, bbox.max_lat],
            [bbox.min_lon, bbox.max_lat],
            [bbox.min_lon, bbox.min_lat],
            [bbox.max_lon, bbox.min_lat],
        ];
        Self {
            kind: "Polygon".to_string(),
            coordinates: vec![ring],
        }
    }
}

/// Complete anomaly detection result for one image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub image_path: String,
    pub detection_time: DateTime<Utc>,
    /// `[min_lon, min_lat, max_lon, max_lat]` in WGS84
    pub bbox: [f64; 4],
    pub coverage_area: GeoJsonPolygon,
    pub threshold: f64,
    /// Per anomaly type, in configured order
    pub anomalies: IndexMap<String, AnomalyReport>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub summary: DetectionSummary,
}

impl DetectionResult {
    pub fn with_metadata(mut self, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn to_json(&self) -> TerraResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> TerraResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Thresholds per-class probability layers into anomaly reports
#[derive(Debug, Clone)]
pub struct RegionExtractor {
    threshold: f64,
}

impl RegionExtractor {
    pub fn new(threshold: f64) -> TerraResult<Self> {
        if !threshold.is_finite() {
            return Err(TerraError::Config(format!(
                "Detection threshold must be finite, got {}",
                threshold
            )));
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Build the detection result for `anomaly_types`, where type `i` is
    /// read from class `i + 1` of the probability map.
    ///
    /// Each detected type yields a single region spanning the whole image
    /// extent; contiguous regions are not separated.
    pub fn extract(
        &self,
        map: &ClassProbabilityMap,
        georef: &GeoReference,
        anomaly_types: &[String],
        image_path: &str,
    ) -> TerraResult<DetectionResult> {
        if map.num_classes() < anomaly_types.len() + 1 {
            return Err(TerraError::Config(format!(
                "Probability map has {} classes but {} anomaly types (+ background) are configured",
                map.num_classes(),
                anomaly_types.len()
            )));
        }

        let bbox = reproject_to_wgs84(georef)?;
        let bbox_array = bbox.to_array();

        let mut anomalies = IndexMap::with_capacity(anomaly_types.len());
        for (i, anomaly_type) in anomaly_types.iter().enumerate() {
            let report = self.report_for_class(map, i + 1, anomaly_type, bbox_array)?;
            log::info!(
                "{}: coverage {:.2}%, confidence {:.3}",
                anomaly_type,
                report.coverage_percentage,
                report.confidence_score
            );
            anomalies.insert(anomaly_type.clone(), report);
        }

        let detected_anomaly_types: Vec<String> = anomalies
            .iter()
            .filter(|(_, report)| report.detected)
            .map(|(name, _)| name.clone())
            .collect();
        let total_detected_regions = anomalies.values().map(|r| r.regions.len()).sum();
        let summary = DetectionSummary {
            has_anomalies: !detected_anomaly_types.is_empty(),
            detected_anomaly_types,
            total_detected_regions,
        };

        log::info!("Completed anomaly detection for {}", image_path);
        Ok(DetectionResult {
            image_path: image_path.to_string(),
            detection_time: Utc::now(),
            bbox: bbox_array,
            coverage_area: GeoJsonPolygon::from_bbox(&bbox),
            threshold: self.threshold,
            anomalies,
            metadata: serde_json::Map::new(),
            summary,
        })
    }

    fn report_for_class(
        &self,
        map: &ClassProbabilityMap,
        class: usize,
        anomaly_type: &str,
        bbox: [f64; 4],
    ) -> TerraResult<AnomalyReport> {
        let layer = map.class_layer(class).ok_or_else(|| {
            TerraError::Config(format!("No probability layer for class {}", class))
        })?;

        let flagged = layer.iter().filter(|&&p| p as f64 > self.threshold).count();
        let coverage_percentage = flagged as f64 * 100.0 / layer.len() as f64;
        let max_probability = layer.iter().fold(0.0f32, |m, &p| m.max(p)) as f64;

        let mut regions = Vec::new();
        let confidence_score = if flagged > 0 {
            regions.push(AnomalyRegion {
                id: format!("{}_1", anomaly_type),
                confidence: max_probability,
                area_percentage: coverage_percentage,
                bbox,
            });
            max_probability
        } else {
            0.0
        };

        Ok(AnomalyReport {
            detected: !regions.is_empty(),
            coverage_percentage,
            confidence_score,
            regions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use ndarray::Array3;

    fn georef() -> GeoReference {
        let transform = GeoTransform::from_gdal([10.0, 0.01, 0.0, 50.0, 0.0, -0.01]);
        GeoReference::new(Some("EPSG:4326".to_string()), transform, 10, 10)
    }

    #[test]
    fn test_geojson_ring_closed() {
        let bbox = BoundingBox {
            min_lon: 1.0,
            max_lon: 2.0,
            min_lat: 3.0,
            max_lat: 4.0,
        };
        let polygon = GeoJsonPolygon::from_bbox(&bbox);
        let ring = &polygon.coordinates[0];
        assert_eq!(ring.len(), 5);
        assert_eq!(ring.first(), ring.last());
        assert_eq!(ring[0], [2.0, 3.0]);
    }

    #[test]
    fn test_too_few_classes_rejected() {
        let map = ClassProbabilityMap::background(2, 2, 2);
        let extractor = RegionExtractor::new(0.5).unwrap();
        let types = vec!["wildfire".to_string(), "flood".to_string()];
        assert!(matches!(
            extractor.extract(&map, &georef(), &types, "scene.tif"),
            Err(TerraError::Config(_))
        ));
    }

    #[test]
    fn test_threshold_is_strict() {
        let mut probabilities = Array3::zeros((10, 10, 2));
        probabilities.index_axis_mut(ndarray::Axis(2), 0).fill(0.5);
        probabilities.index_axis_mut(ndarray::Axis(2), 1).fill(0.5);
        let map = ClassProbabilityMap::new(probabilities).unwrap();

        let extractor = RegionExtractor::new(0.5).unwrap();
        let result = extractor
            .extract(&map, &georef(), &["flood".to_string()], "scene.tif")
            .unwrap();
        assert!(!result.anomalies["flood"].detected);
        assert_eq!(result.anomalies["flood"].confidence_score, 0.0);
    }

    #[test]
    fn test_json_shape() {
        let map = ClassProbabilityMap::background(4, 4, 2);
        let extractor = RegionExtractor::new(0.5).unwrap();
        let result = extractor
            .extract(&map, &georef(), &["oil_spill".to_string()], "scene.tif")
            .unwrap();

        let value: serde_json::Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
        assert_eq!(value["image_path"], "scene.tif");
        assert_eq!(value["coverage_area"]["type"], "Polygon");
        assert_eq!(value["bbox"].as_array().unwrap().len(), 4);
        assert_eq!(value["anomalies"]["oil_spill"]["regions"].as_array().unwrap().len(), 0);
        assert_eq!(value["summary"]["has_anomalies"], false);
        assert!(value["detection_time"].as_str().unwrap().contains('T'));
        assert!(value["metadata"].as_object().unwrap().is_empty());
    }

    #[test]
    fn test_threshold_echoed_unchanged() {
        let map = ClassProbabilityMap::background(4, 4, 2);
        let extractor = RegionExtractor::new(0.3).unwrap();
        let result = extractor
            .extract(&map, &georef(), &["flood".to_string()], "scene.tif")
            .unwrap();

        let value: serde_json::Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
        assert_eq!(value["threshold"], 0.3);
        assert!(result.to_json().unwrap().contains("\"threshold\":0.3,"));
    }
}
