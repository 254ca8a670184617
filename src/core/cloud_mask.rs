use crate::core::bands::{Band, BandRegistry, SatelliteSource};
use crate::types::BandStack;
use ndarray::{Array2, Axis, Zip};

/// Boolean per-pixel cloud flag (row x col)
pub type CloudMask = Array2<bool>;

/// Minimum band count at which a Landsat-8 stack is assumed to carry a QA band
const LANDSAT_QA_MIN_BANDS: usize = 7;

/// SWIR multiplier applied to the blue threshold, per source
const SENTINEL2_SWIR_FACTOR: f32 = 0.8;
const LANDSAT8_SWIR_FACTOR: f32 = 0.7;

/// Heuristic, threshold-based cloud detection.
///
/// Never fails: when the source is unknown or the required bands are not
/// present, an all-false mask is returned and a warning logged.
pub struct CloudDetector {
    registry: BandRegistry,
}

impl CloudDetector {
    pub fn new() -> Self {
        Self {
            registry: BandRegistry::standard(),
        }
    }

    pub fn detect(&self, data: &BandStack, source: &SatelliteSource, threshold: f32) -> CloudMask {
        let (band_count, height, width) = data.dim();
        let empty = || CloudMask::from_elem((height, width), false);

        let mask = match source {
            SatelliteSource::Sentinel2 => {
                match self.blue_swir_mask(data, source, threshold, SENTINEL2_SWIR_FACTOR) {
                    Some(mask) => mask,
                    None => return empty(),
                }
            }
            SatelliteSource::Landsat8 if band_count >= LANDSAT_QA_MIN_BANDS => {
                // QA band is the last band of the stack
                data.index_axis(Axis(0), band_count - 1).mapv(|qa| qa > threshold)
            }
            SatelliteSource::Landsat8 => {
                match self.blue_swir_mask(data, source, threshold, LANDSAT8_SWIR_FACTOR) {
                    Some(mask) => mask,
                    None => return empty(),
                }
            }
            SatelliteSource::Other(name) => {
                log::warn!("Cloud detection not implemented for source: {}", name);
                return empty();
            }
        };

        log::info!("Detected cloud coverage: {:.2}%", cloud_fraction(&mask) * 100.0);
        mask
    }

    /// Clouds are bright in blue and relatively bright in SWIR
    fn blue_swir_mask(
        &self,
        data: &BandStack,
        source: &SatelliteSource,
        threshold: f32,
        swir_factor: f32,
    ) -> Option<CloudMask> {
        let band_count = data.len_of(Axis(0));
        let required = [Band::Blue, Band::Swir1];
        let Some([blue, swir]) = self.registry.channels(source, required, band_count) else {
            log::warn!("Required bands for cloud detection not available in image data");
            return None;
        };

        let blue = data.index_axis(Axis(0), blue);
        let swir = data.index_axis(Axis(0), swir);
        let swir_threshold = threshold * swir_factor;

        let mut mask = CloudMask::from_elem(blue.dim(), false);
        Zip::from(&mut mask)
            .and(&blue)
            .and(&swir)
            .for_each(|m, &b, &s| *m = b > threshold && s > swir_threshold);
        Some(mask)
    }
}

impl Default for CloudDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Fraction of flagged pixels in [0, 1]
pub fn cloud_fraction(mask: &CloudMask) -> f64 {
    if mask.is_empty() {
        return 0.0;
    }
    mask.iter().filter(|&&m| m).count() as f64 / mask.len() as f64
}

/// Zero every band at flagged pixel locations
pub fn apply_mask(data: &mut BandStack, mask: &CloudMask) {
    for mut band in data.axis_iter_mut(Axis(0)) {
        Zip::from(&mut band).and(mask).for_each(|v, &cloudy| {
            if cloudy {
                *v = 0.0;
            }
        });
    }
}
