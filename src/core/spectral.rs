//! Normalized-difference spectral indices and RGB composites

use crate::core::bands::{Band, BandRegistry, SatelliteSource};
use crate::types::{Band2, RasterImage, TerraError, TerraResult};
use ndarray::{Array2, Array3, ArrayView2, Axis, Zip};
use num_traits::Float;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Supported normalized-difference indices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpectralIndex {
    /// (NIR - Red) / (NIR + Red)
    Ndvi,
    /// (Green - NIR) / (Green + NIR)
    Ndwi,
    /// (SWIR1 - NIR) / (SWIR1 + NIR)
    Ndbi,
}

impl SpectralIndex {
    pub fn name(&self) -> &'static str {
        match self {
            SpectralIndex::Ndvi => "ndvi",
            SpectralIndex::Ndwi => "ndwi",
            SpectralIndex::Ndbi => "ndbi",
        }
    }

    /// The `(A, B)` band pair of `(A - B) / (A + B)`
    pub fn bands(&self) -> (Band, Band) {
        match self {
            SpectralIndex::Ndvi => (Band::Nir, Band::Red),
            SpectralIndex::Ndwi => (Band::Green, Band::Nir),
            SpectralIndex::Ndbi => (Band::Swir1, Band::Nir),
        }
    }
}

impl FromStr for SpectralIndex {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ndvi" => Ok(SpectralIndex::Ndvi),
            "ndwi" => Ok(SpectralIndex::Ndwi),
            "ndbi" => Ok(SpectralIndex::Ndbi),
            _ => Err(format!("Unknown index: {}", s)),
        }
    }
}

impl fmt::Display for SpectralIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pixel-wise `(a - b) / (a + b)`, 0 where the denominator is not positive
/// or not finite
pub fn normalized_difference<T: Float>(a: &ArrayView2<T>, b: &ArrayView2<T>) -> Array2<T> {
    let mut out = Array2::from_elem(a.dim(), T::zero());
    Zip::from(&mut out).and(a).and(b).for_each(|o, &a, &b| {
        let denominator = a + b;
        if denominator > T::zero() && denominator.is_finite() {
            *o = (a - b) / denominator;
        }
    });
    out
}

/// Spectral index calculator bound to the band registry
pub struct SpectralIndexEngine {
    registry: BandRegistry,
}

impl SpectralIndexEngine {
    pub fn new() -> Self {
        Self {
            registry: BandRegistry::standard(),
        }
    }

    /// Compute one index, `None` when its bands are not in the image
    pub fn compute_index(
        &self,
        image: &RasterImage,
        source: &SatelliteSource,
        index: SpectralIndex,
    ) -> Option<Band2> {
        let (a, b) = index.bands();
        let [a, b] = self.registry.channels(source, [a, b], image.band_count())?;
        let a = image.band(a)?;
        let b = image.band(b)?;
        Some(normalized_difference(&a, &b))
    }

    /// Compute every requested index, keyed by lower-case index name.
    ///
    /// Unknown names and indices whose bands are missing are skipped with a
    /// warning.
    pub fn compute(
        &self,
        image: &RasterImage,
        source: &SatelliteSource,
        index_names: &[&str],
    ) -> BTreeMap<String, Band2> {
        if !source.is_known() {
            log::warn!("Unknown source: {}, using default band indices", source);
        }

        let mut result = BTreeMap::new();
        for name in index_names {
            let index = match name.parse::<SpectralIndex>() {
                Ok(index) => index,
                Err(e) => {
                    log::warn!("{}", e);
                    continue;
                }
            };

            match self.compute_index(image, source, index) {
                Some(values) => {
                    log::info!(
                        "Calculated {} with shape {:?}",
                        index.name().to_uppercase(),
                        values.dim()
                    );
                    result.insert(index.name().to_string(), values);
                }
                None => {
                    log::warn!(
                        "Cannot calculate {}: required bands not available",
                        index.name().to_uppercase()
                    );
                }
            }
        }
        result
    }

    /// RGB composite `(height, width, 3)` with values in [0, 1].
    ///
    /// `rgb_bands` are 1-based (red, green, blue) band numbers; when omitted the
    /// source's registered bands are used. With `stretch`, each channel is
    /// linearly stretched between its 2nd and 98th percentile.
    pub fn rgb_composite(
        &self,
        image: &RasterImage,
        source: &SatelliteSource,
        rgb_bands: Option<(usize, usize, usize)>,
        stretch: bool,
    ) -> TerraResult<Array3<f32>> {
        let channels = match rgb_bands {
            Some((r, g, b)) => [r, g, b].map(|i| i.wrapping_sub(1)),
            None => {
                let table = self.registry.table(source);
                [Band::Red, Band::Green, Band::Blue].map(|band| table.index(band) - 1)
            }
        };

        let band_count = image.band_count();
        if channels.iter().any(|&c| c >= band_count) {
            return Err(TerraError::InvalidFormat(format!(
                "Requested RGB bands ({}, {}, {}) exceed available bands ({})",
                channels[0].wrapping_add(1),
                channels[1].wrapping_add(1),
                channels[2].wrapping_add(1),
                band_count
            )));
        }

        let mut rgb = Array3::zeros((image.height(), image.width(), 3));
        for (i, &channel) in channels.iter().enumerate() {
            let mut layer = rgb.index_axis_mut(Axis(2), i);
            layer.assign(&image.data().index_axis(Axis(0), channel));

            let (min, max) = min_max(layer.iter().copied());
            if stretch && max > min {
                let p2 = percentile(layer.iter().copied(), 2.0);
                let p98 = percentile(layer.iter().copied(), 98.0);
                let span = p98 - p2;
                if span > 0.0 {
                    layer.mapv_inplace(|v| (v - p2) / span);
                }
            }
        }

        rgb.mapv_inplace(|v| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 });
        log::info!("Created RGB composite with shape {:?}", rgb.dim());
        Ok(rgb)
    }
}

impl Default for SpectralIndexEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn min_max(values: impl Iterator<Item = f32>) -> (f32, f32) {
    values
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)))
}

/// Percentile with linear interpolation between closest ranks
fn percentile(values: impl Iterator<Item = f32>, q: f64) -> f32 {
    let mut sorted: Vec<f32> = values.filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return 0.0;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = q / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = (rank - lo as f64) as f32;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}
