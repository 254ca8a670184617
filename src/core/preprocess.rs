use crate::core::bands::SatelliteSource;
use crate::core::cloud_mask::{apply_mask, cloud_fraction, CloudDetector};
use crate::types::{BandStack, RasterImage, TerraError, TerraResult};
use ndarray::{s, Array2, Array3, ArrayView2, ArrayViewMut2, Axis};
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use ndarray::parallel::prelude::*;

/// Typical scale factor of Sentinel-2 L2A surface reflectance products
pub const DEFAULT_REFLECTANCE_DIVISOR: f32 = 10_000.0;

/// How pixel values are brought into [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Normalization {
    /// Leave values untouched (apart from non-finite replacement)
    None,
    /// Independent per-band min-max scaling
    MinMax,
    /// Divide by a fixed reflectance scale, then clip to [0, 1]
    Reflectance { divisor: f32 },
}

/// Preprocessing parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessParams {
    pub normalization: Normalization,
    /// Zero all bands where clouds are detected
    pub mask_clouds: bool,
    /// Threshold for the cloud heuristics (in normalized units)
    pub cloud_threshold: f32,
}

impl Default for PreprocessParams {
    fn default() -> Self {
        Self {
            normalization: Normalization::MinMax,
            mask_clouds: true,
            cloud_threshold: 0.7,
        }
    }
}

impl PreprocessParams {
    /// Parameters equivalent to `normalize` / `mask_clouds` flags
    pub fn from_flags(normalize: bool, mask_clouds: bool, cloud_threshold: f32) -> Self {
        Self {
            normalization: if normalize {
                Normalization::MinMax
            } else {
                Normalization::None
            },
            mask_clouds,
            cloud_threshold,
        }
    }

    pub fn validate(&self) -> TerraResult<()> {
        if let Normalization::Reflectance { divisor } = self.normalization {
            if !(divisor.is_finite() && divisor > 0.0) {
                return Err(TerraError::Config(format!(
                    "Reflectance divisor must be positive, got {}",
                    divisor
                )));
            }
        }
        if !self.cloud_threshold.is_finite() {
            return Err(TerraError::Config("Cloud threshold must be finite".to_string()));
        }
        Ok(())
    }
}

/// Model-ready image in `(height, width, channels)` layout
#[derive(Debug, Clone)]
pub struct PreprocessedImage {
    data: Array3<f32>,
    cloud_fraction: f64,
}

impl PreprocessedImage {
    pub fn new(data: Array3<f32>) -> Self {
        Self {
            data,
            cloud_fraction: 0.0,
        }
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    /// `(height, width, channels)`
    pub fn shape(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Fraction of pixels that were cloud-masked before resampling
    pub fn cloud_fraction(&self) -> f64 {
        self.cloud_fraction
    }
}

/// Normalization, cloud masking and model-shape fitting of raster stacks
pub struct Preprocessor {
    cloud_detector: CloudDetector,
}

impl Preprocessor {
    pub fn new() -> Self {
        Self {
            cloud_detector: CloudDetector::new(),
        }
    }

    /// Sanitize, normalize and cloud-mask, keeping the band-major layout.
    ///
    /// Returns the processed stack and the masked cloud fraction.
    pub fn prepare(
        &self,
        image: &RasterImage,
        source: &SatelliteSource,
        params: &PreprocessParams,
    ) -> TerraResult<(BandStack, f64)> {
        params.validate()?;
        if !source.is_known() {
            log::warn!("Unknown source: {}, using fallback band indices", source);
        }

        let mut data = image.data().clone();
        sanitize(&mut data);

        match params.normalization {
            Normalization::None => {}
            Normalization::MinMax => normalize_min_max(&mut data),
            Normalization::Reflectance { divisor } => normalize_reflectance(&mut data, divisor),
        }

        let mut clouds = 0.0;
        if params.mask_clouds {
            let mask = self.cloud_detector.detect(&data, source, params.cloud_threshold);
            clouds = cloud_fraction(&mask);
            apply_mask(&mut data, &mask);
        }

        log::info!("Preprocessed image data with shape {:?}", data.dim());
        Ok((data, clouds))
    }

    /// Full preprocessing to the model's `(height, width, channels)` contract
    pub fn preprocess(
        &self,
        image: &RasterImage,
        source: &SatelliteSource,
        params: &PreprocessParams,
        input_shape: (usize, usize, usize),
    ) -> TerraResult<PreprocessedImage> {
        let (height, width, channels) = input_shape;
        if height == 0 || width == 0 || channels == 0 {
            return Err(TerraError::Config(format!(
                "Invalid model input shape {:?}",
                input_shape
            )));
        }

        let (data, cloud_fraction) = self.prepare(image, source, params)?;
        let data = to_model_layout(&data, input_shape);
        log::debug!("Model input shape: {:?}", data.dim());

        Ok(PreprocessedImage {
            data,
            cloud_fraction,
        })
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Replace NaN and +/-Inf with 0
pub fn sanitize(data: &mut BandStack) {
    data.mapv_inplace(|v| if v.is_finite() { v } else { 0.0 });
}

/// Scale every band independently to [0, 1]
pub fn normalize_min_max(data: &mut BandStack) {
    #[cfg(feature = "parallel")]
    data.axis_iter_mut(Axis(0))
        .into_par_iter()
        .for_each(|mut band| normalize_band(&mut band));

    #[cfg(not(feature = "parallel"))]
    data.axis_iter_mut(Axis(0))
        .for_each(|mut band| normalize_band(&mut band));
}

fn normalize_band(band: &mut ArrayViewMut2<f32>) {
    let (min, max) = band
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = max - min;

    if range > f32::EPSILON {
        band.mapv_inplace(|v| (v - min) / range);
    } else {
        // constant band: nothing to scale, and no division by zero
        band.fill(0.0);
    }
}

pub fn normalize_reflectance(data: &mut BandStack, divisor: f32) {
    data.mapv_inplace(|v| (v / divisor).clamp(0.0, 1.0));
}

/// Bilinear resampling with half-pixel centres
pub fn resize_bilinear(band: &ArrayView2<f32>, out_height: usize, out_width: usize) -> Array2<f32> {
    let (in_height, in_width) = band.dim();
    if (in_height, in_width) == (out_height, out_width) {
        return band.to_owned();
    }

    let scale_y = in_height as f64 / out_height as f64;
    let scale_x = in_width as f64 / out_width as f64;
    let max_y = (in_height - 1) as f64;
    let max_x = (in_width - 1) as f64;

    let x_taps: Vec<(usize, usize, f32)> = (0..out_width)
        .map(|x| source_taps(x, scale_x, max_x, in_width))
        .collect();

    let mut out = Array2::zeros((out_height, out_width));
    for y in 0..out_height {
        let (y0, y1, wy) = source_taps(y, scale_y, max_y, in_height);
        for (x, &(x0, x1, wx)) in x_taps.iter().enumerate() {
            let top = band[[y0, x0]] * (1.0 - wx) + band[[y0, x1]] * wx;
            let bottom = band[[y1, x0]] * (1.0 - wx) + band[[y1, x1]] * wx;
            out[[y, x]] = top * (1.0 - wy) + bottom * wy;
        }
    }
    out
}

fn source_taps(dst: usize, scale: f64, max_src: f64, len: usize) -> (usize, usize, f32) {
    let src = ((dst as f64 + 0.5) * scale - 0.5).clamp(0.0, max_src);
    let i0 = src.floor() as usize;
    let i1 = (i0 + 1).min(len - 1);
    (i0, i1, (src - i0 as f64) as f32)
}

/// Resample spatially and move channels last.
///
/// Channels beyond the available bands are zero-filled, extra bands dropped.
pub fn to_model_layout(data: &BandStack, input_shape: (usize, usize, usize)) -> Array3<f32> {
    let (height, width, channels) = input_shape;
    let band_count = data.len_of(Axis(0));
    if band_count < channels {
        log::debug!("Zero-filling {} missing channel(s)", channels - band_count);
    } else if band_count > channels {
        log::debug!("Dropping {} excess band(s)", band_count - channels);
    }

    let mut out = Array3::zeros((height, width, channels));
    for (channel, band) in data.axis_iter(Axis(0)).take(channels).enumerate() {
        let resized = resize_bilinear(&band, height, width);
        out.slice_mut(s![.., .., channel]).assign(&resized);
    }
    out
}
