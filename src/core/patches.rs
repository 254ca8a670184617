//! Sliding-window tiling of large rasters

use crate::types::{RasterImage, TerraError, TerraResult};
use ndarray::{s, Axis};
use serde::{Deserialize, Serialize};

/// Tiling parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchParams {
    pub patch_size: usize,
    /// Window step; equal to `patch_size` for non-overlapping tiles
    pub stride: usize,
    /// Minimum fraction of valid pixels for a tile to be kept
    pub min_valid_fraction: f64,
}

impl Default for PatchParams {
    fn default() -> Self {
        Self {
            patch_size: 256,
            stride: 128,
            min_valid_fraction: 0.8,
        }
    }
}

impl PatchParams {
    pub fn validate(&self) -> TerraResult<()> {
        if self.patch_size == 0 || self.stride == 0 {
            return Err(TerraError::Config(format!(
                "Patch size and stride must be positive, got {} and {}",
                self.patch_size, self.stride
            )));
        }
        Ok(())
    }
}

/// A tile and the position of its top-left pixel in the source raster
#[derive(Debug, Clone)]
pub struct Patch {
    pub row: usize,
    pub col: usize,
    pub image: RasterImage,
}

pub struct PatchExtractor;

impl PatchExtractor {
    /// Cut `image` into `patch_size` x `patch_size` tiles, row-major from (0, 0).
    ///
    /// Border windows that do not fit entirely inside the image are dropped.
    /// The source image is left untouched.
    pub fn extract(image: &RasterImage, params: &PatchParams) -> TerraResult<Vec<Patch>> {
        params.validate()?;
        let size = params.patch_size;
        let (height, width) = (image.height(), image.width());
        log::debug!(
            "Extracting {}x{} patches with stride {} from {}x{} image",
            size,
            size,
            params.stride,
            height,
            width
        );

        let mut patches = Vec::new();
        if height < size || width < size {
            log::warn!("Image {}x{} is smaller than patch size {}", height, width, size);
            return Ok(patches);
        }

        for row in (0..=height - size).step_by(params.stride) {
            for col in (0..=width - size).step_by(params.stride) {
                let tile = image
                    .data()
                    .slice(s![.., row..row + size, col..col + size])
                    .to_owned();

                if valid_fraction(&tile) < params.min_valid_fraction {
                    continue;
                }

                let georef = image.georef().window(row, col, size, size);
                patches.push(Patch {
                    row,
                    col,
                    image: RasterImage::new(tile, georef)?,
                });
            }
        }

        log::info!("Extracted {} patches", patches.len());
        Ok(patches)
    }
}

/// Fraction of pixels with at least one finite non-zero band value
fn valid_fraction(tile: &ndarray::Array3<f32>) -> f64 {
    let (_, height, width) = tile.dim();
    let total = height * width;
    if total == 0 {
        return 0.0;
    }
    let valid = tile
        .lanes(Axis(0))
        .into_iter()
        .filter(|pixel| pixel.iter().any(|v| v.is_finite() && *v != 0.0))
        .count();
    valid as f64 / total as f64
}
