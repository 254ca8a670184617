//! Segmentation model interface.
//!
//! A model maps a `(height, width, channels)` image to a per-pixel categorical
//! distribution over `num_classes` classes. Class 0 is background; classes
//! `1..num_classes` correspond to the configured anomaly types in order.

use crate::core::preprocess::PreprocessedImage;
use crate::types::{TerraError, TerraResult};
use ndarray::{Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Tolerance on the per-pixel probability sum
pub const PROBABILITY_SUM_TOLERANCE: f32 = 1e-3;

/// Input/output contract of a segmentation model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// `(height, width, channels)`
    pub input_shape: (usize, usize, usize),
    /// Background plus one class per anomaly type
    pub num_classes: usize,
}

impl ModelSpec {
    pub fn new(input_shape: (usize, usize, usize), num_classes: usize) -> Self {
        Self {
            input_shape,
            num_classes,
        }
    }

    pub fn check_input(&self, image: &PreprocessedImage) -> TerraResult<()> {
        let actual = image.shape();
        if actual != self.input_shape {
            return Err(TerraError::ShapeMismatch {
                expected: vec![self.input_shape.0, self.input_shape.1, self.input_shape.2],
                actual: vec![actual.0, actual.1, actual.2],
            });
        }
        Ok(())
    }

    pub fn check_output(&self, map: &ClassProbabilityMap) -> TerraResult<()> {
        let (height, width, _) = self.input_shape;
        let actual = map.shape();
        if actual != (height, width, self.num_classes) {
            return Err(TerraError::ShapeMismatch {
                expected: vec![height, width, self.num_classes],
                actual: vec![actual.0, actual.1, actual.2],
            });
        }
        Ok(())
    }
}

/// Per-pixel class probabilities, `(height, width, num_classes)`.
///
/// Every pixel's probabilities sum to 1.
#[derive(Debug, Clone)]
pub struct ClassProbabilityMap {
    probabilities: Array3<f32>,
}

impl ClassProbabilityMap {
    /// Wrap model output that already is a categorical distribution
    pub fn new(probabilities: Array3<f32>) -> TerraResult<Self> {
        let (height, width, classes) = probabilities.dim();
        if height == 0 || width == 0 || classes == 0 {
            return Err(TerraError::Model(format!(
                "Empty probability map {:?}",
                probabilities.dim()
            )));
        }

        for (index, pixel) in probabilities.lanes(Axis(2)).into_iter().enumerate() {
            let sum: f32 = pixel.sum();
            if !sum.is_finite() || (sum - 1.0).abs() > PROBABILITY_SUM_TOLERANCE {
                return Err(TerraError::Model(format!(
                    "Pixel ({}, {}) probabilities sum to {}, expected 1",
                    index / width,
                    index % width,
                    sum
                )));
            }
        }

        Ok(Self { probabilities })
    }

    /// Per-pixel softmax over raw class scores
    pub fn from_logits(mut logits: Array3<f32>) -> TerraResult<Self> {
        for mut pixel in logits.lanes_mut(Axis(2)) {
            let max = pixel.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
            pixel.mapv_inplace(|v| (v - max).exp());
            let sum = pixel.sum();
            pixel.mapv_inplace(|v| v / sum);
        }
        Self::new(logits)
    }

    /// Map where every pixel is background with certainty
    pub fn background(height: usize, width: usize, num_classes: usize) -> Self {
        let mut probabilities = Array3::zeros((height, width, num_classes.max(1)));
        probabilities.index_axis_mut(Axis(2), 0).fill(1.0);
        Self { probabilities }
    }

    /// `(height, width, num_classes)`
    pub fn shape(&self) -> (usize, usize, usize) {
        self.probabilities.dim()
    }

    pub fn num_classes(&self) -> usize {
        self.probabilities.len_of(Axis(2))
    }

    /// Probability layer of one class
    pub fn class_layer(&self, class: usize) -> Option<ArrayView2<'_, f32>> {
        if class < self.num_classes() {
            Some(self.probabilities.index_axis(Axis(2), class))
        } else {
            None
        }
    }

    pub fn probabilities(&self) -> &Array3<f32> {
        &self.probabilities
    }

    pub(crate) fn into_inner(self) -> Array3<f32> {
        self.probabilities
    }
}

/// A trained semantic segmentation network.
///
/// Implementations hold read-only weights and may be shared across
/// concurrent inference calls.
pub trait SegmentationModel: Send + Sync {
    fn spec(&self) -> &ModelSpec;

    /// Run inference on a single image.
    ///
    /// Fails with `ShapeMismatch` when the image does not match
    /// `spec().input_shape`.
    fn predict(&self, image: &PreprocessedImage) -> TerraResult<ClassProbabilityMap>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_softmax_sums_to_one() {
        let logits = Array3::from_shape_fn((3, 3, 4), |(r, c, k)| {
            (r * 7 + c * 3 + k) as f32 * 0.37 - 2.0
        });
        let map = ClassProbabilityMap::from_logits(logits).unwrap();
        for pixel in map.probabilities().lanes(Axis(2)) {
            assert_abs_diff_eq!(pixel.sum(), 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_softmax_stable_for_large_logits() {
        let mut logits = Array3::zeros((1, 1, 2));
        logits[[0, 0, 0]] = 1000.0;
        let map = ClassProbabilityMap::from_logits(logits).unwrap();
        assert_abs_diff_eq!(map.probabilities()[[0, 0, 0]], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_rejects_non_distribution() {
        let probabilities = Array3::from_elem((2, 2, 3), 0.5);
        assert!(matches!(
            ClassProbabilityMap::new(probabilities),
            Err(TerraError::Model(_))
        ));
    }

    #[test]
    fn test_background_map() {
        let map = ClassProbabilityMap::background(4, 5, 3);
        assert_eq!(map.shape(), (4, 5, 3));
        assert!(map.class_layer(0).unwrap().iter().all(|&p| p == 1.0));
        assert!(map.class_layer(3).is_none());
    }

    #[test]
    fn test_spec_input_check() {
        let spec = ModelSpec::new((4, 4, 3), 2);
        let ok = PreprocessedImage::new(Array3::zeros((4, 4, 3)));
        let bad = PreprocessedImage::new(Array3::zeros((4, 4, 2)));
        assert!(spec.check_input(&ok).is_ok());
        match spec.check_input(&bad) {
            Err(TerraError::ShapeMismatch { expected, actual }) => {
                assert_eq!(expected, vec![4, 4, 3]);
                assert_eq!(actual, vec![4, 4, 2]);
            }
            other => panic!("expected shape mismatch, got {:?}", other),
        }
    }
}
