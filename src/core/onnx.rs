//! ONNX Runtime backed segmentation model

use crate::core::model::{ClassProbabilityMap, ModelSpec, SegmentationModel};
use crate::core::preprocess::PreprocessedImage;
use crate::types::{TerraError, TerraResult};
use ndarray::{Array3, Axis, CowArray, Ix4};
use ort::{Environment, GraphOptimizationLevel, Session, SessionBuilder, Value};
use std::path::Path;

/// Segmentation network exported to ONNX with an NHWC float input and an
/// `(1, height, width, num_classes)` output.
pub struct OnnxSegmentationModel {
    session: Session,
    spec: ModelSpec,
    apply_softmax: bool,
}

impl OnnxSegmentationModel {
    /// Load a model artifact once; the session is reused for every call.
    ///
    /// `apply_softmax` is for artifacts exported without the final softmax.
    pub fn load<P: AsRef<Path>>(
        model_path: P,
        spec: ModelSpec,
        apply_softmax: bool,
    ) -> TerraResult<Self> {
        let model_path = model_path.as_ref();
        log::info!("Loading segmentation model from {}", model_path.display());

        let environment = Environment::builder()
            .with_name("terrawatch")
            .build()?
            .into_arc();

        let session = SessionBuilder::new(&environment)?
            .with_optimization_level(GraphOptimizationLevel::Level1)?
            .with_model_from_file(model_path)?;

        if let Some(input) = session.inputs.first() {
            log::info!("Model input '{}': {:?}", input.name, input.dimensions);
            check_declared_dims(&input.dimensions, &spec)?;
        }
        if let Some(output) = session.outputs.first() {
            log::info!("Model output '{}': {:?}", output.name, output.dimensions);
        }

        Ok(Self {
            session,
            spec,
            apply_softmax,
        })
    }
}

/// Compare the artifact's declared NHWC input with the configured shape;
/// dynamic dimensions are accepted.
fn check_declared_dims(dims: &[Option<u32>], spec: &ModelSpec) -> TerraResult<()> {
    let (height, width, channels) = spec.input_shape;
    let expected = [None, Some(height), Some(width), Some(channels)];
    if dims.len() != expected.len() {
        return Err(TerraError::Model(format!(
            "Expected a 4-D NHWC model input, artifact declares {} dimensions",
            dims.len()
        )));
    }

    for (declared, wanted) in dims.iter().zip(expected) {
        if let (Some(declared), Some(wanted)) = (declared, wanted) {
            if *declared as usize != wanted {
                return Err(TerraError::ShapeMismatch {
                    expected: vec![height, width, channels],
                    actual: dims.iter().skip(1).map(|d| d.unwrap_or(0) as usize).collect(),
                });
            }
        }
    }
    Ok(())
}

impl SegmentationModel for OnnxSegmentationModel {
    fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    fn predict(&self, image: &PreprocessedImage) -> TerraResult<ClassProbabilityMap> {
        self.spec.check_input(image)?;

        let batch = image.data().view().insert_axis(Axis(0)).into_dyn();
        let batch = CowArray::from(batch);
        let inputs = vec![Value::from_array(self.session.allocator(), &batch)?];
        let outputs = self.session.run(inputs)?;

        let output = outputs
            .first()
            .ok_or_else(|| TerraError::Model("Model produced no outputs".to_string()))?;
        let tensor = output.try_extract::<f32>()?;
        let view = tensor
            .view()
            .into_dimensionality::<Ix4>()
            .map_err(|e| TerraError::Model(format!("Unexpected output rank: {}", e)))?;

        let scores: Array3<f32> = view.index_axis(Axis(0), 0).to_owned();
        let map = if self.apply_softmax {
            ClassProbabilityMap::from_logits(scores)?
        } else {
            ClassProbabilityMap::new(scores)?
        };
        self.spec.check_output(&map)?;
        Ok(map)
    }
}
