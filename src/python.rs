//! Python extension module

use crate::core::{AnomalyDetector, DetectorConfig, SatelliteSource, SpectralIndexEngine};
use crate::io::RasterReader;
use crate::types::TerraError;
use numpy::ToPyArray;
use pyo3::exceptions::{PyFileNotFoundError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;

fn to_py_err(err: TerraError) -> PyErr {
    match err {
        TerraError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => {
            PyFileNotFoundError::new_err(e.to_string())
        }
        TerraError::Config(_) | TerraError::ShapeMismatch { .. } | TerraError::Json(_) => {
            PyValueError::new_err(err.to_string())
        }
        other => PyRuntimeError::new_err(other.to_string()),
    }
}

/// Python wrapper for AnomalyDetector
#[pyclass(name = "AnomalyDetector")]
struct PyAnomalyDetector {
    inner: AnomalyDetector,
}

#[pymethods]
impl PyAnomalyDetector {
    #[new]
    #[pyo3(signature = (config_json=None))]
    fn new(config_json: Option<&str>) -> PyResult<Self> {
        let config = match config_json {
            Some(json) => serde_json::from_str::<DetectorConfig>(json)
                .map_err(|e| to_py_err(e.into()))?,
            None => DetectorConfig::default(),
        };
        let inner = AnomalyDetector::new(config).map_err(to_py_err)?;
        Ok(Self { inner })
    }

    fn load_model(&mut self, model_path: &str) -> PyResult<()> {
        self.inner.load_model(model_path).map_err(to_py_err)
    }

    #[getter]
    fn has_model(&self) -> bool {
        self.inner.has_model()
    }

    #[getter]
    fn anomaly_types(&self) -> Vec<String> {
        self.inner.anomaly_types().to_vec()
    }

    /// Detection result as a JSON string
    #[pyo3(signature = (image_path, threshold=None))]
    fn detect(&self, image_path: &str, threshold: Option<f64>) -> PyResult<String> {
        let result = self
            .inner
            .detect(image_path, threshold, serde_json::Map::new())
            .map_err(to_py_err)?;
        result.to_json().map_err(to_py_err)
    }
}

/// Spectral indices of a raster as a dict of 2-D float32 arrays
#[pyfunction]
#[pyo3(signature = (image_path, source="sentinel-2", indices=None))]
fn compute_indices<'py>(
    py: Python<'py>,
    image_path: &str,
    source: &str,
    indices: Option<Vec<String>>,
) -> PyResult<&'py PyDict> {
    let image = RasterReader::open(image_path).map_err(to_py_err)?;
    let names = indices.unwrap_or_else(|| vec!["ndvi".into(), "ndwi".into(), "ndbi".into()]);
    let names: Vec<&str> = names.iter().map(String::as_str).collect();

    let engine = SpectralIndexEngine::new();
    let computed = engine.compute(&image, &SatelliteSource::parse(source), &names);

    let result = PyDict::new(py);
    for (name, values) in &computed {
        result.set_item(name, values.to_pyarray(py))?;
    }
    Ok(result)
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<PyAnomalyDetector>()?;
    m.add_function(wrap_pyfunction!(compute_indices, m)?)?;
    Ok(())
}
