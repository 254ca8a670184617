use ndarray::{Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Single band of reflectance or index values (row x col)
pub type Band2 = Array2<f32>;

/// Multi-band raster data (band x row x col)
pub type BandStack = Array3<f32>;

/// Geospatial bounding box in WGS84 degrees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// `[min_lon, min_lat, max_lon, max_lat]`
    pub fn to_array(&self) -> [f64; 4] {
        [self.min_lon, self.min_lat, self.max_lon, self.max_lat]
    }
}

/// Raster extent in the raster's native coordinate reference system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

/// Geospatial transformation parameters (GDAL affine ordering)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn identity() -> Self {
        Self {
            top_left_x: 0.0,
            pixel_width: 1.0,
            rotation_x: 0.0,
            top_left_y: 0.0,
            rotation_y: 0.0,
            pixel_height: 1.0,
        }
    }

    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Map a (fractional) pixel position to georeferenced coordinates
    pub fn pixel_to_geo(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self.top_left_x + col * self.pixel_width + row * self.rotation_x;
        let y = self.top_left_y + col * self.rotation_y + row * self.pixel_height;
        (x, y)
    }

    /// Extent covered by a `width` x `height` raster.
    ///
    /// All four corners are transformed so that rotated and north-down
    /// rasters produce a proper min/max box.
    pub fn bounds(&self, width: usize, height: usize) -> Bounds {
        let (w, h) = (width as f64, height as f64);
        let corners = [
            self.pixel_to_geo(0.0, 0.0),
            self.pixel_to_geo(w, 0.0),
            self.pixel_to_geo(0.0, h),
            self.pixel_to_geo(w, h),
        ];

        let mut bounds = Bounds {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        };
        for (x, y) in corners {
            bounds.min_x = bounds.min_x.min(x);
            bounds.min_y = bounds.min_y.min(y);
            bounds.max_x = bounds.max_x.max(x);
            bounds.max_y = bounds.max_y.max(y);
        }
        bounds
    }

    /// Transform of the sub-window whose top-left pixel is (`row`, `col`)
    pub fn offset(&self, row: usize, col: usize) -> Self {
        let (x, y) = self.pixel_to_geo(col as f64, row as f64);
        Self {
            top_left_x: x,
            top_left_y: y,
            ..self.clone()
        }
    }

    /// Nominal ground resolution (x, y), always positive
    pub fn resolution(&self) -> (f64, f64) {
        (
            self.pixel_width.hypot(self.rotation_y),
            self.pixel_height.hypot(self.rotation_x),
        )
    }
}

/// Where a raster sits on Earth
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoReference {
    /// `EPSG:<code>` when the raster has an EPSG authority, WKT otherwise
    pub crs: Option<String>,
    pub transform: GeoTransform,
    pub bounds: Bounds,
    pub resolution: (f64, f64),
}

impl GeoReference {
    pub fn new(crs: Option<String>, transform: GeoTransform, width: usize, height: usize) -> Self {
        let bounds = transform.bounds(width, height);
        let resolution = transform.resolution();
        Self {
            crs,
            transform,
            bounds,
            resolution,
        }
    }

    /// Georeference of a `width` x `height` window starting at (`row`, `col`)
    pub fn window(&self, row: usize, col: usize, width: usize, height: usize) -> Self {
        Self::new(self.crs.clone(), self.transform.offset(row, col), width, height)
    }

    /// True when the CRS is (or is assumed to be) WGS84 geographic
    pub fn is_wgs84(&self) -> bool {
        match &self.crs {
            None => true,
            Some(crs) => crs.eq_ignore_ascii_case("EPSG:4326"),
        }
    }
}

/// Multi-band raster with its georeferencing.
///
/// Bands are stored band-major (`[band][row][col]`); every band shares the
/// same spatial dimensions and there is at least one band.
#[derive(Debug, Clone)]
pub struct RasterImage {
    data: BandStack,
    georef: GeoReference,
}

impl RasterImage {
    pub fn new(data: BandStack, georef: GeoReference) -> TerraResult<Self> {
        let (bands, height, width) = data.dim();
        if bands == 0 {
            return Err(TerraError::InvalidFormat(
                "Raster must contain at least one band".to_string(),
            ));
        }
        if height == 0 || width == 0 {
            return Err(TerraError::InvalidFormat(format!(
                "Raster has empty spatial extent {}x{}",
                height, width
            )));
        }
        Ok(Self { data, georef })
    }

    /// Build an image from individual bands, which must share one shape
    pub fn from_bands(bands: &[Band2], georef: GeoReference) -> TerraResult<Self> {
        let first = bands.first().ok_or_else(|| {
            TerraError::InvalidFormat("Raster must contain at least one band".to_string())
        })?;
        let (height, width) = first.dim();
        let mut data = BandStack::zeros((bands.len(), height, width));
        for (i, band) in bands.iter().enumerate() {
            if band.dim() != (height, width) {
                return Err(TerraError::InvalidFormat(format!(
                    "Band {} has shape {:?}, expected {:?}",
                    i + 1,
                    band.dim(),
                    (height, width)
                )));
            }
            data.index_axis_mut(Axis(0), i).assign(band);
        }
        Self::new(data, georef)
    }

    pub fn data(&self) -> &BandStack {
        &self.data
    }

    pub fn georef(&self) -> &GeoReference {
        &self.georef
    }

    pub fn band_count(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn height(&self) -> usize {
        self.data.len_of(Axis(1))
    }

    pub fn width(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    /// Band at a 0-based channel index, if present
    pub fn band(&self, channel: usize) -> Option<ArrayView2<'_, f32>> {
        if channel < self.band_count() {
            Some(self.data.index_axis(Axis(0), channel))
        } else {
            None
        }
    }
}

/// Error types for anomaly detection processing
#[derive(Debug, thiserror::Error)]
pub enum TerraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No model loaded. Load a pre-trained model before running inference")]
    ModelNotLoaded,

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Model error: {0}")]
    Model(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "onnx")]
    #[error("ONNX runtime error: {0}")]
    Onnx(#[from] ort::OrtError),
}

impl TerraError {
    /// Raster could not be read (missing file, not a raster, corrupt data)
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            TerraError::Io(_) | TerraError::Gdal(_) | TerraError::InvalidFormat(_)
        )
    }

    /// Model missing or fed the wrong input; fatal to the current call
    pub fn is_model(&self) -> bool {
        matches!(
            self,
            TerraError::ModelNotLoaded | TerraError::ShapeMismatch { .. } | TerraError::Model(_)
        )
    }
}

/// Result type for anomaly detection operations
pub type TerraResult<T> = Result<T, TerraError>;
