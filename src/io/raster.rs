use crate::types::{
    Band2, BandStack, GeoReference, GeoTransform, RasterImage, TerraError, TerraResult,
};
use gdal::raster::Buffer;
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager};
use ndarray::{Array2, Axis};
use std::path::Path;

/// Multi-band GeoTIFF (or any GDAL-readable raster) reader
pub struct RasterReader;

impl RasterReader {
    /// Read every band of a raster together with its georeferencing.
    ///
    /// Pixels matching a band's nodata value are returned as NaN.
    pub fn open<P: AsRef<Path>>(path: P) -> TerraResult<RasterImage> {
        let path = path.as_ref();
        log::info!("Loading raster: {}", path.display());

        let dataset = Self::open_dataset(path)?;
        let georef = Self::georeference(&dataset);
        let (width, height) = dataset.raster_size();
        let band_count = dataset.raster_count();

        if band_count < 1 {
            return Err(TerraError::InvalidFormat(format!(
                "{} contains no raster bands",
                path.display()
            )));
        }

        let mut bands = Vec::with_capacity(band_count as usize);
        for index in 1..=band_count {
            let rasterband = dataset.rasterband(index)?;
            let buffer = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;

            let mut band = Array2::from_shape_vec((height, width), buffer.into_shape_and_vec().1).map_err(|e| {
                TerraError::InvalidFormat(format!("Failed to reshape band {}: {}", index, e))
            })?;

            if let Some(nodata) = rasterband.no_data_value() {
                mask_nodata(&mut band, nodata);
            }

            bands.push(band);
        }

        log::info!(
            "Loaded {} band(s) of {}x{} pixels (CRS: {})",
            band_count,
            height,
            width,
            georef.crs.as_deref().unwrap_or("none")
        );

        RasterImage::from_bands(&bands, georef)
    }

    /// Read only the georeferencing of a raster
    pub fn read_georeference<P: AsRef<Path>>(path: P) -> TerraResult<GeoReference> {
        let dataset = Self::open_dataset(path.as_ref())?;
        Ok(Self::georeference(&dataset))
    }

    fn open_dataset(path: &Path) -> TerraResult<Dataset> {
        if !path.exists() {
            return Err(TerraError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Raster file not found: {}", path.display()),
            )));
        }
        Ok(Dataset::open(path)?)
    }

    fn georeference(dataset: &Dataset) -> GeoReference {
        let (width, height) = dataset.raster_size();

        let transform = match dataset.geo_transform() {
            Ok(gt) => GeoTransform::from_gdal(gt),
            Err(e) => {
                log::warn!("Raster has no geotransform ({}), using pixel coordinates", e);
                GeoTransform::identity()
            }
        };

        let crs = match dataset.spatial_ref() {
            Ok(srs) => crs_identifier(&srs),
            Err(_) => {
                log::warn!("Raster has no coordinate reference system");
                None
            }
        };

        log::debug!("Geotransform: {:?}", transform);
        GeoReference::new(crs, transform, width, height)
    }
}

/// `AUTHORITY:CODE` when available, WKT otherwise
fn crs_identifier(srs: &SpatialRef) -> Option<String> {
    match (srs.auth_name(), srs.auth_code()) {
        (Ok(name), Ok(code)) => Some(format!("{}:{}", name, code)),
        _ => srs.to_wkt().ok().filter(|wkt| !wkt.is_empty()),
    }
}

fn mask_nodata(band: &mut Band2, nodata: f64) {
    if nodata.is_nan() {
        return;
    }
    let nodata = nodata as f32;
    band.mapv_inplace(|v| if v == nodata { f32::NAN } else { v });
}

/// GeoTIFF writer for band stacks, index layers and masks
pub struct RasterWriter;

impl RasterWriter {
    /// Write a band-major stack as a Float32 GeoTIFF
    pub fn write_geotiff<P: AsRef<Path>>(
        output_path: P,
        data: &BandStack,
        georef: &GeoReference,
        nodata: Option<f64>,
    ) -> TerraResult<()> {
        let output_path = output_path.as_ref();
        log::info!("Saving GeoTIFF: {}", output_path.display());

        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let (band_count, height, width) = data.dim();
        if band_count == 0 {
            return Err(TerraError::InvalidFormat(
                "Cannot write a raster without bands".to_string(),
            ));
        }

        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let mut dataset = driver.create_with_band_type::<f32, _>(
            output_path,
            width,
            height,
            band_count,
        )?;

        dataset.set_geo_transform(&georef.transform.to_gdal())?;
        if let Some(crs) = &georef.crs {
            let srs = SpatialRef::from_definition(crs)?;
            dataset.set_spatial_ref(&srs)?;
        }

        for (i, band_data) in data.axis_iter(Axis(0)).enumerate() {
            let mut rasterband = dataset.rasterband(i + 1)?;
            let flat_data: Vec<f32> = band_data.iter().cloned().collect();
            let mut buffer = Buffer::new((width, height), flat_data);
            rasterband.write((0, 0), (width, height), &mut buffer)?;

            if nodata.is_some() {
                rasterband.set_no_data_value(nodata)?;
            }
        }

        log::debug!("Wrote {} band(s) of {}x{}", band_count, height, width);
        Ok(())
    }

    /// Write a single 2-D layer (spectral index, cloud mask, class layer)
    pub fn write_band<P: AsRef<Path>>(
        output_path: P,
        band: &Band2,
        georef: &GeoReference,
    ) -> TerraResult<()> {
        let stack = band.clone().insert_axis(Axis(0));
        Self::write_geotiff(output_path, &stack, georef, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_io_error() {
        let result = RasterReader::open("/nonexistent/path/scene.tif");
        match result {
            Err(e @ TerraError::Io(_)) => assert!(e.is_io()),
            other => panic!("expected I/O error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_mask_nodata() {
        let mut band = Band2::from_shape_vec((1, 3), vec![-9999.0, 1.0, 2.0]).unwrap();
        mask_nodata(&mut band, -9999.0);
        assert!(band[[0, 0]].is_nan());
        assert_eq!(band[[0, 1]], 1.0);
    }
}
