use approx::assert_abs_diff_eq;
use ndarray::{Array3, Axis};
use tempfile::TempDir;
use terrawatch::core::reproject_to_wgs84;
use terrawatch::{GeoReference, GeoTransform, RasterReader, RasterWriter, TerraError};

fn utm_georef(width: usize, height: usize) -> GeoReference {
    let transform = GeoTransform::from_gdal([500000.0, 10.0, 0.0, 4000000.0, 0.0, -10.0]);
    GeoReference::new(Some("EPSG:32610".to_string()), transform, width, height)
}

#[test]
fn test_geotiff_roundtrip_preserves_georeference() {
    let _ = env_logger::builder().is_test(true).try_init();
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let path = temp_dir.path().join("nested").join("scene.tif");

    let data = Array3::from_shape_fn((3, 20, 30), |(b, r, c)| (b * 1000 + r * 30 + c) as f32);
    let georef = utm_georef(30, 20);
    RasterWriter::write_geotiff(&path, &data, &georef, None).expect("Failed to write GeoTIFF");

    let image = RasterReader::open(&path).expect("Failed to read GeoTIFF");
    assert_eq!(image.band_count(), 3);
    assert_eq!((image.height(), image.width()), (20, 30));
    assert_eq!(image.data(), &data);

    let read_georef = image.georef();
    assert_eq!(read_georef.crs.as_deref(), Some("EPSG:32610"));
    assert_eq!(read_georef.transform, georef.transform);
    assert_abs_diff_eq!(read_georef.bounds.max_x, 500300.0);
    assert_abs_diff_eq!(read_georef.bounds.min_y, 3999800.0);
    assert_eq!(read_georef.resolution, (10.0, 10.0));

    let metadata_only = RasterReader::read_georeference(&path).unwrap();
    assert_eq!(&metadata_only, read_georef);
}

#[test]
fn test_nodata_pixels_become_nan() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nodata.tif");

    let mut data = Array3::from_elem((2, 4, 4), 7.0f32);
    data[[0, 1, 1]] = -9999.0;
    data[[1, 3, 2]] = -9999.0;
    RasterWriter::write_geotiff(&path, &data, &utm_georef(4, 4), Some(-9999.0)).unwrap();

    let image = RasterReader::open(&path).unwrap();
    assert!(image.data()[[0, 1, 1]].is_nan());
    assert!(image.data()[[1, 3, 2]].is_nan());
    let nan_count = image.data().iter().filter(|v| v.is_nan()).count();
    assert_eq!(nan_count, 2);
}

#[test]
fn test_single_band_writer() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("ndvi.tif");

    let layer = Array3::from_elem((1, 5, 6), 0.25f32).index_axis_move(Axis(0), 0);
    RasterWriter::write_band(&path, &layer, &utm_georef(6, 5)).unwrap();

    let image = RasterReader::open(&path).unwrap();
    assert_eq!(image.band_count(), 1);
    assert!(image.data().iter().all(|&v| v == 0.25));
}

#[test]
fn test_utm_bounds_reprojected_to_wgs84() {
    // 1 km x 1 km at the zone 10N central meridian, ~36.1N
    let georef = utm_georef(100, 100);
    let bbox = reproject_to_wgs84(&georef).expect("Reprojection failed");

    assert!(bbox.min_lon < bbox.max_lon);
    assert!(bbox.min_lat < bbox.max_lat);
    assert!(bbox.min_lon > -123.05 && bbox.max_lon < -122.95, "lon {:?}", bbox);
    assert!(bbox.min_lat > 36.0 && bbox.max_lat < 36.3, "lat {:?}", bbox);
    assert_abs_diff_eq!(bbox.min_lon, -123.0, epsilon = 1e-4);
}

#[test]
fn test_unreadable_file_is_io_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("not_a_raster.tif");
    std::fs::write(&path, b"definitely not a tiff").unwrap();

    let err = RasterReader::open(&path).unwrap_err();
    assert!(err.is_io(), "unexpected error {:?}", err);

    let missing = RasterReader::open(temp_dir.path().join("missing.tif")).unwrap_err();
    assert!(matches!(missing, TerraError::Io(_)));
}
