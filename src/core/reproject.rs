use crate::types::{BoundingBox, GeoReference, TerraResult};
use gdal::spatial_ref::{AxisMappingStrategy, CoordTransform, SpatialRef};

/// Intermediate points per edge when transforming bounds (GDAL's recommended default)
const DENSIFY_POINTS: i32 = 21;

const WGS84_EPSG: u32 = 4326;

/// Raster bounds expressed in WGS84 longitude/latitude.
///
/// Rasters already in EPSG:4326, or without any CRS, are passed through.
pub fn reproject_to_wgs84(georef: &GeoReference) -> TerraResult<BoundingBox> {
    let bounds = &georef.bounds;
    let passthrough = BoundingBox {
        min_lon: bounds.min_x,
        max_lon: bounds.max_x,
        min_lat: bounds.min_y,
        max_lat: bounds.max_y,
    };

    let crs = match georef.crs.as_deref() {
        None => {
            log::warn!("Raster has no CRS, treating bounds as WGS84");
            return Ok(passthrough);
        }
        Some(_) if georef.is_wgs84() => return Ok(passthrough),
        Some(crs) => crs,
    };

    let mut source = SpatialRef::from_definition(crs)?;
    if matches!(source.auth_code(), Ok(code) if code as u32 == WGS84_EPSG) {
        return Ok(passthrough);
    }
    let mut target = SpatialRef::from_epsg(WGS84_EPSG)?;

    // geotransform coordinates are x/y (lon/lat), not authority axis order
    source.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
    target.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);

    let transform = CoordTransform::new(&source, &target)?;
    let out = transform.transform_bounds(
        &[bounds.min_x, bounds.min_y, bounds.max_x, bounds.max_y],
        DENSIFY_POINTS,
    )?;

    log::debug!("Reprojected bounds from {} to EPSG:{}: {:?}", crs, WGS84_EPSG, out);
    Ok(BoundingBox {
        min_lon: out[0],
        min_lat: out[1],
        max_lon: out[2],
        max_lat: out[3],
    })
}
