//! I/O modules for reading and writing georeferenced rasters

pub mod raster;

pub use raster::{RasterReader, RasterWriter};
