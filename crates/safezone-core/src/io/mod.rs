//! On-disk formats: GeoTIFF rasters and GeoJSON geometries.

pub mod geotiff;
pub mod vector;

pub use geotiff::{read_raster, write_raster};
pub use vector::{read_zone, write_safest_point};
