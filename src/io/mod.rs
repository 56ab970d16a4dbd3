//! Boundary layer for dtype-tagged raster inputs

pub mod raster;

pub use raster::{unwrap_rasters, RasterData};
