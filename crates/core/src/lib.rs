//! # polystat core
//!
//! Core types and I/O shared by the zonal statistics engine.
//!
//! This crate provides:
//! - `Raster<T>`: generic georeferenced grid
//! - `GeoTransform` and `PixelWindow`: pixel/world coordinate mapping
//! - `CRS`: coordinate reference system identity
//! - `Zone`: polygon features with attributes
//! - Raster sources (GeoTIFF, in-memory) and the `CompositeRasterView`
//!   that aligns them onto one grid and serves windowed reads

pub mod crs;
pub mod error;
pub mod io;
pub mod raster;
pub mod vector;

pub use crs::CRS;
pub use error::{Error, Result};
pub use io::{CompositeRasterView, GeoTiffSource, LayerInfo, MemorySource, RasterSource, WindowData};
pub use raster::{GeoTransform, PixelWindow, Raster, RasterElement};
pub use vector::{AttributeValue, Zone, ZoneCollection};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::crs::CRS;
    pub use crate::error::{Error, Result};
    pub use crate::io::{CompositeRasterView, RasterSource};
    pub use crate::raster::{GeoTransform, PixelWindow, Raster, RasterElement};
    pub use crate::vector::{AttributeValue, Zone};
}
