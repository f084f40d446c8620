//! I/O: GeoTIFF files, raster sources, the composite view and GeoJSON zones

mod composite;
pub mod geojson;
mod native;
mod source;

pub use composite::{CompositeRasterView, LayerInfo, WindowData, is_valid_value};
pub use geojson::{parse_zones, read_zones};
pub use native::{GeoTiffInfo, read_geotiff_info, read_geotiff_window};
pub use source::{GeoTiffSource, MemorySource, RasterSource, SourceInfo};
