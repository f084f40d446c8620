//! Raster sources: header metadata plus windowed band reads

use std::fmt;
use std::path::{Path, PathBuf};

use ndarray::{Array2, s};
use sha2::{Digest, Sha256};

use super::native::{read_geotiff_info, read_geotiff_window};
use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, PixelWindow, Raster};

/// Header-level description of a raster source
#[derive(Debug, Clone)]
pub struct SourceInfo {
    /// Name used to build output column and layer identifiers
    pub identifier: String,
    pub width: usize,
    pub height: usize,
    pub band_count: usize,
    pub transform: GeoTransform,
    pub crs: Option<CRS>,
    /// No-data value per band
    pub nodata: Vec<Option<f64>>,
}

impl SourceInfo {
    /// Pixel size as (x, y), both positive
    pub fn resolution(&self) -> (f64, f64) {
        (self.transform.pixel_width.abs(), self.transform.pixel_height.abs())
    }

    /// World extent (min_x, min_y, max_x, max_y)
    pub fn extent(&self) -> (f64, f64, f64, f64) {
        self.transform.bounds(self.width, self.height)
    }
}

/// A raster that can serve windows of its bands.
///
/// Implementations must be safe to read from several workers at once
/// without external locking.
pub trait RasterSource: Send + Sync + fmt::Debug {
    fn info(&self) -> &SourceInfo;

    /// Read `bands` (0-based) of `window` as f64 arrays of the window's shape.
    ///
    /// Values are raw; cells equal to the band's no-data value are not masked.
    fn read_window(&self, window: &PixelWindow, bands: &[usize]) -> Result<Vec<Array2<f64>>>;

    /// Stable description of the source contents, used to detect that an
    /// input changed between runs
    fn identity(&self) -> String;
}

/// GeoTIFF file on disk.
///
/// Only the header is read on open; every window read opens its own
/// decoder, so concurrent reads share nothing.
#[derive(Debug, Clone)]
pub struct GeoTiffSource {
    path: PathBuf,
    info: SourceInfo,
}

impl GeoTiffSource {
    /// Open a GeoTIFF, named after its file stem
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "raster".to_string());
        Self::open_as(path, name)
    }

    /// Open a GeoTIFF under an explicit identifier
    pub fn open_as<P: AsRef<Path>>(path: P, identifier: impl Into<String>) -> Result<Self> {
        let path = path.as_ref();
        let header = read_geotiff_info(path)?;
        if header.width == 0 || header.height == 0 || header.bands == 0 {
            return Err(Error::raster_open(path, "raster has no cells"));
        }
        if !header.transform.is_north_up() {
            return Err(Error::raster_open(path, "rotated geotransforms are not supported"));
        }
        let info = SourceInfo {
            identifier: identifier.into(),
            width: header.width,
            height: header.height,
            band_count: header.bands,
            transform: header.transform,
            crs: header.crs,
            nodata: vec![header.nodata; header.bands],
        };
        tracing::debug!(
            "Opened {} ({}x{}, {} band(s))",
            path.display(),
            info.width,
            info.height,
            info.band_count
        );
        Ok(Self {
            path: path.to_path_buf(),
            info,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RasterSource for GeoTiffSource {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn read_window(&self, window: &PixelWindow, bands: &[usize]) -> Result<Vec<Array2<f64>>> {
        read_geotiff_window(&self.path, window, bands)
    }

    fn identity(&self) -> String {
        let (len, modified) = match std::fs::metadata(&self.path) {
            Ok(meta) => {
                let modified = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_nanos())
                    .unwrap_or(0);
                (meta.len(), modified)
            }
            Err(_) => (0, 0),
        };
        format!("file:{}:{}:{}", self.path.display(), len, modified)
    }
}

/// Bands held in memory, all sharing one grid
#[derive(Debug, Clone)]
pub struct MemorySource {
    info: SourceInfo,
    bands: Vec<Array2<f64>>,
    digest: String,
}

impl MemorySource {
    /// Build from one or more bands; grid metadata comes from the first
    pub fn new(identifier: impl Into<String>, bands: Vec<Raster<f64>>) -> Result<Self> {
        let identifier = identifier.into();
        let first = bands.first().ok_or_else(|| Error::InvalidParameter {
            name: "bands",
            value: identifier.clone(),
            reason: "a memory source needs at least one band".into(),
        })?;
        let (rows, cols) = first.shape();
        if rows == 0 || cols == 0 {
            return Err(Error::InvalidDimensions {
                width: cols,
                height: rows,
            });
        }
        if let Some(other) = bands.iter().find(|b| b.shape() != (rows, cols)) {
            let (ar, ac) = other.shape();
            return Err(Error::SizeMismatch {
                er: rows,
                ec: cols,
                ar,
                ac,
            });
        }

        let info = SourceInfo {
            identifier,
            width: cols,
            height: rows,
            band_count: bands.len(),
            transform: *first.transform(),
            crs: first.crs().cloned(),
            nodata: bands.iter().map(|b| b.nodata()).collect(),
        };

        let mut hasher = Sha256::new();
        for band in &bands {
            hasher.update(band.nodata().unwrap_or(f64::NAN).to_le_bytes());
            for v in band.data().iter() {
                hasher.update(v.to_le_bytes());
            }
        }
        let digest = format!("{:x}", hasher.finalize());

        Ok(Self {
            info,
            bands: bands.into_iter().map(|b| b.data().clone()).collect(),
            digest,
        })
    }
}

impl RasterSource for MemorySource {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn read_window(&self, window: &PixelWindow, bands: &[usize]) -> Result<Vec<Array2<f64>>> {
        if window.col_end() > self.info.width || window.row_end() > self.info.height {
            return Err(Error::IndexOutOfBounds {
                row: window.row_end(),
                col: window.col_end(),
                rows: self.info.height,
                cols: self.info.width,
            });
        }
        bands
            .iter()
            .map(|&b| {
                let data = self.bands.get(b).ok_or(Error::BandOutOfRange {
                    band: b,
                    count: self.bands.len(),
                })?;
                Ok(data
                    .slice(s![
                        window.row_off..window.row_end(),
                        window.col_off..window.col_end()
                    ])
                    .to_owned())
            })
            .collect()
    }

    fn identity(&self) -> String {
        format!("memory:{}:{}", self.info.identifier, self.digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::native::fixture::{GeoTiffOptions, write_geotiff};

    #[test]
    fn test_memory_source_reads_window() {
        let data: Vec<f64> = (0..30).map(|v| v as f64).collect();
        let band = Raster::from_vec(data, 5, 6).unwrap();
        let src = MemorySource::new("dem", vec![band.clone(), band]).unwrap();
        assert_eq!(src.info().band_count, 2);

        let out = src.read_window(&PixelWindow::new(2, 1, 3, 2), &[1]).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0][(0, 0)], 8.0);
        assert_eq!(out[0][(1, 2)], 16.0);
        assert!(src.read_window(&PixelWindow::new(0, 0, 1, 1), &[2]).is_err());
    }

    #[test]
    fn test_memory_identity_tracks_content() {
        let a = MemorySource::new("x", vec![Raster::filled(3, 3, 1.0)]).unwrap();
        let b = MemorySource::new("x", vec![Raster::filled(3, 3, 1.0)]).unwrap();
        let c = MemorySource::new("x", vec![Raster::filled(3, 3, 2.0)]).unwrap();
        assert_eq!(a.identity(), b.identity());
        assert_ne!(a.identity(), c.identity());
    }

    #[test]
    fn test_memory_source_rejects_mismatched_bands() {
        let err = MemorySource::new("x", vec![Raster::new(3, 3), Raster::new(3, 4)]).unwrap_err();
        assert!(matches!(err, Error::SizeMismatch { .. }));
    }

    #[test]
    fn test_geotiff_source_open_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ndvi.tif");
        let raster = Raster::filled(8, 8, 0.5)
            .with_transform(GeoTransform::new(0.0, 8.0, 1.0, -1.0))
            .with_nodata(Some(-1.0));
        write_geotiff(&raster, &path, Some(GeoTiffOptions { epsg: Some(3857) })).unwrap();

        let src = GeoTiffSource::open(&path).unwrap();
        assert_eq!(src.info().identifier, "ndvi");
        assert_eq!(src.info().nodata, vec![Some(-1.0)]);
        assert_eq!(src.info().extent(), (0.0, 0.0, 8.0, 8.0));
        let out = src.read_window(&PixelWindow::new(1, 1, 2, 2), &[0]).unwrap();
        assert_eq!(out[0][(1, 1)], 0.5);
        assert!(src.identity().starts_with("file:"));
    }

    #[test]
    fn test_geotiff_source_open_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.tif");
        std::fs::write(&path, b"not a tiff").unwrap();
        assert!(matches!(
            GeoTiffSource::open(&path),
            Err(Error::RasterOpen { .. })
        ));
    }
}
