//! Several raster sources presented as one multi-band grid

use std::collections::HashSet;
use std::sync::Arc;

use ndarray::{Array2, ArrayView2};

use super::source::RasterSource;
use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, PixelWindow};

/// One band of the composite view
#[derive(Debug, Clone, PartialEq)]
pub struct LayerInfo {
    /// `{source}` for single-band sources, `{source}_b{n}` (1-based) otherwise
    pub id: String,
    /// Index of the owning source in the view
    pub source: usize,
    /// 0-based band within the source
    pub band: usize,
    pub nodata: Option<f64>,
}

/// Values of every layer over one window of the reference grid
#[derive(Debug, Clone)]
pub struct WindowData {
    pub window: PixelWindow,
    /// Transform of the window's top-left cell
    pub transform: GeoTransform,
    layers: Vec<Array2<f64>>,
    nodata: Vec<Option<f64>>,
}

impl WindowData {
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn layer(&self, index: usize) -> Option<ArrayView2<'_, f64>> {
        self.layers.get(index).map(|a| a.view())
    }

    pub fn nodata(&self, index: usize) -> Option<f64> {
        self.nodata.get(index).copied().flatten()
    }

    /// `true` when the cell holds a usable value for `layer`
    pub fn is_valid(&self, layer: usize, row: usize, col: usize) -> bool {
        match self.layers.get(layer).and_then(|a| a.get((row, col))) {
            Some(&v) => is_valid_value(v, self.nodata(layer)),
            None => false,
        }
    }
}

/// Finite and not equal to the no-data value
pub fn is_valid_value(value: f64, nodata: Option<f64>) -> bool {
    if !value.is_finite() {
        return false;
    }
    match nodata {
        Some(nd) if nd.is_nan() => true,
        Some(nd) if nd.abs() > 1e10 => value != nd,
        Some(nd) => (value - nd).abs() > 1e-10 * nd.abs().max(1.0),
        None => true,
    }
}

/// Read-only multi-band view over several sources, aligned to the grid of
/// the first one.
///
/// Sources on a different grid are resampled by nearest neighbour; cells
/// outside a source's extent read as NaN.
#[derive(Debug, Clone)]
pub struct CompositeRasterView {
    sources: Vec<Arc<dyn RasterSource>>,
    layers: Vec<LayerInfo>,
    transform: GeoTransform,
    width: usize,
    height: usize,
    crs: Option<CRS>,
}

impl CompositeRasterView {
    pub fn new(sources: Vec<Arc<dyn RasterSource>>) -> Result<Self> {
        let reference = sources
            .first()
            .ok_or_else(|| Error::Other("composite view needs at least one raster".into()))?
            .info()
            .clone();

        let mut seen = HashSet::new();
        let mut layers = Vec::new();
        for (index, source) in sources.iter().enumerate() {
            let info = source.info();
            if !seen.insert(info.identifier.clone()) {
                return Err(Error::InvalidParameter {
                    name: "raster",
                    value: info.identifier.clone(),
                    reason: "duplicate raster identifier".into(),
                });
            }
            if let (Some(a), Some(b)) = (&reference.crs, &info.crs) {
                if !a.is_equivalent(b) {
                    return Err(Error::CrsMismatch(a.identifier(), b.identifier()));
                }
            }
            for band in 0..info.band_count {
                let id = if info.band_count == 1 {
                    info.identifier.clone()
                } else {
                    format!("{}_b{}", info.identifier, band + 1)
                };
                layers.push(LayerInfo {
                    id,
                    source: index,
                    band,
                    nodata: info.nodata.get(band).copied().flatten(),
                });
            }
        }

        Ok(Self {
            sources,
            layers,
            transform: reference.transform,
            width: reference.width,
            height: reference.height,
            crs: reference.crs,
        })
    }

    pub fn layers(&self) -> &[LayerInfo] {
        &self.layers
    }

    pub fn layer_ids(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.id.as_str()).collect()
    }

    /// Index of the layer called `id`
    pub fn layer_index(&self, id: &str) -> Option<usize> {
        self.layers.iter().position(|l| l.id == id)
    }

    pub fn sources(&self) -> &[Arc<dyn RasterSource>] {
        &self.sources
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn crs(&self) -> Option<&CRS> {
        self.crs.as_ref()
    }

    /// Area of one reference cell
    pub fn pixel_area(&self) -> f64 {
        self.transform.pixel_area()
    }

    /// Reference-grid window covering a world envelope, if it overlaps
    pub fn window_for_bounds(&self, bounds: (f64, f64, f64, f64)) -> Option<PixelWindow> {
        self.transform.window_for_bounds(bounds, self.width, self.height)
    }

    /// Bytes a `read_window` of `window` holds at once: the output layers
    /// plus, for every resampled source, the source-grid block it decodes
    pub fn estimated_bytes(&self, window: &PixelWindow) -> usize {
        let decoded: usize = self
            .sources
            .iter()
            .enumerate()
            .filter(|(index, source)| *index > 0 && !self.shares_grid(source.as_ref()))
            .filter_map(|(_, source)| {
                let info = source.info();
                self.source_window(source.as_ref(), window)
                    .map(|w| w.f64_bytes(info.band_count))
            })
            .sum();
        window.f64_bytes(self.layers.len()) + decoded
    }

    /// Read every layer over `window` of the reference grid
    pub fn read_window(&self, window: &PixelWindow) -> Result<WindowData> {
        if window.col_end() > self.width || window.row_end() > self.height {
            return Err(Error::IndexOutOfBounds {
                row: window.row_end(),
                col: window.col_end(),
                rows: self.height,
                cols: self.width,
            });
        }

        let mut layers = Vec::with_capacity(self.layers.len());
        for (index, source) in self.sources.iter().enumerate() {
            let bands: Vec<usize> = (0..source.info().band_count).collect();
            let data = if index == 0 || self.shares_grid(source.as_ref()) {
                source.read_window(window, &bands)?
            } else {
                self.read_resampled(source.as_ref(), window, &bands)?
            };
            layers.extend(data);
        }

        Ok(WindowData {
            window: *window,
            transform: self.transform.for_window(window),
            layers,
            nodata: self.layers.iter().map(|l| l.nodata).collect(),
        })
    }

    fn shares_grid(&self, source: &dyn RasterSource) -> bool {
        let info = source.info();
        info.width == self.width && info.height == self.height && info.transform == self.transform
    }

    /// Block of `source`'s own grid underneath a reference window
    fn source_window(&self, source: &dyn RasterSource, window: &PixelWindow) -> Option<PixelWindow> {
        let info = source.info();
        let bounds = self.transform.for_window(window).bounds(window.cols, window.rows);
        info.transform.window_for_bounds(bounds, info.width, info.height)
    }

    fn read_resampled(
        &self,
        source: &dyn RasterSource,
        window: &PixelWindow,
        bands: &[usize],
    ) -> Result<Vec<Array2<f64>>> {
        let info = source.info();
        let mut out: Vec<Array2<f64>> = bands
            .iter()
            .map(|_| Array2::from_elem(window.shape(), f64::NAN))
            .collect();

        let Some(src_window) = self.source_window(source, window) else {
            return Ok(out);
        };
        let data = source.read_window(&src_window, bands)?;

        for row in 0..window.rows {
            for col in 0..window.cols {
                let (x, y) = self
                    .transform
                    .pixel_to_geo(window.col_off + col, window.row_off + row);
                let (sc, sr) = info.transform.geo_to_pixel(x, y);
                if sc < 0.0 || sr < 0.0 {
                    continue;
                }
                let (sc, sr) = (sc.floor() as usize, sr.floor() as usize);
                if sc < src_window.col_off
                    || sr < src_window.row_off
                    || sc >= src_window.col_end()
                    || sr >= src_window.row_end()
                {
                    continue;
                }
                for (dst, src) in out.iter_mut().zip(&data) {
                    dst[(row, col)] = src[(sr - src_window.row_off, sc - src_window.col_off)];
                }
            }
        }
        Ok(out)
    }
}
