//! Zone rasterization
//!
//! Turns a zone polygon into a [`CoverageMask`] over a window of a raster
//! grid. Rings are first mapped into window pixel coordinates, where every
//! cell is the unit square `[col, col+1] x [row, row+1]`, so a clipped
//! area measured there is directly a fraction of one cell.
//!
//! Cells crossed by a ring edge are "boundary" cells. Only those are clipped
//! in geometric mode; every other cell is either fully inside or fully
//! outside and is settled by its centre.

use geo::{Coord, MultiPolygon};
use ndarray::{Array2, ArrayView2};
use polystat_core::{GeoTransform, PixelWindow};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::rows::map_rows;
use crate::vector::{ClipRect, Edge, GeometryError, clip_ring, open_ring, ring_signed_area, validate_zone};

/// How cells are selected and weighted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RasterizeMode {
    /// Cell included iff its centre is inside the zone (weight 0 or 1)
    #[default]
    Strict,
    /// Cell included iff it shares a positive area with the zone (weight 0
    /// or 1). Cells that meet the zone only along an edge or at a vertex are
    /// left out.
    AllTouched,
    /// Weight is the fraction of the cell's area inside the zone
    Geometric,
}

/// Per-cell weights in [0, 1] over a window of a raster grid
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageMask {
    window: PixelWindow,
    weights: Array2<f64>,
}

impl CoverageMask {
    /// Window of the parent grid the mask is aligned to
    pub fn window(&self) -> &PixelWindow {
        &self.window
    }

    pub fn weights(&self) -> ArrayView2<'_, f64> {
        self.weights.view()
    }

    /// ((row, col), weight) for every cell in row-major order
    pub fn indexed_weights(&self) -> impl Iterator<Item = ((usize, usize), f64)> + '_ {
        self.weights.indexed_iter().map(|(idx, &w)| (idx, w))
    }

    /// Weight at window-relative (row, col); 0 outside the window
    pub fn weight(&self, row: usize, col: usize) -> f64 {
        self.weights.get((row, col)).copied().unwrap_or(0.0)
    }

    /// Number of cells with a non-zero weight
    pub fn included_count(&self) -> usize {
        self.weights.iter().filter(|&&w| w > 0.0).count()
    }

    /// Sum of all weights, in cells
    pub fn total_weight(&self) -> f64 {
        self.weights.sum()
    }
}

/// A zone in window pixel coordinates: polygons of rings, exterior first
struct PixelRings {
    polygons: Vec<Vec<Vec<Coord<f64>>>>,
}

impl PixelRings {
    fn new(geometry: &MultiPolygon<f64>, transform: &GeoTransform, window: &PixelWindow) -> Self {
        let to_pixel = |c: &Coord<f64>| {
            let (col, row) = transform.geo_to_pixel(c.x, c.y);
            Coord {
                x: col - window.col_off as f64,
                y: row - window.row_off as f64,
            }
        };
        let polygons = geometry
            .0
            .iter()
            .map(|p| {
                std::iter::once(p.exterior())
                    .chain(p.interiors())
                    .map(|ring| open_ring(ring).iter().map(to_pixel).collect())
                    .collect()
            })
            .collect();
        Self { polygons }
    }

    fn rings(&self) -> impl Iterator<Item = &Vec<Coord<f64>>> {
        self.polygons.iter().flatten()
    }

    /// Columns of `row` whose centre lies inside (even-odd rule)
    fn centres_inside(&self, row: usize, cols: usize) -> Vec<bool> {
        let yc = row as f64 + 0.5;
        let mut crossings = Vec::new();
        for ring in self.rings() {
            let n = ring.len();
            for i in 0..n {
                let (p, q) = (ring[i], ring[(i + 1) % n]);
                if (p.y <= yc) != (q.y <= yc) {
                    crossings.push(p.x + (yc - p.y) * (q.x - p.x) / (q.y - p.y));
                }
            }
        }
        crossings.sort_by(f64::total_cmp);

        let mut inside = vec![false; cols];
        for pair in crossings.chunks_exact(2) {
            // Centre c + 0.5 in [a, b)
            let first = (pair[0] - 0.5).ceil().max(0.0);
            let end = (pair[1] - 0.5).ceil().min(cols as f64);
            if end > first {
                for cell in &mut inside[first as usize..end as usize] {
                    *cell = true;
                }
            }
        }
        inside
    }

    /// Cells any ring edge passes through
    fn boundary_cells(&self, rows: usize, cols: usize) -> Array2<bool> {
        let mut boundary = Array2::from_elem((rows, cols), false);
        let (rows_f, cols_f) = (rows as f64, cols as f64);

        for ring in self.rings() {
            let n = ring.len();
            for i in 0..n {
                let (p, q) = (ring[i], ring[(i + 1) % n]);
                let (y_lo, y_hi) = (p.y.min(q.y), p.y.max(q.y));
                if y_hi < 0.0 || y_lo > rows_f {
                    continue;
                }
                let r0 = y_lo.floor().max(0.0) as usize;
                let r1 = (y_hi.floor().min(rows_f - 1.0)) as usize;
                for row in r0..=r1 {
                    let ya = y_lo.max(row as f64);
                    let yb = y_hi.min(row as f64 + 1.0);
                    let (xa, xb) = if p.y == q.y {
                        (p.x, q.x)
                    } else {
                        let at = |y: f64| p.x + (y - p.y) * (q.x - p.x) / (q.y - p.y);
                        (at(ya), at(yb))
                    };
                    let (x_lo, x_hi) = (xa.min(xb), xa.max(xb));
                    if x_hi < 0.0 || x_lo > cols_f {
                        continue;
                    }
                    let c0 = x_lo.floor().max(0.0) as usize;
                    let c1 = (x_hi.floor().min(cols_f - 1.0)) as usize;
                    for col in c0..=c1 {
                        boundary[(row, col)] = true;
                    }
                }
            }
        }
        boundary
    }

    /// Exact covered fraction of each boundary cell in `row`
    fn clip_row(&self, row: usize, boundary: &[usize]) -> Vec<(usize, f64)> {
        let band = ClipRect::new(f64::MIN, row as f64, f64::MAX, row as f64 + 1.0);
        let mut areas = vec![0.0; boundary.len()];

        for polygon in &self.polygons {
            for (ring_index, ring) in polygon.iter().enumerate() {
                let strip = clip_ring(ring, &Edge::HORIZONTAL, &band);
                if strip.is_empty() {
                    continue;
                }
                let sign = if ring_index == 0 { 1.0 } else { -1.0 };
                for (slot, &col) in areas.iter_mut().zip(boundary) {
                    let piece = clip_ring(&strip, &Edge::VERTICAL, &ClipRect::cell(col, row));
                    *slot += sign * ring_signed_area(&piece).abs();
                }
            }
        }

        boundary
            .iter()
            .zip(areas)
            .map(|(&col, a)| (col, a.clamp(0.0, 1.0)))
            .collect()
    }
}

/// Rasterize a zone over `window` of the grid described by `transform`.
///
/// Fails for empty, zero-area or self-intersecting geometry. Multi-polygon
/// parts are assumed not to overlap.
pub fn rasterize(
    geometry: &MultiPolygon<f64>,
    transform: &GeoTransform,
    window: &PixelWindow,
    mode: RasterizeMode,
) -> Result<CoverageMask, GeometryError> {
    validate_zone(geometry)?;

    let (rows, cols) = window.shape();
    let rings = PixelRings::new(geometry, transform, window);

    let inside: Vec<Vec<bool>> = map_rows(rows, |row| rings.centres_inside(row, cols));

    let mut weights = Array2::zeros((rows, cols));
    for (row, flags) in inside.iter().enumerate() {
        for (col, &flag) in flags.iter().enumerate() {
            if flag {
                weights[(row, col)] = 1.0;
            }
        }
    }
    if mode == RasterizeMode::Strict || window.is_empty() {
        return Ok(CoverageMask { window: *window, weights });
    }

    let boundary = rings.boundary_cells(rows, cols);
    let per_row: Vec<Vec<(usize, f64)>> = map_rows(rows, |row| {
        let cells: Vec<usize> = (0..cols).filter(|&c| boundary[(row, c)]).collect();
        if cells.is_empty() {
            Vec::new()
        } else {
            rings.clip_row(row, &cells)
        }
    });

    for (row, cells) in per_row.into_iter().enumerate() {
        for (col, fraction) in cells {
            weights[(row, col)] = match mode {
                RasterizeMode::Geometric => fraction,
                _ if fraction > 0.0 || inside[row][col] => 1.0,
                _ => 0.0,
            };
        }
    }
    trace!(
        ?mode,
        rows,
        cols,
        boundary = boundary.iter().filter(|&&b| b).count(),
        "rasterized zone"
    );

    Ok(CoverageMask { window: *window, weights })
}
