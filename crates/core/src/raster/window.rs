//! Rectangular pixel windows into a raster grid

use serde::{Deserialize, Serialize};

/// A rectangular block of cells, in pixel coordinates of some parent grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelWindow {
    /// First column (inclusive)
    pub col_off: usize,
    /// First row (inclusive)
    pub row_off: usize,
    /// Number of columns
    pub cols: usize,
    /// Number of rows
    pub rows: usize,
}

impl PixelWindow {
    pub fn new(col_off: usize, row_off: usize, cols: usize, rows: usize) -> Self {
        Self {
            col_off,
            row_off,
            cols,
            rows,
        }
    }

    /// Window covering a whole `rows` x `cols` grid
    pub fn full(rows: usize, cols: usize) -> Self {
        Self::new(0, 0, cols, rows)
    }

    /// Number of cells
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }

    /// Shape as (rows, cols), matching `ndarray` conventions
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// One past the last column
    pub fn col_end(&self) -> usize {
        self.col_off + self.cols
    }

    /// One past the last row
    pub fn row_end(&self) -> usize {
        self.row_off + self.rows
    }

    /// Overlap with another window of the same grid
    pub fn intersection(&self, other: &PixelWindow) -> Option<PixelWindow> {
        let col_off = self.col_off.max(other.col_off);
        let row_off = self.row_off.max(other.row_off);
        let col_end = self.col_end().min(other.col_end());
        let row_end = self.row_end().min(other.row_end());
        if col_end <= col_off || row_end <= row_off {
            return None;
        }
        Some(PixelWindow::new(col_off, row_off, col_end - col_off, row_end - row_off))
    }

    /// Estimated bytes held by `bands` f64 arrays of this window
    pub fn f64_bytes(&self, bands: usize) -> usize {
        self.len() * bands * std::mem::size_of::<f64>()
    }
}
