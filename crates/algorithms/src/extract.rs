//! Pixel extraction: coverage mask applied to raster values

use ndarray::ArrayView2;
use polystat_core::io::is_valid_value;
use polystat_core::{Error, Result};

use crate::rasterize::CoverageMask;

/// One cell that survived masking and no-data filtering
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelSample {
    pub value: f64,
    /// Coverage weight, in (0, 1]
    pub weight: f64,
}

/// Values of several layers at one cell
#[derive(Debug, Clone, PartialEq)]
pub struct PixelStack {
    pub values: Vec<f64>,
    pub weight: f64,
}

fn check_shape(shape: (usize, usize), mask: &CoverageMask) -> Result<()> {
    let expected = mask.window().shape();
    if shape != expected {
        return Err(Error::SizeMismatch {
            er: expected.0,
            ec: expected.1,
            ar: shape.0,
            ac: shape.1,
        });
    }
    Ok(())
}

/// Samples of one layer inside `mask`.
///
/// `values` must cover exactly the mask's window. Cells with weight 0,
/// non-finite values or the no-data value are skipped. The iterator is lazy
/// and reads each cell once.
pub fn extract<'a>(
    values: ArrayView2<'a, f64>,
    nodata: Option<f64>,
    mask: &'a CoverageMask,
) -> Result<impl Iterator<Item = PixelSample> + 'a> {
    check_shape(values.dim(), mask)?;
    let weights = mask.weights();
    Ok(values
        .into_iter()
        .zip(weights)
        .filter_map(move |(&value, &weight)| {
            (weight > 0.0 && is_valid_value(value, nodata)).then_some(PixelSample { value, weight })
        }))
}

/// Cells inside `mask` where every layer holds a valid value
pub fn extract_stack<'a>(
    layers: Vec<(ArrayView2<'a, f64>, Option<f64>)>,
    mask: &'a CoverageMask,
) -> Result<impl Iterator<Item = PixelStack> + 'a> {
    for (values, _) in &layers {
        check_shape(values.dim(), mask)?;
    }
    Ok(mask
        .indexed_weights()
        .filter(|&(_, w)| w > 0.0)
        .filter_map(move |((row, col), weight)| {
            let values = layers
                .iter()
                .map(|(data, nodata)| {
                    let v = data[(row, col)];
                    is_valid_value(v, *nodata).then_some(v)
                })
                .collect::<Option<Vec<f64>>>()?;
            Some(PixelStack { values, weight })
        }))
}
