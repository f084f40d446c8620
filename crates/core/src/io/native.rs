//! Native GeoTIFF reading built on the `tiff` crate
//!
//! Reads are windowed: only the strips or tiles that intersect the requested
//! window are decoded, so the memory used by one read is bounded by the
//! window, not by the file.

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, PixelWindow};
use ndarray::Array2;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;

const TAG_MODEL_PIXEL_SCALE: Tag = Tag::ModelPixelScaleTag;
const TAG_MODEL_TIEPOINT: Tag = Tag::ModelTiepointTag;
const TAG_MODEL_TRANSFORMATION: Tag = Tag::ModelTransformationTag;
const TAG_GEO_KEY_DIRECTORY: Tag = Tag::GeoKeyDirectoryTag;
const TAG_GDAL_NODATA: Tag = Tag::GdalNodata;

const GEOKEY_GEOGRAPHIC_TYPE: u16 = 2048;
const GEOKEY_PROJECTED_CS_TYPE: u16 = 3072;

/// Header-level description of a GeoTIFF
#[derive(Debug, Clone)]
pub struct GeoTiffInfo {
    pub width: usize,
    pub height: usize,
    pub bands: usize,
    pub transform: GeoTransform,
    pub crs: Option<CRS>,
    pub nodata: Option<f64>,
}

fn open_decoder(path: &Path) -> Result<Decoder<BufReader<File>>> {
    let file = File::open(path).map_err(|e| Error::raster_open(path, e))?;
    Decoder::new(BufReader::new(file)).map_err(|e| Error::raster_open(path, e))
}

/// Read the header of a GeoTIFF without decoding any pixels
pub fn read_geotiff_info<P: AsRef<Path>>(path: P) -> Result<GeoTiffInfo> {
    let path = path.as_ref();
    let mut decoder = open_decoder(path)?;
    decode_info(&mut decoder).map_err(|e| Error::raster_open(path, e))
}

fn decode_info<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<GeoTiffInfo> {
    let (width, height) = decoder
        .dimensions()
        .map_err(|e| Error::Other(format!("Cannot read dimensions: {}", e)))?;

    let bands = decoder
        .get_tag_u32(Tag::SamplesPerPixel)
        .map(|n| n as usize)
        .unwrap_or(1);

    let planar = decoder.get_tag_u32(Tag::PlanarConfiguration).unwrap_or(1);
    if planar != 1 {
        return Err(Error::UnsupportedDataType(format!(
            "planar configuration {} (only chunky=1 supported)",
            planar
        )));
    }

    let transform = read_geotransform(decoder).unwrap_or_default();
    let crs = read_crs(decoder);
    let nodata = decoder
        .get_tag_ascii_string(TAG_GDAL_NODATA)
        .ok()
        .and_then(|s| s.trim_matches(char::from(0)).trim().parse::<f64>().ok());

    Ok(GeoTiffInfo {
        width: width as usize,
        height: height as usize,
        bands,
        transform,
        crs,
        nodata,
    })
}

/// Attempt to read GeoTransform from TIFF tags
fn read_geotransform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<GeoTransform> {
    let scale = decoder.get_tag_f64_vec(TAG_MODEL_PIXEL_SCALE).unwrap_or_default();
    let tiepoint = decoder.get_tag_f64_vec(TAG_MODEL_TIEPOINT).unwrap_or_default();
    if scale.len() >= 2 && tiepoint.len() >= 6 {
        // tiepoint: [I, J, K, X, Y, Z], scale: [ScaleX, ScaleY, ScaleZ]
        let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
        let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
        return Ok(GeoTransform::new(origin_x, origin_y, scale[0], -scale[1]));
    }

    let m = decoder.get_tag_f64_vec(TAG_MODEL_TRANSFORMATION).unwrap_or_default();
    if m.len() >= 8 {
        return Ok(GeoTransform::from_gdal([m[3], m[0], m[1], m[7], m[4], m[5]]));
    }

    Err(Error::Other("Cannot determine geotransform".into()))
}

fn read_crs<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<CRS> {
    let keys = decoder.get_tag_u16_vec(TAG_GEO_KEY_DIRECTORY).ok()?;
    // Header is 4 shorts, then (key, location, count, value) entries
    let mut geographic = None;
    for entry in keys.get(4..)?.chunks_exact(4) {
        let (key, location, value) = (entry[0], entry[1], entry[3]);
        if location != 0 {
            continue;
        }
        match key {
            GEOKEY_PROJECTED_CS_TYPE if value != 0 && value != 32767 => {
                return Some(CRS::from_epsg(value as u32));
            }
            GEOKEY_GEOGRAPHIC_TYPE if value != 0 && value != 32767 => {
                geographic = Some(CRS::from_epsg(value as u32));
            }
            _ => {}
        }
    }
    geographic
}

/// Read `bands` (0-based) of `window` from a GeoTIFF file as f64 arrays.
///
/// Cells keep their raw values; no-data filtering is left to the caller.
pub fn read_geotiff_window<P: AsRef<Path>>(
    path: P,
    window: &PixelWindow,
    bands: &[usize],
) -> Result<Vec<Array2<f64>>> {
    let path = path.as_ref();
    let mut decoder = open_decoder(path)?;
    decode_window(&mut decoder, window, bands)
}

fn decode_window<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    window: &PixelWindow,
    bands: &[usize],
) -> Result<Vec<Array2<f64>>> {
    let info = decode_info(decoder)?;
    if window.col_end() > info.width || window.row_end() > info.height {
        return Err(Error::IndexOutOfBounds {
            row: window.row_end(),
            col: window.col_end(),
            rows: info.height,
            cols: info.width,
        });
    }
    if let Some(&band) = bands.iter().find(|&&b| b >= info.bands) {
        return Err(Error::BandOutOfRange {
            band,
            count: info.bands,
        });
    }

    let mut out: Vec<Array2<f64>> = bands
        .iter()
        .map(|_| Array2::from_elem(window.shape(), f64::NAN))
        .collect();
    if window.is_empty() {
        return Ok(out);
    }

    let (chunk_w, chunk_h) = decoder.chunk_dimensions();
    let (chunk_w, chunk_h) = (chunk_w as usize, chunk_h as usize);
    if chunk_w == 0 || chunk_h == 0 {
        return Err(Error::Other("TIFF reports zero-sized chunks".into()));
    }
    let chunks_across = info.width.div_ceil(chunk_w);
    let spp = info.bands;

    for chunk_row in window.row_off / chunk_h..=(window.row_end() - 1) / chunk_h {
        for chunk_col in window.col_off / chunk_w..=(window.col_end() - 1) / chunk_w {
            let index = (chunk_row * chunks_across + chunk_col) as u32;
            let (data_w, data_h) = decoder.chunk_data_dimensions(index);
            let (data_w, data_h) = (data_w as usize, data_h as usize);
            let chunk = decoder
                .read_chunk(index)
                .map_err(|e| Error::Other(format!("Cannot read chunk {}: {}", index, e)))?;
            let values = decoding_result_to_f64(chunk)?;

            let x0 = chunk_col * chunk_w;
            let y0 = chunk_row * chunk_h;
            let rows = window.row_off.max(y0)..window.row_end().min(y0 + data_h);
            let cols = window.col_off.max(x0)..window.col_end().min(x0 + data_w);

            for row in rows {
                for col in cols.clone() {
                    let base = ((row - y0) * data_w + (col - x0)) * spp;
                    for (dst, &band) in out.iter_mut().zip(bands) {
                        if let Some(&v) = values.get(base + band) {
                            dst[(row - window.row_off, col - window.col_off)] = v;
                        }
                    }
                }
            }
        }
    }

    Ok(out)
}

fn decoding_result_to_f64(result: DecodingResult) -> Result<Vec<f64>> {
    Ok(match result {
        DecodingResult::U8(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::U16(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::U32(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::U64(buf) => buf.into_iter().map(|v| v as f64).collect(),
        DecodingResult::I8(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::I16(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::I32(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::I64(buf) => buf.into_iter().map(|v| v as f64).collect(),
        DecodingResult::F32(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::F64(buf) => buf,
        #[allow(unreachable_patterns)]
        _ => return Err(Error::UnsupportedDataType("Unsupported TIFF pixel format".into())),
    })
}


#[cfg(test)]
mod tests {
    use super::fixture::{GeoTiffOptions, write_geotiff, write_geotiff_to_buffer};
    use super::*;
    use crate::raster::Raster;
    use approx::assert_relative_eq;
    use std::io::Cursor;

    fn gradient(rows: usize, cols: usize) -> Raster<f64> {
        let data: Vec<f64> = (0..rows * cols).map(|v| v as f64).collect();
        Raster::from_vec(data, rows, cols)
            .unwrap()
            .with_transform(GeoTransform::new(500.0, 1000.0, 30.0, -30.0))
            .with_nodata(Some(-9999.0))
    }

    #[test]
    fn test_info_roundtrip() {
        let tmp = tempfile::NamedTempFile::with_suffix(".tif").unwrap();
        let raster = gradient(12, 7);
        write_geotiff(&raster, tmp.path(), Some(GeoTiffOptions { epsg: Some(32633) })).unwrap();

        let info = read_geotiff_info(tmp.path()).unwrap();
        assert_eq!((info.width, info.height, info.bands), (7, 12, 1));
        assert_relative_eq!(info.transform.origin_x, 500.0);
        assert_relative_eq!(info.transform.pixel_height, -30.0);
        assert_eq!(info.nodata, Some(-9999.0));
        assert_eq!(info.crs.and_then(|c| c.epsg()), Some(32633));

        let corner = read_geotiff_window(tmp.path(), &PixelWindow::new(6, 11, 1, 1), &[0]).unwrap();
        assert_eq!(corner[0][(0, 0)], 83.0);
    }

    #[test]
    fn test_window_spanning_strips() {
        // Tall enough to be written as several strips
        let raster = gradient(600, 40);
        let buf = write_geotiff_to_buffer(&raster).unwrap();

        let mut decoder = Decoder::new(Cursor::new(&buf[..])).unwrap();
        let window = PixelWindow::new(5, 250, 10, 120);
        let part = decode_window(&mut decoder, &window, &[0]).unwrap().remove(0);
        assert_eq!(part.dim(), (120, 10));
        for r in 0..120 {
            for c in 0..10 {
                assert_eq!(part[(r, c)], raster.data()[(250 + r, 5 + c)]);
            }
        }
    }

    #[test]
    fn test_window_out_of_range() {
        let buf = write_geotiff_to_buffer(&gradient(4, 4)).unwrap();
        let mut decoder = Decoder::new(Cursor::new(&buf[..])).unwrap();
        assert!(decode_window(&mut decoder, &PixelWindow::new(2, 2, 4, 1), &[0]).is_err());
        let mut decoder = Decoder::new(Cursor::new(&buf[..])).unwrap();
        assert!(decode_window(&mut decoder, &PixelWindow::new(0, 0, 1, 1), &[1]).is_err());
    }

    #[test]
    fn test_missing_file_is_open_error() {
        let err = read_geotiff_info("/definitely/not/here.tif").unwrap_err();
        assert!(matches!(err, Error::RasterOpen { .. }));
    }
}
