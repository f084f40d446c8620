//! Content hash identifying a job for checkpoint reuse

use polystat_algorithms::formula::FormulaDefinition;
use polystat_algorithms::statistics::Statistic;
use polystat_algorithms::timeseries::TimeSeriesConfig;
use polystat_core::{AttributeValue, CompositeRasterView, ZoneCollection};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::{CoverageMode, EdgeMode, JobConfig};
use crate::error::Result;

/// The part of [`JobConfig`] that changes chunk results or chunk
/// boundaries. Worker count, memory ceiling, expiry and post-processing do
/// not.
#[derive(Serialize)]
struct ResultSettings<'a> {
    statistics: &'a [Statistic],
    edge_mode: EdgeMode,
    coverage_mode: CoverageMode,
    min_coverage: f64,
    chunk_size: usize,
    formulas: &'a [FormulaDefinition],
    time_series: &'a [TimeSeriesConfig],
}

#[derive(Serialize)]
struct ZoneKey<'a> {
    id: &'a str,
    attributes: &'a [(String, AttributeValue)],
}

/// Hex SHA-256 over the result-affecting configuration, the identity of
/// every raster source and every zone's id, attributes and coordinates.
///
/// Two runs with the same fingerprint produce the same table, so a
/// checkpoint is only reused when fingerprints match.
pub fn fingerprint(
    config: &JobConfig,
    view: &CompositeRasterView,
    zones: &ZoneCollection,
) -> Result<String> {
    let mut hasher = Sha256::new();

    let settings = ResultSettings {
        statistics: &config.statistics,
        edge_mode: config.edge_mode,
        coverage_mode: config.coverage_mode,
        min_coverage: config.min_coverage,
        chunk_size: config.chunk_size,
        formulas: &config.formulas,
        time_series: &config.time_series,
    };
    hasher.update(serde_json::to_vec(&settings).map_err(polystat_core::Error::from)?);

    for source in view.sources() {
        hasher.update(source.identity().as_bytes());
        hasher.update([0u8]);
    }
    for layer in view.layer_ids() {
        hasher.update(layer.as_bytes());
        hasher.update([0u8]);
    }

    for zone in zones.iter() {
        let key = ZoneKey {
            id: &zone.id,
            attributes: &zone.attributes,
        };
        hasher.update(serde_json::to_vec(&key).map_err(polystat_core::Error::from)?);
        for polygon in &zone.geometry.0 {
            for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors()) {
                for c in &ring.0 {
                    hasher.update(c.x.to_le_bytes());
                    hasher.update(c.y.to_le_bytes());
                }
                hasher.update(b"|");
            }
            hasher.update(b"#");
        }
    }

    Ok(format!("{:x}", hasher.finalize()))
}
