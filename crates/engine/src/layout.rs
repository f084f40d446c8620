//! Output column layout, resolved against the inputs of one job

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use polystat_algorithms::formula::{CompiledFormula, FormulaError, FormulaMode};
use polystat_algorithms::statistics::Statistic;
use polystat_algorithms::timeseries::TimeSeriesConfig;
use polystat_core::{CompositeRasterView, ZoneCollection};
use tracing::warn;

use crate::config::JobConfig;
use crate::error::{Result, ZonalError};
use crate::postprocess;

/// A time series with its layers resolved to view indices
#[derive(Debug, Clone)]
pub(crate) struct ResolvedSeries {
    pub config: TimeSeriesConfig,
    /// (observation index, layer index, date) in date order
    pub points: Vec<(usize, usize, NaiveDate)>,
}

/// A configured formula, ready to run or rejected at compile time
#[derive(Debug, Clone)]
pub(crate) enum FormulaSlot {
    Ready {
        formula: CompiledFormula,
        /// View indices of a pixel formula's layers
        layers: Vec<usize>,
    },
    /// Its columns are "no data" for every zone and each zone records `error`
    Rejected {
        name: String,
        columns: usize,
        error: FormulaError,
    },
}

/// Column order of the result table and everything a zone needs to fill
/// a row in that order:
///
/// 1. zone attributes
/// 2. per layer: `{layer}_{stat}` for every requested statistic, then
///    `{layer}_coverage_fraction` and `{layer}_valid_pixel_count`
/// 3. time-series columns
/// 4. formula columns, in definition order
///
/// Post-processing columns are checked here but appended to the table only
/// after the run.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    columns: Vec<String>,
    index: HashMap<String, usize>,
    pub(crate) attributes: Vec<String>,
    pub(crate) layers: Vec<String>,
    /// Statistics written per layer
    pub(crate) layer_statistics: Vec<Statistic>,
    /// Statistics computed per layer; always includes the mean
    pub(crate) computed_statistics: Vec<Statistic>,
    pub(crate) series: Vec<ResolvedSeries>,
    pub(crate) formulas: Vec<FormulaSlot>,
}

impl OutputLayout {
    /// Resolve every column and reference. Fails with all problems found,
    /// not only the first.
    ///
    /// A formula that does not compile is not a problem of the job: its
    /// columns are kept and left empty.
    pub fn new(
        config: &JobConfig,
        view: &CompositeRasterView,
        zones: &ZoneCollection,
    ) -> Result<Self> {
        let mut problems = config.problems();

        if let (Some(zcrs), Some(rcrs)) = (&zones.crs, view.crs()) {
            if !zcrs.is_equivalent(rcrs) {
                problems.push(format!(
                    "zones are in {} but rasters are in {}; reproject the zones first",
                    zcrs.identifier(),
                    rcrs.identifier()
                ));
            }
        }
        let mut seen_ids = HashSet::new();
        for zone in zones.iter() {
            if !seen_ids.insert(zone.id.as_str()) {
                problems.push(format!("duplicate zone id '{}'", zone.id));
            }
        }

        let attributes = zones.attribute_names();
        let layers: Vec<String> = view.layer_ids().into_iter().map(String::from).collect();
        let layer_statistics: Vec<Statistic> = config
            .statistics
            .iter()
            .copied()
            .filter(|s| *s != Statistic::CoverageFraction)
            .collect();
        let mut computed_statistics = layer_statistics.clone();
        if !computed_statistics.contains(&Statistic::Mean) {
            computed_statistics.push(Statistic::Mean);
        }

        let mut columns: Vec<String> = attributes.clone();
        for layer in &layers {
            columns.extend(layer_statistics.iter().map(|s| format!("{}_{}", layer, s.name())));
            columns.push(format!("{}_coverage_fraction", layer));
            columns.push(format!("{}_valid_pixel_count", layer));
        }

        let mut series = Vec::new();
        for ts in &config.time_series {
            if ts.layers.is_empty() {
                problems.push(format!("time series '{}' has no layers", ts.name));
                continue;
            }
            let mut points = Vec::new();
            for (position, dated) in ts.ordered_layers().into_iter().enumerate() {
                match view.layer_index(&dated.layer) {
                    Some(layer) => points.push((position, layer, dated.date)),
                    None => problems.push(format!(
                        "time series '{}': unknown raster '{}'",
                        ts.name, dated.layer
                    )),
                }
            }
            columns.extend(ts.output_columns());
            series.push(ResolvedSeries {
                config: ts.clone(),
                points,
            });
        }

        let mut formulas = Vec::new();
        for definition in &config.formulas {
            let compiled = match CompiledFormula::new(definition.clone()) {
                Ok(c) => c,
                Err(error) => {
                    warn!(formula = %definition.name, %error, "formula rejected, its columns stay empty");
                    let outputs = definition.output_columns();
                    formulas.push(FormulaSlot::Rejected {
                        name: definition.name.clone(),
                        columns: outputs.len(),
                        error,
                    });
                    columns.extend(outputs);
                    continue;
                }
            };
            let mut indices = Vec::new();
            match compiled.mode() {
                FormulaMode::Aggregate => {
                    for reference in compiled.references() {
                        if !columns.iter().any(|c| c == reference) {
                            problems.push(format!(
                                "formula '{}': unknown column '{}'",
                                definition.name, reference
                            ));
                        }
                    }
                }
                FormulaMode::Pixel => {
                    if definition.output_statistics.is_empty() {
                        problems.push(format!(
                            "formula '{}': at least one output statistic is required",
                            definition.name
                        ));
                    }
                    for layer in compiled.layers() {
                        match view.layer_index(layer) {
                            Some(i) => indices.push(i),
                            None => problems.push(format!(
                                "formula '{}': unknown raster '{}'",
                                definition.name, layer
                            )),
                        }
                    }
                }
            }
            columns.extend(compiled.output_columns());
            formulas.push(FormulaSlot::Ready {
                formula: compiled,
                layers: indices,
            });
        }

        let mut index = HashMap::with_capacity(columns.len());
        for (i, column) in columns.iter().enumerate() {
            if index.insert(column.clone(), i).is_some() {
                problems.push(format!("duplicate output column '{}'", column));
            }
        }

        problems.extend(postprocess::problems(&config.post_processing, &columns));

        if !problems.is_empty() {
            return Err(ZonalError::Config(problems));
        }

        Ok(Self {
            columns,
            index,
            attributes,
            layers,
            layer_statistics,
            computed_statistics,
            series,
            formulas,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.index.get(column).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postprocess::PostOperation;
    use polystat_algorithms::formula::FormulaDefinition;
    use polystat_algorithms::timeseries::DatedLayer;
    use polystat_core::{AttributeValue, GeoTransform, MemorySource, Raster, RasterSource, Zone};
    use geo_types::{Geometry, Rect, coord};
    use std::sync::Arc;

    fn view() -> CompositeRasterView {
        let band = Raster::filled(4, 4, 1.0).with_transform(GeoTransform::new(0.0, 4.0, 1.0, -1.0));
        let sources: Vec<Arc<dyn RasterSource>> = vec![
            Arc::new(MemorySource::new("nir", vec![band.clone()]).unwrap()),
            Arc::new(MemorySource::new("red", vec![band]).unwrap()),
        ];
        CompositeRasterView::new(sources).unwrap()
    }

    fn zones() -> ZoneCollection {
        let r = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 2.0, y: 2.0 });
        let zone = Zone::new("z1", Geometry::Rect(r))
            .unwrap()
            .with_attribute("name", AttributeValue::String("field".into()));
        ZoneCollection::new(vec![zone], None)
    }

    #[test]
    fn test_column_order() {
        let config = JobConfig {
            statistics: vec![Statistic::Mean, Statistic::CoverageFraction, Statistic::Max],
            ..JobConfig::default()
        }
        .with_formula(FormulaDefinition::aggregate("ndvi", "(nir_mean - red_mean) / (nir_mean + red_mean)"));
        let layout = OutputLayout::new(&config, &view(), &zones()).unwrap();
        assert_eq!(
            layout.columns(),
            [
                "name",
                "nir_mean",
                "nir_max",
                "nir_coverage_fraction",
                "nir_valid_pixel_count",
                "red_mean",
                "red_max",
                "red_coverage_fraction",
                "red_valid_pixel_count",
                "ndvi",
            ]
        );
        assert_eq!(layout.column_index("red_max"), Some(6));
        assert_eq!(layout.computed_statistics, vec![Statistic::Mean, Statistic::Max]);
    }

    #[test]
    fn test_mean_is_always_computed() {
        let config = JobConfig::default().with_statistics(vec![Statistic::Sum]);
        let layout = OutputLayout::new(&config, &view(), &zones()).unwrap();
        assert_eq!(layout.layer_statistics, vec![Statistic::Sum]);
        assert_eq!(layout.computed_statistics, vec![Statistic::Sum, Statistic::Mean]);
        assert!(layout.column_index("nir_mean").is_none());
    }

    #[test]
    fn test_every_problem_is_reported() {
        let mut config = JobConfig::default()
            .with_chunk_size(0)
            .with_formula(FormulaDefinition::aggregate("bad", "nir_median * 2"))
            .with_formula(FormulaDefinition::pixel("px", "A + 1", vec![Statistic::Mean]).with_input("A", "swir"));
        config.time_series.push(TimeSeriesConfig {
            name: "growth".into(),
            prefix: String::new(),
            layers: vec![DatedLayer {
                layer: "blue".into(),
                date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            }],
            change_detection: true,
            trend: None,
            temporal_statistics: vec![],
            seasonal: None,
            extremes: false,
        });
        config.post_processing.push(PostOperation::Rank {
            field: "bad_rank_source".into(),
            ascending: false,
            output: None,
        });

        let Err(ZonalError::Config(problems)) = OutputLayout::new(&config, &view(), &zones()) else {
            panic!("expected a configuration error");
        };
        assert_eq!(problems.len(), 5, "{:?}", problems);
        assert!(problems.iter().any(|p| p.contains("bad_rank_source")));
        assert!(problems.iter().any(|p| p.contains("chunk size")));
        assert!(problems.iter().any(|p| p.contains("nir_median")));
        assert!(problems.iter().any(|p| p.contains("swir")));
        assert!(problems.iter().any(|p| p.contains("blue")));
    }

    #[test]
    fn test_unparsable_formula_keeps_its_columns() {
        let config = JobConfig::default()
            .with_formula(FormulaDefinition::aggregate("broken", "1 +"))
            .with_formula(FormulaDefinition::pixel("px", "nir *", vec![Statistic::Mean, Statistic::Max]))
            .with_formula(FormulaDefinition::aggregate("ratio", "nir_mean / red_mean"));
        let layout = OutputLayout::new(&config, &view(), &zones()).unwrap();

        assert_eq!(layout.column_index("broken"), Some(7));
        assert_eq!(&layout.columns()[8..], ["px_mean", "px_max", "ratio"]);
        assert!(matches!(
            &layout.formulas[0],
            FormulaSlot::Rejected { columns: 1, error: FormulaError::Parse { .. }, .. }
        ));
        assert!(matches!(&layout.formulas[1], FormulaSlot::Rejected { columns: 2, .. }));
        assert!(matches!(&layout.formulas[2], FormulaSlot::Ready { .. }));
    }

    #[test]
    fn test_duplicate_zone_ids_and_columns() {
        let mut zs = zones();
        zs.zones.push(zs.zones[0].clone().with_attribute("nir_mean", AttributeValue::Int(1)));
        let Err(ZonalError::Config(problems)) =
            OutputLayout::new(&JobConfig::default(), &view(), &zs)
        else {
            panic!("expected a configuration error");
        };
        assert!(problems.iter().any(|p| p.contains("duplicate zone id 'z1'")));
        assert!(problems.iter().any(|p| p.contains("duplicate output column 'nir_mean'")));
    }
}
