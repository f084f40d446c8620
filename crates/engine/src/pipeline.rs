//! Per-zone processing: window read, masks, statistics, derived fields

use polystat_algorithms::extract::{extract, extract_stack};
use polystat_algorithms::formula::{CompiledFormula, FormulaError, FormulaMode};
use polystat_algorithms::rasterize::{CoverageMask, RasterizeMode, rasterize};
use polystat_algorithms::statistics::{Statistic, StatisticResult, aggregate};
use polystat_algorithms::timeseries::Observation;
use polystat_algorithms::vector::zone_area;
use polystat_core::{AttributeValue, CompositeRasterView, PixelWindow, WindowData, Zone};
use polystat_parallel::{MemoryBudget, Reservation};
use tracing::{debug, trace};

use crate::config::JobConfig;
use crate::layout::{FormulaSlot, OutputLayout};
use crate::table::{ChunkOutput, Diagnostic, DiagnosticKind, ResultRow};

/// Bytes held while one zone is processed: every layer of the window
/// plus the coverage and weight masks
pub(crate) fn zone_bytes(view: &CompositeRasterView, window: &PixelWindow) -> usize {
    view.estimated_bytes(window) + window.f64_bytes(2)
}

/// Result of one layer for one zone
struct LayerSummary {
    stats: StatisticResult,
    /// `None` when the geometry could not be rasterized
    coverage: Option<f64>,
    /// Below the minimum coverage: statistics are withheld
    suppressed: bool,
}

impl LayerSummary {
    fn blank(statistics: &[Statistic], coverage: Option<f64>) -> Self {
        Self {
            stats: StatisticResult::empty(statistics),
            coverage,
            suppressed: false,
        }
    }

    fn get(&self, stat: Statistic) -> Option<f64> {
        if self.suppressed {
            None
        } else {
            self.stats.get(stat)
        }
    }
}

/// A zone's window with its masks, holding its share of the memory budget
struct Overlay<'b> {
    data: WindowData,
    coverage: CoverageMask,
    /// Mask statistics use, when it differs from `coverage`
    weights: Option<CoverageMask>,
    _reservation: Reservation<'b>,
}

impl Overlay<'_> {
    fn mask(&self) -> &CoverageMask {
        self.weights.as_ref().unwrap_or(&self.coverage)
    }
}

enum Placement<'b> {
    /// Degenerate geometry or unreadable window
    Failed,
    /// No cell of the grid overlaps the zone
    Outside,
    Inside(Overlay<'b>),
}

/// Turns zones into result rows. Shared read-only by all workers.
pub(crate) struct ZonePipeline<'a> {
    config: &'a JobConfig,
    view: &'a CompositeRasterView,
    layout: &'a OutputLayout,
    budget: &'a MemoryBudget,
}

impl<'a> ZonePipeline<'a> {
    pub fn new(
        config: &'a JobConfig,
        view: &'a CompositeRasterView,
        layout: &'a OutputLayout,
        budget: &'a MemoryBudget,
    ) -> Self {
        Self {
            config,
            view,
            layout,
            budget,
        }
    }

    pub fn process_chunk(&self, zones: &[Zone]) -> ChunkOutput {
        let mut output = ChunkOutput::default();
        for zone in zones {
            let (row, diagnostics) = self.process(zone);
            output.rows.push(row);
            output.diagnostics.extend(diagnostics);
        }
        output
    }

    pub fn process(&self, zone: &Zone) -> (ResultRow, Vec<Diagnostic>) {
        let mut diagnostics = Vec::new();
        let mut values: Vec<AttributeValue> = Vec::with_capacity(self.layout.columns().len());

        for name in &self.layout.attributes {
            values.push(zone.attribute(name).cloned().unwrap_or(AttributeValue::Null));
        }

        let placement = self.place(zone, &mut diagnostics);
        let summaries = self.summarize_layers(zone, &placement, &mut diagnostics);
        for summary in &summaries {
            for &stat in &self.layout.layer_statistics {
                values.push(AttributeValue::from_opt(summary.get(stat)));
            }
            values.push(AttributeValue::from_opt(summary.coverage));
            values.push(AttributeValue::Int(summary.stats.valid_pixel_count as i64));
        }

        for series in &self.layout.series {
            let observations: Vec<Observation> = series
                .points
                .iter()
                .filter_map(|&(index, layer, date)| {
                    summaries[layer].get(Statistic::Mean).map(|value| Observation {
                        index,
                        date,
                        value,
                    })
                })
                .collect();
            values.extend(series.config.analyze(&observations).into_iter().map(|(_, v)| v));
        }

        for slot in &self.layout.formulas {
            let (formula, layers) = match slot {
                FormulaSlot::Ready { formula, layers } => (formula, layers),
                FormulaSlot::Rejected {
                    name,
                    columns,
                    error,
                } => {
                    let kind = match error {
                        FormulaError::Parse { .. } => DiagnosticKind::ParseError,
                        FormulaError::Evaluation(_) => DiagnosticKind::EvaluationError,
                    };
                    diagnostics.push(Diagnostic::new(&zone.id, kind, Some(name), error.to_string()));
                    values.extend(std::iter::repeat_n(AttributeValue::Null, *columns));
                    continue;
                }
            };
            match formula.mode() {
                FormulaMode::Aggregate => {
                    let result = formula.evaluate_aggregate(|column| {
                        self.layout
                            .column_index(column)
                            .and_then(|i| values.get(i))
                            .and_then(AttributeValue::as_f64)
                    });
                    let value = match result {
                        Ok(v) => AttributeValue::from_opt(Some(v)),
                        Err(e) => {
                            debug!(zone = %zone.id, formula = formula.name(), error = %e, "formula failed");
                            diagnostics.push(Diagnostic::new(
                                &zone.id,
                                DiagnosticKind::EvaluationError,
                                Some(formula.name()),
                                e.to_string(),
                            ));
                            AttributeValue::Null
                        }
                    };
                    values.push(value);
                }
                FormulaMode::Pixel => {
                    let evaluated = self.pixel_formula(zone, formula, layers, &placement, &mut diagnostics);
                    values.extend(evaluated);
                }
            }
        }

        (
            ResultRow {
                zone_id: zone.id.clone(),
                values,
            },
            diagnostics,
        )
    }

    /// Find, reserve and read the zone's window and build its masks
    fn place(&self, zone: &Zone, diagnostics: &mut Vec<Diagnostic>) -> Placement<'_> {
        let geometry_error = |message: String| {
            Diagnostic::new(&zone.id, DiagnosticKind::GeometryError, None, message)
        };

        let Some(bounds) = zone.bounds() else {
            diagnostics.push(geometry_error("geometry is empty".into()));
            return Placement::Failed;
        };
        let Some(window) = self.view.window_for_bounds(bounds) else {
            // Degenerate geometry is reported even when it lies outside
            if let Err(e) = polystat_algorithms::vector::validate_zone(&zone.geometry) {
                diagnostics.push(geometry_error(e.to_string()));
                return Placement::Failed;
            }
            trace!(zone = %zone.id, "zone outside raster extent");
            return Placement::Outside;
        };

        let reservation = match self.budget.reserve(zone_bytes(self.view, &window)) {
            Ok(r) => r,
            Err(e) => {
                diagnostics.push(Diagnostic::new(
                    &zone.id,
                    DiagnosticKind::RasterError,
                    None,
                    e.to_string(),
                ));
                return Placement::Failed;
            }
        };

        let transform = self.view.transform();
        let coverage = match rasterize(&zone.geometry, transform, &window, RasterizeMode::Geometric) {
            Ok(mask) => mask,
            Err(e) => {
                diagnostics.push(geometry_error(e.to_string()));
                return Placement::Failed;
            }
        };
        let weights = match self.config.mask_mode() {
            RasterizeMode::Geometric => None,
            mode => match rasterize(&zone.geometry, transform, &window, mode) {
                Ok(mask) => Some(mask),
                Err(e) => {
                    diagnostics.push(geometry_error(e.to_string()));
                    return Placement::Failed;
                }
            },
        };

        let data = match self.view.read_window(&window) {
            Ok(d) => d,
            Err(e) => {
                diagnostics.push(Diagnostic::new(
                    &zone.id,
                    DiagnosticKind::RasterError,
                    None,
                    e.to_string(),
                ));
                return Placement::Failed;
            }
        };

        Placement::Inside(Overlay {
            data,
            coverage,
            weights,
            _reservation: reservation,
        })
    }

    fn summarize_layers(
        &self,
        zone: &Zone,
        placement: &Placement<'_>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Vec<LayerSummary> {
        let statistics = &self.layout.computed_statistics;
        let overlay = match placement {
            Placement::Failed => {
                return (0..self.layout.layers.len())
                    .map(|_| LayerSummary::blank(statistics, None))
                    .collect();
            }
            Placement::Outside => {
                return (0..self.layout.layers.len())
                    .map(|_| LayerSummary::blank(statistics, Some(0.0)))
                    .collect();
            }
            Placement::Inside(overlay) => overlay,
        };

        let area = zone_area(&zone.geometry);
        let pixel_area = self.view.pixel_area();
        (0..self.layout.layers.len())
            .map(|layer| {
                let (Some(values), nodata) = (overlay.data.layer(layer), overlay.data.nodata(layer))
                else {
                    return LayerSummary::blank(statistics, None);
                };

                let extracted = extract(values.view(), nodata, &overlay.coverage).and_then(|cells| {
                    let covered: f64 = cells.map(|s| s.weight).sum();
                    let samples = extract(values, nodata, overlay.mask())?;
                    Ok((covered, aggregate(samples, statistics, self.config.weighted())))
                });
                let (covered, stats) = match extracted {
                    Ok(summary) => summary,
                    Err(e) => {
                        let name = self.layout.layers[layer].as_str();
                        debug!(zone = %zone.id, layer = name, error = %e, "cannot extract layer cells");
                        diagnostics.push(Diagnostic::new(
                            &zone.id,
                            DiagnosticKind::RasterError,
                            Some(name),
                            e.to_string(),
                        ));
                        return LayerSummary::blank(statistics, None);
                    }
                };
                let coverage = if area > 0.0 {
                    (covered * pixel_area / area).clamp(0.0, 1.0)
                } else {
                    0.0
                };

                LayerSummary {
                    stats,
                    coverage: Some(coverage),
                    suppressed: coverage < self.config.min_coverage,
                }
            })
            .collect()
    }

    fn pixel_formula(
        &self,
        zone: &Zone,
        formula: &CompiledFormula,
        layers: &[usize],
        placement: &Placement<'_>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Vec<AttributeValue> {
        let weighted = self.config.weighted();
        let evaluation = match placement {
            Placement::Inside(overlay) => {
                let views: Option<Vec<_>> = layers
                    .iter()
                    .map(|&i| overlay.data.layer(i).map(|v| (v, overlay.data.nodata(i))))
                    .collect();
                match views.map(|v| extract_stack(v, overlay.mask())) {
                    Some(Ok(stacks)) => formula.evaluate_pixels(stacks, weighted),
                    Some(Err(e)) => {
                        debug!(zone = %zone.id, formula = formula.name(), error = %e, "cannot extract formula cells");
                        diagnostics.push(Diagnostic::new(
                            &zone.id,
                            DiagnosticKind::RasterError,
                            Some(formula.name()),
                            e.to_string(),
                        ));
                        formula.evaluate_pixels(std::iter::empty(), weighted)
                    }
                    None => formula.evaluate_pixels(std::iter::empty(), weighted),
                }
            }
            _ => formula.evaluate_pixels(std::iter::empty(), weighted),
        };

        if let Some(error) = &evaluation.first_error {
            diagnostics.push(Diagnostic::new(
                &zone.id,
                DiagnosticKind::EvaluationError,
                Some(formula.name()),
                format!("{} pixel(s) dropped, first failure: {}", evaluation.failed, error),
            ));
        }
        evaluation
            .values
            .into_iter()
            .map(|(_, v)| AttributeValue::from_opt(v))
            .collect()
    }
}
