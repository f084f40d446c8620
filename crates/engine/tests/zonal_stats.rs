//! End-to-end jobs over in-memory rasters

use std::sync::{Arc, Mutex, OnceLock, Weak};

use approx::assert_relative_eq;
use chrono::NaiveDate;
use geo_types::{Geometry, LineString, Polygon, Rect, coord};
use polystat_core::{AttributeValue, GeoTransform, MemorySource, Raster, RasterSource, Zone, ZoneCollection};
use polystat_engine::prelude::*;
use polystat_engine::{ZonalError, fingerprint};
use polystat_parallel::{CheckpointManager, CheckpointState};

/// 10x10 grid of 1 m cells covering (0, 0)..(10, 10)
fn grid() -> GeoTransform {
    GeoTransform::new(0.0, 10.0, 1.0, -1.0)
}

fn source(id: &str, raster: Raster<f64>) -> Arc<dyn RasterSource> {
    Arc::new(MemorySource::new(id, vec![raster.with_transform(grid())]).unwrap())
}

fn uniform(id: &str, value: f64) -> Arc<dyn RasterSource> {
    source(id, Raster::filled(10, 10, value))
}

/// Cell (r, c) holds r * 10 + c
fn ramp(id: &str) -> Arc<dyn RasterSource> {
    let data: Vec<f64> = (0..100).map(|v| v as f64).collect();
    source(id, Raster::from_vec(data, 10, 10).unwrap())
}

fn rect(id: &str, x0: f64, y0: f64, x1: f64, y1: f64) -> Zone {
    let r = Rect::new(coord! { x: x0, y: y0 }, coord! { x: x1, y: y1 });
    Zone::new(id, Geometry::Rect(r)).unwrap()
}

fn zones(list: Vec<Zone>) -> ZoneCollection {
    ZoneCollection::new(list, None)
}

/// 36 small zones tiling the grid, some straddling cell edges
fn many_zones() -> ZoneCollection {
    let mut list = Vec::new();
    for i in 0..6 {
        for j in 0..6 {
            let x = i as f64 * 1.6 + 0.1;
            let y = j as f64 * 1.6 + 0.3;
            list.push(
                rect(&format!("z{:02}", i * 6 + j), x, y, x + 1.45, y + 1.2)
                    .with_attribute("row", AttributeValue::Int(j)),
            );
        }
    }
    zones(list)
}

fn config() -> JobConfig {
    JobConfig::default().with_workers(1)
}

fn run(config: JobConfig, sources: Vec<Arc<dyn RasterSource>>, zones: &ZoneCollection) -> JobOutcome {
    ZonalProcessor::new(config, sources)
        .unwrap()
        .run(zones, &JobContext::new())
        .unwrap()
}

#[test]
fn uniform_raster_full_extent() {
    let stats = vec![
        Statistic::Mean,
        Statistic::Sum,
        Statistic::Min,
        Statistic::Max,
        Statistic::StdDev,
        Statistic::Count,
        Statistic::CoverageFraction,
    ];
    for coverage_mode in [CoverageMode::PixelCount, CoverageMode::Geometric] {
        let config = JobConfig {
            coverage_mode,
            ..config().with_statistics(stats.clone())
        };
        let zs = zones(vec![rect("all", 0.0, 0.0, 10.0, 10.0)]);
        let outcome = run(config, vec![uniform("dem", 5.0)], &zs);
        let t = &outcome.table;

        assert_eq!(outcome.status, JobStatus::Completed);
        assert!(outcome.diagnostics.is_empty());
        assert_relative_eq!(t.number("all", "dem_mean").unwrap(), 5.0, epsilon = 1e-12);
        assert_relative_eq!(t.number("all", "dem_sum").unwrap(), 500.0, epsilon = 1e-9);
        assert_eq!(t.number("all", "dem_min"), Some(5.0));
        assert_eq!(t.number("all", "dem_max"), Some(5.0));
        assert_relative_eq!(t.number("all", "dem_std").unwrap(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(t.number("all", "dem_count").unwrap(), 100.0, epsilon = 1e-9);
        assert_relative_eq!(t.number("all", "dem_coverage_fraction").unwrap(), 1.0, epsilon = 1e-9);
        assert_eq!(t.value("all", "dem_valid_pixel_count"), Some(&AttributeValue::Int(100)));
    }
}

#[test]
fn zone_outside_extent_has_no_data() {
    let config = config().with_statistics(vec![Statistic::Mean, Statistic::Max, Statistic::Median]);
    let zs = zones(vec![rect("far", 20.0, 20.0, 30.0, 30.0), rect("in", 0.0, 0.0, 2.0, 2.0)]);
    let outcome = run(config, vec![uniform("dem", 5.0)], &zs);
    let t = &outcome.table;

    assert_eq!(outcome.status, JobStatus::Completed);
    assert!(outcome.diagnostics.is_empty());
    assert_eq!(t.len(), 2);
    assert_eq!(t.value("far", "dem_valid_pixel_count"), Some(&AttributeValue::Int(0)));
    for column in ["dem_mean", "dem_max", "dem_median"] {
        assert_eq!(t.value("far", column), Some(&AttributeValue::Null));
    }
    assert_eq!(t.number("far", "dem_coverage_fraction"), Some(0.0));
    assert_eq!(t.number("in", "dem_mean"), Some(5.0));
}

#[test]
fn division_by_zero_is_a_diagnostic() {
    let zone = rect("z", 0.0, 0.0, 5.0, 5.0).with_attribute("a", AttributeValue::Int(3));
    let config = config().with_formula(FormulaDefinition::aggregate("ratio", "a / 0"));
    let outcome = run(config, vec![uniform("dem", 5.0)], &zones(vec![zone]));

    assert_eq!(outcome.status, JobStatus::Completed);
    assert_eq!(outcome.table.value("z", "ratio"), Some(&AttributeValue::Null));
    assert_eq!(outcome.table.number("z", "dem_mean"), Some(5.0));
    assert_eq!(outcome.diagnostics.len(), 1);
    let d = &outcome.diagnostics[0];
    assert_eq!(d.kind, DiagnosticKind::EvaluationError);
    assert_eq!(d.zone_id, "z");
    assert_eq!(d.field.as_deref(), Some("ratio"));
}

#[test]
fn unparsable_formula_leaves_only_its_column_empty() {
    let config = config()
        .with_chunk_size(10)
        .with_formula(FormulaDefinition::aggregate("bad", "1 +"))
        .with_formula(FormulaDefinition::aggregate("double", "dem_mean * 2"));
    let zs = many_zones();
    let outcome = run(config, vec![uniform("dem", 5.0)], &zs);
    let t = &outcome.table;

    assert_eq!(outcome.status, JobStatus::Completed);
    assert_eq!(t.len(), 36);
    for zone in zs.iter() {
        assert_eq!(t.value(&zone.id, "bad"), Some(&AttributeValue::Null));
        assert_eq!(t.number(&zone.id, "dem_mean"), Some(5.0));
        assert_eq!(t.number(&zone.id, "double"), Some(10.0));
    }
    assert_eq!(outcome.diagnostics.len(), 36);
    assert!(outcome.diagnostics.iter().all(|d| {
        d.kind == DiagnosticKind::ParseError && d.field.as_deref() == Some("bad")
    }));
}

#[test]
fn aggregate_formula_with_aliases() {
    let config = config()
        .with_statistics(vec![Statistic::Mean, Statistic::Max])
        .with_formula(
            FormulaDefinition::aggregate("ndvi", "(A_mean - B_mean) / (A_mean + B_mean)")
                .with_input("A", "nir")
                .with_input("B", "red"),
        )
        .with_formula(FormulaDefinition::aggregate("scaled", "round(ndvi * 100)"));
    let outcome = run(
        config,
        vec![uniform("nir", 0.8), uniform("red", 0.2)],
        &zones(vec![rect("z", 1.0, 1.0, 4.0, 4.0)]),
    );
    assert!(outcome.diagnostics.is_empty());
    assert_relative_eq!(outcome.table.number("z", "ndvi").unwrap(), 0.6, epsilon = 1e-12);
    assert_eq!(outcome.table.number("z", "scaled"), Some(60.0));
}

#[test]
fn pixel_formula_statistics() {
    let config = config().with_formula(
        FormulaDefinition::pixel("diff", "A - B", vec![Statistic::Mean, Statistic::Min, Statistic::Count])
            .with_input("A", "ramp")
            .with_input("B", "base"),
    );
    let outcome = run(
        config,
        vec![ramp("ramp"), uniform("base", 1.0)],
        // Cells (0, 0) and (0, 1): values 0 and 1
        &zones(vec![rect("z", 0.0, 9.0, 2.0, 10.0)]),
    );
    let t = &outcome.table;
    assert_relative_eq!(t.number("z", "diff_mean").unwrap(), -0.5, epsilon = 1e-12);
    assert_eq!(t.number("z", "diff_min"), Some(-1.0));
    assert_eq!(t.number("z", "diff_count"), Some(2.0));
}

#[test]
fn pixel_formula_failures_drop_pixels() {
    // 1 / ramp fails only on the cell holding 0
    let config = config()
        .with_formula(FormulaDefinition::pixel("inv", "1 / A", vec![Statistic::Count]).with_input("A", "ramp"));
    let outcome = run(config, vec![ramp("ramp")], &zones(vec![rect("z", 0.0, 9.0, 3.0, 10.0)]));
    assert_eq!(outcome.table.number("z", "inv_count"), Some(2.0));
    assert_eq!(outcome.diagnostics.len(), 1);
    assert_eq!(outcome.diagnostics[0].kind, DiagnosticKind::EvaluationError);
    assert!(outcome.diagnostics[0].message.starts_with("1 pixel(s) dropped"));
}

#[test]
fn cv_is_no_data_for_zero_mean() {
    let mut raster = Raster::filled(10, 10, 1.0);
    for r in 0..10 {
        for c in 0..5 {
            raster.set(r, c, -1.0).unwrap();
        }
    }
    let config = config().with_statistics(vec![Statistic::Mean, Statistic::Cv, Statistic::StdDev]);
    let outcome = run(config, vec![source("sym", raster)], &zones(vec![rect("z", 0.0, 0.0, 10.0, 10.0)]));
    let t = &outcome.table;
    assert_relative_eq!(t.number("z", "sym_mean").unwrap(), 0.0, epsilon = 1e-12);
    assert_eq!(t.value("z", "sym_cv"), Some(&AttributeValue::Null));
    assert_relative_eq!(t.number("z", "sym_std").unwrap(), 1.0, epsilon = 1e-12);
}

#[test]
fn mean_is_sum_over_count() {
    let stats = vec![Statistic::Mean, Statistic::Sum, Statistic::Count];
    for coverage_mode in [CoverageMode::PixelCount, CoverageMode::Geometric] {
        let config = JobConfig {
            coverage_mode,
            ..config().with_statistics(stats.clone())
        };
        let zs = zones(vec![rect("a", 0.5, 0.5, 7.25, 6.4), rect("b", 2.2, 3.7, 9.9, 9.1)]);
        let t = run(config, vec![ramp("ramp")], &zs).table;
        for id in ["a", "b"] {
            let mean = t.number(id, "ramp_mean").unwrap();
            let sum = t.number(id, "ramp_sum").unwrap();
            let count = t.number(id, "ramp_count").unwrap();
            assert_relative_eq!(mean, sum / count, max_relative = 1e-12);
        }
    }
}

#[test]
fn geometric_coverage_of_partial_zone() {
    // Half of the zone hangs off the raster's right edge
    let config = JobConfig {
        coverage_mode: CoverageMode::Geometric,
        ..config().with_statistics(vec![Statistic::Count])
    };
    let t = run(config, vec![uniform("dem", 2.0)], &zones(vec![rect("z", 8.5, 2.0, 11.5, 4.0)])).table;
    assert_relative_eq!(t.number("z", "dem_coverage_fraction").unwrap(), 0.5, epsilon = 1e-9);
    assert_relative_eq!(t.number("z", "dem_count").unwrap(), 3.0, epsilon = 1e-9);
}

#[test]
fn min_coverage_withholds_statistics() {
    let config = JobConfig {
        min_coverage: 0.6,
        ..config()
    };
    let zs = zones(vec![rect("half", 8.0, 2.0, 12.0, 4.0), rect("full", 1.0, 1.0, 3.0, 3.0)]);
    let t = run(config, vec![uniform("dem", 2.0)], &zs).table;
    assert_eq!(t.value("half", "dem_mean"), Some(&AttributeValue::Null));
    assert_relative_eq!(t.number("half", "dem_coverage_fraction").unwrap(), 0.5, epsilon = 1e-9);
    assert_eq!(t.value("half", "dem_valid_pixel_count"), Some(&AttributeValue::Int(4)));
    assert_eq!(t.number("full", "dem_mean"), Some(2.0));
}

#[test]
fn all_touched_includes_more_cells() {
    let zs = zones(vec![rect("z", 2.4, 2.4, 5.3, 4.6)]);
    let strict = run(config(), vec![uniform("dem", 1.0)], &zs).table;
    let touched = run(
        JobConfig {
            edge_mode: EdgeMode::AllTouched,
            ..config()
        },
        vec![uniform("dem", 1.0)],
        &zs,
    )
    .table;
    let strict_n = strict.number("z", "dem_valid_pixel_count").unwrap();
    let touched_n = touched.number("z", "dem_valid_pixel_count").unwrap();
    // 3x3 cell centres inside; edges touch one more column
    assert_eq!(strict_n, 9.0);
    assert_eq!(touched_n, 12.0);
}

#[test]
fn nodata_cells_are_excluded() {
    let mut raster = Raster::filled(10, 10, 4.0).with_nodata(Some(-9999.0));
    raster.set(0, 0, -9999.0).unwrap();
    raster.set(0, 1, f64::NAN).unwrap();
    let config = config().with_statistics(vec![Statistic::Mean, Statistic::Count]);
    let t = run(config, vec![source("dem", raster)], &zones(vec![rect("z", 0.0, 8.0, 2.0, 10.0)])).table;
    assert_eq!(t.value("z", "dem_valid_pixel_count"), Some(&AttributeValue::Int(2)));
    assert_eq!(t.number("z", "dem_mean"), Some(4.0));
    assert_relative_eq!(t.number("z", "dem_coverage_fraction").unwrap(), 0.5, epsilon = 1e-9);
}

#[test]
fn degenerate_geometry_is_reported_and_skipped() {
    let bowtie = Polygon::new(
        LineString::from(vec![(1.0, 1.0), (4.0, 4.0), (4.0, 1.0), (1.0, 4.0), (1.0, 1.0)]),
        vec![],
    );
    let zs = zones(vec![
        Zone::new("bowtie", Geometry::Polygon(bowtie)).unwrap(),
        rect("ok", 1.0, 1.0, 4.0, 4.0),
    ]);
    let outcome = run(config(), vec![uniform("dem", 3.0)], &zs);
    assert_eq!(outcome.status, JobStatus::Completed);
    assert_eq!(outcome.diagnostics.len(), 1);
    assert_eq!(outcome.diagnostics[0].kind, DiagnosticKind::GeometryError);
    assert_eq!(outcome.diagnostics[0].zone_id, "bowtie");
    let t = &outcome.table;
    assert_eq!(t.value("bowtie", "dem_valid_pixel_count"), Some(&AttributeValue::Int(0)));
    assert_eq!(t.value("bowtie", "dem_mean"), Some(&AttributeValue::Null));
    assert_eq!(t.number("ok", "dem_mean"), Some(3.0));
}

#[test]
fn attributes_lead_the_row() {
    let t = run(config(), vec![uniform("dem", 1.0)], &many_zones()).table;
    assert_eq!(t.columns()[0], "row");
    assert_eq!(t.value("z07", "row"), Some(&AttributeValue::Int(1)));
    let ids: Vec<&str> = t.rows().iter().map(|r| r.zone_id.as_str()).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
}

#[test]
fn reruns_and_worker_counts_agree() {
    let base = JobConfig {
        statistics: vec![Statistic::Mean, Statistic::Median, Statistic::StdDev, Statistic::Percentile(90.0)],
        coverage_mode: CoverageMode::Geometric,
        chunk_size: 4,
        ..JobConfig::default()
    };
    let zs = many_zones();
    let first = run(base.clone().with_workers(1), vec![ramp("ramp")], &zs);
    let second = run(base.clone().with_workers(1), vec![ramp("ramp")], &zs);
    let parallel = run(base.with_workers(4), vec![ramp("ramp")], &zs);
    assert_eq!(first.table, second.table);
    assert_eq!(first.table, parallel.table);
    assert_eq!(first.fingerprint, parallel.fingerprint);
    assert_eq!(first.total_chunks, 9);
}

#[test]
fn progress_is_reported_per_chunk() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let context = JobContext::with_progress(move |p| sink.lock().unwrap().push((p.completed, p.total)));
    let processor = ZonalProcessor::new(config().with_chunk_size(10), vec![uniform("dem", 1.0)]).unwrap();
    processor.run(&many_zones(), &context).unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(*seen, vec![(0, 4), (1, 4), (2, 4), (3, 4), (4, 4)]);
}

/// Context that cancels itself once `after` chunks have completed
fn cancelling_context(after: usize) -> Arc<JobContext> {
    let slot: Arc<OnceLock<Weak<JobContext>>> = Arc::new(OnceLock::new());
    let handle = Arc::clone(&slot);
    let context = Arc::new(JobContext::with_progress(move |p| {
        if p.completed == after {
            if let Some(ctx) = handle.get().and_then(Weak::upgrade) {
                ctx.cancel();
            }
        }
    }));
    let _ = slot.set(Arc::downgrade(&context));
    context
}

#[test]
fn resume_matches_uninterrupted_run() {
    let dir = tempfile::tempdir().unwrap();
    let ckpt = dir.path().join("job.ckpt");
    let zs = many_zones();
    let job = JobConfig {
        statistics: vec![Statistic::Mean, Statistic::Mode, Statistic::Sum],
        coverage_mode: CoverageMode::Geometric,
        chunk_size: 5,
        workers: 1,
        ..JobConfig::default()
    };
    let processor = ZonalProcessor::new(job.clone(), vec![ramp("ramp")])
        .unwrap()
        .with_checkpoint_dir(&ckpt);

    let context = cancelling_context(3);
    let partial = processor.run(&zs, &context).unwrap();
    assert_eq!(partial.status, JobStatus::Cancelled);
    assert_eq!(partial.table.len(), 15);
    assert_eq!(CheckpointManager::inspect(&ckpt), CheckpointState::Interrupted);

    let resumed = processor.run(&zs, &JobContext::new()).unwrap();
    assert_eq!(resumed.status, JobStatus::Completed);
    assert_eq!(resumed.resumed_chunks, 3);
    assert!(!ckpt.exists());

    let uninterrupted = run(job, vec![ramp("ramp")], &zs);
    assert_eq!(resumed.table, uninterrupted.table);
    assert_eq!(resumed.diagnostics, uninterrupted.diagnostics);
}

#[test]
fn changed_inputs_discard_the_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let ckpt = dir.path().join("job.ckpt");
    let zs = many_zones();
    let job = config().with_chunk_size(6);

    let processor = ZonalProcessor::new(job.clone(), vec![uniform("dem", 1.0)])
        .unwrap()
        .with_checkpoint_dir(&ckpt);
    let partial = processor.run(&zs, &cancelling_context(2)).unwrap();
    assert_eq!(partial.status, JobStatus::Cancelled);

    // Same names, different values: nothing may be reused
    let changed = ZonalProcessor::new(job, vec![uniform("dem", 2.0)])
        .unwrap()
        .with_checkpoint_dir(&ckpt);
    let outcome = changed.run(&zs, &JobContext::new()).unwrap();
    assert_eq!(outcome.resumed_chunks, 0);
    assert!(outcome.table.rows().iter().all(|r| outcome.table.number(&r.zone_id, "dem_mean") == Some(2.0)));
}

#[test]
fn cancelled_before_start_processes_nothing() {
    let context = JobContext::new();
    context.cancel();
    let processor = ZonalProcessor::new(config(), vec![uniform("dem", 1.0)]).unwrap();
    let outcome = processor.run(&many_zones(), &context).unwrap();
    assert_eq!(outcome.status, JobStatus::Cancelled);
    assert!(outcome.table.is_empty());
    assert_eq!(outcome.table.columns().len(), 4);
}

#[test]
fn time_series_columns() {
    let dates = [(2020, 3, 1), (2020, 6, 1), (2020, 9, 1)];
    let sources = vec![uniform("t1", 1.0), uniform("t2", 2.0), uniform("t3", 4.0)];
    let mut job = config();
    job.time_series.push(TimeSeriesConfig {
        name: "growth".into(),
        prefix: "ts_".into(),
        layers: dates
            .iter()
            .enumerate()
            .map(|(i, &(y, m, d))| DatedLayer {
                layer: format!("t{}", i + 1),
                date: NaiveDate::from_ymd_opt(y, m, d).unwrap(),
            })
            .collect(),
        change_detection: true,
        trend: Some(TrendMethod::LinearRegression),
        temporal_statistics: vec![TemporalStatistic::Max],
        seasonal: Some(SeasonalGrouping::Season),
        extremes: true,
    });
    let t = run(job, sources, &zones(vec![rect("z", 0.0, 0.0, 3.0, 3.0)])).table;

    assert_eq!(t.number("z", "ts_mean_change"), Some(3.0));
    assert_eq!(t.number("z", "ts_first_value"), Some(1.0));
    assert_relative_eq!(t.number("z", "ts_trend_slope").unwrap(), 1.5, epsilon = 1e-12);
    assert_eq!(t.number("z", "ts_temporal_max"), Some(4.0));
    assert_eq!(t.number("z", "ts_seasonal_summer_mean"), Some(2.0));
    assert_eq!(t.value("z", "ts_seasonal_winter_count"), Some(&AttributeValue::Int(0)));
    assert_eq!(t.value("z", "ts_max_date"), Some(&AttributeValue::String("2020-09-01".into())));
}

#[test]
fn oversized_zone_fails_before_work() {
    let job = JobConfig {
        memory_limit: 256,
        ..config()
    };
    let processor = ZonalProcessor::new(job, vec![uniform("dem", 1.0)]).unwrap();
    let err = processor
        .run(&zones(vec![rect("big", 0.0, 0.0, 10.0, 10.0)]), &JobContext::new())
        .unwrap_err();
    match err {
        ZonalError::ResourceExhausted { zone, limit, .. } => {
            assert_eq!(zone, "big");
            assert_eq!(limit, 256);
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn finer_raster_counts_against_the_memory_limit() {
    // 40x40 cells of 0.25 m over the same extent as the 10x10 reference
    let fine: Arc<dyn RasterSource> = Arc::new(
        MemorySource::new(
            "fine",
            vec![Raster::filled(40, 40, 2.0).with_transform(GeoTransform::new(0.0, 10.0, 0.25, -0.25))],
        )
        .unwrap(),
    );
    let zs = zones(vec![rect("big", 0.0, 0.0, 10.0, 10.0)]);

    // Two reference layers and two masks fit; the decoded fine block does not
    let tight = JobConfig {
        memory_limit: 8_000,
        ..config()
    };
    let err = ZonalProcessor::new(tight, vec![uniform("dem", 1.0), fine.clone()])
        .unwrap()
        .run(&zs, &JobContext::new())
        .unwrap_err();
    assert!(matches!(err, ZonalError::ResourceExhausted { requested, .. } if requested > 12_800));

    let roomy = JobConfig {
        memory_limit: 64_000,
        ..config()
    };
    let outcome = run(roomy, vec![uniform("dem", 1.0), fine], &zs);
    assert_eq!(outcome.table.number("big", "fine_mean"), Some(2.0));
}

#[test]
fn post_processing_adds_table_columns() {
    // One cell each of the ramp: 0, 55 and 99
    let zs = zones(vec![
        rect("low", 0.0, 9.0, 1.0, 10.0),
        rect("mid", 5.0, 4.0, 6.0, 5.0),
        rect("high", 9.0, 0.0, 10.0, 1.0),
        rect("out", 20.0, 20.0, 21.0, 21.0),
    ]);
    let job = config()
        .with_post_operation(PostOperation::Normalize {
            field: "ramp_mean".into(),
            method: Normalization::MinMax,
            range: (0.0, 1.0),
            output: None,
        })
        .with_post_operation(PostOperation::Rank {
            field: "ramp_mean".into(),
            ascending: false,
            output: None,
        })
        .with_post_operation(PostOperation::Classify {
            field: "ramp_mean".into(),
            method: BreakMethod::EqualInterval,
            classes: 2,
            breaks: vec![],
            labels: vec!["low".into(), "high".into()],
            output: None,
        })
        .with_post_operation(PostOperation::Score {
            name: "score".into(),
            fields: vec![
                WeightedField { field: "ramp_mean".into(), weight: 0.5 },
                WeightedField { field: "ramp_mean_norm".into(), weight: 0.5 },
            ],
            normalization: Normalization::None,
            range: (0.0, 100.0),
            average: false,
        });
    let t = run(job, vec![ramp("ramp")], &zs).table;

    assert_eq!(
        t.columns()[t.columns().len() - 4..],
        ["ramp_mean_norm", "ramp_mean_rank", "ramp_mean_class", "score"]
    );
    assert_eq!(t.number("low", "ramp_mean_norm"), Some(0.0));
    assert_eq!(t.number("high", "ramp_mean_norm"), Some(1.0));
    assert_relative_eq!(t.number("mid", "ramp_mean_norm").unwrap(), 55.0 / 99.0);
    assert_eq!(t.value("high", "ramp_mean_rank"), Some(&AttributeValue::Int(1)));
    assert_eq!(t.value("low", "ramp_mean_rank"), Some(&AttributeValue::Int(3)));
    assert_eq!(t.value("out", "ramp_mean_rank"), Some(&AttributeValue::Null));
    // equal intervals over 0..99 break at 49.5
    assert_eq!(t.value("low", "ramp_mean_class"), Some(&AttributeValue::String("low".into())));
    assert_eq!(t.value("mid", "ramp_mean_class"), Some(&AttributeValue::String("high".into())));
    assert_eq!(t.number("high", "score"), Some(50.0));
    assert_eq!(t.value("out", "score"), Some(&AttributeValue::Null));
}

#[test]
fn post_processing_waits_for_the_whole_table() {
    let dir = tempfile::tempdir().unwrap();
    let ckpt = dir.path().join("job.ckpt");
    let zs = many_zones();
    let job = config().with_chunk_size(6).with_post_operation(PostOperation::PercentileRank {
        field: "ramp_mean".into(),
        output: Some("standing".into()),
    });
    let processor = ZonalProcessor::new(job, vec![ramp("ramp")])
        .unwrap()
        .with_checkpoint_dir(&ckpt);

    let partial = processor.run(&zs, &cancelling_context(2)).unwrap();
    assert_eq!(partial.status, JobStatus::Cancelled);
    assert_eq!(partial.table.column_index("standing"), None);

    let resumed = processor.run(&zs, &JobContext::new()).unwrap();
    assert_eq!(resumed.status, JobStatus::Completed);
    let standing = resumed.table.column_numbers("standing").unwrap();
    assert_eq!(standing.len(), 36);
    assert!(standing.iter().all(Option::is_some));
    assert!(standing.contains(&Some(0.0)));
}

#[test]
fn invalid_configuration_is_rejected() {
    let job = JobConfig {
        statistics: vec![],
        workers: 0,
        ..JobConfig::default()
    };
    match ZonalProcessor::new(job, vec![]) {
        Err(ZonalError::Config(problems)) => assert_eq!(problems.len(), 3),
        other => panic!("unexpected: {:?}", other.map(|_| ())),
    }

    let processor = ZonalProcessor::new(
        config().with_formula(FormulaDefinition::aggregate("x", "dem_p50 + 1")),
        vec![uniform("dem", 1.0)],
    )
    .unwrap();
    let err = processor.run(&many_zones(), &JobContext::new()).unwrap_err();
    assert!(err.to_string().contains("dem_p50"));
}

#[test]
fn fingerprint_ignores_worker_count() {
    let zs = many_zones();
    let a = ZonalProcessor::new(config(), vec![uniform("dem", 1.0)]).unwrap();
    let b = ZonalProcessor::new(config().with_workers(8), vec![uniform("dem", 1.0)]).unwrap();
    assert_eq!(
        fingerprint(a.config(), a.view(), &zs).unwrap(),
        fingerprint(b.config(), b.view(), &zs).unwrap()
    );
}
