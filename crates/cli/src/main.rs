//! polystat CLI - batch zonal statistics

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{Level, info, warn};
use tracing_subscriber::EnvFilter;

use polystat_algorithms::formula::Formula;
use polystat_core::io::{read_geotiff_info, read_zones};
use polystat_engine::prelude::*;

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "polystat")]
#[command(author, version, about = "Batch zonal statistics over raster layers", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute per-zone statistics
    Run(RunArgs),
    /// Show information about raster files
    Info {
        /// Input raster files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Parse a formula and optionally evaluate it
    CheckFormula {
        /// Expression, e.g. "(nir_mean - red_mean) / (nir_mean + red_mean)"
        expression: String,
        /// Variable values as name=value
        #[arg(short, long = "set", value_name = "NAME=VALUE")]
        values: Vec<String>,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Zones as GeoJSON
    #[arg(short, long)]
    zones: PathBuf,
    /// Property holding the zone id (feature id or position otherwise)
    #[arg(long)]
    id_field: Option<String>,
    /// Input rasters (GeoTIFF); layers are named after the file stems
    #[arg(required = true)]
    rasters: Vec<PathBuf>,
    /// Output JSON file (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Job configuration JSON; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Statistics, comma separated: mean,sum,min,max,median,mode,minority,
    /// variety,std,variance,cv,range,pNN,count,coverage_fraction
    #[arg(short, long, value_delimiter = ',')]
    stats: Vec<String>,
    /// Edge handling: strict, all-touched
    #[arg(long)]
    edge_mode: Option<String>,
    /// Cell weighting: pixel-count, geometric
    #[arg(long)]
    coverage: Option<String>,
    /// Minimum coverage fraction (0..1) for a zone to get statistics
    #[arg(long)]
    min_coverage: Option<f64>,
    /// Aggregate formula as name=expression
    #[arg(long = "formula", value_name = "NAME=EXPR")]
    formulas: Vec<String>,
    /// Per-pixel formula as name=expression (reduced with --pixel-stats)
    #[arg(long = "pixel-formula", value_name = "NAME=EXPR")]
    pixel_formulas: Vec<String>,
    /// Statistics for per-pixel formulas
    #[arg(long, value_delimiter = ',', default_value = "mean")]
    pixel_stats: Vec<String>,
    /// Formula variable alias as VAR=raster, applied to every formula
    #[arg(long = "input", value_name = "VAR=RASTER")]
    inputs: Vec<String>,
    /// Checkpoint directory; an interrupted run resumes from it
    #[arg(long)]
    checkpoint: Option<PathBuf>,
    /// Worker threads
    #[arg(short, long)]
    workers: Option<usize>,
    /// Zones per chunk
    #[arg(long)]
    chunk_size: Option<usize>,
    /// Memory ceiling in MiB
    #[arg(long)]
    memory_limit: Option<usize>,
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set up logging: {}", e))
}

fn progress_bar() -> Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} chunks {msg}")?
            .progress_chars("=> "),
    );
    Ok(pb)
}

fn split_pair<'a>(s: &'a str, what: &str) -> Result<(&'a str, &'a str)> {
    s.split_once('=')
        .map(|(k, v)| (k.trim(), v.trim()))
        .filter(|(k, v)| !k.is_empty() && !v.is_empty())
        .ok_or_else(|| anyhow::anyhow!("Invalid {} '{}': expected NAME=VALUE", what, s))
}

fn parse_statistics(names: &[String]) -> Result<Vec<Statistic>> {
    names
        .iter()
        .map(|n| n.parse::<Statistic>().with_context(|| format!("Invalid statistic '{}'", n)))
        .collect()
}

fn parse_edge_mode(s: &str) -> Result<EdgeMode> {
    match s.to_lowercase().as_str() {
        "strict" | "centre" | "center" => Ok(EdgeMode::Strict),
        "all-touched" | "all_touched" | "touched" => Ok(EdgeMode::AllTouched),
        _ => anyhow::bail!("Unknown edge mode: {}. Use strict or all-touched.", s),
    }
}

fn parse_coverage_mode(s: &str) -> Result<CoverageMode> {
    match s.to_lowercase().as_str() {
        "pixel-count" | "pixel_count" | "pixel" => Ok(CoverageMode::PixelCount),
        "geometric" | "fractional" => Ok(CoverageMode::Geometric),
        _ => anyhow::bail!("Unknown coverage mode: {}. Use pixel-count or geometric.", s),
    }
}

/// Configuration file (if any) with command line overrides applied
fn build_config(args: &RunArgs) -> Result<JobConfig> {
    let mut config = match &args.config {
        Some(path) => JobConfig::from_json_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => JobConfig::default(),
    };

    if !args.stats.is_empty() {
        config.statistics = parse_statistics(&args.stats)?;
    }
    if let Some(mode) = &args.edge_mode {
        config.edge_mode = parse_edge_mode(mode)?;
    }
    if let Some(mode) = &args.coverage {
        config.coverage_mode = parse_coverage_mode(mode)?;
    }
    if let Some(min) = args.min_coverage {
        config.min_coverage = min;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(size) = args.chunk_size {
        config.chunk_size = size;
    }
    if let Some(mib) = args.memory_limit {
        config.memory_limit = mib * 1024 * 1024;
    }

    let aliases = args
        .inputs
        .iter()
        .map(|s| split_pair(s, "input alias"))
        .collect::<Result<Vec<_>>>()?;
    let pixel_stats = parse_statistics(&args.pixel_stats)?;
    for arg in &args.formulas {
        let (name, expr) = split_pair(arg, "formula")?;
        let mut def = FormulaDefinition::aggregate(name, expr);
        for (var, raster) in &aliases {
            def = def.with_input(*var, *raster);
        }
        config.formulas.push(def);
    }
    for arg in &args.pixel_formulas {
        let (name, expr) = split_pair(arg, "pixel formula")?;
        let mut def = FormulaDefinition::pixel(name, expr, pixel_stats.clone());
        for (var, raster) in &aliases {
            def = def.with_input(*var, *raster);
        }
        config.formulas.push(def);
    }
    Ok(config)
}

fn write_output(document: &serde_json::Value, path: Option<&Path>) -> Result<()> {
    let text = serde_json::to_string_pretty(document)?;
    match path {
        Some(p) => std::fs::write(p, text).with_context(|| format!("Failed to write {}", p.display())),
        None => {
            println!("{}", text);
            Ok(())
        }
    }
}

// ─── Commands ───────────────────────────────────────────────────────────

fn run(args: RunArgs) -> Result<()> {
    let start = Instant::now();
    let config = build_config(&args)?;

    let zones = read_zones(&args.zones, args.id_field.as_deref())
        .with_context(|| format!("Failed to read zones from {}", args.zones.display()))?;
    info!("Zones: {} from {}", zones.len(), args.zones.display());

    let mut processor =
        ZonalProcessor::open(config, &args.rasters[..]).context("Failed to set up the job")?;
    if let Some(dir) = &args.checkpoint {
        processor = processor.with_checkpoint_dir(dir);
    }

    let pb = progress_bar()?;
    let bar = pb.clone();
    let context = JobContext::with_progress(move |p: &Progress| {
        bar.set_length(p.total as u64);
        bar.set_position(p.completed as u64);
        if let Some(message) = &p.message {
            bar.set_message(message.clone());
        }
    });
    let outcome = processor.run(&zones, &context);
    pb.finish_and_clear();
    let outcome = outcome.context("Zonal statistics failed")?;

    for d in &outcome.diagnostics {
        warn!("zone {}: {}", d.zone_id, d.message);
    }
    let document = serde_json::json!({
        "status": match outcome.status {
            JobStatus::Completed => "completed",
            JobStatus::Cancelled => "cancelled",
        },
        "fingerprint": outcome.fingerprint,
        "table": outcome.table,
        "diagnostics": outcome.diagnostics,
    });
    write_output(&document, args.output.as_deref())?;

    if let Some(path) = &args.output {
        println!("Results saved to: {}", path.display());
    }
    eprintln!(
        "  {} zones, {} diagnostics, {} of {} chunks resumed",
        outcome.table.len(),
        outcome.diagnostics.len(),
        outcome.resumed_chunks,
        outcome.total_chunks
    );
    eprintln!("  Processing time: {:.2?}", start.elapsed());
    Ok(())
}

fn info_command(inputs: &[PathBuf]) -> Result<()> {
    for input in inputs {
        let header = read_geotiff_info(input)
            .with_context(|| format!("Failed to read {}", input.display()))?;
        let t = &header.transform;
        println!("File: {}", input.display());
        println!(
            "Dimensions: {} x {} ({} band(s))",
            header.width, header.height, header.bands
        );
        println!("Cell size: {} x {}", t.pixel_width, t.pixel_height.abs());
        println!(
            "Origin: ({:.6}, {:.6})",
            t.origin_x, t.origin_y
        );
        if let Some(crs) = &header.crs {
            println!("CRS: {}", crs.identifier());
        }
        if let Some(nodata) = header.nodata {
            println!("NoData: {}", nodata);
        }
        println!();
    }
    Ok(())
}

fn check_formula(expression: &str, values: &[String]) -> Result<()> {
    let formula: Formula = expression
        .parse()
        .with_context(|| format!("Invalid formula '{}'", expression))?;
    formula
        .validate()
        .with_context(|| format!("Invalid formula '{}'", expression))?;
    println!("Formula: {}", formula.source());
    println!("Variables: {}", formula.variables().join(", "));

    if values.is_empty() {
        return Ok(());
    }
    let bindings = values
        .iter()
        .map(|s| {
            let (name, value) = split_pair(s, "value")?;
            let value: f64 = value
                .parse()
                .with_context(|| format!("Invalid number for '{}'", name))?;
            Ok((name.to_string(), value))
        })
        .collect::<Result<Vec<_>>>()?;
    match formula.evaluate(|ident| bindings.iter().find(|(n, _)| n == ident).map(|(_, v)| *v)) {
        Ok(v) => println!("Result: {}", v),
        Err(e) => println!("Result: no data ({})", e),
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Run(args) => run(args),
        Commands::Info { inputs } => info_command(&inputs),
        Commands::CheckFormula { expression, values } => check_formula(&expression, &values),
    }
}
