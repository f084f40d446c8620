//! Job configuration

use std::path::Path;
use std::time::Duration;

use polystat_algorithms::formula::FormulaDefinition;
use polystat_algorithms::rasterize::RasterizeMode;
use polystat_algorithms::statistics::Statistic;
use polystat_algorithms::timeseries::TimeSeriesConfig;
use polystat_parallel::{DEFAULT_EXPIRY, ProcessingMode, num_cpus};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ZonalError};
use crate::postprocess::PostOperation;

/// Which cells count as inside a zone when statistics are not
/// coverage-weighted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeMode {
    /// Cell centre inside the polygon
    #[default]
    Strict,
    /// Any overlap of positive area with the polygon
    AllTouched,
}

/// How cells are weighted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageMode {
    /// Every included cell has weight 1
    #[default]
    PixelCount,
    /// Cells are weighted by the fraction of their area inside the zone
    Geometric,
}

/// Everything that controls one zonal statistics job.
///
/// Validated once by [`ZonalProcessor`](crate::ZonalProcessor) and never
/// changed while the job runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Worker threads; 1 processes chunks on the calling thread
    pub workers: usize,
    /// Ceiling in bytes for raster data held by all workers together
    pub memory_limit: usize,
    /// Zones per chunk
    pub chunk_size: usize,
    pub statistics: Vec<Statistic>,
    pub edge_mode: EdgeMode,
    pub coverage_mode: CoverageMode,
    /// Coverage fraction (0..1) below which a zone gets no statistics
    pub min_coverage: f64,
    pub formulas: Vec<FormulaDefinition>,
    pub time_series: Vec<TimeSeriesConfig>,
    /// Derived columns added once every zone is processed
    pub post_processing: Vec<PostOperation>,
    pub checkpoint_expiry_secs: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus(),
            memory_limit: 512 * 1024 * 1024,
            chunk_size: 100,
            statistics: vec![Statistic::Mean],
            edge_mode: EdgeMode::default(),
            coverage_mode: CoverageMode::default(),
            min_coverage: 0.0,
            formulas: Vec::new(),
            time_series: Vec::new(),
            post_processing: Vec::new(),
            checkpoint_expiry_secs: DEFAULT_EXPIRY.as_secs(),
        }
    }
}

impl JobConfig {
    /// Load from a JSON document; missing fields take their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(polystat_core::Error::from)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| ZonalError::config(format!("cannot parse job configuration: {}", e)))
    }

    pub fn with_statistics(mut self, statistics: Vec<Statistic>) -> Self {
        self.statistics = statistics;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_formula(mut self, formula: FormulaDefinition) -> Self {
        self.formulas.push(formula);
        self
    }

    pub fn with_post_operation(mut self, operation: PostOperation) -> Self {
        self.post_processing.push(operation);
        self
    }

    pub fn checkpoint_expiry(&self) -> Duration {
        Duration::from_secs(self.checkpoint_expiry_secs)
    }

    pub fn processing_mode(&self) -> ProcessingMode {
        ProcessingMode::for_workers(self.workers)
    }

    /// Statistics are coverage-weighted
    pub fn weighted(&self) -> bool {
        self.coverage_mode == CoverageMode::Geometric
    }

    /// Rasterization mode of the mask statistics are computed over
    pub fn mask_mode(&self) -> RasterizeMode {
        match (self.coverage_mode, self.edge_mode) {
            (CoverageMode::Geometric, _) => RasterizeMode::Geometric,
            (CoverageMode::PixelCount, EdgeMode::Strict) => RasterizeMode::Strict,
            (CoverageMode::PixelCount, EdgeMode::AllTouched) => RasterizeMode::AllTouched,
        }
    }

    /// Problems that do not depend on the inputs
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.statistics.is_empty() {
            problems.push("at least one statistic is required".to_string());
        }
        if self.chunk_size == 0 {
            problems.push("chunk size must be greater than 0".to_string());
        }
        if self.workers == 0 {
            problems.push("worker count must be at least 1".to_string());
        }
        if self.memory_limit == 0 {
            problems.push("memory ceiling must be greater than 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.min_coverage) {
            problems.push(format!(
                "min_coverage must be within [0, 1], got {}",
                self.min_coverage
            ));
        }
        for stat in &self.statistics {
            if let Statistic::Percentile(p) = stat {
                if !(0.0..=100.0).contains(p) {
                    problems.push(format!("statistic '{}': percentile must be within [0, 100]", stat));
                }
            }
        }
        problems
    }
}
