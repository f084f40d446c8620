//! # polystat engine
//!
//! Batch zonal statistics: for every zone of a polygon layer, the cells of
//! one or more rasters inside it are reduced to statistics, optionally
//! enriched with user formulas and time-series analyses. Finished tables can
//! be post-processed with column-wide normalisation, classes, ranks, flags
//! and composite scores.
//!
//! ```ignore
//! use polystat_engine::prelude::*;
//!
//! let zones = polystat_core::io::read_zones("fields.geojson", Some("id"))?;
//! let config = JobConfig::default().with_statistics(vec![Statistic::Mean, Statistic::Max]);
//! let processor = ZonalProcessor::open(config, &["ndvi.tif"])?.with_checkpoint_dir("job.ckpt");
//! let outcome = processor.run(&zones, &JobContext::new())?;
//! println!("{:?}", outcome.table.number("field-1", "ndvi_mean"));
//! ```

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod layout;
mod pipeline;
pub mod postprocess;
pub mod processor;
pub mod table;

pub use config::{CoverageMode, EdgeMode, JobConfig};
pub use error::{Result, ZonalError};
pub use fingerprint::fingerprint;
pub use layout::OutputLayout;
pub use postprocess::{Normalization, PostOperation, WeightedField};
pub use processor::{JobOutcome, JobStatus, ZonalProcessor};
pub use table::{Diagnostic, DiagnosticKind, ResultRow, ResultTable};

/// Re-exports for running jobs
pub mod prelude {
    pub use crate::config::{CoverageMode, EdgeMode, JobConfig};
    pub use crate::postprocess::{Normalization, PostOperation, WeightedField};
    pub use crate::processor::{JobOutcome, JobStatus, ZonalProcessor};
    pub use crate::table::{Diagnostic, DiagnosticKind, ResultTable};
    pub use polystat_algorithms::columns::{BreakMethod, Condition, Tail};
    pub use polystat_algorithms::formula::{FormulaDefinition, FormulaMode};
    pub use polystat_algorithms::statistics::Statistic;
    pub use polystat_algorithms::timeseries::{
        DatedLayer, SeasonalGrouping, TemporalStatistic, TimeSeriesConfig, TrendMethod,
    };
    pub use polystat_parallel::{JobContext, Progress};
}
