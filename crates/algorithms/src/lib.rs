//! # polystat algorithms
//!
//! Per-zone building blocks of the zonal statistics engine.
//!
//! ## Modules
//!
//! - **rasterize**: zone polygon to coverage mask (strict, all-touched,
//!   exact fractional coverage)
//! - **extract**: masked, no-data filtered pixel samples
//! - **statistics**: requested statistics from pixel samples
//! - **formula**: sandboxed user expressions over columns or pixels
//! - **timeseries**: change, trend, seasonal and extreme analysis over dated
//!   layers
//! - **vector**: ring clipping, areas and geometry validation
//! - **columns**: normalisation, classification, ranking and flags over a
//!   whole output column

pub mod columns;
pub mod extract;
pub mod formula;
pub mod rasterize;
mod rows;
pub mod statistics;
pub mod timeseries;
pub mod vector;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::extract::{PixelSample, PixelStack, extract, extract_stack};
    pub use crate::formula::{
        CompiledFormula, EvaluationError, Formula, FormulaDefinition, FormulaError, FormulaMode,
    };
    pub use crate::rasterize::{CoverageMask, RasterizeMode, rasterize};
    pub use crate::statistics::{Statistic, StatisticResult, aggregate};
    pub use crate::timeseries::{Observation, TimeSeriesConfig};
    pub use crate::vector::{GeometryError, validate_zone, zone_area};
    pub use polystat_core::prelude::*;
}
