//! Zone statistics
//!
//! - **statistic**: the statistic names a job can request
//! - **aggregate**: single-pass reduction of pixel samples

pub mod aggregate;
pub mod statistic;

pub use aggregate::{StatisticResult, StatsAccumulator, aggregate, percentile};
pub use statistic::Statistic;
