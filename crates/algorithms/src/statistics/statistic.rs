//! Statistic names

use std::fmt;
use std::str::FromStr;

use polystat_core::Error;
use serde::{Deserialize, Serialize};

/// A per-zone statistic
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Statistic {
    Mean,
    Sum,
    Min,
    Max,
    Median,
    /// Most frequent value (smallest on ties)
    Mode,
    /// Least frequent value (smallest on ties)
    Minority,
    /// Number of distinct values
    Variety,
    StdDev,
    Variance,
    /// Coefficient of variation, std / mean * 100
    Cv,
    Range,
    /// Linear-interpolated percentile in [0, 100]
    Percentile(f64),
    /// Included pixels, or the sum of coverage weights when weighted
    Count,
    /// Share of the zone area covered by valid cells
    CoverageFraction,
}

impl Statistic {
    /// Canonical name, used in output column names
    pub fn name(&self) -> String {
        match self {
            Statistic::Mean => "mean".into(),
            Statistic::Sum => "sum".into(),
            Statistic::Min => "min".into(),
            Statistic::Max => "max".into(),
            Statistic::Median => "median".into(),
            Statistic::Mode => "mode".into(),
            Statistic::Minority => "minority".into(),
            Statistic::Variety => "variety".into(),
            Statistic::StdDev => "std".into(),
            Statistic::Variance => "variance".into(),
            Statistic::Cv => "cv".into(),
            Statistic::Range => "range".into(),
            Statistic::Percentile(p) => format!("p{}", p),
            Statistic::Count => "count".into(),
            Statistic::CoverageFraction => "coverage_fraction".into(),
        }
    }

    /// Whether computing it needs every value kept in memory
    pub fn needs_values(&self) -> bool {
        matches!(
            self,
            Statistic::Median
                | Statistic::Mode
                | Statistic::Minority
                | Statistic::Variety
                | Statistic::Percentile(_)
        )
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for Statistic {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        let stat = match key.as_str() {
            "mean" | "avg" | "average" => Statistic::Mean,
            "sum" => Statistic::Sum,
            "min" | "minimum" => Statistic::Min,
            "max" | "maximum" => Statistic::Max,
            "median" => Statistic::Median,
            "mode" | "majority" => Statistic::Mode,
            "minority" => Statistic::Minority,
            "variety" | "unique" => Statistic::Variety,
            "std" | "stddev" | "std_dev" => Statistic::StdDev,
            "var" | "variance" => Statistic::Variance,
            "cv" => Statistic::Cv,
            "range" => Statistic::Range,
            "count" | "pixel_count" => Statistic::Count,
            "coverage" | "coverage_fraction" | "coverage_pct" => Statistic::CoverageFraction,
            other => {
                let digits = other
                    .strip_prefix("percentile_")
                    .or_else(|| other.strip_prefix('p'))
                    .ok_or_else(|| unknown(s))?;
                let p: f64 = digits.parse().map_err(|_| unknown(s))?;
                if !(0.0..=100.0).contains(&p) {
                    return Err(Error::InvalidParameter {
                        name: "statistic",
                        value: s.to_string(),
                        reason: "percentile must be between 0 and 100".into(),
                    });
                }
                Statistic::Percentile(p)
            }
        };
        Ok(stat)
    }
}

fn unknown(s: &str) -> Error {
    Error::InvalidParameter {
        name: "statistic",
        value: s.to_string(),
        reason: "unknown statistic".into(),
    }
}

impl TryFrom<String> for Statistic {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Statistic> for String {
    fn from(value: Statistic) -> Self {
        value.name()
    }
}
