//! Time-series analysis over dated raster layers
//!
//! Each configured layer is reduced to the zone's mean value first; the
//! analyses below then run over that (date, value) series:
//!
//! - **change**: first vs last observation
//! - **trend**: least-squares regression or Sen's slope over the
//!   observation index
//! - **temporal statistics**: mean/min/max/std/cv across time
//! - **seasonal**: grouped means by month, quarter or meteorological season
//! - **extremes**: highest and lowest observation with their dates

mod trend;

use chrono::{Datelike, NaiveDate};
use polystat_core::AttributeValue;
use serde::{Deserialize, Serialize};

pub use trend::{LinearTrend, linear_regression, sens_slope};

/// Threshold below which a mean is treated as zero for ratios
const ZERO_EPS: f64 = 1e-10;

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const SEASONS: [&str; 4] = ["winter", "spring", "summer", "fall"];

/// One layer of the series and its acquisition date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatedLayer {
    pub layer: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendMethod {
    #[default]
    LinearRegression,
    SensSlope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalStatistic {
    Mean,
    Min,
    Max,
    Std,
    Cv,
}

impl TemporalStatistic {
    fn name(self) -> &'static str {
        match self {
            TemporalStatistic::Mean => "mean",
            TemporalStatistic::Min => "min",
            TemporalStatistic::Max => "max",
            TemporalStatistic::Std => "std",
            TemporalStatistic::Cv => "cv",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeasonalGrouping {
    Month,
    Quarter,
    /// Meteorological seasons: DJF, MAM, JJA, SON
    Season,
}

impl SeasonalGrouping {
    /// Group labels in output order
    fn labels(self) -> Vec<String> {
        match self {
            SeasonalGrouping::Month => MONTHS.iter().map(|m| format!("month_{}", m)).collect(),
            SeasonalGrouping::Quarter => (1..=4).map(|q| format!("quarter_q{}", q)).collect(),
            SeasonalGrouping::Season => SEASONS.iter().map(|s| format!("seasonal_{}", s)).collect(),
        }
    }

    /// Index into `labels()` for a date
    fn group_of(self, date: NaiveDate) -> usize {
        let month0 = date.month0() as usize;
        match self {
            SeasonalGrouping::Month => month0,
            SeasonalGrouping::Quarter => month0 / 3,
            // Dec, Jan, Feb -> winter
            SeasonalGrouping::Season => ((month0 + 1) % 12) / 3,
        }
    }
}

/// A time-series analysis attached to a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesConfig {
    pub name: String,
    /// Prepended to every output column
    #[serde(default)]
    pub prefix: String,
    pub layers: Vec<DatedLayer>,
    #[serde(default)]
    pub change_detection: bool,
    #[serde(default)]
    pub trend: Option<TrendMethod>,
    #[serde(default)]
    pub temporal_statistics: Vec<TemporalStatistic>,
    #[serde(default)]
    pub seasonal: Option<SeasonalGrouping>,
    #[serde(default)]
    pub extremes: bool,
}

/// One point of a zone's series. `index` is the layer's position in
/// date order and is the regression abscissa.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub index: usize,
    pub date: NaiveDate,
    pub value: f64,
}

impl TimeSeriesConfig {
    /// Layers sorted by date; the position is the observation index
    pub fn ordered_layers(&self) -> Vec<&DatedLayer> {
        let mut layers: Vec<&DatedLayer> = self.layers.iter().collect();
        layers.sort_by_key(|l| l.date);
        layers
    }

    /// Unprefixed names of the columns this analysis produces
    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        if self.change_detection {
            names.extend(
                [
                    "mean_change",
                    "percent_change",
                    "first_value",
                    "last_value",
                    "first_date",
                    "last_date",
                ]
                .map(String::from),
            );
        }
        match self.trend {
            Some(TrendMethod::LinearRegression) => names.extend(
                [
                    "trend_slope",
                    "trend_intercept",
                    "trend_r2",
                    "trend_pvalue",
                    "trend_stderr",
                ]
                .map(String::from),
            ),
            Some(TrendMethod::SensSlope) => {
                names.extend(["sens_slope", "sens_intercept"].map(String::from))
            }
            None => {}
        }
        for stat in &self.temporal_statistics {
            names.push(format!("temporal_{}", stat.name()));
        }
        if let Some(grouping) = self.seasonal {
            for label in grouping.labels() {
                names.push(format!("{}_mean", label));
                names.push(format!("{}_count", label));
            }
        }
        if self.extremes {
            names.extend(["max_value", "max_date", "min_value", "min_date"].map(String::from));
        }
        names
    }

    /// Output column names, prefixed
    pub fn output_columns(&self) -> Vec<String> {
        self.names()
            .into_iter()
            .map(|n| format!("{}{}", self.prefix, n))
            .collect()
    }

    /// Run every enabled analysis.
    ///
    /// Returns one value per [`output_columns`](Self::output_columns) entry,
    /// in the same order. An empty series yields `Null` everywhere except
    /// seasonal counts, which are 0.
    pub fn analyze(&self, observations: &[Observation]) -> Vec<(String, AttributeValue)> {
        let mut series: Vec<Observation> = observations
            .iter()
            .copied()
            .filter(|o| o.value.is_finite())
            .collect();
        series.sort_by_key(|o| (o.date, o.index));

        let mut out: Vec<AttributeValue> = Vec::new();
        if self.change_detection {
            out.extend(change(&series));
        }
        match self.trend {
            Some(TrendMethod::LinearRegression) => out.extend(regression(&series)),
            Some(TrendMethod::SensSlope) => out.extend(sens(&series)),
            None => {}
        }
        if !self.temporal_statistics.is_empty() {
            out.extend(temporal(&series, &self.temporal_statistics));
        }
        if let Some(grouping) = self.seasonal {
            out.extend(seasonal(&series, grouping));
        }
        if self.extremes {
            out.extend(extremes(&series));
        }

        self.output_columns().into_iter().zip(out).collect()
    }
}

fn float(v: f64) -> AttributeValue {
    AttributeValue::from_opt(Some(v))
}

fn date(d: NaiveDate) -> AttributeValue {
    AttributeValue::String(d.format("%Y-%m-%d").to_string())
}

fn change(series: &[Observation]) -> Vec<AttributeValue> {
    let (Some(first), Some(last)) = (series.first(), series.last()) else {
        return vec![AttributeValue::Null; 6];
    };
    let delta = last.value - first.value;
    let percent = (first.value.abs() > ZERO_EPS).then(|| delta / first.value * 100.0);
    vec![
        float(delta),
        AttributeValue::from_opt(percent),
        float(first.value),
        float(last.value),
        date(first.date),
        date(last.date),
    ]
}

fn xy(series: &[Observation]) -> (Vec<f64>, Vec<f64>) {
    series.iter().map(|o| (o.index as f64, o.value)).unzip()
}

fn regression(series: &[Observation]) -> Vec<AttributeValue> {
    let (x, y) = xy(series);
    match linear_regression(&x, &y) {
        Some(fit) => vec![
            float(fit.slope),
            float(fit.intercept),
            float(fit.r2),
            AttributeValue::from_opt(fit.pvalue),
            AttributeValue::from_opt(fit.stderr),
        ],
        None => vec![AttributeValue::Null; 5],
    }
}

fn sens(series: &[Observation]) -> Vec<AttributeValue> {
    let (x, y) = xy(series);
    match sens_slope(&x, &y) {
        Some((slope, intercept)) => vec![float(slope), float(intercept)],
        None => vec![AttributeValue::Null; 2],
    }
}

fn temporal(series: &[Observation], stats: &[TemporalStatistic]) -> Vec<AttributeValue> {
    if series.is_empty() {
        return vec![AttributeValue::Null; stats.len()];
    }
    let n = series.len() as f64;
    let mean = series.iter().map(|o| o.value).sum::<f64>() / n;
    let std = (series.iter().map(|o| (o.value - mean).powi(2)).sum::<f64>() / n).sqrt();
    let min = series.iter().map(|o| o.value).fold(f64::INFINITY, f64::min);
    let max = series.iter().map(|o| o.value).fold(f64::NEG_INFINITY, f64::max);

    stats
        .iter()
        .map(|stat| match stat {
            TemporalStatistic::Mean => float(mean),
            TemporalStatistic::Min => float(min),
            TemporalStatistic::Max => float(max),
            TemporalStatistic::Std => float(std),
            TemporalStatistic::Cv => {
                AttributeValue::from_opt((mean.abs() > ZERO_EPS).then(|| std / mean * 100.0))
            }
        })
        .collect()
}

fn seasonal(series: &[Observation], grouping: SeasonalGrouping) -> Vec<AttributeValue> {
    let groups = grouping.labels().len();
    let mut sums = vec![0.0; groups];
    let mut counts = vec![0usize; groups];
    for o in series {
        let g = grouping.group_of(o.date);
        sums[g] += o.value;
        counts[g] += 1;
    }
    sums.iter()
        .zip(&counts)
        .flat_map(|(&sum, &count)| {
            let mean = (count > 0).then(|| sum / count as f64);
            [AttributeValue::from_opt(mean), AttributeValue::Int(count as i64)]
        })
        .collect()
}

fn extremes(series: &[Observation]) -> Vec<AttributeValue> {
    // First occurrence wins on ties
    let mut hi: Option<&Observation> = None;
    let mut lo: Option<&Observation> = None;
    for o in series {
        if hi.is_none_or(|h| o.value > h.value) {
            hi = Some(o);
        }
        if lo.is_none_or(|l| o.value < l.value) {
            lo = Some(o);
        }
    }
    match (hi, lo) {
        (Some(hi), Some(lo)) => vec![float(hi.value), date(hi.date), float(lo.value), date(lo.date)],
        _ => vec![AttributeValue::Null; 4],
    }
}
