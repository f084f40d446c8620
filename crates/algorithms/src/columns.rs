//! Whole-column operations over one output field of a finished table
//!
//! Every function takes the column as `Option<f64>` cells, `None` being
//! "no data". Missing cells are ignored by the column-wide reductions
//! (min, max, mean, breaks) and stay missing in the output.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::statistics::percentile;

/// Above this many values Jenks falls back to quantile breaks
pub const JENKS_MAX_VALUES: usize = 4000;

fn sorted_valid(values: &[Option<f64>]) -> Vec<f64> {
    let mut out: Vec<f64> = values.iter().flatten().copied().filter(|v| v.is_finite()).collect();
    out.sort_by(f64::total_cmp);
    out
}

/// Rescale to `[lo, hi]`; a constant column maps to `lo`
pub fn normalize_minmax(values: &[Option<f64>], (lo, hi): (f64, f64)) -> Vec<Option<f64>> {
    let sorted = sorted_valid(values);
    let (Some(&min), Some(&max)) = (sorted.first(), sorted.last()) else {
        return vec![None; values.len()];
    };
    values
        .iter()
        .map(|v| {
            v.filter(|v| v.is_finite()).map(|v| {
                if max == min {
                    lo
                } else {
                    (v - min) / (max - min) * (hi - lo) + lo
                }
            })
        })
        .collect()
}

/// Standard score with the population standard deviation; a constant
/// column maps to 0
pub fn normalize_zscore(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let valid = sorted_valid(values);
    if valid.is_empty() {
        return vec![None; values.len()];
    }
    let n = valid.len() as f64;
    let mean = valid.iter().sum::<f64>() / n;
    let std = (valid.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    values
        .iter()
        .map(|v| {
            v.filter(|v| v.is_finite())
                .map(|v| if std == 0.0 { 0.0 } else { (v - mean) / std })
        })
        .collect()
}

/// How class breaks are chosen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakMethod {
    #[default]
    EqualInterval,
    Quantile,
    /// Fisher-Jenks natural breaks
    Jenks,
}

/// `classes + 1` breaks from the column minimum to its maximum, or `None`
/// when the column has no data
pub fn class_breaks(values: &[Option<f64>], classes: usize, method: BreakMethod) -> Option<Vec<f64>> {
    let sorted = sorted_valid(values);
    if sorted.is_empty() || classes == 0 {
        return None;
    }
    Some(match method {
        BreakMethod::EqualInterval => {
            let (min, max) = (sorted[0], sorted[sorted.len() - 1]);
            (0..=classes)
                .map(|i| min + (max - min) * i as f64 / classes as f64)
                .collect()
        }
        BreakMethod::Quantile => quantile_breaks(&sorted, classes),
        BreakMethod::Jenks if sorted.len() > JENKS_MAX_VALUES => {
            debug!(values = sorted.len(), "too many values for jenks, using quantiles");
            quantile_breaks(&sorted, classes)
        }
        BreakMethod::Jenks => jenks_breaks(&sorted, classes),
    })
}

fn quantile_breaks(sorted: &[f64], classes: usize) -> Vec<f64> {
    (0..=classes)
        .filter_map(|i| percentile(sorted, 100.0 * i as f64 / classes as f64))
        .collect()
}

/// Natural breaks minimising the within-class sum of squared deviations.
///
/// Breaks are class lower limits, so they line up with [`class_index`].
/// Fewer distinct values than `classes` yields fewer classes.
fn jenks_breaks(sorted: &[f64], classes: usize) -> Vec<f64> {
    let n = sorted.len();
    let mut distinct = sorted.to_vec();
    distinct.dedup();
    let k = classes.min(distinct.len());

    // 1-based: lower[l][j] is the first element of class j in the best
    // split of the first l values into j classes
    let mut lower = vec![vec![0usize; k + 1]; n + 1];
    let mut cost = vec![vec![f64::INFINITY; k + 1]; n + 1];
    for j in 1..=k {
        lower[1][j] = 1;
        cost[1][j] = 0.0;
    }
    for l in 2..=n {
        let (mut s1, mut s2, mut w) = (0.0, 0.0, 0.0);
        let mut variance = 0.0;
        for m in 1..=l {
            let first = l - m + 1;
            let v = sorted[first - 1];
            s1 += v;
            s2 += v * v;
            w += 1.0;
            variance = s2 - s1 * s1 / w;
            let before = first - 1;
            if before != 0 {
                for j in 2..=k {
                    let candidate = variance + cost[before][j - 1];
                    if cost[l][j] >= candidate {
                        lower[l][j] = first;
                        cost[l][j] = candidate;
                    }
                }
            }
        }
        lower[l][1] = 1;
        cost[l][1] = variance;
    }

    let mut breaks = vec![0.0; k + 1];
    breaks[0] = sorted[0];
    breaks[k] = sorted[n - 1];
    let mut end = n;
    for j in (2..=k).rev() {
        let start = lower[end][j].clamp(1, end);
        breaks[j - 1] = sorted[start - 1];
        end = (start - 1).max(1);
    }
    breaks
}

/// 0-based class of `value` given inner breaks; a value equal to a break
/// belongs to the upper class
pub fn class_index(value: f64, inner_breaks: &[f64]) -> usize {
    inner_breaks.iter().filter(|&&b| b <= value).count()
}

/// Inner breaks of a full `[min, .., max]` break list
pub fn inner_breaks(breaks: &[f64]) -> &[f64] {
    if breaks.len() > 2 {
        &breaks[1..breaks.len() - 1]
    } else {
        &[]
    }
}

/// 1-based rank; by default the largest value ranks 1. Ties keep input
/// order.
pub fn rank(values: &[Option<f64>], ascending: bool) -> Vec<Option<usize>> {
    let mut order: Vec<(usize, f64)> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.filter(|v| v.is_finite()).map(|v| (i, v)))
        .collect();
    if ascending {
        order.sort_by(|a, b| a.1.total_cmp(&b.1));
    } else {
        order.sort_by(|a, b| b.1.total_cmp(&a.1));
    }
    let mut out = vec![None; values.len()];
    for (position, (index, _)) in order.into_iter().enumerate() {
        out[index] = Some(position + 1);
    }
    out
}

/// Share (0..100) of the column's values strictly below each value
pub fn percentile_rank(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let sorted = sorted_valid(values);
    let n = sorted.len() as f64;
    values
        .iter()
        .map(|v| {
            v.filter(|v| v.is_finite()).map(|v| {
                let below = sorted.partition_point(|&s| s < v);
                below as f64 / n * 100.0
            })
        })
        .collect()
}

/// Comparison against a fixed threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<")]
    Less,
    #[serde(rename = "<=")]
    LessOrEqual,
    /// Equal within a relative tolerance of 1e-5
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
}

impl Condition {
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        let close = (value - threshold).abs() <= 1e-8 + 1e-5 * threshold.abs();
        match self {
            Condition::Greater => value > threshold,
            Condition::GreaterOrEqual => value >= threshold,
            Condition::Less => value < threshold,
            Condition::LessOrEqual => value <= threshold,
            Condition::Equal => close,
            Condition::NotEqual => !close,
        }
    }
}

pub fn flag(values: &[Option<f64>], condition: Condition, threshold: f64) -> Vec<Option<bool>> {
    values
        .iter()
        .map(|v| v.filter(|v| v.is_finite()).map(|v| condition.holds(v, threshold)))
        .collect()
}

/// Which end of the distribution [`flag_percentile`] marks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tail {
    Top,
    Bottom,
}

/// Flag the top or bottom `percent` of the column
pub fn flag_percentile(values: &[Option<f64>], tail: Tail, percent: f64) -> Vec<Option<bool>> {
    let sorted = sorted_valid(values);
    let threshold = match tail {
        Tail::Top => percentile(&sorted, 100.0 - percent),
        Tail::Bottom => percentile(&sorted, percent),
    };
    let Some(threshold) = threshold else {
        return vec![None; values.len()];
    };
    let condition = match tail {
        Tail::Top => Condition::GreaterOrEqual,
        Tail::Bottom => Condition::LessOrEqual,
    };
    flag(values, condition, threshold)
}
