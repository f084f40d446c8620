//! Column operations applied to the finished result table
//!
//! Each operation reads whole columns (any earlier output included) and
//! appends one new column. Operations run in configuration order, only once
//! every zone is in the table.

use std::cmp::Ordering;

use polystat_algorithms::columns::{
    self, BreakMethod, Condition, Tail, class_breaks, class_index, inner_breaks,
};
use polystat_core::AttributeValue;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::table::ResultTable;

/// Rescaling applied by [`PostOperation::Normalize`] and to score
/// indicators
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// Linear rescale of the column's minimum..maximum onto `range`
    #[default]
    MinMax,
    ZScore,
    /// Values are used as they are
    None,
}

impl Normalization {
    fn apply(self, values: &[Option<f64>], range: (f64, f64)) -> Vec<Option<f64>> {
        match self {
            Normalization::MinMax => columns::normalize_minmax(values, range),
            Normalization::ZScore => columns::normalize_zscore(values),
            Normalization::None => values.to_vec(),
        }
    }
}

/// One indicator of a composite score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedField {
    pub field: String,
    pub weight: f64,
}

fn default_range() -> (f64, f64) {
    (0.0, 100.0)
}

fn default_classes() -> usize {
    5
}

/// A derived column.
///
/// `output` defaults to `{field}_{suffix}` with the suffix named on each
/// variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum PostOperation {
    /// Suffix `norm`
    Normalize {
        field: String,
        #[serde(default)]
        method: Normalization,
        #[serde(default = "default_range")]
        range: (f64, f64),
        #[serde(default)]
        output: Option<String>,
    },
    /// Suffix `class`. Writes the 1-based class, or its label when labels
    /// are given. Non-empty `breaks` are inner breaks used instead of
    /// `method`.
    Classify {
        field: String,
        #[serde(default)]
        method: BreakMethod,
        #[serde(default = "default_classes")]
        classes: usize,
        #[serde(default)]
        breaks: Vec<f64>,
        #[serde(default)]
        labels: Vec<String>,
        #[serde(default)]
        output: Option<String>,
    },
    /// Suffix `rank`; the largest value ranks 1 unless `ascending`
    Rank {
        field: String,
        #[serde(default)]
        ascending: bool,
        #[serde(default)]
        output: Option<String>,
    },
    /// Suffix `pct_rank`
    PercentileRank {
        field: String,
        #[serde(default)]
        output: Option<String>,
    },
    /// Suffix `flag`; 1 where the condition holds, 0 where it does not
    Flag {
        field: String,
        condition: Condition,
        threshold: f64,
        #[serde(default)]
        output: Option<String>,
    },
    /// Suffix `flag`; 1 for zones in the top or bottom `percent`
    FlagPercentile {
        field: String,
        tail: Tail,
        percent: f64,
        #[serde(default)]
        output: Option<String>,
    },
    /// Weighted composite of normalised indicators, written to `name`.
    ///
    /// A zone missing any indicator gets no score.
    Score {
        name: String,
        fields: Vec<WeightedField>,
        #[serde(default)]
        normalization: Normalization,
        #[serde(default = "default_range")]
        range: (f64, f64),
        /// Divide by the total weight
        #[serde(default)]
        average: bool,
    },
}

impl PostOperation {
    /// Column this operation writes
    pub fn output_column(&self) -> String {
        let (field, output, suffix) = match self {
            PostOperation::Score { name, .. } => return name.clone(),
            PostOperation::Normalize { field, output, .. } => (field, output, "norm"),
            PostOperation::Classify { field, output, .. } => (field, output, "class"),
            PostOperation::Rank { field, output, .. } => (field, output, "rank"),
            PostOperation::PercentileRank { field, output } => (field, output, "pct_rank"),
            PostOperation::Flag { field, output, .. } => (field, output, "flag"),
            PostOperation::FlagPercentile { field, output, .. } => (field, output, "flag"),
        };
        output.clone().unwrap_or_else(|| format!("{}_{}", field, suffix))
    }

    /// Columns this operation reads
    pub fn input_columns(&self) -> Vec<&str> {
        match self {
            PostOperation::Score { fields, .. } => fields.iter().map(|w| w.field.as_str()).collect(),
            PostOperation::Normalize { field, .. }
            | PostOperation::Classify { field, .. }
            | PostOperation::Rank { field, .. }
            | PostOperation::PercentileRank { field, .. }
            | PostOperation::Flag { field, .. }
            | PostOperation::FlagPercentile { field, .. } => vec![field.as_str()],
        }
    }

    fn parameter_problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let output = self.output_column();
        match self {
            PostOperation::Normalize { range, .. } | PostOperation::Score { range, .. }
                if !(range.0.is_finite() && range.1.is_finite()) =>
            {
                problems.push(format!("'{}': normalisation range must be finite", output));
            }
            _ => {}
        }
        match self {
            PostOperation::Classify {
                classes,
                breaks,
                labels,
                ..
            } => {
                let count = if breaks.is_empty() { *classes } else { breaks.len() + 1 };
                if breaks.is_empty() && *classes == 0 {
                    problems.push(format!("'{}': at least one class is required", output));
                }
                if breaks
                    .windows(2)
                    .any(|w| w[0].partial_cmp(&w[1]) != Some(Ordering::Less))
                {
                    problems.push(format!("'{}': breaks must be strictly increasing", output));
                }
                if !labels.is_empty() && labels.len() != count {
                    problems.push(format!(
                        "'{}': {} labels given for {} classes",
                        output,
                        labels.len(),
                        count
                    ));
                }
            }
            PostOperation::Flag { threshold, .. } if !threshold.is_finite() => {
                problems.push(format!("'{}': threshold must be finite", output));
            }
            PostOperation::FlagPercentile { percent, .. }
                if *percent == 0.0 || !(0.0..=100.0).contains(percent) =>
            {
                problems.push(format!("'{}': percent must be within (0, 100]", output));
            }
            PostOperation::Score { fields, .. } => {
                if fields.is_empty() {
                    problems.push(format!("score '{}' has no fields", output));
                }
                if fields.iter().any(|w| !w.weight.is_finite()) {
                    problems.push(format!("score '{}': weights must be finite", output));
                }
            }
            _ => {}
        }
        problems
    }

    fn compute(&self, table: &ResultTable) -> Vec<AttributeValue> {
        match self {
            PostOperation::Normalize {
                field,
                method,
                range,
                ..
            } => floats(method.apply(&numbers(table, field), *range)),
            PostOperation::Classify {
                field,
                method,
                classes,
                breaks,
                labels,
                ..
            } => {
                let values = numbers(table, field);
                let inner = if breaks.is_empty() {
                    match class_breaks(&values, *classes, *method) {
                        Some(full) => inner_breaks(&full).to_vec(),
                        None => return vec![AttributeValue::Null; values.len()],
                    }
                } else {
                    breaks.clone()
                };
                debug!(field = %field, breaks = ?inner, "classified");
                values
                    .iter()
                    .map(|v| match v {
                        Some(v) => {
                            let class = class_index(*v, &inner);
                            match labels.last() {
                                Some(last) => AttributeValue::String(
                                    labels.get(class).unwrap_or(last).clone(),
                                ),
                                None => AttributeValue::Int(class as i64 + 1),
                            }
                        }
                        None => AttributeValue::Null,
                    })
                    .collect()
            }
            PostOperation::Rank {
                field, ascending, ..
            } => columns::rank(&numbers(table, field), *ascending)
                .into_iter()
                .map(|r| r.map_or(AttributeValue::Null, |r| AttributeValue::Int(r as i64)))
                .collect(),
            PostOperation::PercentileRank { field, .. } => {
                floats(columns::percentile_rank(&numbers(table, field)))
            }
            PostOperation::Flag {
                field,
                condition,
                threshold,
                ..
            } => flags(columns::flag(&numbers(table, field), *condition, *threshold)),
            PostOperation::FlagPercentile {
                field,
                tail,
                percent,
                ..
            } => flags(columns::flag_percentile(&numbers(table, field), *tail, *percent)),
            PostOperation::Score {
                fields,
                normalization,
                range,
                average,
                ..
            } => {
                let indicators: Vec<(Vec<Option<f64>>, f64)> = fields
                    .iter()
                    .map(|w| (normalization.apply(&numbers(table, &w.field), *range), w.weight))
                    .collect();
                let total_weight: f64 = fields.iter().map(|w| w.weight).sum();
                (0..table.len())
                    .map(|row| {
                        let mut score = 0.0;
                        for (values, weight) in &indicators {
                            match values.get(row).copied().flatten() {
                                Some(v) => score += v * weight,
                                None => return AttributeValue::Null,
                            }
                        }
                        if *average {
                            if total_weight == 0.0 {
                                return AttributeValue::Null;
                            }
                            score /= total_weight;
                        }
                        AttributeValue::Float(score)
                    })
                    .collect()
            }
        }
    }
}

fn numbers(table: &ResultTable, field: &str) -> Vec<Option<f64>> {
    table.column_numbers(field).unwrap_or_default()
}

fn floats(values: Vec<Option<f64>>) -> Vec<AttributeValue> {
    values.into_iter().map(AttributeValue::from_opt).collect()
}

fn flags(values: Vec<Option<bool>>) -> Vec<AttributeValue> {
    values
        .into_iter()
        .map(|f| f.map_or(AttributeValue::Null, |f| AttributeValue::Int(i64::from(f))))
        .collect()
}

/// Check `operations` against the columns the zones produce. Each
/// operation may read the outputs of the ones before it.
pub(crate) fn problems(operations: &[PostOperation], columns: &[String]) -> Vec<String> {
    let mut known: Vec<&str> = columns.iter().map(String::as_str).collect();
    let outputs: Vec<String> = operations.iter().map(PostOperation::output_column).collect();
    let mut problems = Vec::new();
    for (operation, output) in operations.iter().zip(&outputs) {
        problems.extend(operation.parameter_problems());
        for input in operation.input_columns() {
            if !known.contains(&input) {
                problems.push(format!("'{}': unknown column '{}'", output, input));
            }
        }
        if known.contains(&output.as_str()) {
            problems.push(format!("duplicate output column '{}'", output));
        }
        known.push(output);
    }
    problems
}

/// Append every operation's column to `table`
pub(crate) fn apply(operations: &[PostOperation], table: &mut ResultTable) {
    for operation in operations {
        let values = operation.compute(table);
        table.push_column(operation.output_column(), values);
    }
}
