//! Result table and per-job diagnostics

use polystat_core::AttributeValue;
use serde::{Deserialize, Serialize};

/// One zone's output values, aligned with [`ResultTable::columns`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub zone_id: String,
    pub values: Vec<AttributeValue>,
}

/// One row per zone, in input order.
///
/// `Null` cells mean "no data".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultTable {
    columns: Vec<String>,
    rows: Vec<ResultRow>,
}

impl ResultTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub(crate) fn extend(&mut self, rows: impl IntoIterator<Item = ResultRow>) {
        self.rows.extend(rows);
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    pub fn row(&self, zone_id: &str) -> Option<&ResultRow> {
        self.rows.iter().find(|r| r.zone_id == zone_id)
    }

    /// Cell at (`zone_id`, `column`)
    pub fn value(&self, zone_id: &str, column: &str) -> Option<&AttributeValue> {
        let index = self.column_index(column)?;
        self.row(zone_id).and_then(|r| r.values.get(index))
    }

    /// Numeric cell; `None` for "no data" and unknown cells
    pub fn number(&self, zone_id: &str, column: &str) -> Option<f64> {
        self.value(zone_id, column).and_then(AttributeValue::as_f64)
    }

    /// Numeric view of a whole column in row order
    pub fn column_numbers(&self, column: &str) -> Option<Vec<Option<f64>>> {
        let index = self.column_index(column)?;
        Some(
            self.rows
                .iter()
                .map(|r| r.values.get(index).and_then(AttributeValue::as_f64))
                .collect(),
        )
    }

    /// Append a column; `values` follows row order
    pub(crate) fn push_column(&mut self, name: String, values: Vec<AttributeValue>) {
        self.columns.push(name);
        let mut values = values.into_iter();
        for row in &mut self.rows {
            row.values.push(values.next().unwrap_or(AttributeValue::Null));
        }
    }
}

/// What went wrong for a zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Degenerate or self-intersecting geometry
    GeometryError,
    /// The zone's raster window could not be read
    RasterError,
    /// A formula could not be parsed; its columns stay empty for every zone
    ParseError,
    /// A formula failed for the zone
    EvaluationError,
}

/// A problem local to one zone. The job still completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub zone_id: String,
    pub kind: DiagnosticKind,
    /// Output field affected, if the problem is limited to one
    pub field: Option<String>,
    pub message: String,
}

impl Diagnostic {
    pub(crate) fn new(
        zone_id: &str,
        kind: DiagnosticKind,
        field: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            zone_id: zone_id.to_string(),
            kind,
            field: field.map(str::to_string),
            message: message.into(),
        }
    }
}

/// What one chunk produced; also the checkpoint payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct ChunkOutput {
    pub rows: Vec<ResultRow>,
    pub diagnostics: Vec<Diagnostic>,
}
