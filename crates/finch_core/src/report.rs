//! Classification report of a finished run.
//!
//! The training script writes a JSON object mapping every class label to
//! `{precision, recall, f1-score, support}`, followed by the synthetic
//! `micro avg`, `macro avg` and `weighted avg` rows of the same shape.
//! Newer report writers replace `micro avg` with a bare `accuracy` number,
//! which is kept as well.

use crate::error::MalformedResultsError;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Column order of a rendered table.
pub const METRIC_COLUMNS: [&str; 4] = ["precision", "recall", "f1-score", "support"];

/// Synthetic rows, in rendering order.
pub const AGGREGATE_ROWS: [&str; 3] = ["micro avg", "macro avg", "weighted avg"];

const ACCURACY: &str = "accuracy";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    #[serde(rename = "f1-score")]
    pub f1_score: f64,
    pub support: f64,
}

impl ClassMetrics {
    /// Values in [`METRIC_COLUMNS`] order.
    pub fn columns(&self) -> [f64; 4] {
        [self.precision, self.recall, self.f1_score, self.support]
    }

    fn from_row(label: &str, row: &Map<String, Value>) -> Result<Self, MalformedResultsError> {
        let field = |key: &'static str| -> Result<f64, MalformedResultsError> {
            let value = row.get(key).ok_or_else(|| MalformedResultsError::MissingKey {
                label: label.to_string(),
                key,
            })?;
            value
                .as_f64()
                .filter(|v| v.is_finite())
                .ok_or_else(|| MalformedResultsError::NotNumeric {
                    label: label.to_string(),
                    key,
                })
        };

        Ok(Self {
            precision: field("precision")?,
            recall: field("recall")?,
            f1_score: field("f1-score")?,
            support: field("support")?,
        })
    }
}

/// Parsed classification report.
///
/// Class rows keep the order of the source document. Aggregate rows are held in
/// [`AGGREGATE_ROWS`] order wherever they appeared, so two documents listing the same rows
/// compare equal. A table built with [`push`](Self::push) only parses back from
/// [`to_value`](Self::to_value) once it holds at least one aggregate row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsTable {
    classes: Vec<(String, ClassMetrics)>,
    aggregates: [Option<ClassMetrics>; AGGREGATE_ROWS.len()],
    accuracy: Option<f64>,
}

impl MetricsTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, label: impl Into<String>, metrics: ClassMetrics) {
        let label = label.into();
        if let Some(slot) = AGGREGATE_ROWS.iter().position(|a| *a == label) {
            self.aggregates[slot] = Some(metrics);
            return;
        }
        match self.classes.iter_mut().find(|(l, _)| *l == label) {
            Some((_, existing)) => *existing = metrics,
            None => self.classes.push((label, metrics)),
        }
    }

    pub fn set_accuracy(&mut self, accuracy: f64) {
        self.accuracy = Some(accuracy);
    }

    pub fn from_json(data: &[u8]) -> Result<Self, MalformedResultsError> {
        let value: Value = serde_json::from_slice(data)?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, MalformedResultsError> {
        let doc = value.as_object().ok_or(MalformedResultsError::NotAnObject)?;
        let mut table = Self::new();

        for (label, row) in doc {
            match row {
                Value::Object(fields) => table.push(label, ClassMetrics::from_row(label, fields)?),
                Value::Number(n) if label == ACCURACY => {
                    let accuracy = n.as_f64().filter(|v| v.is_finite()).ok_or_else(|| {
                        MalformedResultsError::NotNumeric {
                            label: label.clone(),
                            key: ACCURACY,
                        }
                    })?;
                    table.set_accuracy(accuracy);
                }
                _ => return Err(MalformedResultsError::RowNotAnObject(label.clone())),
            }
        }

        if table.aggregates().next().is_none() {
            return Err(MalformedResultsError::NoAggregate);
        }

        Ok(table)
    }

    /// Serializes back to the results file shape. Class rows come first, then `accuracy`, then aggregates.
    pub fn to_value(&self) -> Value {
        let mut doc = Map::new();
        let row = |m: &ClassMetrics| {
            serde_json::to_value(m).unwrap_or_else(|_| Value::Object(Map::new()))
        };

        for (label, metrics) in self.classes() {
            doc.insert(label.to_string(), row(metrics));
        }
        if let Some(accuracy) = self.accuracy {
            doc.insert(ACCURACY.to_string(), Value::from(accuracy));
        }
        for (label, metrics) in self.aggregates() {
            doc.insert(label.to_string(), row(metrics));
        }

        Value::Object(doc)
    }

    pub fn get(&self, label: &str) -> Option<&ClassMetrics> {
        match AGGREGATE_ROWS.iter().position(|a| *a == label) {
            Some(slot) => self.aggregates[slot].as_ref(),
            None => self.classes.iter().find(|(l, _)| l == label).map(|(_, m)| m),
        }
    }

    pub fn accuracy(&self) -> Option<f64> {
        self.accuracy
    }

    /// Per-class rows in document order.
    pub fn classes(&self) -> impl Iterator<Item = (&str, &ClassMetrics)> {
        self.classes.iter().map(|(l, m)| (l.as_str(), m))
    }

    /// Aggregate rows in [`AGGREGATE_ROWS`] order.
    pub fn aggregates(&self) -> impl Iterator<Item = (&str, &ClassMetrics)> {
        AGGREGATE_ROWS
            .iter()
            .zip(&self.aggregates)
            .filter_map(|(label, m)| m.as_ref().map(|m| (*label, m)))
    }

    pub fn render(&self, style: TableStyle) -> String {
        let fmt_num = |v: f64| match style.decimals {
            Some(d) => format!("{v:.d$}"),
            None => format!("{v:?}"),
        };

        let mut lines: Vec<(String, [String; 4])> = self
            .classes()
            .map(|(l, m)| (l.to_string(), m.columns().map(fmt_num)))
            .collect();
        if let Some(accuracy) = self.accuracy {
            lines.push((
                ACCURACY.to_string(),
                [String::new(), String::new(), fmt_num(accuracy), String::new()],
            ));
        }
        lines.extend(
            self.aggregates()
                .map(|(l, m)| (l.to_string(), m.columns().map(fmt_num))),
        );

        let label_width = lines.iter().map(|(l, _)| l.len()).max().unwrap_or(0);
        let widths: Vec<usize> = METRIC_COLUMNS
            .iter()
            .enumerate()
            .map(|(i, header)| {
                lines
                    .iter()
                    .map(|(_, cells)| cells[i].len())
                    .chain(std::iter::once(header.len()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let mut out = format!("{:label_width$}", "");
        for (header, width) in METRIC_COLUMNS.iter().zip(&widths) {
            out.push_str(&format!("  {header:>width$}"));
        }
        out.push('\n');

        for (label, cells) in &lines {
            out.push_str(&format!("{label:<label_width$}"));
            for (cell, width) in cells.iter().zip(&widths) {
                out.push_str(&format!("  {cell:>width$}"));
            }
            out.push('\n');
        }

        out
    }
}

impl fmt::Display for MetricsTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(TableStyle::default()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TableStyle {
    /// Fixed number of decimals. [`None`] prints the shortest exact representation.
    pub decimals: Option<usize>,
}
